//! Self-signed TLS material for the proxy.
//!
//! Produces an EC prime256v1 key and a SHA-256 signed X.509 certificate
//! whose subject and issuer are both `CN=<cn>`.

use anyhow::{Context, Result};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::PKey;
use openssl::x509::{X509Builder, X509NameBuilder};
use tokio::fs;

use crate::config::Paths;
use crate::error::LaunchError;
use crate::install::set_mode;
use crate::runlog::RunLog;

pub const VALIDITY_DAYS: u32 = 3650;

#[derive(Debug, Clone)]
pub struct GeneratedCertificate {
    /// X.509 certificate, PEM
    pub cert_pem: Vec<u8>,
    /// SEC1 EC private key, PEM
    pub key_pem: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertOutcome {
    AlreadyPresent,
    Generated,
}

fn cert_err(stage: &str) -> impl FnOnce(ErrorStack) -> LaunchError + '_ {
    move |e| LaunchError::Certificate(format!("{}: {}", stage, e))
}

pub fn generate_self_signed(cn: &str, days: u32) -> Result<GeneratedCertificate, LaunchError> {
    let group =
        EcGroup::from_curve_name(Nid::X9_62_PRIME256V1).map_err(cert_err("curve lookup"))?;
    let ec_key = EcKey::generate(&group).map_err(cert_err("key generation"))?;
    let key_pem = ec_key
        .private_key_to_pem()
        .map_err(cert_err("key encoding"))?;
    let pkey = PKey::from_ec_key(ec_key).map_err(cert_err("key wrapping"))?;

    let mut name = X509NameBuilder::new().map_err(cert_err("subject"))?;
    name.append_entry_by_nid(Nid::COMMONNAME, cn)
        .map_err(cert_err("subject"))?;
    let name = name.build();

    // 159 random bits keeps the serial positive and under 20 octets
    let serial = BigNum::new()
        .and_then(|mut bn| bn.rand(159, MsbOption::MAYBE_ZERO, false).map(|_| bn))
        .and_then(|bn| bn.to_asn1_integer())
        .map_err(cert_err("serial"))?;

    let not_before = Asn1Time::days_from_now(0).map_err(cert_err("validity"))?;
    let not_after = Asn1Time::days_from_now(days).map_err(cert_err("validity"))?;

    let mut builder = X509Builder::new().map_err(cert_err("builder"))?;
    builder.set_version(2).map_err(cert_err("builder"))?;
    builder
        .set_serial_number(&serial)
        .map_err(cert_err("builder"))?;
    builder.set_subject_name(&name).map_err(cert_err("builder"))?;
    builder.set_issuer_name(&name).map_err(cert_err("builder"))?;
    builder.set_pubkey(&pkey).map_err(cert_err("builder"))?;
    builder
        .set_not_before(&not_before)
        .map_err(cert_err("builder"))?;
    builder
        .set_not_after(&not_after)
        .map_err(cert_err("builder"))?;
    builder
        .sign(&pkey, MessageDigest::sha256())
        .map_err(cert_err("signing"))?;

    let cert_pem = builder.build().to_pem().map_err(cert_err("encoding"))?;

    Ok(GeneratedCertificate { cert_pem, key_pem })
}

/// Create `cert.pem` and `private.key` unless both already exist
pub async fn ensure_certificate(cn: &str, paths: &Paths, log: &RunLog) -> Result<CertOutcome> {
    let cert_exists = fs::try_exists(&paths.cert).await.unwrap_or(false);
    let key_exists = fs::try_exists(&paths.key).await.unwrap_or(false);
    if cert_exists && key_exists {
        log.log("certificate already present");
        return Ok(CertOutcome::AlreadyPresent);
    }

    let generated = generate_self_signed(cn, VALIDITY_DAYS)?;

    fs::write(&paths.key, &generated.key_pem)
        .await
        .with_context(|| format!("Failed to write {}", paths.key.display()))?;
    set_mode(&paths.key, 0o600).await?;
    fs::write(&paths.cert, &generated.cert_pem)
        .await
        .with_context(|| format!("Failed to write {}", paths.cert.display()))?;

    log.log(format!("self-signed certificate generated (CN={})", cn));
    Ok(CertOutcome::Generated)
}
