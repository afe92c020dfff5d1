use anyhow::{Context, Result};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::net::Ipv6Addr;
use std::path::Path;
use tokio::fs;
use url::Url;

use crate::config::{Paths, Settings};
use crate::error::LaunchError;
use crate::runlog::RunLog;

/// WHATWG userinfo set plus `%`, so literal percent signs survive decoding
const USERINFO: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b':')
    .add(b';')
    .add(b'<')
    .add(b'=')
    .add(b'>')
    .add(b'?')
    .add(b'@')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Render the Hysteria 2 server config.
///
/// The password is emitted as a double-quoted scalar so YAML-significant
/// characters in it survive.
pub fn render_config(port: u16, password: &str, cert: &Path, key: &Path) -> String {
    // A JSON string literal is a valid YAML double-quoted scalar
    let password = serde_json::to_string(password).expect("serializing a str cannot fail");
    format!(
        r#"listen: :{port}

auth:
  type: password
  password: {password}

tls:
  cert: {cert}
  key: {key}
  disableSessionResumption: true
  alpn: []

log:
  level: warn

transport:
  udp:
    congestionControl: none
    hopInterval: 0
    recvBuffer: 524288
    sendBuffer: 524288
    mtu: 1200

server:
  workerThreads: 1
  maxConn: 5
  disableUDP: true
  udpIdleTimeout: 30s
  udpBatchSize: 1
  preferIPv6: false
"#,
        port = port,
        password = password,
        cert = cert.display(),
        key = key.display(),
    )
}

/// Build the `hysteria2://` client link
pub fn share_link(settings: &Settings) -> Result<String, LaunchError> {
    let host = match settings.server_ip.parse::<Ipv6Addr>() {
        Ok(ip) => format!("[{}]", ip),
        Err(_) => settings.server_ip.clone(),
    };

    let invalid = |reason: String| LaunchError::Setting {
        name: "SERVER_IP",
        reason,
    };

    let mut url = Url::parse(&format!("hysteria2://user@{}:{}/", host, settings.port))
        .map_err(|e| invalid(format!("{:?} does not form a valid link: {}", settings.server_ip, e)))?;
    let password = utf8_percent_encode(&settings.password, USERINFO).to_string();
    url.set_username(&password)
        .map_err(|_| invalid("link has no host to attach the password to".to_string()))?;
    url.set_query(Some(&format!(
        "insecure=1&alpn=h3&peer={}",
        settings.sni
    )));
    url.set_fragment(Some(&settings.link_tag));

    Ok(url.to_string())
}

/// Write `config.yaml` and `share.txt`, then flush the run log
pub async fn write_config(settings: &Settings, paths: &Paths, log: &RunLog) -> Result<String> {
    let config = render_config(settings.port, &settings.password, &paths.cert, &paths.key);
    fs::write(&paths.config, config)
        .await
        .with_context(|| format!("Failed to write {}", paths.config.display()))?;
    log.log("config.yaml written");

    let link = share_link(settings)?;
    fs::write(&paths.share, &link)
        .await
        .with_context(|| format!("Failed to write {}", paths.share.display()))?;
    log.log(format!("share link: {}", link));

    log.flush()?;
    Ok(link)
}
