use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::config::Paths;
use crate::error::LaunchError;
use crate::runlog::RunLog;

/// First two bytes of every ELF file
pub const ELF_MAGIC: [u8; 2] = [0x7f, b'E'];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    AlreadyPresent,
    Installed,
}

pub fn is_elf(bytes: &[u8]) -> bool {
    bytes.len() >= ELF_MAGIC.len() && bytes[..ELF_MAGIC.len()] == ELF_MAGIC
}

/// Make sure the proxy binary exists, downloading it from `url` if needed.
///
/// An existing binary is trusted as-is and no request is made. A fresh
/// download goes to the temporary path first and only replaces the binary
/// once it passes the ELF sniff.
pub async fn install_binary(url: &str, paths: &Paths, log: &RunLog) -> Result<InstallOutcome> {
    if fs::try_exists(&paths.binary).await.unwrap_or(false) {
        log.log("hysteria already present, skipping download");
        return Ok(InstallOutcome::AlreadyPresent);
    }

    log.log(format!("downloading hysteria: {}", url));
    download(url, &paths.binary_tmp).await?;

    if let Err(e) = finalize(&paths.binary_tmp, &paths.binary).await {
        if let Err(rm) = fs::remove_file(&paths.binary_tmp).await {
            warn!("Failed to remove {}: {}", paths.binary_tmp.display(), rm);
        }
        return Err(e);
    }

    log.log("hysteria installed");
    Ok(InstallOutcome::Installed)
}

/// Stream `url` into `dest`, following redirects
pub async fn download(url: &str, dest: &Path) -> Result<()> {
    let client = reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(DOWNLOAD_TIMEOUT)
        .build()?;

    let mut response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to request {}", url))?;

    if !response.status().is_success() {
        return Err(LaunchError::Download {
            url: url.to_string(),
            status: response.status().as_u16(),
        }
        .into());
    }

    let mut file = fs::File::create(dest)
        .await
        .with_context(|| format!("Failed to create {}", dest.display()))?;

    let mut written = 0u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .with_context(|| format!("Failed to read response body from {}", url))?
    {
        file.write_all(&chunk)
            .await
            .with_context(|| format!("Failed to write {}", dest.display()))?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    debug!("Downloaded {} bytes to {}", written, dest.display());
    Ok(())
}

/// Sniff, chmod 0755 and move `tmp` onto `binary`
async fn finalize(tmp: &Path, binary: &Path) -> Result<()> {
    let magic = read_magic(tmp).await?;
    if !is_elf(&magic) {
        return Err(LaunchError::NotElf {
            path: tmp.to_path_buf(),
            magic,
        }
        .into());
    }

    set_mode(tmp, 0o755).await?;
    fs::rename(tmp, binary)
        .await
        .with_context(|| format!("Failed to move {} to {}", tmp.display(), binary.display()))?;
    Ok(())
}

async fn read_magic(path: &Path) -> Result<Vec<u8>> {
    let file = fs::File::open(path)
        .await
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut magic = Vec::with_capacity(ELF_MAGIC.len());
    file.take(ELF_MAGIC.len() as u64)
        .read_to_end(&mut magic)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(magic)
}

pub(crate) async fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .await
        .with_context(|| format!("Failed to chmod {:o} {}", mode, path.display()))
}
