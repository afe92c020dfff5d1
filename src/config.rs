use anyhow::{Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::LaunchError;

pub const DEFAULT_PASSWORD: &str = "test-password";
pub const DEFAULT_PORT: u16 = 10280;
pub const DEFAULT_SERVER_IP: &str = "127.0.0.1";
pub const DEFAULT_DOWNLOAD_URL: &str =
    "https://github.com/apernet/hysteria/releases/latest/download/hysteria-linux-amd64";
pub const DEFAULT_CERT_CN: &str = "bing.com";
pub const DEFAULT_SNI: &str = "www.bing.com";
pub const DEFAULT_LINK_TAG: &str = "northflank";

const REDACTED: &str = "********";

/// Working directory name, relative to the current directory
pub const ROOT_DIR_NAME: &str = ".npm";

/// Effective launcher settings
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub password: String,
    pub port: u16,
    pub server_ip: String,
    pub root: PathBuf,
    pub download_url: String,
    pub cert_cn: String,
    pub sni: String,
    pub link_tag: String,
}

/// Artifact locations under the working directory
#[derive(Debug, Clone)]
pub struct Paths {
    pub root: PathBuf,
    pub binary: PathBuf,
    pub binary_tmp: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub config: PathBuf,
    pub share: PathBuf,
    pub log: PathBuf,
}

impl Paths {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            binary: root.join("hysteria"),
            binary_tmp: root.join("hysteria.tmp"),
            cert: root.join("cert.pem"),
            key: root.join("private.key"),
            config: root.join("config.yaml"),
            share: root.join("share.txt"),
            log: root.join("run.log"),
        }
    }

    /// Create the working directory if it is missing
    pub fn ensure_root(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create directory: {}", self.root.display()))
    }
}

impl Settings {
    /// Settings with every default applied, rooted at `root`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            password: DEFAULT_PASSWORD.to_string(),
            port: DEFAULT_PORT,
            server_ip: DEFAULT_SERVER_IP.to_string(),
            root: root.into(),
            download_url: DEFAULT_DOWNLOAD_URL.to_string(),
            cert_cn: DEFAULT_CERT_CN.to_string(),
            sni: DEFAULT_SNI.to_string(),
            link_tag: DEFAULT_LINK_TAG.to_string(),
        }
    }

    /// Load `PASSWORD`, `PORT` and `SERVER_IP` from the process environment
    pub fn from_env() -> Result<Self> {
        let root = default_root()?;
        Self::from_lookup(root, |key| std::env::var(key).ok())
    }

    /// Load the environment-backed settings through `lookup`.
    ///
    /// Unset and empty variables both fall back to the defaults.
    pub fn from_lookup<F>(root: PathBuf, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let mut settings = Self::with_root(root);
        if let Some(password) = get("PASSWORD") {
            settings.password = password;
        }
        if let Some(port) = get("PORT") {
            settings.port = parse_port(&port)?;
        }
        if let Some(server_ip) = get("SERVER_IP") {
            settings.server_ip = server_ip;
        }

        debug!(port = settings.port, server_ip = %settings.server_ip, "Loaded settings");
        Ok(settings)
    }

    pub fn paths(&self) -> Paths {
        Paths::new(&self.root)
    }

    /// JSON view of the settings with the password masked
    pub fn to_redacted_json(&self) -> Result<String> {
        let mut shown = self.clone();
        shown.password = REDACTED.to_string();
        serde_json::to_string_pretty(&shown).context("Failed to serialize settings")
    }
}

/// `$CWD/.npm`
pub fn default_root() -> Result<PathBuf> {
    let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
    Ok(cwd.join(ROOT_DIR_NAME))
}

/// Make `path` absolute against the current directory
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().context("Failed to resolve current directory")?;
    Ok(cwd.join(path))
}

pub fn parse_port(value: &str) -> std::result::Result<u16, LaunchError> {
    let port = value
        .trim()
        .parse::<u16>()
        .map_err(|e| LaunchError::Setting {
            name: "PORT",
            reason: format!("{:?} is not a port number ({})", value, e),
        })?;
    if port == 0 {
        return Err(LaunchError::Setting {
            name: "PORT",
            reason: "port 0 is not allowed".to_string(),
        });
    }
    Ok(port)
}
