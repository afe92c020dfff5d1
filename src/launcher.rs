use anyhow::{Context, Result};
use tracing::info;

use crate::cert::{self, CertOutcome};
use crate::config::{Paths, Settings};
use crate::install::{self, InstallOutcome};
use crate::render;
use crate::runlog::RunLog;
use crate::supervisor::{self, ChildSpec};

/// What the preparation steps did
#[derive(Debug, Clone)]
pub struct Prepared {
    pub install: InstallOutcome,
    pub cert: CertOutcome,
    pub share_link: String,
}

/// Runs the launch sequence: install, certificate, config, supervise
pub struct Launcher {
    settings: Settings,
    paths: Paths,
    log: RunLog,
}

impl Launcher {
    pub fn new(settings: Settings) -> Result<Self> {
        let paths = settings.paths();
        paths.ensure_root()?;
        let log = RunLog::new(&paths.log);
        Ok(Self {
            settings,
            paths,
            log,
        })
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn log(&self) -> &RunLog {
        &self.log
    }

    /// Everything up to, but not including, starting the proxy
    pub async fn prepare(&self) -> Result<Prepared> {
        let install =
            install::install_binary(&self.settings.download_url, &self.paths, &self.log)
                .await
                .context("Failed to install hysteria")?;

        let cert = cert::ensure_certificate(&self.settings.cert_cn, &self.paths, &self.log)
            .await
            .context("Failed to prepare certificate")?;

        let share_link = render::write_config(&self.settings, &self.paths, &self.log)
            .await
            .context("Failed to write configuration")?;

        Ok(Prepared {
            install,
            cert,
            share_link,
        })
    }

    /// Prepare, then run the proxy in the foreground and return its exit code
    pub async fn run(&self) -> Result<i32> {
        let prepared = self.prepare().await?;
        info!("Share link: {}", prepared.share_link);

        supervisor::run_child(&ChildSpec::hysteria(&self.paths), &self.log).await
    }

    /// Record a fatal error in the run log before the process exits
    pub fn record_failure(&self, err: &anyhow::Error) {
        self.log.log(format!("fatal: {:#}", err));
        if let Err(e) = self.log.flush() {
            tracing::error!("Failed to flush run log: {:#}", e);
        }
    }
}
