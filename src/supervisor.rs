use anyhow::{Context, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::ffi::OsString;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use tokio::process::Command;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, warn};

use crate::config::Paths;
use crate::error::LaunchError;
use crate::runlog::RunLog;

/// Environment overrides applied on top of the inherited environment
pub const CHILD_ENV: [(&str, &str); 4] = [
    ("GOMAXPROCS", "1"),
    ("GOGC", "500"),
    ("HY_NO_LOG_COLOR", "1"),
    ("HY_UDP_BATCH", "0"),
];

/// What to launch
#[derive(Debug, Clone)]
pub struct ChildSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub envs: Vec<(String, String)>,
}

impl ChildSpec {
    /// `<bin> server -c <config>` with the runtime overrides
    pub fn hysteria(paths: &Paths) -> Self {
        Self {
            program: paths.binary.clone(),
            args: vec![
                "server".into(),
                "-c".into(),
                paths.config.clone().into_os_string(),
            ],
            envs: CHILD_ENV
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        cmd
    }
}

/// Exit code to report for a finished child; signal deaths map to 128 + signo
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signo)) => 128 + signo,
        (None, None) => 1,
    }
}

fn forward(pid: Option<Pid>, sig: Signal) {
    let Some(pid) = pid else {
        return;
    };
    debug!("Forwarding {} to child {}", sig, pid);
    if let Err(e) = kill(pid, sig) {
        warn!("Failed to forward {} to child {}: {}", sig, pid, e);
    }
}

/// Spawn the child in the foreground and wait for it.
///
/// SIGTERM, SIGINT and SIGHUP received meanwhile are relayed to the child;
/// the launcher itself keeps waiting until the child is gone.
pub async fn run_child(spec: &ChildSpec, log: &RunLog) -> Result<i32> {
    log.log("starting hysteria");

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut sighup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    let mut child = spec.command().spawn().map_err(|source| LaunchError::Spawn {
        path: spec.program.clone(),
        source,
    })?;
    let pid = child.id().map(|id| Pid::from_raw(id as i32));

    match pid {
        Some(pid) => log.log(format!("hysteria started in foreground (pid {})", pid)),
        None => log.log("hysteria started in foreground"),
    }
    log.flush()?;

    let status = loop {
        tokio::select! {
            status = child.wait() => break status.context("Failed to wait for child")?,
            _ = sigterm.recv() => forward(pid, Signal::SIGTERM),
            _ = sigint.recv() => forward(pid, Signal::SIGINT),
            _ = sighup.recv() => forward(pid, Signal::SIGHUP),
        }
    };

    let code = exit_code(status);
    match status.signal() {
        Some(signo) => log.log(format!("hysteria exited, signal={}, code={}", signo, code)),
        None => log.log(format!("hysteria exited, code={}", code)),
    }
    log.flush()?;

    Ok(code)
}
