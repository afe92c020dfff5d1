//! End-to-end launch tests against a local HTTP stub.
//!
//! The stub stands in for the release host so downloads never leave the
//! machine; a shell script stands in for the proxy binary.

use axum::response::{Html, Redirect};
use axum::routing::get;
use axum::Router;
use std::os::unix::fs::PermissionsExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

use hy2_launch::cert::CertOutcome;
use hy2_launch::install::InstallOutcome;
use hy2_launch::{LaunchError, Launcher, Settings};

const FAKE_ELF: &[u8] = b"\x7fELF\x02\x01\x01\x00not-really-a-binary";

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

fn release_host(hits: Arc<AtomicUsize>) -> Router {
    Router::new()
        .route(
            "/hysteria-linux-amd64",
            get(move || {
                let hits = hits.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    FAKE_ELF.to_vec()
                }
            }),
        )
        .route(
            "/latest",
            get(|| async { Redirect::temporary("/hysteria-linux-amd64") }),
        )
        .route(
            "/html",
            get(|| async { Html("<!DOCTYPE html><html>moved</html>") }),
        )
}

#[tokio::test]
async fn test_prepare_then_rerun_is_idempotent() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base = serve(release_host(hits.clone())).await;
    let dir = tempdir().unwrap();

    let mut settings = Settings::with_root(dir.path().join(".npm"));
    settings.download_url = format!("{}/hysteria-linux-amd64", base);
    settings.password = "correct-horse".to_string();
    settings.port = 20443;
    settings.server_ip = "203.0.113.5".to_string();

    let launcher = Launcher::new(settings.clone()).unwrap();
    let first = launcher.prepare().await.unwrap();
    assert_eq!(first.install, InstallOutcome::Installed);
    assert_eq!(first.cert, CertOutcome::Generated);
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    let paths = launcher.paths();
    assert_eq!(std::fs::read(&paths.binary).unwrap(), FAKE_ELF);
    let mode = std::fs::metadata(&paths.binary).unwrap().permissions().mode();
    assert_eq!(mode & 0o777, 0o755);
    let cert_before = std::fs::read(&paths.cert).unwrap();

    let config = std::fs::read_to_string(&paths.config).unwrap();
    assert!(config.starts_with("listen: :20443\n"));
    assert!(config.contains("  password: \"correct-horse\"\n"));
    assert!(config.contains(&format!("  cert: {}\n", paths.cert.display())));
    assert!(config.contains(&format!("  key: {}\n", paths.key.display())));
    assert_eq!(
        std::fs::read_to_string(&paths.share).unwrap(),
        "hysteria2://correct-horse@203.0.113.5:20443/?insecure=1&alpn=h3&peer=www.bing.com#northflank"
    );

    let again = Launcher::new(settings).unwrap();
    let second = again.prepare().await.unwrap();
    assert_eq!(second.install, InstallOutcome::AlreadyPresent);
    assert_eq!(second.cert, CertOutcome::AlreadyPresent);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read(&again.paths().cert).unwrap(), cert_before);

    let run_log = std::fs::read_to_string(&again.paths().log).unwrap();
    assert!(run_log.contains("hysteria installed"));
    assert!(run_log.contains("hysteria already present, skipping download"));
    assert!(run_log.contains("certificate already present"));
}

#[tokio::test]
async fn test_download_follows_redirect() {
    let hits = Arc::new(AtomicUsize::new(0));
    let base = serve(release_host(hits.clone())).await;
    let dir = tempdir().unwrap();

    let mut settings = Settings::with_root(dir.path());
    settings.download_url = format!("{}/latest", base);

    let launcher = Launcher::new(settings).unwrap();
    let prepared = launcher.prepare().await.unwrap();
    assert_eq!(prepared.install, InstallOutcome::Installed);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_html_download_is_rejected() {
    let base = serve(release_host(Arc::new(AtomicUsize::new(0)))).await;
    let dir = tempdir().unwrap();

    let mut settings = Settings::with_root(dir.path());
    settings.download_url = format!("{}/html", base);

    let launcher = Launcher::new(settings).unwrap();
    let err = launcher.prepare().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<LaunchError>(),
        Some(LaunchError::NotElf { .. })
    ));
    assert!(!launcher.paths().binary.exists());
    assert!(!launcher.paths().binary_tmp.exists());
    // Nothing past the failed step ran
    assert!(!launcher.paths().config.exists());
}

#[tokio::test]
async fn test_http_error_status_is_fatal() {
    let base = serve(release_host(Arc::new(AtomicUsize::new(0)))).await;
    let dir = tempdir().unwrap();

    let mut settings = Settings::with_root(dir.path());
    settings.download_url = format!("{}/missing", base);

    let launcher = Launcher::new(settings).unwrap();
    let err = launcher.prepare().await.unwrap_err();
    match err.downcast_ref::<LaunchError>() {
        Some(LaunchError::Download { status, .. }) => assert_eq!(*status, 404),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_run_passes_through_child_exit_code() {
    let dir = tempdir().unwrap();
    let settings = Settings::with_root(dir.path());
    let launcher = Launcher::new(settings).unwrap();
    let paths = launcher.paths().clone();

    // Pre-installed stand-in binary: checks its arguments, then exits 3
    let script = "#!/bin/sh\n\
                  [ \"$1\" = server ] && [ \"$2\" = -c ] && [ -f \"$3\" ] || exit 99\n\
                  [ \"$GOMAXPROCS\" = 1 ] && [ \"$HY_NO_LOG_COLOR\" = 1 ] || exit 98\n\
                  exit 3\n";
    std::fs::write(&paths.binary, script).unwrap();
    std::fs::set_permissions(&paths.binary, std::fs::Permissions::from_mode(0o755)).unwrap();

    let code = launcher.run().await.unwrap();
    assert_eq!(code, 3);

    let run_log = std::fs::read_to_string(&paths.log).unwrap();
    let started = run_log.find("hysteria started in foreground").unwrap();
    let exited = run_log.find("hysteria exited, code=3").unwrap();
    assert!(started < exited);
}

#[tokio::test]
async fn test_record_failure_flushes_fatal_line() {
    let dir = tempdir().unwrap();
    let launcher = Launcher::new(Settings::with_root(dir.path())).unwrap();
    launcher.log().log("downloading hysteria: http://127.0.0.1:1/x");

    let err = anyhow::anyhow!("connection refused").context("Failed to install hysteria");
    launcher.record_failure(&err);

    assert_eq!(launcher.log().pending(), 0);
    let run_log = std::fs::read_to_string(&launcher.paths().log).unwrap();
    let lines: Vec<&str> = run_log.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].ends_with("] downloading hysteria: http://127.0.0.1:1/x"));
    assert!(lines[1].ends_with("] fatal: Failed to install hysteria: connection refused"));
}
