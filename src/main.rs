use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;
use tracing::{error, info};

use hy2_launch::config::{self, Settings};
use hy2_launch::Launcher;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn build_cli() -> Command {
    Command::new("hy2-launch")
        .version(VERSION)
        .about("Fetch, configure and run a Hysteria 2 server in the foreground")
        .after_help(
            "Environment: PASSWORD, PORT and SERVER_IP supply the defaults for \
             --password, --port and --server-ip.",
        )
        .arg(
            Arg::new("password")
                .long("password")
                .value_name("PASSWORD")
                .help("Authentication password (default: $PASSWORD or test-password)"),
        )
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Listen port (default: $PORT or 10280)")
                .value_parser(clap::value_parser!(u16).range(1..=65535)),
        )
        .arg(
            Arg::new("server_ip")
                .long("server-ip")
                .value_name("ADDRESS")
                .help("Public address placed in the share link (default: $SERVER_IP or 127.0.0.1)"),
        )
        .arg(
            Arg::new("root")
                .short('r')
                .long("root")
                .value_name("DIR")
                .help("Working directory for the binary, certificate and config (default: ./.npm)"),
        )
        .arg(
            Arg::new("download_url")
                .long("download-url")
                .value_name("URL")
                .default_value(config::DEFAULT_DOWNLOAD_URL)
                .help("Where to fetch the hysteria binary from"),
        )
        .arg(
            Arg::new("cert_cn")
                .long("cert-cn")
                .value_name("NAME")
                .default_value(config::DEFAULT_CERT_CN)
                .help("Common name of the self-signed certificate"),
        )
        .arg(
            Arg::new("sni")
                .long("sni")
                .value_name("HOST")
                .default_value(config::DEFAULT_SNI)
                .help("Peer name advertised in the share link"),
        )
        .arg(
            Arg::new("link_tag")
                .long("link-tag")
                .value_name("TAG")
                .default_value(config::DEFAULT_LINK_TAG)
                .help("Fragment label of the share link"),
        )
        .arg(
            Arg::new("prepare_only")
                .long("prepare-only")
                .action(clap::ArgAction::SetTrue)
                .help("Install, generate the certificate and write the config, then exit"),
        )
        .arg(
            Arg::new("print_settings")
                .long("print-settings")
                .action(clap::ArgAction::SetTrue)
                .help("Print the effective settings as JSON and exit"),
        )
        .arg(
            Arg::new("log_json")
                .long("log-json")
                .action(clap::ArgAction::SetTrue)
                .help("Emit console logs as JSON"),
        )
}

fn resolve_settings(matches: &ArgMatches) -> Result<Settings> {
    resolve_settings_with(matches, |key| std::env::var(key).ok())
}

/// Command-line flag, then `env`, then the built-in default.
///
/// An environment value is only consulted (and validated) when the matching
/// flag is absent.
fn resolve_settings_with<F>(matches: &ArgMatches, env: F) -> Result<Settings>
where
    F: Fn(&str) -> Option<String>,
{
    let root = match matches.get_one::<String>("root") {
        Some(dir) => config::absolutize(&PathBuf::from(dir))?,
        None => config::default_root()?,
    };

    let from_cli = |key: &str| match key {
        "PASSWORD" => matches.get_one::<String>("password").cloned(),
        "PORT" => matches.get_one::<u16>("port").map(|port| port.to_string()),
        "SERVER_IP" => matches.get_one::<String>("server_ip").cloned(),
        _ => None,
    };

    let mut settings = Settings::from_lookup(root, |key| from_cli(key).or_else(|| env(key)))
        .context("Invalid environment")?;

    // An explicitly empty flag still wins
    if let Some(password) = matches.get_one::<String>("password") {
        settings.password = password.clone();
    }
    if let Some(server_ip) = matches.get_one::<String>("server_ip") {
        settings.server_ip = server_ip.clone();
    }
    if let Some(url) = matches.get_one::<String>("download_url") {
        settings.download_url = url.clone();
    }
    if let Some(cn) = matches.get_one::<String>("cert_cn") {
        settings.cert_cn = cn.clone();
    }
    if let Some(sni) = matches.get_one::<String>("sni") {
        settings.sni = sni.clone();
    }
    if let Some(tag) = matches.get_one::<String>("link_tag") {
        settings.link_tag = tag.clone();
    }

    Ok(settings)
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();
    let settings = resolve_settings(&matches).context("Failed to resolve settings")?;

    if matches.get_flag("print_settings") {
        println!("{}", settings.to_redacted_json()?);
        return Ok(());
    }

    init_tracing(matches.get_flag("log_json"));
    info!("Starting hy2-launch v{}", VERSION);
    info!("Working directory: {}", settings.root.display());

    let launcher = Launcher::new(settings).context("Failed to initialize launcher")?;

    let outcome = if matches.get_flag("prepare_only") {
        launcher.prepare().await.map(|prepared| {
            info!("Prepared; share link: {}", prepared.share_link);
            0
        })
    } else {
        launcher.run().await
    };

    match outcome {
        Ok(code) => {
            info!("Exiting with code {}", code);
            std::process::exit(code);
        }
        Err(e) => {
            error!("{:#}", e);
            launcher.record_failure(&e);
            Err(e)
        }
    }
}
