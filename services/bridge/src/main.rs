use bridge::connection::{self, BridgeContext};
use clap::{Arg, Command};
use messaging_agent::persistence::SessionStore;
use messaging_agent::{build_channel_api, Config};
use std::net::IpAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

fn validate_port_value(value: &str) -> Result<u16, String> {
    value.parse::<u16>().map_err(|_| "invalid port number".to_owned())
}

fn validate_bind_value(value: &str) -> Result<IpAddr, String> {
    value.parse::<IpAddr>().map_err(|_| "invalid bind address".to_owned())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "bridge starting");

    let matches = Command::new("messaging-agent bridge")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Local TCP control bridge for the messaging agent")
        .arg(
            Arg::new("bind")
                .help("The local address to listen for bridge connections on")
                .short('b')
                .long("bind")
                .value_parser(validate_bind_value)
                .default_value("127.0.0.1"),
        )
        .arg(
            Arg::new("port")
                .help("The local port to listen for bridge connections on")
                .short('p')
                .long("port")
                .value_parser(validate_port_value)
                .default_value("7071"),
        )
        .arg(
            Arg::new("api_url")
                .help("Base URL of the messaging API, overrides MESSAGING_API_URL")
                .long("api-url"),
        )
        .arg(
            Arg::new("api_key")
                .help("API key to authenticate with, overrides MESSAGING_API_KEY")
                .long("api-key"),
        )
        .get_matches();

    let bind = *matches.get_one::<IpAddr>("bind").expect("bind has a default");
    let port = *matches.get_one::<u16>("port").expect("port has a default");

    let mut config = Config::from_env().unwrap_or_else(|e| {
        error!(error = %e, "FATAL: invalid configuration");
        std::process::exit(1);
    });
    if let Some(url) = matches.get_one::<String>("api_url") {
        config.api_url = url.clone();
    }
    if let Some(key) = matches.get_one::<String>("api_key") {
        config.api_key = Some(key.clone());
    }

    let udp_host = url::Url::parse(&config.api_url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_owned))
        .unwrap_or_else(|| "127.0.0.1".to_owned());
    let api = build_channel_api(&config, &udp_host).await;
    let store = Arc::new(SessionStore::open_default());
    let ctx = BridgeContext { api, store };

    let listener = match TcpListener::bind((bind, port)).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, %bind, port, "FATAL: failed to bind bridge listener");
            std::process::exit(1);
        }
    };
    info!(%bind, port, "bridge listening");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(error = %e, "failed to accept bridge connection");
                continue;
            }
        };
        info!(%peer, "bridge connection accepted");
        let ctx = ctx.clone();
        tokio::spawn(async move {
            connection::serve_connection(stream, ctx).await;
        });
    }
}
