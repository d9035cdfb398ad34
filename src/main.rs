// SPDX-FileCopyrightText: 2022 Profian Inc. <opensource@profian.com>
// SPDX-License-Identifier: Apache-2.0

#![warn(rust_2018_idioms, unused_lifetimes, unused_qualifications, clippy::all)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use attestation::{CertBundle, CertificateBinder, DcapIssuer, Policy};
use attested_proxy_client::TrustBootstrapClient;
use attested_proxy_server::lifecycle::{Handle, Lifecycle};
use attested_proxy_server::tls::Identity;
use attested_proxy_server::{init_tracing, service_span, Config, Server, State};
use clap::{Args, Parser, Subcommand};
use confargs::{args, prefix_char_filter, Toml};
use http::Uri;
use reqwest::Url;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, Instrument};

/// Attested certificate distribution and TLS reverse proxy.
///
/// Any command line options prefixed with `@` are treated as paths to TOML
/// files holding further options.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    log: LogArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Args)]
struct LogArgs {
    /// Emit logs as JSON.
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, global = true, env = "LOG_DEBUG")]
    log_debug: bool,

    /// Tag every log line with a random id for this process.
    #[arg(long, global = true, env = "LOG_UID")]
    log_uid: bool,

    /// Service name attached to every log line.
    #[arg(long, global = true, env = "LOG_SERVICE")]
    log_service: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Bind the CA certificate to a quote, then serve it and the TLS proxy.
    Server(ServerArgs),

    /// Bootstrap trust from the certificate service and call the proxy.
    Client(ClientArgs),
}

#[derive(Debug, Args)]
struct ServerArgs {
    #[arg(long, env = "CERT_SERVICE_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    cert_service_listen_addr: SocketAddr,

    #[arg(long, env = "PROXY_LISTEN_ADDR", default_value = "0.0.0.0:8081")]
    proxy_listen_addr: SocketAddr,

    /// Plain http URL every proxied request is forwarded to.
    #[arg(long, env = "PROXY_TARGET_ADDR", default_value = "http://127.0.0.1:8082")]
    proxy_target_addr: Uri,

    /// Base URL of the DCAP quote service.
    #[arg(
        long,
        alias = "dummy-dcap-addr",
        env = "DCAP_ADDR",
        default_value = "http://127.0.0.1:8091"
    )]
    dcap_addr: Url,

    #[arg(long, env = "CERTIFICATE_FILE", default_value = "server.crt")]
    certificate_file: PathBuf,

    /// Certificate published by the certificate service and bound to the quote.
    #[arg(long, env = "CA_CERTIFICATE_FILE", default_value = "ca.crt")]
    ca_certificate_file: PathBuf,

    #[arg(long, env = "PRIVATE_KEY_FILE", default_value = "server.key")]
    private_key_file: PathBuf,

    /// Seconds in-flight requests get to finish after shutdown starts.
    #[arg(long, env = "SHUTDOWN_GRACE", default_value_t = 10)]
    shutdown_grace: u64,
}

#[derive(Debug, Args)]
struct ClientArgs {
    #[arg(long, env = "CERT_SERVICE", default_value = "http://127.0.0.1:8080")]
    cert_service: String,

    #[arg(long, env = "PROXY_URL", default_value = "https://127.0.0.1:8081")]
    proxy_url: Url,

    /// PEM file with the trusted attestation root certificates.
    #[arg(long, env = "ATTESTATION_ROOT")]
    attestation_root: PathBuf,
}

/// Turns SIGTERM and SIGINT into a shutdown request.
async fn signal_handler(handle: Handle) -> anyhow::Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).inspect_err(|error| {
        error!(?error, "failed to register a SIGTERM signal handler");
    })?;
    let mut sigint = signal(SignalKind::interrupt()).inspect_err(|error| {
        error!(?error, "failed to register a SIGINT signal handler");
    })?;

    loop {
        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received, beginning shutdown"),
            _ = sigint.recv() => info!("SIGINT received, beginning shutdown"),
        }
        handle.terminate();
    }
}

async fn server(args: ServerArgs) -> anyhow::Result<()> {
    let cert = std::fs::read(&args.ca_certificate_file).with_context(|| {
        format!(
            "failed to read CA certificate {}",
            args.ca_certificate_file.display()
        )
    })?;
    let identity = Identity::load(&args.certificate_file, &args.private_key_file)?;

    let binder = CertificateBinder::new(DcapIssuer::new(args.dcap_addr));
    let quote = binder
        .bind(&cert)
        .await
        .context("failed to bind CA certificate to an attestation quote")?;
    let state = State::new(CertBundle::new(cert, quote))?;

    let config = Config {
        cert_service_addr: args.cert_service_listen_addr,
        proxy_addr: args.proxy_listen_addr,
        upstream: args.proxy_target_addr,
        ..Default::default()
    };
    let server = Server::bind(config, state, identity).await?;

    let mut lifecycle = Lifecycle::new(Duration::from_secs(args.shutdown_grace));
    server.start(&mut lifecycle)?;

    let signals = signal_handler(lifecycle.handle());
    tokio::spawn(
        async move {
            if let Err(e) = signals.await {
                error!("signal handling disabled: {e:#}");
            }
        }
        .in_current_span(),
    );

    lifecycle.run().await
}

async fn client(args: ClientArgs) -> anyhow::Result<()> {
    let root = &args.attestation_root;
    let pem = std::fs::File::open(root)
        .with_context(|| format!("failed to open {}", root.display()))?;
    let policy = Policy::read(std::io::BufReader::new(pem))
        .with_context(|| format!("failed to read attestation roots from {}", root.display()))?;

    let trusted = TrustBootstrapClient::new(policy)
        .bootstrap(&args.cert_service)
        .await
        .into_result()
        .context("certificate was not trusted")?;

    let rsp = trusted
        .https_client()?
        .get(args.proxy_url.clone())
        .send()
        .await
        .with_context(|| format!("request to {} failed", args.proxy_url))?;

    let status = rsp.status();
    let body = rsp.text().await.context("failed to read proxy response")?;
    info!(%status, %body, "proxy response");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = args::<Toml>(prefix_char_filter::<'@'>)
        .context("Failed to parse config")
        .map(Cli::parse_from)?;

    init_tracing(cli.log.log_json, cli.log.log_debug)?;

    let default_service = match cli.command {
        Command::Server(..) => "proxy",
        Command::Client(..) => "proxy-client",
    };
    let service = cli.log.log_service.as_deref().unwrap_or(default_service);
    let span = service_span(service, cli.log.log_uid);

    let result = match cli.command {
        Command::Server(args) => server(args).instrument(span).await,
        Command::Client(args) => client(args).instrument(span).await,
    };
    if let Err(e) = &result {
        error!("{e:#}");
    }
    result
}
