//! keyhold server — composition root.
//!
//! Loads the signing keys, wires the in-process store and event bus into
//! the auth service, logs audit events and sweeps expired records until
//! interrupted.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Arg, ArgAction, ArgMatches, Command};
use keyhold_auth::otp::EventBusDelivery;
use keyhold_auth::{AuthConfig, AuthService};
use keyhold_core::{AuthEvent, BroadcastEventBus};
use keyhold_db::MemoryStore;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("keyhold")
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("jwt-private-key-file")
                .long("jwt-private-key-file")
                .help("Ed25519 private key (PEM) used to sign tokens")
                .env("KEYHOLD_JWT_PRIVATE_KEY_FILE")
                .required(true),
        )
        .arg(
            Arg::new("jwt-public-key-file")
                .long("jwt-public-key-file")
                .help("Ed25519 public key (PEM) used to verify tokens")
                .env("KEYHOLD_JWT_PUBLIC_KEY_FILE")
                .required(true),
        )
        .arg(
            Arg::new("issuer")
                .long("issuer")
                .help("Issuer claim of every token")
                .env("KEYHOLD_ISSUER")
                .default_value("keyhold"),
        )
        .arg(
            Arg::new("pepper")
                .long("pepper")
                .help("Server-side secret mixed into password hashes")
                .env("KEYHOLD_PEPPER")
                .hide_env_values(true),
        )
        .arg(
            Arg::new("google-client-id")
                .long("google-client-id")
                .help("Enables Google sign-in for tokens issued to this OAuth client")
                .env("KEYHOLD_GOOGLE_CLIENT_ID"),
        )
        .arg(
            Arg::new("facebook-app-id")
                .long("facebook-app-id")
                .help("Enables Facebook sign-in for tokens of this app")
                .env("KEYHOLD_FACEBOOK_APP_ID")
                .requires("facebook-app-secret"),
        )
        .arg(
            Arg::new("facebook-app-secret")
                .long("facebook-app-secret")
                .help("Secret of the Facebook app, used to inspect user tokens")
                .env("KEYHOLD_FACEBOOK_APP_SECRET")
                .hide_env_values(true)
                .requires("facebook-app-id"),
        )
        .arg(
            Arg::new("apple-client-id")
                .long("apple-client-id")
                .help("Enables Sign in with Apple for this audience")
                .env("KEYHOLD_APPLE_CLIENT_ID"),
        )
        .arg(
            Arg::new("no-device-challenge")
                .long("no-device-challenge")
                .help("Issue tokens to unknown devices without a login challenge")
                .env("KEYHOLD_NO_DEVICE_CHALLENGE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("sweep-interval")
                .long("sweep-interval")
                .help("Seconds between purges of expired challenges and tokens")
                .env("KEYHOLD_SWEEP_INTERVAL_SECS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
}

fn read_pem(matches: &ArgMatches, id: &str) -> Result<String> {
    let path = matches
        .get_one::<String>(id)
        .with_context(|| format!("missing required argument: --{id}"))?;
    std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))
}

fn load_config(matches: &ArgMatches) -> Result<AuthConfig> {
    Ok(AuthConfig {
        jwt_private_key_pem: read_pem(matches, "jwt-private-key-file")?,
        jwt_public_key_pem: read_pem(matches, "jwt-public-key-file")?,
        jwt_issuer: matches
            .get_one::<String>("issuer")
            .cloned()
            .unwrap_or_else(|| "keyhold".into()),
        pepper: matches.get_one::<String>("pepper").cloned(),
        google_client_id: matches.get_one::<String>("google-client-id").cloned(),
        facebook_app_id: matches.get_one::<String>("facebook-app-id").cloned(),
        facebook_app_secret: matches.get_one::<String>("facebook-app-secret").cloned(),
        apple_client_id: matches.get_one::<String>("apple-client-id").cloned(),
        require_device_challenge: !matches.get_flag("no-device-challenge"),
        ..AuthConfig::default()
    })
}

/// Log every event without its secrets. Codes are handed to the
/// notification collaborator subscribed to the same bus.
async fn log_events(bus: BroadcastEventBus) {
    let mut events = bus.subscribe();
    loop {
        match events.recv().await {
            Ok(AuthEvent::TokenReplay {
                user_id, revoked, ..
            }) => warn!(%user_id, revoked, "refresh token replay"),
            Ok(event) => info!(topic = event.topic(), user_id = %event.user_id(), "auth event"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event log lagging"),
            Err(RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keyhold=info")),
        )
        .json()
        .init();

    let matches = cli().get_matches();
    let config = load_config(&matches)?;
    let sweep_every = Duration::from_secs(
        matches
            .get_one::<u64>("sweep-interval")
            .copied()
            .unwrap_or(300),
    );

    let bus = BroadcastEventBus::default();
    tokio::spawn(log_events(bus.clone()));

    let service = AuthService::new(
        MemoryStore::new(),
        config,
        Arc::new(bus.clone()),
        Arc::new(EventBusDelivery::new(bus)),
    )
    .context("failed to initialize auth service")?;

    info!(
        issuer = %service.config().jwt_issuer,
        sweep_secs = sweep_every.as_secs(),
        "keyhold started"
    );

    let mut sweep = tokio::time::interval(sweep_every);
    loop {
        tokio::select! {
            _ = sweep.tick() => match service.purge_expired(Utc::now()).await {
                Ok(report) => debug!(
                    challenges = report.challenges,
                    refresh_tokens = report.refresh_tokens,
                    "sweep finished"
                ),
                Err(e) => error!(error = %e, "sweep failed"),
            },
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for shutdown signal")?;
                break;
            }
        }
    }

    info!("keyhold stopped");
    Ok(())
}
