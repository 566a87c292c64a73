use std::{sync::Arc, time::Duration};

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use client_core::{BindOutcome, CommerceError, CommerceSession, HttpBridge, SessionOptions};
use serde::Serialize;
use shared::{
    domain::{CustomerUserId, EventKind, VendorProductId},
    error::ApiError,
    protocol::ProfileAttributes,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::{load_settings, parse_log_level, Settings};

#[derive(Parser, Debug)]
#[command(name = "commerce-cli", about = "Drive a commerce session from the terminal")]
struct Cli {
    #[arg(long)]
    sdk_key: Option<String>,
    #[arg(long)]
    backend_url: Option<String>,
    #[arg(long)]
    customer_user_id: Option<String>,
    #[arg(long)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch every paywall and its products.
    Paywalls,
    /// Purchase a product from the current paywalls.
    Purchase { vendor_product_id: String },
    Restore,
    Identify { user_id: String },
    Logout,
    UpdateProfile {
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        phone_number: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
        /// Custom attribute as key=value; may be repeated.
        #[arg(long = "custom", value_parser = parse_key_value)]
        custom: Vec<(String, String)>,
    },
    PurchaserInfo,
    Promo,
    /// Print pushed profile and promo events until the timeout or Ctrl-C.
    Listen {
        #[arg(long, default_value_t = 60)]
        seconds: u64,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.trim().is_empty() {
        return Err(format!("empty attribute name in '{raw}'"));
    }
    Ok((key.trim().to_string(), value.to_string()))
}

fn apply_overrides(mut settings: Settings, cli: &Cli) -> Result<Settings> {
    if let Some(v) = &cli.sdk_key {
        settings.sdk_key = Some(v.clone());
    }
    if let Some(v) = &cli.backend_url {
        settings.backend_url = v.clone();
    }
    if let Some(v) = &cli.customer_user_id {
        settings.customer_user_id = Some(v.clone());
    }
    if let Some(v) = &cli.log_level {
        settings.log_level = parse_log_level(v)?;
    }
    Ok(settings)
}

fn print_json(label: &str, value: &impl Serialize) -> Result<()> {
    println!("Result of: {label}");
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn report<T: Serialize>(label: &str, result: Result<T, CommerceError>) -> Result<()> {
    match result {
        Ok(value) => print_json(label, &value),
        Err(err) => {
            eprintln!("Error in: {label}");
            if let Some(detail) = err.backend_detail() {
                eprintln!(
                    "{}",
                    serde_json::to_string_pretty(&ApiError::from(detail.clone()))?
                );
            }
            Err(anyhow!(err).context(format!("{label} failed")))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = apply_overrides(load_settings()?, &cli)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.log_level.filter_directive()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let options = SessionOptions {
        log_level: settings.log_level,
    };
    let session = if settings.backend_url.trim().is_empty() {
        warn!("no backend url configured; running without a backend");
        CommerceSession::detached(options)
    } else {
        let bridge = HttpBridge::new(&settings.backend_url)
            .with_context(|| format!("invalid backend url '{}'", settings.backend_url))?;
        CommerceSession::with_options(Arc::new(bridge), options)
    };
    let activation = session
        .initialize(settings.require_sdk_key()?, settings.customer_user_id())
        .await
        .context("failed to activate commerce session")?;
    info!(
        "activated profile_id={} customer_user_id={:?}",
        activation.profile_id,
        session.current_user_id()
    );

    let outcome = run(&session, cli.command).await;
    session.teardown();
    outcome
}

async fn run(session: &Arc<CommerceSession>, command: Command) -> Result<()> {
    match command {
        Command::Paywalls => {
            let result = session
                .fetch_paywalls()
                .await
                .map(|snapshot| snapshot.paywalls.clone());
            report("Collect paywalls", result)
        }
        Command::Purchase { vendor_product_id } => {
            let vendor_product_id = VendorProductId::new(vendor_product_id);
            let snapshot = session
                .fetch_paywalls()
                .await
                .context("failed to load paywalls before purchase")?;
            let product = snapshot
                .find_product(&vendor_product_id)
                .cloned()
                .with_context(|| format!("product {vendor_product_id} is not in any paywall"))?;
            let result = session.purchase(product).await;
            if let Err(err) = &result {
                if err.is_user_cancellation() {
                    println!("Purchase cancelled");
                    return Ok(());
                }
            }
            report("Purchase", result)
        }
        Command::Restore => {
            let result = session.restore().await;
            if let Ok(restored) = &result {
                if restored.is_partial() {
                    println!(
                        "Restore partially succeeded: {} entitlement(s) failed validation",
                        restored.failed.len()
                    );
                }
            }
            report("Restore", result)
        }
        Command::Identify { user_id } => {
            let result = session.identify(CustomerUserId::new(user_id)).await;
            match result {
                Ok(BindOutcome::Unchanged) => {
                    println!("Result of: Identify user");
                    println!("already bound");
                    Ok(())
                }
                Ok(BindOutcome::Rebound(identity)) => report("Identify user", Ok(identity)),
                Err(err) => report::<()>("Identify user", Err(err)),
            }
        }
        Command::Logout => {
            let result = session.logout().await;
            report("Logout", result.map(|()| "logged out"))
        }
        Command::UpdateProfile {
            email,
            phone_number,
            first_name,
            last_name,
            custom,
        } => {
            let attributes = ProfileAttributes {
                email,
                phone_number,
                first_name,
                last_name,
                custom_attributes: custom.into_iter().collect(),
                ..ProfileAttributes::default()
            };
            if attributes.is_empty() {
                return Err(anyhow!("update-profile needs at least one attribute"));
            }
            report("Update profile", session.update_profile(attributes).await)
        }
        Command::PurchaserInfo => report("Get purchaser info", session.purchaser_info().await),
        Command::Promo => report("Collect promos", session.promo().await),
        Command::Listen { seconds } => listen(session, seconds).await,
    }
}

async fn listen(session: &Arc<CommerceSession>, seconds: u64) -> Result<()> {
    for kind in [EventKind::ProfileUpdated, EventKind::PromoReceived] {
        session.add_event_listener(kind, move |event| {
            let label = format!("[event] {}", kind.as_str());
            if let Err(err) = print_json(&label, event) {
                eprintln!("failed to render {label}: {err}");
            }
        });
    }
    println!("Listeners: {}", session.listener_count());

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = tokio::signal::ctrl_c() => {}
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
