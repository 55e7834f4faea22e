//! Dashboard commands: run the scheduler, fetch once, inspect or clear the cache.

use std::fmt::{self, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local, TimeZone, Utc};
use tracing::info;

use super::report::{render, OutputFormat};
use crate::config::Config;
use crate::poller::{
    decide_startup, most_recent_half_hour_mark, next_half_hour_mark, Poller, StartupDecision,
    Trigger,
};
use crate::store::{FileStore, KeyValueStore};
use crate::webhook::{RecordSource, WebhookClient};
use crate::window::Window;

/// Build a poller wired to the configured webhook and file store.
pub fn build_poller(config: &Config) -> Result<Arc<Poller>> {
    let client = WebhookClient::new(config.webhook()).context("Failed to build webhook client")?;
    let store = FileStore::open(&config.store_path).with_context(|| {
        format!("Failed to open dashboard store {}", config.store_path.display())
    })?;
    let source: Arc<dyn RecordSource> = Arc::new(client);
    let store: Arc<dyn KeyValueStore> = Arc::new(store);
    Ok(Arc::new(Poller::new(source, store, config.poller())))
}

/// Run the scheduler until Ctrl+C, printing every published snapshot.
pub async fn run(config: &Config, format: OutputFormat) -> Result<()> {
    let poller = build_poller(config)?;
    let handle = Arc::clone(&poller).start();
    let mut snapshots = handle.subscribe();

    info!(
        window = %config.window,
        store = %config.store_path.display(),
        "🚀 Dashboard poller started"
    );

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if let Some(snapshot) = snapshot {
                    println!("{}", render(&snapshot, format)?);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\n👋 Poller stopped by user");
                break;
            }
        }
    }

    handle.stop().await;
    Ok(())
}

/// Single fetch-persist-print cycle.
pub async fn fetch(config: &Config, window: Window, format: OutputFormat) -> Result<()> {
    let poller = build_poller(config)?;
    let snapshot = poller.fetch_cycle(window, Trigger::Manual).await?;
    println!("{}", render(&snapshot, format)?);
    Ok(())
}

/// Print the cached snapshot without touching the network.
pub fn show(config: &Config, window: Window, format: OutputFormat) -> Result<()> {
    let poller = build_poller(config)?;
    match poller.cached_snapshot(window)? {
        Some(snapshot) => println!("{}", render(&snapshot, format)?),
        None => println!("No cached dashboard data in {}", config.store_path.display()),
    }
    Ok(())
}

/// Remove all persisted dashboard state.
pub fn clear(config: &Config) -> Result<()> {
    let poller = build_poller(config)?;
    poller.cache().clear()?;
    println!("🗑️  Cleared dashboard cache {}", config.store_path.display());
    Ok(())
}

/// Show the current half-hour marks and what a fresh start would do.
pub fn marks(config: &Config) -> Result<()> {
    let poller = build_poller(config)?;
    let last_updated = poller.cache().last_updated()?;
    let last_fetch = poller.cache().last_fetch_time()?;
    print!("{}", describe_marks(Utc::now(), &Local, last_updated, last_fetch));
    Ok(())
}

/// Marks are computed on UTC, as the scheduler does, and only displayed in `tz`.
fn describe_marks<Tz>(
    now: DateTime<Utc>,
    tz: &Tz,
    last_updated: Option<DateTime<Utc>>,
    last_fetch: Option<DateTime<Utc>>,
) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let show = |at: DateTime<Utc>, pattern: &str| at.with_timezone(tz).format(pattern).to_string();
    let mut out = String::new();

    let _ = writeln!(out, "Now:              {}", show(now, "%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(
        out,
        "Last half-hour:   {}",
        show(most_recent_half_hour_mark(&now), "%H:%M")
    );
    let _ = writeln!(
        out,
        "Next half-hour:   {}",
        show(next_half_hour_mark(&now), "%H:%M")
    );
    match last_updated {
        Some(at) => {
            let _ = writeln!(out, "Cache updated at: {}", show(at, "%Y-%m-%d %H:%M"));
        }
        None => {
            let _ = writeln!(out, "Cache updated at: never");
        }
    }
    if let Some(at) = last_fetch {
        let _ = writeln!(out, "Last fetch:       {}", show(at, "%Y-%m-%d %H:%M:%S"));
    }

    let _ = match decide_startup(now, last_updated) {
        StartupDecision::FetchNow { .. } => writeln!(out, "On start:         fetch immediately"),
        StartupDecision::WaitForBoundary { delay, .. } => writeln!(
            out,
            "On start:         show cached data, fetch in {}m {}s",
            delay.num_minutes(),
            delay.num_seconds() % 60
        ),
    };
    out
}
