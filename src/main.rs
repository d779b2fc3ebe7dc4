use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tracing::Level;

use badgecast_core::{listener_fn, BadgeCount, BadgeModel, ScopeId};
use badgecast_engine::{BadgeBroadcaster, BroadcasterConfig};
use badgecast_store::{BadgeRepo, BadgeStore, Database};
use badgecast_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "badgecast", about = "Inspect and drive the cached notification badge")]
struct Cli {
    /// Path to the badge cache database.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Persistence scope (one per signed-in session).
    #[arg(long, global = true, default_value = "default")]
    scope: String,

    /// Log level when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "warn")]
    log_level: Level,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the cached badge.
    Show,
    /// Publish a new badge value.
    Publish {
        #[arg(long)]
        count: u32,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        app_point: i64,
    },
    /// Purge the cached badge.
    Clear,
    /// Publish a run of increasing counts to a printing listener and subscriber.
    Simulate {
        #[arg(long, default_value_t = 5)]
        updates: u32,
        #[arg(long, default_value_t = 200)]
        interval_ms: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let _telemetry = init_telemetry(TelemetryConfig {
        log_level: cli.log_level,
        json: cli.json_logs,
        ..TelemetryConfig::default()
    });

    let db_path = cli.db.clone().unwrap_or_else(default_db_path);
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open badge database at {}", db_path.display()))?;
    let scope = ScopeId::from_raw(cli.scope.clone());
    let store = Arc::new(BadgeStore::persistent(BadgeRepo::new(db), scope));
    let broadcaster =
        Arc::new(BadgeBroadcaster::new(store)?.with_config(BroadcasterConfig::from_env()));

    match cli.command {
        Command::Show => match broadcaster.current() {
            Some(badge) => println!("{}", describe(&badge)),
            None => println!("no badge"),
        },
        Command::Publish { count, app_point } => {
            let badge = BadgeModel::from(BadgeCount::new(count, app_point));
            let _ = broadcaster.publish(badge.clone());
            println!("published {}", describe(&badge));
        }
        Command::Clear => {
            broadcaster.clear_badge();
            println!("badge cleared");
        }
        Command::Simulate {
            updates,
            interval_ms,
        } => simulate(&broadcaster, updates, Duration::from_millis(interval_ms)).await,
    }

    broadcaster.shutdown();
    Ok(())
}

async fn simulate(broadcaster: &Arc<BadgeBroadcaster>, updates: u32, interval: Duration) {
    let _ = broadcaster.register_badge_listener(listener_fn("printer", |badge| {
        println!("listener   <- {}", describe(badge));
        Ok(())
    }));

    let mut subscription = broadcaster.subscribe();
    let watcher = tokio::spawn(async move {
        while let Some(value) = subscription.next().await {
            match value {
                Some(badge) => println!("subscriber <- {}", describe(&badge)),
                None => println!("subscriber <- (empty)"),
            }
        }
    });

    let start = broadcaster.current().map_or(0, |b| b.count());
    for i in 1..=updates {
        let _ = broadcaster.publish_count(BadgeCount::new(start.saturating_add(i), i64::from(i) * 10));
        tokio::time::sleep(interval).await;
    }

    broadcaster.shutdown();
    let _ = watcher.await;
}

fn describe(badge: &BadgeModel) -> String {
    format!(
        "count={} app_point={} at {}",
        badge.count(),
        badge.app_point(),
        badge.timestamp().to_rfc3339()
    )
}

fn default_db_path() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
        .join(".badgecast")
        .join("badge.db")
}
