//! `relaylock` operator binary.
//!
//! Opens the lock database, resumes pending re-arms, then runs one
//! subcommand. Commands that open a lock keep the process alive until the
//! re-arm completes; Ctrl-C leaves the re-arm record for the next start.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::AppConfig;
use relaylock_access::{AccessError, AccessOrchestrator, AccessRequest, Caller};
use relaylock_core::{GeoPoint, LockCode, LockLookup, QrToken, Role};
use relaylock_device::{AnyDeviceCloud, DeviceGateway};
use relaylock_storage::{AccessEventFilter, Database, Pagination};
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "relaylock")]
#[command(about = "Smart-lock access orchestration", long_about = None)]
#[command(version)]
struct Cli {
    /// SQLite database file
    #[arg(long, env = "DATABASE_PATH")]
    database: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Request access to a lock on behalf of a user
    Access {
        /// Requesting user id
        user_id: i64,
        /// Lock code, or QR token with --qr
        lock: String,
        /// Treat LOCK as a QR token
        #[arg(long)]
        qr: bool,
        #[arg(long, requires = "long", allow_negative_numbers = true)]
        lat: Option<f64>,
        #[arg(long, requires = "lat", allow_negative_numbers = true)]
        long: Option<f64>,
        /// Reference to the access photo
        #[arg(long)]
        photo: Option<String>,
    },
    /// Resume pending re-arms and wait for them
    Recover,
    /// Re-arm a degraded lock and clear its marker
    ClearDegraded { lock_id: i64 },
    /// List access events visible to a caller
    Events {
        /// Caller user id
        #[arg(long)]
        caller: i64,
        /// Caller role (admin, developer, market, common)
        #[arg(long)]
        role: Role,
        #[arg(long)]
        lock_id: Option<i64>,
        #[arg(long)]
        user_id: Option<i64>,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 10)]
        limit: u32,
    },
    /// Probe a lock's device and record its connectivity
    Probe { lock_id: i64 },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = AppConfig::from_env().context("invalid configuration")?;
    if let Some(path) = cli.database {
        config.database_path = path;
    }
    info!(
        database = %config.database_path,
        backend = %config.backend,
        timeout_ms = config.device_timeout.as_millis() as u64,
        "Loaded configuration"
    );

    let db = Database::new(config.database())
        .await
        .context("failed to open database")?;
    let cloud = config.device_cloud().context("failed to set up device cloud")?;
    let orchestrator = AccessOrchestrator::new(
        db.clone(),
        DeviceGateway::with_config(cloud, config.gateway()),
        config.rearm,
    );

    let report = orchestrator.recover_pending().await?;
    if !report.rescheduled.is_empty() || !report.degraded.is_empty() {
        info!(
            rescheduled = ?report.rescheduled,
            degraded = ?report.degraded,
            skipped = ?report.skipped,
            "Recovered re-arm state"
        );
    }

    let code = run(&orchestrator, cli.command).await;

    drain(&orchestrator).await;
    db.close().await;

    code
}

async fn run(
    orchestrator: &AccessOrchestrator<AnyDeviceCloud>,
    command: Command,
) -> Result<ExitCode> {
    match command {
        Command::Access {
            user_id,
            lock,
            qr,
            lat,
            long,
            photo,
        } => {
            let lookup = if qr {
                LockLookup::QrToken(QrToken::new(&lock)?)
            } else {
                LockLookup::Code(LockCode::new(&lock)?)
            };

            let mut request = AccessRequest::new(user_id, lookup);
            if let (Some(lat), Some(long)) = (lat, long) {
                request = request.with_geo(GeoPoint::new(lat, long)?);
            }
            if let Some(photo) = photo {
                request = request.with_photo_ref(photo);
            }

            match orchestrator.request_access(request).await {
                Ok(grant) => {
                    println!(
                        "granted: event {} on lock {}, relock at {}",
                        grant.event.id, grant.lock_id, grant.relock_at
                    );
                    Ok(ExitCode::SUCCESS)
                }
                Err(e) => rejected(e),
            }
        }
        Command::Recover => {
            let scheduled = orchestrator.scheduler().scheduled_locks();
            println!("re-arms running for locks {scheduled:?}");
            Ok(ExitCode::SUCCESS)
        }
        Command::ClearDegraded { lock_id } => match orchestrator.clear_degraded(lock_id).await {
            Ok(lock) => {
                println!("lock {} re-armed: {}", lock.id, lock.power_state);
                Ok(ExitCode::SUCCESS)
            }
            Err(e) => rejected(e),
        },
        Command::Events {
            caller,
            role,
            lock_id,
            user_id,
            page,
            limit,
        } => {
            let filter = AccessEventFilter {
                lock_id,
                user_id,
                ..Default::default()
            };
            let events = orchestrator
                .audit()
                .query(&Caller::new(caller, role), &filter, Pagination::new(page, limit))
                .await?;
            println!("{}", serde_json::to_string_pretty(&events)?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Probe { lock_id } => {
            let report = orchestrator.refresh_connectivity(lock_id).await?;
            println!(
                "lock {lock_id}: {}",
                if report.online { "online" } else { "offline" }
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Report a refused operation; infrastructure failures stay errors
fn rejected(e: AccessError) -> Result<ExitCode> {
    if !e.is_rejection() {
        return Err(e.into());
    }
    println!("{}: {}", e.code(), e.user_message());
    Ok(ExitCode::from(2))
}

/// Wait for running re-arms, or hand them to the next start on Ctrl-C
async fn drain(orchestrator: &AccessOrchestrator<AnyDeviceCloud>) {
    let scheduler = orchestrator.scheduler();
    if scheduler.scheduled_locks().is_empty() {
        return;
    }

    info!(locks = ?scheduler.scheduled_locks(), "Waiting for pending re-arms");
    tokio::select! {
        _ = scheduler.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, pending re-arms resume on next start");
            scheduler.shutdown();
        }
    }
}
