use std::io::ErrorKind;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use frontdesk_common::helpers::env_bool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use frontdesk_gateway::{db, router, MIGRATOR};

const PRUNE_INTERVAL: Duration = Duration::from_secs(300);
const PRUNE_AFTER_HOURS: i64 = 1;

fn check_public_bind_allowed(addr: SocketAddr) -> anyhow::Result<()> {
    if addr.ip().is_loopback() || env_bool("FRONTDESK_ALLOW_PUBLIC_BIND", false) {
        return Ok(());
    }
    anyhow::bail!("refusing to bind {addr}: set FRONTDESK_ALLOW_PUBLIC_BIND=1 to expose the gateway")
}

async fn open_database() -> anyhow::Result<SqlitePool> {
    let url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:frontdesk.db".into());
    let options = SqliteConnectOptions::from_str(&url)
        .with_context(|| format!("invalid DATABASE_URL '{url}'"))?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open {url}"))?;
    MIGRATOR.run(&pool).await.context("failed to run migrations")?;
    tracing::info!(%url, "gateway database ready");
    Ok(pool)
}

/// Drops the signaling log of calls that finished over an hour ago.
fn spawn_pruner(pool: SqlitePool) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            ticker.tick().await;
            let cutoff = chrono::Utc::now() - chrono::Duration::hours(PRUNE_AFTER_HOURS);
            match db::prune_ended_signals(&pool, cutoff).await {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "pruned signals of finished calls"),
                Err(err) => tracing::warn!("signal pruning failed: {:#}", err),
            }
        }
    });
}

async fn bind_listener(addr: SocketAddr) -> anyhow::Result<TcpListener> {
    check_public_bind_allowed(addr)?;
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == ErrorKind::AddrInUse => {
            let fallback = SocketAddr::new(addr.ip(), 0);
            tracing::warn!(%addr, %fallback, "gateway address in use, picking an ephemeral port");
            Ok(TcpListener::bind(fallback).await?)
        }
        Err(err) => Err(err).with_context(|| format!("failed to bind {addr}")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "frontdesk_gateway=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let pool = open_database().await?;
    spawn_pruner(pool.clone());

    let addr: SocketAddr = std::env::var("FRONTDESK_GATEWAY_BIND_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:3000".into())
        .parse()
        .context("invalid FRONTDESK_GATEWAY_BIND_ADDR")?;
    let listener = bind_listener(addr).await?;
    tracing::info!("gateway listening on {}", listener.local_addr()?);

    axum::serve(listener, router(pool))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down gateway");
        })
        .await?;

    Ok(())
}
