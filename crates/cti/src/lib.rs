// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Orange CTI: the desktop-facing ACD/CTI server. One TCP listener
//! accepts agent desktop connections (C2, one task per socket); a single
//! managed link talks AMI to Asterisk (C1); two shared registries track
//! who is online and which queues they belong to (C4/C5); all
//! authentication and journaling goes through a narrow persistence trait
//! (C6).

pub mod ami;
pub mod config;
pub mod error;
pub mod group;
pub mod persistence;
pub mod registry;
pub mod session;
pub mod worker;

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::ami::AmiClient;
use crate::config::CtiConfig;
use crate::group::GroupBroker;
use crate::persistence::PostgresAdapter;
use crate::registry::{Registry, SessionCommand};
use crate::session::handler::{run_session, SessionContext};
use crate::session::protocol::QuoteStyle;

/// Run the CTI server until shutdown. Binds the desktop listener,
/// connects the AMI client, and spawns one task per accepted connection.
pub async fn run(mut config: CtiConfig) -> anyhow::Result<()> {
    config.apply_ini_overrides()?;

    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let pool = PgPoolOptions::new().max_connections(10).connect(&config.database_url()).await?;
    let persistence = Arc::new(PostgresAdapter::new(pool));

    let ami = AmiClient::spawn(
        config.asterisk_host.clone(),
        config.asterisk_port,
        config.asterisk_username.clone(),
        config.asterisk_secret.clone(),
        shutdown.clone(),
    );

    let ctx = Arc::new(SessionContext {
        registry: Arc::new(Registry::new()),
        groups: Arc::new(GroupBroker::new()),
        persistence,
        ami,
        quote: if config.single_quote_handshake { QuoteStyle::Single } else { QuoteStyle::Double },
        shutdown: shutdown.clone(),
    });

    let listener = TcpListener::bind(&addr).await?;
    info!("cti server listening on {addr}");

    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown_signal.cancel();
        }
    });

    let worker_pool = worker::WorkerPool::new(worker::worker_count());

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(err = %e, "accept failed");
                        continue;
                    }
                };

                let worker_id = worker_pool.assign();
                let session_ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    info!(%addr, worker_id, "session accepted");
                    run_session(socket, addr, session_ctx).await;
                });
            }
            _ = shutdown.cancelled() => {
                break;
            }
        }
    }

    drain(&ctx.registry).await;
    Ok(())
}

/// Graceful shutdown (§5): force-log-out every still-connected session so
/// desktops see a clean reason rather than a dropped socket.
async fn drain(registry: &Registry) {
    for handle in registry.snapshot().await {
        handle.send(SessionCommand::ForceLogout("server stop services".to_owned())).await;
    }
}

pub use crate::error::CtiError;
