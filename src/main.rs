#![cfg_attr(not(test), deny(clippy::panic))]

use clap::Parser;
use matchpool_server::app::App;
use matchpool_server::config;
use matchpool_server::domain::notification::NotificationPreferences;
use matchpool_server::domain::user::{User, UserRole, UserStatus};
use matchpool_server::http;
use matchpool_server::logging;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Matchpool -- matchmaking and lobby backend for multiplayer games
#[derive(Parser, Debug)]
#[command(name = "matchpool-server")]
#[command(about = "An in-memory matchmaking and lobby backend with realtime event push")]
#[command(version)]
struct Cli {
    /// Validate configuration and exit without starting the server.
    /// Useful for CI/CD pipelines and pre-deployment checks.
    #[arg(long, short = 'c', conflicts_with = "print_config")]
    validate_config: bool,

    /// Print the loaded configuration to stdout (as JSON) and exit.
    #[arg(long, conflicts_with = "validate_config")]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = config::load();

    if cli.print_config {
        let json = serde_json::to_string_pretty(&cfg)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        println!("{json}");
        return Ok(());
    }

    let validation_result = config::validate_config_security(&cfg);
    if cli.validate_config {
        match validation_result {
            Ok(()) => {
                println!("Configuration validation passed");
                println!();
                println!("Configuration summary:");
                println!("  Port: {}", cfg.port);
                println!("  Storage backend: InMemory");
                println!("  Tick interval: {}s", cfg.matchmaking.tick_interval_secs);
                println!("  Min group size: {}", cfg.matchmaking.min_group_size);
                println!("  Auto-start delay: {}s", cfg.lobby.auto_start_delay_secs);
                println!("  Catalogue games: {}", cfg.catalog.games.len());
                println!(
                    "  Auth secret configured: {}",
                    cfg.security.auth_secret.is_some()
                );
                return Ok(());
            }
            Err(e) => {
                eprintln!("Configuration validation failed:\n{e}");
                std::process::exit(1);
            }
        }
    }

    // In production, validation failures abort startup.
    if config::is_production_mode() {
        validation_result.map_err(|e| anyhow::anyhow!("configuration invalid:\n{e}"))?;
    }

    logging::init_with_config(&cfg.logging);

    let port = cfg.port;
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let shutdown_grace = Duration::from_secs(cfg.server.shutdown_grace_secs);
    let seed_demo = cfg.server.seed_demo_data;

    tracing::info!(%addr, "Starting Matchpool server");

    let app = App::from_config(cfg).await?;
    if seed_demo {
        seed_demo_users(&app).await;
    }
    let _workers = app.spawn_workers();

    let router = http::create_router(app.clone());
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(
        %addr,
        "Server started - REST under /, WebSocket at /ws, health at /health"
    );

    let shutdown_app = app.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            tracing::info!("shutdown signal received; draining connections");
            shutdown_app.shutdown();
        })
        .await?;

    // The listener has drained (or the grace period decides for it).
    tokio::time::timeout(shutdown_grace, async {
        // Workers observe the cancellation token and finish their in-flight
        // batches; nothing further to join on explicitly.
        tokio::time::sleep(Duration::from_millis(100)).await;
    })
    .await
    .ok();

    tracing::info!("shutdown complete");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Development helper: two demo accounts so the API is usable out of the
/// box. Production user provisioning belongs to the identity service.
async fn seed_demo_users(app: &Arc<App>) {
    for (name, role) in [("demo-player", UserRole::Player), ("demo-admin", UserRole::Admin)] {
        let user = User {
            id: uuid::Uuid::new_v4(),
            display_name: name.to_string(),
            status: UserStatus::Active,
            role,
            karma: 75,
            game_skills: HashMap::new(),
            notification_preferences: NotificationPreferences::default(),
            created_at: chrono::Utc::now(),
        };
        let token = app.verifier.issue(user.id, role, chrono::Duration::days(7));
        match app.storage.upsert_user(user).await {
            Ok(()) => tracing::info!(name, token = %token, "seeded demo user"),
            Err(err) => tracing::warn!(name, error = %err, "failed to seed demo user"),
        }
    }
}
