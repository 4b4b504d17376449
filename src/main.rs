use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use diesel::{pg::PgConnection, Connection};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use dotenv::dotenv;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::info;

use fitsync_lib::archive::FsArchiveStore;
use fitsync_lib::cli::parse_args;
use fitsync_lib::config::Config;
use fitsync_lib::credentials::OauthSessionProvider;
use fitsync_lib::db::build_db_pool;
use fitsync_lib::logging::{format_error_report, init_logging};
use fitsync_lib::server::{setup_server_with_addr, AppState};
use fitsync_lib::sync_service::types::{RetryPolicy, WorkerConfig};
use fitsync_lib::sync_service::SyncService;

const DB_POOL_SIZE: usize = 16;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!();

fn run_initial_migrations(
    connection: &mut impl MigrationHarness<diesel::pg::Pg>,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    connection.run_pending_migrations(MIGRATIONS)?;
    Ok(())
}

/// Gracefully shuts down the server when SIGTERM or SIGINT arrives.
async fn handle_shutdown_signals(shutdown_token: CancellationToken) {
    let mut sigterm =
        signal(SignalKind::terminate()).expect("failed to register SIGTERM signal handler");
    let mut sigint =
        signal(SignalKind::interrupt()).expect("failed to register SIGINT signal handler");

    tokio::select! {
        _ = sigterm.recv() => {
            info!(event = "shutdown_signal", signal = "SIGTERM", "shutting down");
        }
        _ = sigint.recv() => {
            info!(event = "shutdown_signal", signal = "SIGINT", "shutting down");
        }
    }

    shutdown_token.cancel();
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    let args = parse_args();

    let mode = if args.sync_users.is_empty() {
        "server"
    } else {
        "oneshot"
    };
    init_logging("fitsync", mode, "info");

    let config = Config::from_env().expect("config incorrectly specified");

    let mut migration_conn =
        PgConnection::establish(&config.db_url).expect("could not connect for migrations");
    run_initial_migrations(&mut migration_conn).expect("pending migrations failed");

    let pool = build_db_pool(&config.db_url, DB_POOL_SIZE)
        .await
        .expect("could not initialize DB pool");

    let session_provider = Arc::new(
        OauthSessionProvider::new(
            config.token_url.clone(),
            config.oauth_client_id.clone(),
            config.oauth_client_secret.clone(),
            pool.clone(),
        )
        .expect("could not build session provider"),
    );
    let archive = Arc::new(FsArchiveStore::new(config.archive_root.clone()));

    let worker_config = WorkerConfig {
        retry_policy: RetryPolicy {
            retry_budget: args.retry_budget,
            ..RetryPolicy::default()
        },
        attempt_timeout: Duration::from_secs(args.attempt_timeout_secs),
        days_back: args.days_back,
    };
    let sync_service = SyncService::new(
        config.fit_api_url.clone(),
        pool,
        session_provider,
        archive,
        worker_config,
        config.data_sources.clone(),
        args.global_rps,
    );

    if !args.sync_users.is_empty() {
        match sync_service
            .run_sync(args.sync_users.clone(), args.categories.clone())
            .await
        {
            Ok(report) => {
                let rendered = serde_json::to_string_pretty(&report)
                    .expect("report serialization cannot fail");
                println!("{rendered}");
                if report.has_failures() {
                    std::process::exit(1);
                }
            }
            Err(err) => {
                eprintln!("{}", format_error_report(&err));
                std::process::exit(1);
            }
        }
        return;
    }

    let shutdown_token = CancellationToken::new();
    let state = Arc::new(AppState {
        sync_service,
        api_key: config.api_key.clone(),
        shutdown_token: shutdown_token.clone(),
    });

    let shutdown_handle = tokio::spawn(handle_shutdown_signals(shutdown_token));
    let server_handle = setup_server_with_addr(state, args.bind)
        .await
        .expect("failed to bind HTTP server");

    server_handle.await.expect("server task panicked");
    shutdown_handle.abort();
}
