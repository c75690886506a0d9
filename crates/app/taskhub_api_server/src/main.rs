//! Taskhub API server binary.
//!
//! Serves the HTTP API over PostgreSQL and Redis and runs the domain-event
//! consumer in the same process. Prints `{"port": N}` to stdout once bound.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use taskhub_api::{AppState, config::ApiConfig};
use taskhub_core::cache::redis::RedisCache;
use taskhub_core::events::consumer::{ConsumerConfig, EventConsumer};
use taskhub_core::events::handlers::LoggingHandler;
use taskhub_core::events::redis::{RedisBrokerConfig, RedisStreamBroker};
use taskhub_core::retry::RetryPolicy;
use taskhub_core::store::postgres::PgStore;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// CLI arguments. Everything not listed here comes from the environment, see
/// [`ApiConfig::from_env`].
#[derive(Parser, Debug)]
#[command(name = "taskhub_api_server", about = "Taskhub API server")]
struct Args {
    /// Port to listen on (0 = ephemeral). Overrides the port in `BIND_ADDR`.
    #[arg(long)]
    port: Option<u16>,

    /// PostgreSQL connection URL.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Redis URL for the response cache and the event broker.
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 10)]
    max_connections: u32,

    /// Maximum number of pooled Redis connections, per client.
    #[arg(long, default_value_t = 16)]
    redis_pool_size: usize,

    /// Consumer group member name; keep it stable across restarts of this
    /// instance. Defaults to `taskhub-group-<hostname>`.
    #[arg(long, env = "CONSUMER_NAME")]
    consumer_name: Option<String>,

    /// Do not start the in-process event consumer.
    #[arg(long, default_value_t = false)]
    no_consumer: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // Write logs to stderr so stdout is reserved for the JSON port message.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,taskhub_api=debug,taskhub_core=debug".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = ApiConfig::from_env();
    if let Some(url) = args.database_url {
        config.database_url = url;
    }
    if let Some(url) = args.redis_url {
        config.redis_url = url;
    }
    if let Some(name) = args.consumer_name {
        config.consumer_name = name;
    }
    if let Some(port) = args.port {
        let host = config
            .bind_addr
            .rsplit_once(':')
            .map_or("127.0.0.1", |(host, _)| host);
        config.bind_addr = format!("{host}:{port}");
    }

    info!(bind_addr = %config.bind_addr, app_env = %config.app_env, "starting taskhub_api_server");

    info!(max_connections = args.max_connections, "configuring connection pool");
    let pool = PgPoolOptions::new()
        .max_connections(args.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect(&config.database_url)
        .await?;

    // Run database migrations.
    info!("running database migrations");
    taskhub_api::migrate(&pool).await?;

    let connect_retry = RetryPolicy::default();
    let cache = Arc::new(
        RedisCache::connect(
            &config.redis_url,
            args.redis_pool_size,
            config.broker_connect_timeout,
            &connect_retry,
        )
        .await?,
    );
    let broker = Arc::new(
        RedisStreamBroker::connect(
            &RedisBrokerConfig {
                url: config.redis_url.clone(),
                partitions: config.event_partitions,
                min_replicas: config.broker_min_replicas,
                pool_size: args.redis_pool_size,
                connect_timeout: config.broker_connect_timeout,
                request_timeout: config.broker_request_timeout,
                claim_idle: config.consumer_claim_idle,
            },
            &connect_retry,
        )
        .await?,
    );

    let store = Arc::new(PgStore::new(pool));
    let consumer_group = config.consumer_group.clone();
    let consumer_name = config.consumer_name.clone();
    let bind_addr = config.bind_addr.clone();
    let state = AppState::new(config, store.clone(), store, cache.clone(), broker.clone())?;
    let events = state.events.clone();
    let app = taskhub_api::router(state);

    let cancel = CancellationToken::new();
    let consumer = if args.no_consumer {
        info!("event consumer disabled");
        None
    } else {
        info!(group = %consumer_group, consumer = %consumer_name, "starting event consumer");
        let mut consumer = EventConsumer::new(
            broker.clone(),
            ConsumerConfig {
                group: consumer_group,
                consumer_name,
                ..ConsumerConfig::default()
            },
        );
        LoggingHandler::register_all(&mut consumer);
        Some(consumer.spawn(cancel.clone()))
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    let local_addr = listener.local_addr()?;

    // Report the bound port as JSON on stdout so a supervisor can read it.
    println!("{}", serde_json::json!({"port": local_addr.port()}));
    info!(addr = %local_addr, "REST API listening");

    // Peer addresses feed the per-IP rate limiter.
    let api_result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown({
            let cancel = cancel.clone();
            async move {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("shutdown signal received"),
                    _ = cancel.cancelled() => {}
                }
            }
        })
        .await;

    // Stop consuming after the last request, then release the brokers.
    cancel.cancel();
    if let Some(handle) = consumer {
        let _ = handle.await;
    }
    events.shutdown().await;
    cache.shutdown();
    info!("taskhub_api_server stopped");

    api_result?;

    Ok(())
}
