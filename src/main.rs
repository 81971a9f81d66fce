//! CardVault server
//!
//! Wires the Postgres ledger, Redis locks and escrow, the provider adapters
//! and the funding job queue behind the HTTP API.

use actix_cors::Cors;
use actix_web::{http::header, middleware, web, App, HttpResponse, HttpServer};
use anyhow::Context;
use cardvault_api::AppState;
use cardvault_auth::JwtService;
use cardvault_cache::{RedisCache, RedisEscrowStore, RedisLockService};
use cardvault_core::traits::{
    CardAccountRepository, CardLedgerRepository, CardRepository, DisputeRepository, EscrowStore,
    JobQueue, JobStore, LedgerStore, LockService,
};
use cardvault_core::AppConfig;
use cardvault_db::{
    create_pool, run_migrations, PgCardAccountRepository, PgCardLedgerRepository,
    PgCardRepository, PgDisputeRepository, PgJobStore, PgLedgerStore,
};
use cardvault_providers::Providers;
use cardvault_services::{
    BalanceEngine, CardLifecycleService, CrossCurrencyDependencies, CrossCurrencyFundingService,
    DisputeService, DurableQueue, FundingSagaHandler, FundingService, IssuanceFeeService,
    LockManager, RetryingChargeExecutor, SagaDependencies,
};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "cardvault={lvl},cardvault_api={lvl},cardvault_services={lvl},cardvault_db={lvl},\
             cardvault_providers={lvl},reconciliation=info,actix_web=info,sqlx=warn",
            lvl = log_level
        ))
    });

    let json = env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);
    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .init();
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    info!("Starting CardVault v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("Failed to load configuration")?;

    info!("Connecting to database...");
    let pool = create_pool(&config.database).await?;
    run_migrations(&pool).await?;
    info!(
        "Database connection established with {} max connections",
        config.database.max_connections
    );

    info!("Connecting to Redis...");
    let redis = RedisCache::new(&config.redis.url).await?;
    redis.ping().await?;
    let lock_service: Arc<dyn LockService> = Arc::new(RedisLockService::new(redis.clone()));
    let escrow: Arc<dyn EscrowStore> = Arc::new(RedisEscrowStore::new(
        redis,
        config.funding.context_ttl_secs,
    ));

    let providers = Providers::from_config(&config.providers)?;

    let cards: Arc<dyn CardRepository> = Arc::new(PgCardRepository::new(pool.clone()));
    let accounts: Arc<dyn CardAccountRepository> =
        Arc::new(PgCardAccountRepository::new(pool.clone()));
    let entries: Arc<dyn CardLedgerRepository> =
        Arc::new(PgCardLedgerRepository::new(pool.clone()));
    let disputes: Arc<dyn DisputeRepository> = Arc::new(PgDisputeRepository::new(pool.clone()));
    let jobs: Arc<dyn JobStore> = Arc::new(PgJobStore::new(pool.clone()));
    let ledger: Arc<dyn LedgerStore> = Arc::new(PgLedgerStore::new(pool));

    let locks = LockManager::new(lock_service, &config.locks);
    let engine = Arc::new(BalanceEngine::new(
        ledger.clone(),
        locks.clone(),
        providers.notifier.clone(),
    ));
    let charges = RetryingChargeExecutor::new(providers.card_provider.clone(), &config.charges);

    let queue = Arc::new(DurableQueue::new(jobs, &config.queue));
    let job_queue: Arc<dyn JobQueue> = queue.clone();

    let saga = FundingSagaHandler::new(
        SagaDependencies {
            cards: cards.clone(),
            accounts: accounts.clone(),
            entries: entries.clone(),
            ledger: ledger.clone(),
            card_provider: providers.card_provider.clone(),
            fiat_wallet: providers.fiat_wallet.clone(),
            blockchain_wallet: providers.blockchain_wallet.clone(),
            exchange: providers.exchange.clone(),
            escrow: escrow.clone(),
            notifier: providers.notifier.clone(),
        },
        config.funding.clone(),
        locks.clone(),
        config.locks.funding_ttl(),
    );
    let worker = queue.start(Arc::new(saga))?;
    info!(
        concurrency = config.queue.concurrency,
        poll_interval_ms = config.queue.poll_interval_ms,
        visibility_timeout_secs = config.queue.visibility_timeout_secs,
        "Funding queue started"
    );

    let state = AppState {
        issuance_fees: Arc::new(IssuanceFeeService::new(
            cards.clone(),
            charges.clone(),
            engine.clone(),
            locks.clone(),
            config.fees.clone(),
            config.locks.fee_ttl(),
        )),
        funding: Arc::new(FundingService::new(
            cards.clone(),
            accounts.clone(),
            entries.clone(),
            ledger.clone(),
            job_queue.clone(),
            providers.notifier.clone(),
            locks.clone(),
            config.fees.clone(),
            config.queue.job_options(),
            config.locks.funding_ttl(),
        )),
        cross_currency: Arc::new(CrossCurrencyFundingService::new(
            CrossCurrencyDependencies {
                cards: cards.clone(),
                accounts,
                entries: entries.clone(),
                ledger: ledger.clone(),
                card_provider: providers.card_provider.clone(),
                exchange: providers.exchange.clone(),
                escrow,
                queue: job_queue,
            },
            locks.clone(),
            config.fees.clone(),
            config.funding.clone(),
            config.queue.job_options(),
            config.locks.funding_ttl(),
        )),
        lifecycle: Arc::new(CardLifecycleService::new(
            cards.clone(),
            entries.clone(),
            ledger,
            providers.card_provider.clone(),
            engine.clone(),
            locks.clone(),
            config.locks.funding_ttl(),
        )),
        disputes: Arc::new(DisputeService::new(
            cards,
            entries,
            disputes,
            providers.card_provider.clone(),
            charges,
            engine,
            locks,
            config.fees.clone(),
            config.disputes.clone(),
            config.locks.dispute_ttl(),
        )),
    };

    let jwt_service = Arc::new(
        JwtService::new(&config.auth.jwt_secret)
            .with_issuer(config.auth.jwt_issuer.clone())
            .with_leeway(config.auth.jwt_leeway_secs),
    );

    let origins = config.server.allowed_origins();
    let timeout = Duration::from_secs(config.server.timeout_secs);
    let bind_addr = config.server_addr();
    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, config.server.workers
    );

    HttpServer::new(move || {
        let allowed = origins.clone();
        let cors = Cors::default()
            .allowed_origin_fn(move |origin, _req_head| {
                origin
                    .to_str()
                    .map(|o| allowed.iter().any(|a| a == o))
                    .unwrap_or(false)
            })
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![
                header::AUTHORIZATION,
                header::ACCEPT,
                header::CONTENT_TYPE,
            ])
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(jwt_service.clone()))
            .app_data(web::Data::new(state.clone()))
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                let message = err.to_string();
                actix_web::error::InternalError::from_response(
                    err,
                    HttpResponse::BadRequest().json(serde_json::json!({
                        "error": "invalid_json",
                        "message": message,
                        "status": 400,
                    })),
                )
                .into()
            }))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::NormalizePath::trim())
            .service(web::scope("/api/v1").configure(cardvault_api::configure))
    })
    .workers(config.server.workers)
    .client_request_timeout(timeout)
    .bind(&bind_addr)?
    .run()
    .await?;

    warn!("HTTP server stopped, shutting down funding queue");
    worker.abort();
    Ok(())
}
