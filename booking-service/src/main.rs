use anyhow::Result;
use booking_service::api::{self, AppState, WebhookConfig};
use booking_service::config::{Args, StoreKind};
use booking_service::confirmation::ConfirmationProcessor;
use booking_service::gateway::StripeCheckout;
use booking_service::notify::{CalendarNotifier, Dispatcher, KafkaNotifier, Notifier};
use booking_service::pipeline::BookingService;
use booking_service::store::{run_migrations, IdempotencyLedger, MemoryStore, PgStore, ReservationStore};
use booking_service::sweeper::ExpirySweeper;
use booking_service::token::{OAuthRefreshSource, TokenCache};
use clap::Parser;
use rdkafka::config::ClientConfig;
use rdkafka::producer::FutureProducer;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn open_store(args: &Args) -> Result<(Arc<dyn ReservationStore>, Arc<dyn IdempotencyLedger>)> {
    match args.store {
        StoreKind::Postgres => {
            run_migrations(&args.database_url)?;

            let store = Arc::new(PgStore::connect(&args.database_url).await?);
            let reservations: Arc<dyn ReservationStore> = store.clone();
            let ledger: Arc<dyn IdempotencyLedger> = store;
            Ok((reservations, ledger))
        }
        StoreKind::Memory => {
            warn!("Using the in-memory store; bookings are lost on restart");
            let store = Arc::new(MemoryStore::new());
            let reservations: Arc<dyn ReservationStore> = store.clone();
            let ledger: Arc<dyn IdempotencyLedger> = store;
            Ok((reservations, ledger))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let policy = args.booking_policy()?;
    let (store, ledger) = open_store(&args).await?;

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", &args.kafka_brokers)
        .set("message.timeout.ms", "5000")
        .create()?;

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(args.payments.call_timeout_secs))
        .build()?;

    let mut notifiers: Vec<Arc<dyn Notifier>> =
        vec![Arc::new(KafkaNotifier::new(producer, args.notification_topic.clone()))];
    match args.calendar.credentials() {
        Some(creds) => {
            let tokens = Arc::new(TokenCache::new(OAuthRefreshSource::new(
                http.clone(),
                args.calendar.oauth_token_url.clone(),
                creds.client_id.to_string(),
                creds.client_secret.to_string(),
                creds.refresh_token.to_string(),
            )));
            notifiers.push(Arc::new(CalendarNotifier::new(
                http.clone(),
                &args.calendar.calendar_api_base,
                creds.calendar_id,
                policy.hours.timezone,
                tokens,
            )));
            info!("Calendar sync enabled for {}", creds.calendar_id);
        }
        None => info!("Calendar sync disabled"),
    }
    let dispatcher = Dispatcher::new(notifiers, args.retry_policy());

    let gateway = Arc::new(StripeCheckout::new(
        args.payments.stripe_api_base.clone(),
        args.payments.stripe_secret_key.clone(),
        Duration::from_secs(args.payments.call_timeout_secs),
    )?);

    let bookings = BookingService::new(policy, store.clone(), gateway, dispatcher.clone());
    let confirmations = Arc::new(ConfirmationProcessor::new(store.clone(), ledger, dispatcher));

    let sweeper = ExpirySweeper::new(store, Duration::from_secs(args.schedule.sweep_interval_secs));
    tokio::spawn(async move {
        sweeper.run().await;
    });

    let app_state = AppState {
        bookings,
        confirmations,
        webhook: WebhookConfig {
            secret: args.payments.webhook_secret.clone(),
            tolerance_secs: args.payments.webhook_tolerance_secs,
        },
        fallback_phone: args.fallback_phone.clone(),
    };

    let app = api::create_router(app_state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    info!("Booking service started on port {}", args.port);
    info!("Accepting bookings at http://0.0.0.0:{}/bookings", args.port);

    axum::serve(listener, app).await?;

    Ok(())
}
