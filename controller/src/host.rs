use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{Local, NaiveDateTime, SecondsFormat, Utc};
use chrono_tz::Tz;
use tokio::{
    net::TcpListener,
    sync::{mpsc, watch},
    time::MissedTickBehavior,
};
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, error, info, warn};

use roompower_common::{ControllerConfig, HealthStatus, RoomStatePayload};

use crate::{
    channel::{Feedback, MqttChannel},
    reconciler::{Reconciler, TickOutcome},
    store::MongoBookingSource,
};

#[derive(Clone)]
struct AppState {
    reconciler: Arc<Reconciler>,
    started: Instant,
}

/// Source of local wall-clock time for booking evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocalClock {
    Zone(Tz),
    System,
}

impl LocalClock {
    fn from_config(timezone: Option<&str>) -> anyhow::Result<Self> {
        match timezone {
            None => Ok(Self::System),
            Some(name) => name
                .parse::<Tz>()
                .map(Self::Zone)
                .map_err(|err| anyhow!("invalid TIMEZONE {name:?}: {err}")),
        }
    }

    fn now(self) -> NaiveDateTime {
        match self {
            Self::Zone(tz) => Utc::now().with_timezone(&tz).naive_local(),
            Self::System => Local::now().naive_local(),
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (config, warnings) =
        ControllerConfig::from_env().context("failed to load controller configuration")?;
    for warning in &warnings {
        warn!("config: {warning}");
    }

    let clock = LocalClock::from_config(config.timezone.as_deref())?;
    if config.rooms.is_empty() {
        warn!("ROOM_DEVICE_MAP is empty, no rooms will be controlled");
    }
    for (room, device) in config.rooms.iter() {
        info!("room {room} -> {device}");
    }
    info!(
        "check interval {}ms, early allowance {}min, command cooldown {}ms, clock {clock:?}",
        config.reconcile.interval_ms,
        config.reconcile.early_allowance_min,
        config.reconcile.command_cooldown_ms
    );

    let source = MongoBookingSource::connect(&config.store)
        .await
        .with_context(|| format!("failed to connect to booking store {}", config.store.database))?;
    info!(
        "booking store ready ({}.{})",
        config.store.database, config.store.collection
    );

    let devices = config
        .rooms
        .devices()
        .into_iter()
        .map(str::to_string)
        .collect();
    let (channel, feedback) = MqttChannel::spawn(&config.broker, devices);
    info!(
        "mqtt broker {}:{} (tls: {})",
        config.broker.host, config.broker.port, config.broker.tls
    );
    let connection = channel.connection();

    let interval = config.reconcile.interval();
    let reconciler = Arc::new(Reconciler::new(
        config.rooms,
        config.reconcile,
        Arc::new(channel),
        Arc::new(source),
    ));

    spawn_feedback_loop(reconciler.clone(), feedback);
    spawn_reconcile_loop(reconciler.clone(), connection, clock, interval);

    let app = router(AppState {
        reconciler,
        started: Instant::now(),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status server at {addr}"))?;

    info!("status server listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}

fn spawn_feedback_loop(reconciler: Arc<Reconciler>, mut feedback: mpsc::Receiver<Feedback>) {
    tokio::spawn(async move {
        while let Some(update) = feedback.recv().await {
            reconciler.record_feedback(&update).await;
        }
        debug!("feedback channel closed");
    });
}

/// Starts ticking once the broker first accepts the connection. Each tick is
/// awaited before the next, and late ticks are dropped rather than bunched.
fn spawn_reconcile_loop(
    reconciler: Arc<Reconciler>,
    mut connection: watch::Receiver<bool>,
    clock: LocalClock,
    every: Duration,
) {
    tokio::spawn(async move {
        if connection.wait_for(|connected| *connected).await.is_err() {
            warn!("mqtt event loop stopped before connecting, reconciliation disabled");
            return;
        }
        info!("reconciliation started");

        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            match reconciler.tick_at(clock.now()).await {
                Ok(TickOutcome::Completed {
                    rooms,
                    bookings,
                    rejected,
                }) => {
                    debug!("tick: {rooms} rooms, {bookings} bookings, {rejected} rejected");
                }
                Ok(TickOutcome::Skipped) => {}
                Err(err) => error!("reconciliation aborted: {err}"),
            }
        }
    });
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/", get(handle_health))
        .route("/health", get(handle_health))
        .route("/room-state", get(handle_room_state))
        .fallback(handle_not_found)
        .layer(cors)
        .with_state(state)
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthStatus> {
    let reconciler = &state.reconciler;
    let room_details = reconciler.room_statuses().await;

    Json(HealthStatus {
        status: "running",
        mqtt: if reconciler.channel_connected() {
            "connected"
        } else {
            "disconnected"
        },
        db: if reconciler.store_connected() {
            "connected"
        } else {
            "not connected"
        },
        rooms: room_details.iter().map(|room| room.summary()).collect(),
        room_details,
        uptime: state.started.elapsed().as_secs_f64(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

async fn handle_room_state(State(state): State<AppState>) -> Json<RoomStatePayload> {
    let room_state = state
        .reconciler
        .observed_states()
        .await
        .into_iter()
        .map(|(room, power)| (room, power.as_str()))
        .collect();

    Json(RoomStatePayload {
        success: true,
        room_state,
    })
}

async fn handle_not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}
