//! In-memory stand-ins for the relay transport and the booking store.

use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use tokio::time::Instant;

use roompower_common::{
    BookingRecord, PowerState, ReconcileConfig, RoomRegistry, TrackerDecision,
};

use crate::{
    channel::{CommandChannel, TransportError},
    reconciler::Reconciler,
    store::{BookingSource, StoreError},
};

#[derive(Default)]
pub struct FakeChannel {
    pub disconnected: AtomicBool,
    pub failures_left: AtomicUsize,
    published: Mutex<Vec<(String, PowerState, Instant)>>,
}

impl FakeChannel {
    pub fn published(&self) -> Vec<(String, PowerState)> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(device, state, _)| (device.clone(), *state))
            .collect()
    }

    pub fn published_at(&self) -> Vec<Instant> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, _, at)| *at)
            .collect()
    }
}

#[async_trait]
impl CommandChannel for FakeChannel {
    async fn publish(&self, device: &str, state: PowerState) -> Result<(), TransportError> {
        if self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Disconnected);
        }
        self.published
            .lock()
            .unwrap()
            .push((device.to_string(), state, Instant::now()));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.disconnected.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct FakeSource {
    bookings: Mutex<Vec<BookingRecord>>,
    pub failing: AtomicBool,
    pub queries: AtomicUsize,
    /// Simulated query time, in seconds.
    pub latency_secs: AtomicU64,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl FakeSource {
    pub fn set(&self, bookings: Vec<BookingRecord>) {
        *self.bookings.lock().unwrap() = bookings;
    }
}

#[async_trait]
impl BookingSource for FakeSource {
    async fn query_today(&self, _today: NaiveDate) -> Result<Vec<BookingRecord>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        let latency = self.latency_secs.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_secs(latency)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Timeout(Duration::from_secs(5)));
        }
        Ok(self.bookings.lock().unwrap().clone())
    }

    fn is_connected(&self) -> bool {
        !self.failing.load(Ordering::SeqCst)
    }
}

pub struct Harness {
    pub reconciler: Arc<Reconciler>,
    pub channel: Arc<FakeChannel>,
    pub source: Arc<FakeSource>,
}

impl Harness {
    /// Locks `room` and requests ON; `None` for rooms outside the registry.
    pub async fn request_on(&self, room: &str) -> Option<TrackerDecision> {
        let mut locked = self.reconciler.lock_room(room).await?;
        Some(locked.request_on().await)
    }

    pub async fn request_off(&self, room: &str) -> Option<TrackerDecision> {
        let mut locked = self.reconciler.lock_room(room).await?;
        Some(locked.request_off().await)
    }
}

pub fn harness(rooms: &[(&str, &str)]) -> Harness {
    let channel = Arc::new(FakeChannel::default());
    let source = Arc::new(FakeSource::default());
    let reconciler = Arc::new(Reconciler::new(
        RoomRegistry::from_pairs(rooms.iter().copied()),
        ReconcileConfig::default(),
        channel.clone(),
        source.clone(),
    ));
    Harness {
        reconciler,
        channel,
        source,
    }
}

pub fn booking(room: &str, start: &str, end: &str, checked_in: bool) -> BookingRecord {
    BookingRecord {
        room: room.to_string(),
        date: "2026-10-19".to_string(),
        start_time: start.to_string(),
        end_time: end.to_string(),
        checked_in,
    }
}

/// Local time on the fixture day.
pub fn at(hour: u32, minute: u32, second: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, 19)
        .unwrap()
        .and_time(NaiveTime::from_hms_opt(hour, minute, second).unwrap())
}
