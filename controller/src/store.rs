use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Bson},
    Client, Collection,
};
use serde::Deserialize;
use thiserror::Error;

use roompower_common::{BookingRecord, StoreConfig};

const QUERY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("booking query failed: {0}")]
    Query(#[from] mongodb::error::Error),
    #[error("booking query timed out after {0:?}")]
    Timeout(Duration),
}

/// Read-only view of the reservation store.
#[async_trait]
pub trait BookingSource: Send + Sync {
    /// Every reservation dated `today`, in store order.
    async fn query_today(&self, today: NaiveDate) -> Result<Vec<BookingRecord>, StoreError>;

    fn is_connected(&self) -> bool;
}

#[derive(Debug, Deserialize)]
struct StoredBooking {
    #[serde(default)]
    room: Option<String>,
    #[serde(default)]
    date: Option<String>,
    #[serde(rename = "startTime", default)]
    start_time: Option<String>,
    #[serde(rename = "endTime", default)]
    end_time: Option<String>,
    #[serde(rename = "firstCheckIn", default)]
    first_check_in: Option<Bson>,
}

impl StoredBooking {
    fn into_record(self) -> BookingRecord {
        BookingRecord {
            checked_in: is_check_in_marker(self.first_check_in.as_ref()),
            room: self.room.unwrap_or_default(),
            date: self.date.unwrap_or_default(),
            start_time: self.start_time.unwrap_or_default(),
            end_time: self.end_time.unwrap_or_default(),
        }
    }
}

/// Check-in is recorded once as a timestamp; empty, zero or false-like
/// values do not count.
fn is_check_in_marker(marker: Option<&Bson>) -> bool {
    match marker {
        None | Some(Bson::Null) | Some(Bson::Undefined) | Some(Bson::Boolean(false)) => false,
        Some(Bson::String(value)) => !value.is_empty(),
        Some(Bson::Int32(value)) => *value != 0,
        Some(Bson::Int64(value)) => *value != 0,
        Some(Bson::Double(value)) => *value != 0.0 && !value.is_nan(),
        Some(_) => true,
    }
}

pub struct MongoBookingSource {
    collection: Collection<StoredBooking>,
    connected: AtomicBool,
}

impl MongoBookingSource {
    /// Connects and pings the database so a bad connection string fails at
    /// startup rather than on the first tick.
    pub async fn connect(config: &StoreConfig) -> Result<Self, StoreError> {
        let client = Client::with_uri_str(&config.uri).await?;
        let database = client.database(&config.database);
        database.run_command(doc! { "ping": 1 }).await?;

        Ok(Self {
            collection: database.collection(&config.collection),
            connected: AtomicBool::new(true),
        })
    }

    async fn fetch(&self, date: &str) -> mongodb::error::Result<Vec<StoredBooking>> {
        let cursor = self.collection.find(doc! { "date": date }).await?;
        cursor.try_collect().await
    }
}

#[async_trait]
impl BookingSource for MongoBookingSource {
    async fn query_today(&self, today: NaiveDate) -> Result<Vec<BookingRecord>, StoreError> {
        let date = today.format("%Y-%m-%d").to_string();
        let result = match tokio::time::timeout(QUERY_TIMEOUT, self.fetch(&date)).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(QUERY_TIMEOUT)),
        };

        self.connected.store(result.is_ok(), Ordering::Relaxed);
        Ok(result?
            .into_iter()
            .map(StoredBooking::into_record)
            .collect())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}
