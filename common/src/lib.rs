pub mod booking;
pub mod config;
pub mod error;
pub mod plan;
pub mod registry;
pub mod topics;
pub mod tracker;
pub mod types;

pub use booking::{find_active, trim_room_label, Booking, BookingRecord};
pub use config::{BrokerConfig, ControllerConfig, ReconcileConfig, StoreConfig};
pub use error::{BookingError, ConfigError};
pub use plan::{plan_room, seconds_of_day, RoomPlan};
pub use registry::RoomRegistry;
pub use topics::*;
pub use tracker::{RoomTracker, TrackerDecision};
pub use types::{DesiredState, HealthStatus, PowerState, RoomStatePayload, RoomStatus};
