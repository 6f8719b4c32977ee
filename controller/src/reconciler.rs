use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::NaiveDateTime;
use futures::future::join_all;
use tokio::{
    sync::{Mutex, MutexGuard, RwLock},
    task::JoinHandle,
    time::Instant,
};
use tracing::{debug, info, warn};

use roompower_common::{
    plan_room, seconds_of_day, Booking, DesiredState, PowerState, ReconcileConfig, RoomPlan,
    RoomRegistry, RoomStatus, RoomTracker, TrackerDecision,
};

use crate::{
    channel::{CommandChannel, Feedback},
    store::{BookingSource, StoreError},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// The command channel was down; nothing was queried or sent.
    Skipped,
    Completed { rooms: usize, bookings: usize, rejected: usize },
}

/// Pending one-shot switch-off for a room.
struct AutoOffTimer {
    generation: u64,
    fires_at: NaiveDateTime,
    handle: JoinHandle<()>,
}

impl AutoOffTimer {
    fn cancel(self) {
        self.handle.abort();
    }
}

#[derive(Default)]
struct RoomSlot {
    tracker: RoomTracker,
    timer: Option<AutoOffTimer>,
}

/// Drives every configured room towards the state its bookings call for.
///
/// Each room's tracker and auto-off timer live behind that room's own lock,
/// so a firing timer and a running tick serialize per room while different
/// rooms proceed independently.
pub struct Reconciler {
    registry: RoomRegistry,
    config: ReconcileConfig,
    channel: Arc<dyn CommandChannel>,
    source: Arc<dyn BookingSource>,
    rooms: HashMap<String, Mutex<RoomSlot>>,
    observed: RwLock<HashMap<String, PowerState>>,
    epoch: Instant,
    timer_generation: AtomicU64,
}

impl Reconciler {
    pub fn new(
        registry: RoomRegistry,
        config: ReconcileConfig,
        channel: Arc<dyn CommandChannel>,
        source: Arc<dyn BookingSource>,
    ) -> Self {
        let rooms = registry
            .iter()
            .map(|(room, _)| (room.to_string(), Mutex::new(RoomSlot::default())))
            .collect();

        Self {
            registry,
            config,
            channel,
            source,
            rooms,
            observed: RwLock::new(HashMap::new()),
            epoch: Instant::now(),
            timer_generation: AtomicU64::new(0),
        }
    }

    pub fn channel_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub fn store_connected(&self) -> bool {
        self.source.is_connected()
    }

    /// Locks `room`'s tracker and timer. Rooms missing from the registry
    /// are logged and yield `None`.
    pub async fn lock_room(&self, room: &str) -> Option<LockedRoom<'_>> {
        let (Some((room, slot)), Some(device)) =
            (self.rooms.get_key_value(room), self.registry.device_for(room))
        else {
            warn!("no device configured for room {room}, ignoring request");
            return None;
        };

        Some(LockedRoom {
            reconciler: self,
            room,
            device,
            slot: slot.lock().await,
        })
    }

    /// One reconciliation pass at local time `now`.
    ///
    /// A failed booking query aborts the pass before any room is touched.
    pub async fn tick_at(self: &Arc<Self>, now: NaiveDateTime) -> Result<TickOutcome, StoreError> {
        if !self.channel.is_connected() {
            debug!("command channel down, skipping reconciliation");
            return Ok(TickOutcome::Skipped);
        }

        let records = self.source.query_today(now.date()).await?;
        let (bookings, rejected) = Booking::parse_all(&records);
        for (record, err) in &rejected {
            warn!(
                "skipping booking for room {:?} ({}-{}): {err}",
                record.room, record.start_time, record.end_time
            );
        }

        let now_secs = seconds_of_day(now.time());
        let allowance_secs = self.config.early_allowance_secs();
        let passes = self.registry.iter().map(|(room, _)| {
            let plan = plan_room(&bookings, room, now_secs, allowance_secs);
            self.apply_plan(room, plan, now)
        });
        join_all(passes).await;

        Ok(TickOutcome::Completed {
            rooms: self.registry.len(),
            bookings: bookings.len(),
            rejected: rejected.len(),
        })
    }

    async fn apply_plan(self: &Arc<Self>, room: &str, plan: RoomPlan, now: NaiveDateTime) {
        let Some(mut locked) = self.lock_room(room).await else {
            return;
        };

        match plan {
            RoomPlan::PowerOff => {
                locked.request_off().await;
                if let Some(timer) = locked.slot.timer.take() {
                    debug!("{room}: no active booking, auto-off at {} cancelled", timer.fires_at);
                    timer.cancel();
                }
            }
            RoomPlan::AwaitCheckIn => {
                debug!("{room}: booking active, waiting for check-in");
            }
            RoomPlan::PowerOn { off_after_secs } => {
                locked.request_on().await;

                // The pending timer may belong to an earlier booking or an
                // outdated end time, so it is always replaced.
                if let Some(timer) = locked.slot.timer.take() {
                    timer.cancel();
                }
                if let Some(secs) = off_after_secs {
                    let timer = self.arm_auto_off(room, secs, now);
                    debug!(
                        "{room}: auto-off in {}m {}s at {}",
                        secs / 60,
                        secs % 60,
                        timer.fires_at
                    );
                    locked.slot.timer = Some(timer);
                }
            }
        }
    }

    fn arm_auto_off(self: &Arc<Self>, room: &str, secs: u32, now: NaiveDateTime) -> AutoOffTimer {
        let generation = self.timer_generation.fetch_add(1, Ordering::Relaxed) + 1;
        let reconciler = Arc::clone(self);
        let room_id = room.to_string();
        let delay = Duration::from_secs(u64::from(secs));

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            reconciler.fire_auto_off(&room_id, generation).await;
        });

        AutoOffTimer {
            generation,
            fires_at: now + chrono::Duration::seconds(i64::from(secs)),
            handle,
        }
    }

    async fn fire_auto_off(&self, room: &str, generation: u64) {
        let Some(mut locked) = self.lock_room(room).await else {
            return;
        };

        // A timer replaced or cancelled while this task waited for the lock
        // must not act.
        if locked.slot.timer.as_ref().map(|timer| timer.generation) != Some(generation) {
            return;
        }
        locked.slot.timer = None;

        info!("{room}: booking ended, switching off");
        locked.request_off().await;
    }

    pub async fn record_feedback(&self, feedback: &Feedback) {
        let mut observed = self.observed.write().await;
        for room in self.registry.rooms_for_device(&feedback.device) {
            info!("{room} reported {}", feedback.state);
            observed.insert(room.to_string(), feedback.state);
        }
    }

    #[cfg(test)]
    pub async fn desired_state(&self, room: &str) -> Option<DesiredState> {
        let slot = self.rooms.get(room)?;
        let desired = slot.lock().await.tracker.desired();
        Some(desired)
    }

    #[cfg(test)]
    pub async fn pending_auto_off(&self, room: &str) -> Option<NaiveDateTime> {
        let slot = self.rooms.get(room)?;
        let fires_at = slot.lock().await.timer.as_ref().map(|timer| timer.fires_at);
        fires_at
    }

    /// Last relay-reported state per room; rooms without feedback are absent.
    pub async fn observed_states(&self) -> BTreeMap<String, PowerState> {
        self.observed
            .read()
            .await
            .iter()
            .map(|(room, state)| (room.clone(), *state))
            .collect()
    }

    pub async fn room_statuses(&self) -> Vec<RoomStatus> {
        let observed = self.observed_states().await;
        let mut statuses = Vec::with_capacity(self.registry.len());

        for (room, device) in self.registry.iter() {
            let (desired, auto_off_at) = match self.rooms.get(room) {
                Some(slot) => {
                    let slot = slot.lock().await;
                    (
                        slot.tracker.desired(),
                        slot.timer.as_ref().map(|timer| timer.fires_at),
                    )
                }
                None => (DesiredState::Unknown, None),
            };

            statuses.push(RoomStatus {
                room: room.to_string(),
                device: device.to_string(),
                desired: desired.as_str(),
                observed: observed.get(room).map(|state| state.as_str()),
                auto_off_at: auto_off_at.map(|at| at.format("%Y-%m-%dT%H:%M:%S").to_string()),
            });
        }

        statuses
    }

    fn monotonic_ms(&self) -> u64 {
        self.epoch
            .elapsed()
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX)
    }
}

/// A room's tracker and timer, held locked for the duration of a request.
pub struct LockedRoom<'a> {
    reconciler: &'a Reconciler,
    room: &'a str,
    device: &'a str,
    slot: MutexGuard<'a, RoomSlot>,
}

impl LockedRoom<'_> {
    pub async fn request_on(&mut self) -> TrackerDecision {
        self.request(PowerState::On).await
    }

    pub async fn request_off(&mut self) -> TrackerDecision {
        self.request(PowerState::Off).await
    }

    async fn request(&mut self, requested: PowerState) -> TrackerDecision {
        let (room, device) = (self.room, self.device);
        let decision = self.slot.tracker.begin_request(
            requested,
            self.reconciler.monotonic_ms(),
            self.reconciler.config.command_cooldown_ms,
        );

        match decision {
            TrackerDecision::Dispatch(state) => {
                match self.reconciler.channel.publish(device, state).await {
                    Ok(()) => info!("{room} ({device}) -> {state}"),
                    Err(err) => {
                        self.slot.tracker.dispatch_failed();
                        warn!("{room} ({device}): {state} command failed, will retry: {err}");
                    }
                }
            }
            TrackerDecision::CoolingDown { remaining_ms } => {
                debug!("{room}: {requested} held back, cooldown {remaining_ms}ms");
            }
            TrackerDecision::AlreadyDesired => {}
        }

        decision
    }
}
