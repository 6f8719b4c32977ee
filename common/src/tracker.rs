use crate::types::{DesiredState, PowerState};

/// Outcome of asking a room for a power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerDecision {
    /// Publish this command now. The tracker already records it as desired.
    Dispatch(PowerState),
    AlreadyDesired,
    CoolingDown { remaining_ms: u64 },
}

/// Desired state and command spacing for one room.
///
/// Time is passed in as monotonic milliseconds so the decision logic stays
/// free of any clock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomTracker {
    desired: DesiredState,
    last_command_ms: Option<u64>,
}

impl RoomTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn desired(&self) -> DesiredState {
        self.desired
    }

    pub fn last_command_ms(&self) -> Option<u64> {
        self.last_command_ms
    }

    pub fn cooldown_remaining_ms(&self, now_ms: u64, cooldown_ms: u64) -> u64 {
        self.last_command_ms
            .map(|last| cooldown_ms.saturating_sub(now_ms.saturating_sub(last)))
            .unwrap_or(0)
    }

    /// Decides whether `requested` needs a command. On dispatch the desired
    /// state and the attempt time are recorded before the publish happens,
    /// so a second request cannot go out while the first is in flight.
    pub fn begin_request(
        &mut self,
        requested: PowerState,
        now_ms: u64,
        cooldown_ms: u64,
    ) -> TrackerDecision {
        if self.desired.is(requested) {
            return TrackerDecision::AlreadyDesired;
        }

        let remaining_ms = self.cooldown_remaining_ms(now_ms, cooldown_ms);
        if remaining_ms > 0 {
            return TrackerDecision::CoolingDown { remaining_ms };
        }

        self.last_command_ms = Some(now_ms);
        self.desired = requested.into();
        TrackerDecision::Dispatch(requested)
    }

    /// The publish failed: forget the desired state so the next pass retries.
    /// The attempt time stays, which keeps retries rate limited.
    pub fn dispatch_failed(&mut self) {
        self.desired = DesiredState::Unknown;
    }
}
