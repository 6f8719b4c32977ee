use chrono::{NaiveTime, Timelike};

use crate::booking::{find_active, Booking};

/// What one reconciliation pass should do for a single room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPlan {
    /// No active booking: power off and drop any pending auto-off.
    PowerOff,
    /// Active booking without check-in: leave the room alone.
    AwaitCheckIn,
    /// Checked in: power on and re-arm the auto-off, unless the booking
    /// ends this very second.
    PowerOn { off_after_secs: Option<u32> },
}

pub fn plan_room(
    bookings: &[Booking],
    room: &str,
    now_secs: u32,
    early_allowance_secs: u32,
) -> RoomPlan {
    match find_active(bookings, room, now_secs, early_allowance_secs) {
        None => RoomPlan::PowerOff,
        Some(booking) if !booking.checked_in => RoomPlan::AwaitCheckIn,
        Some(booking) => {
            let remaining = booking.remaining_secs(now_secs);
            RoomPlan::PowerOn {
                off_after_secs: (remaining > 0).then_some(remaining),
            }
        }
    }
}

pub fn seconds_of_day(time: NaiveTime) -> u32 {
    time.num_seconds_from_midnight()
}
