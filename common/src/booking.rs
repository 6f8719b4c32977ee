use std::cmp::Reverse;

use crate::error::BookingError;

const SECONDS_PER_DAY: u32 = 24 * 3600;

/// Raw reservation as read from the booking store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRecord {
    pub room: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub checked_in: bool,
}

/// A reservation with its room label cleaned and times resolved to
/// seconds since local midnight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub room: String,
    pub start_secs: u32,
    pub end_secs: u32,
    pub checked_in: bool,
}

impl Booking {
    pub fn from_record(record: &BookingRecord) -> Result<Self, BookingError> {
        Ok(Self {
            room: trim_room_label(&record.room),
            start_secs: parse_time_of_day(&record.start_time)?,
            end_secs: parse_time_of_day(&record.end_time)?,
            checked_in: record.checked_in,
        })
    }

    /// Parses every record, keeping the ones that fail next to their error.
    pub fn parse_all(
        records: &[BookingRecord],
    ) -> (Vec<Self>, Vec<(&BookingRecord, BookingError)>) {
        let mut bookings = Vec::with_capacity(records.len());
        let mut rejected = Vec::new();

        for record in records {
            match Self::from_record(record) {
                Ok(booking) => bookings.push(booking),
                Err(err) => rejected.push((record, err)),
            }
        }

        (bookings, rejected)
    }

    /// Whether `now_secs` falls inside `[start - early_allowance, end]`.
    pub fn is_active_at(&self, now_secs: u32, early_allowance_secs: u32) -> bool {
        self.start_secs.saturating_sub(early_allowance_secs) <= now_secs
            && now_secs <= self.end_secs
    }

    pub fn remaining_secs(&self, now_secs: u32) -> u32 {
        self.end_secs.saturating_sub(now_secs)
    }
}

/// Drops the dropdown marker (`▼`) the booking UI leaves in room labels,
/// together with the whitespace around it.
pub fn trim_room_label(label: &str) -> String {
    match label.split_once('▼') {
        Some((head, tail)) => format!("{}{}", head.trim_end(), tail.trim_start())
            .trim()
            .to_string(),
        None => label.trim().to_string(),
    }
}

/// Parses `HH:MM` or `HH:MM:SS`. `24:00` is accepted as end of day.
pub fn parse_time_of_day(value: &str) -> Result<u32, BookingError> {
    let invalid = || BookingError::InvalidTime(value.to_string());
    let field = |part: &str, max: u32| -> Result<u32, BookingError> {
        if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let number: u32 = part.parse().map_err(|_| invalid())?;
        if number > max {
            Err(invalid())
        } else {
            Ok(number)
        }
    };

    let parts: Vec<&str> = value.trim().split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return Err(invalid());
    }

    let hours = field(parts[0], 24)?;
    let minutes = field(parts[1], 59)?;
    let seconds = match parts.get(2).copied() {
        Some(part) => field(part, 59)?,
        None => 0,
    };

    let total = hours * 3600 + minutes * 60 + seconds;
    if total > SECONDS_PER_DAY {
        return Err(invalid());
    }
    Ok(total)
}

/// The active booking for `room`: among matching bookings whose window
/// contains now, the earliest start wins, then the latest end, then store
/// order.
pub fn find_active<'a>(
    bookings: &'a [Booking],
    room: &str,
    now_secs: u32,
    early_allowance_secs: u32,
) -> Option<&'a Booking> {
    bookings
        .iter()
        .filter(|booking| {
            booking.room == room && booking.is_active_at(now_secs, early_allowance_secs)
        })
        .min_by_key(|booking| (booking.start_secs, Reverse(booking.end_secs)))
}
