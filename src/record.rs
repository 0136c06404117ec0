use log::warn;
use serde::Serialize;
use serde_json::Value;

use crate::calendar::{Booking, BookingCalendar, DayKey};
use crate::ledger::{Ledger, ScoreEntry};

/// The whole persisted document. The store only ever receives it in full.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RoomRecord {
    pub scores: Ledger,
    pub bookings: BookingCalendar,
}

impl RoomRecord {
    /// Build a record from whatever the store returned. Missing or malformed
    /// parts read as empty; unreadable elements are skipped.
    pub fn from_value(value: &Value) -> Self {
        Self {
            scores: read_scores(value.get("scores")),
            bookings: read_bookings(value.get("bookings")),
        }
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_slice(bytes)?;
        Ok(Self::from_value(&value))
    }
}

fn read_scores(value: Option<&Value>) -> Ledger {
    let Some(Value::Array(items)) = value else {
        return Ledger::new();
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value::<ScoreEntry>(item.clone()) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("skipping unreadable score entry: {}", err);
                None
            }
        })
        .collect::<Vec<_>>()
        .into()
}

fn read_bookings(value: Option<&Value>) -> BookingCalendar {
    let mut calendar = BookingCalendar::new();
    let Some(Value::Object(days)) = value else {
        return calendar;
    };
    for (key, slots) in days {
        let Ok(day) = key.parse::<DayKey>() else {
            warn!("skipping bookings under unreadable day key '{}'", key);
            continue;
        };
        let Value::Array(slots) = slots else {
            continue;
        };
        let bookings = slots
            .iter()
            .filter_map(|slot| serde_json::from_value::<Booking>(slot.clone()).ok())
            .collect();
        calendar.restore_day(day, bookings);
    }
    calendar
}
