use std::io;

use thiserror::Error;

use crate::calendar::DayKey;

/// Reasons a reservation is refused. None of these change state or write.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BookingError {
    #[error("no participant name given")]
    EmptyNames,
    #[error("slot {time} on {day} is already booked")]
    SlotTaken { day: DayKey, time: String },
    #[error("{0} is not a bookable slot")]
    UnknownSlot(String),
}

/// Failures talking to the backing record store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {0}")]
    Http(u16),
    #[error("record decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("record store is not configured: {0}")]
    NotConfigured(&'static str),
    #[error("background writer has stopped")]
    WriterClosed,
    #[error("background write failed: {0}")]
    Background(String),
}
