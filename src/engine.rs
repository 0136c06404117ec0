use std::collections::BTreeSet;
use std::fmt::Write as _;

use chrono::{Local, NaiveDate};
use log::{debug, info, warn};

use crate::calendar::{Booking, BookingCalendar, DayKey};
use crate::config::DEFAULT_DATE_FORMAT;
use crate::error::{BookingError, PersistenceError};
use crate::leaderboard::LeaderboardEntry;
use crate::ledger::{Ledger, RosterEntry, ScoreEntry};
use crate::record::RoomRecord;
use crate::session::{SessionId, SessionTimer, TimerPhase};
use crate::store::RecordStore;

/// Source of "today" for stamping results.
pub trait Clock: Send {
    fn today(&self) -> NaiveDate;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDate);

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.0
    }
}

/// Whether the backing store is known to hold what the engine holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    Synced,
    /// The last load or write failed. Local state stays authoritative until
    /// the next successful sync.
    Stale(String),
}

/// Owns the booking calendar, the score ledger and the match timer of the
/// room, and mirrors calendar and ledger into a [`RecordStore`].
///
/// Every successful mutation replaces the whole stored record. A failed write
/// leaves local state as it is and marks the engine [`SyncStatus::Stale`];
/// the next successful write or [`RoomEngine::reload`] pushes it again.
pub struct RoomEngine {
    calendar: BookingCalendar,
    ledger: Ledger,
    timer: SessionTimer,
    store: Box<dyn RecordStore>,
    clock: Box<dyn Clock>,
    date_format: String,
    sync: SyncStatus,
    /// Local changes the store has refused.
    dirty: bool,
}

impl RoomEngine {
    /// An empty engine. Call [`RoomEngine::load`] to pull the stored record.
    pub fn new(store: Box<dyn RecordStore>) -> Self {
        Self {
            calendar: BookingCalendar::new(),
            ledger: Ledger::new(),
            timer: SessionTimer::new(),
            store,
            clock: Box::new(SystemClock),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
            sync: SyncStatus::Synced,
            dirty: false,
        }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn with_date_format(mut self, date_format: impl Into<String>) -> Self {
        self.date_format = date_format.into();
        self
    }

    pub fn with_timer(mut self, timer: SessionTimer) -> Self {
        self.timer = timer;
        self
    }

    /// Replace local calendar and ledger with the stored record. On failure
    /// the current state is kept and the engine is marked stale.
    pub fn load(&mut self) -> Result<(), PersistenceError> {
        match self.store.fetch_latest() {
            Ok(record) => {
                info!(
                    "loaded {} scores and {} booked days",
                    record.scores.len(),
                    record.bookings.days().count()
                );
                self.ledger = record.scores;
                self.calendar = record.bookings;
                self.sync = SyncStatus::Synced;
                self.dirty = false;
                Ok(())
            }
            Err(err) => {
                warn!("could not load room record: {}", err);
                self.sync = SyncStatus::Stale(err.to_string());
                Err(err)
            }
        }
    }

    /// Fetch the stored record again without losing local work. Changes the
    /// store has refused are pushed first and queued writes are waited for;
    /// if either fails nothing is fetched and local state stays as it is.
    pub fn reload(&mut self) -> Result<(), PersistenceError> {
        if self.dirty {
            let record = self.snapshot();
            if let Err(err) = self.store.replace(&record) {
                return Err(self.mark_stale(err));
            }
            self.dirty = false;
        }
        self.flush()?;
        self.load()
    }

    /// Wait for writes still on their way to the store. A failure marks the
    /// engine stale.
    pub fn flush(&mut self) -> Result<(), PersistenceError> {
        match self.store.flush() {
            Ok(()) => Ok(()),
            Err(err) => Err(self.mark_stale(err)),
        }
    }

    pub fn reserve<S: AsRef<str>>(
        &mut self,
        day: DayKey,
        time: &str,
        participants: &[S],
    ) -> Result<Booking, BookingError> {
        let booking = self.calendar.reserve(day, time, participants)?.clone();
        self.persist();
        Ok(booking)
    }

    pub fn slots_for(&self, day: DayKey) -> &[Booking] {
        self.calendar.slots_for(day)
    }

    pub fn free_slots(&self, day: DayKey) -> Vec<String> {
        self.calendar.free_slots(day)
    }

    /// Record the finished match. Incomplete rows are skipped; if nothing is
    /// left, no write is issued.
    pub fn submit_results(&mut self, roster: &[RosterEntry]) -> Vec<ScoreEntry> {
        let date = self.stamp_date();
        let appended = self.ledger.submit(roster, &date).to_vec();
        if !appended.is_empty() {
            self.persist();
        }
        appended
    }

    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        self.ledger.leaderboard()
    }

    pub fn known_players(&self) -> BTreeSet<String> {
        self.ledger.known_players()
    }

    pub fn start_session(&mut self) -> SessionId {
        self.timer.start()
    }

    /// Deliver a clock tick addressed to `session`.
    pub fn tick(&mut self, session: SessionId) -> TimerPhase {
        self.timer.tick_for(session)
    }

    pub fn timer(&self) -> &SessionTimer {
        &self.timer
    }

    pub fn timer_mut(&mut self) -> &mut SessionTimer {
        &mut self.timer
    }

    pub fn results_open(&self) -> bool {
        self.timer.results_open()
    }

    pub fn calendar(&self) -> &BookingCalendar {
        &self.calendar
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Includes failures of background writes that finished after the
    /// mutation returned.
    pub fn sync_status(&self) -> SyncStatus {
        match (&self.sync, self.store.last_write_error()) {
            (SyncStatus::Synced, Some(reason)) => SyncStatus::Stale(reason),
            (status, _) => status.clone(),
        }
    }

    pub fn snapshot(&self) -> RoomRecord {
        RoomRecord {
            scores: self.ledger.clone(),
            bookings: self.calendar.clone(),
        }
    }

    fn persist(&mut self) {
        match self.store.replace(&self.snapshot()) {
            Ok(()) => {
                debug!("room record handed to store");
                self.sync = SyncStatus::Synced;
                self.dirty = false;
            }
            Err(err) => {
                self.mark_stale(err);
            }
        }
    }

    fn mark_stale(&mut self, err: PersistenceError) -> PersistenceError {
        warn!("room record not stored, keeping local state: {}", err);
        self.sync = SyncStatus::Stale(err.to_string());
        self.dirty = true;
        err
    }

    fn stamp_date(&self) -> String {
        let today = self.clock.today();
        let mut stamped = String::new();
        if write!(stamped, "{}", today.format(&self.date_format)).is_err() {
            warn!("invalid date format '{}', using default", self.date_format);
            stamped = today.format(DEFAULT_DATE_FORMAT).to_string();
        }
        stamped
    }
}
