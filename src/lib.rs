// Library surface for the room engine; the binary in main.rs is a thin
// front end over it.
pub mod app_dirs;
pub mod calendar;
pub mod config;
pub mod engine;
pub mod error;
pub mod leaderboard;
pub mod ledger;
pub mod record;
pub mod runtime;
pub mod session;
pub mod store;
pub mod util;

pub use calendar::{Booking, BookingCalendar, DayKey};
pub use engine::{Clock, FixedClock, RoomEngine, SyncStatus, SystemClock};
pub use error::{BookingError, PersistenceError};
pub use leaderboard::{compute_leaderboard, LeaderboardEntry};
pub use ledger::{Ledger, Outcome, RosterEntry, ScoreEntry};
pub use session::{SessionId, SessionTimer, TimerPhase, SESSION_DURATION};
