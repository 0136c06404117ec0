use log::{debug, info};

use crate::util::format_clock;

/// Length of one match, in seconds.
pub const SESSION_DURATION: u32 = 15 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display)]
pub enum TimerPhase {
    Idle,
    Running,
    Expired,
}

/// Identifies one `start()` of the timer. Ticks carrying an older id belong to
/// a superseded session and are dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

/// Countdown for a single match.
#[derive(Debug, Clone)]
pub struct SessionTimer {
    duration: u32,
    remaining_secs: u32,
    phase: TimerPhase,
    session: SessionId,
}

impl Default for SessionTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionTimer {
    pub fn new() -> Self {
        Self::with_duration(SESSION_DURATION)
    }

    pub fn with_duration(duration: u32) -> Self {
        Self {
            duration,
            remaining_secs: duration,
            phase: TimerPhase::Idle,
            session: SessionId(0),
        }
    }

    /// Begin a fresh countdown from any phase, restarting a running one.
    pub fn start(&mut self) -> SessionId {
        self.session = SessionId(self.session.0 + 1);
        self.remaining_secs = self.duration;
        self.phase = if self.duration == 0 {
            TimerPhase::Expired
        } else {
            TimerPhase::Running
        };
        info!("session {} started ({})", self.session.0, self.clock());
        self.session
    }

    /// Advance the current session by one second.
    pub fn tick(&mut self) -> TimerPhase {
        if self.phase != TimerPhase::Running {
            return self.phase;
        }
        self.remaining_secs = self.remaining_secs.saturating_sub(1);
        if self.remaining_secs == 0 {
            self.phase = TimerPhase::Expired;
            info!("session {} expired", self.session.0);
        }
        self.phase
    }

    /// Advance only if `session` is still the current one.
    pub fn tick_for(&mut self, session: SessionId) -> TimerPhase {
        if session != self.session {
            debug!("dropping tick for superseded session {}", session.0);
            return self.phase;
        }
        self.tick()
    }

    pub fn phase(&self) -> TimerPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.phase == TimerPhase::Running
    }

    pub fn remaining_secs(&self) -> u32 {
        self.remaining_secs
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// The match is over and its results can be entered.
    pub fn results_open(&self) -> bool {
        self.phase == TimerPhase::Expired
    }

    pub fn clock(&self) -> String {
        format_clock(self.remaining_secs)
    }
}
