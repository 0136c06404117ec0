use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event as CtEvent, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

use crate::session::{SessionTimer, TimerPhase};

/// Session tick rate.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// What the countdown loop reacts to.
#[derive(Clone, Debug)]
pub enum RoomEvent {
    Key(KeyEvent),
    Tick,
}

/// Source of key presses.
pub trait RoomEventSource: Send + 'static {
    /// Block for up to `timeout` waiting for an event.
    fn recv_timeout(&self, timeout: Duration) -> Result<RoomEvent, RecvTimeoutError>;
}

/// Reads key presses from the terminal on a helper thread. Needs raw mode
/// for single keys to arrive.
pub struct CrosstermEventSource {
    rx: Receiver<RoomEvent>,
}

impl CrosstermEventSource {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            while let Ok(ev) = event::read() {
                let CtEvent::Key(key) = ev else { continue };
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if tx.send(RoomEvent::Key(key)).is_err() {
                    break;
                }
            }
        });

        Self { rx }
    }
}

impl RoomEventSource for CrosstermEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<RoomEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// How often the runner ticks.
pub trait Ticker: Send + Sync + 'static {
    fn interval(&self) -> Duration;
}

#[derive(Clone, Copy, Debug)]
pub struct FixedTicker {
    interval: Duration,
}

impl FixedTicker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for FixedTicker {
    fn default() -> Self {
        Self::new(TICK_INTERVAL)
    }
}

impl Ticker for FixedTicker {
    fn interval(&self) -> Duration {
        self.interval
    }
}

/// Feeds the runner from a channel the caller controls.
pub struct TestEventSource {
    rx: Receiver<RoomEvent>,
}

impl TestEventSource {
    pub fn new(rx: Receiver<RoomEvent>) -> Self {
        Self { rx }
    }
}

impl RoomEventSource for TestEventSource {
    fn recv_timeout(&self, timeout: Duration) -> Result<RoomEvent, RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }
}

/// Interleaves source events with ticks on a fixed schedule. Incoming events
/// do not push the next tick back.
pub struct Runner<E: RoomEventSource, T: Ticker> {
    event_source: E,
    ticker: T,
    next_tick: Instant,
}

impl<E: RoomEventSource, T: Ticker> Runner<E, T> {
    pub fn new(event_source: E, ticker: T) -> Self {
        let next_tick = Instant::now() + ticker.interval();
        Self {
            event_source,
            ticker,
            next_tick,
        }
    }

    /// Restart the tick schedule one full interval from now. Called when a
    /// new session starts so it never receives a tick owed to the old one.
    pub fn rearm(&mut self) {
        self.next_tick = Instant::now() + self.ticker.interval();
    }

    /// Blocks until the next event or the next tick, whichever comes first
    pub fn step(&mut self) -> RoomEvent {
        let now = Instant::now();
        if now >= self.next_tick {
            return self.fire_tick();
        }
        match self.event_source.recv_timeout(self.next_tick - now) {
            Ok(ev) => ev,
            Err(RecvTimeoutError::Timeout) => self.fire_tick(),
            Err(RecvTimeoutError::Disconnected) => {
                thread::sleep(self.next_tick.saturating_duration_since(Instant::now()));
                self.fire_tick()
            }
        }
    }

    fn fire_tick(&mut self) -> RoomEvent {
        self.next_tick += self.ticker.interval();
        RoomEvent::Tick
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownEnd {
    Expired,
    Cancelled,
}

fn is_cancel_key(key: &KeyEvent) -> bool {
    match key.code {
        KeyCode::Esc | KeyCode::Char('q') => true,
        KeyCode::Char('c') => key.modifiers.contains(KeyModifiers::CONTROL),
        _ => false,
    }
}

/// Start a session on `timer` and feed it ticks from `runner` until it
/// expires or the user cancels. `render` is called after every change.
pub fn run_countdown<E, T, F>(
    runner: &mut Runner<E, T>,
    timer: &mut SessionTimer,
    mut render: F,
) -> CountdownEnd
where
    E: RoomEventSource,
    T: Ticker,
    F: FnMut(&SessionTimer),
{
    let session = timer.start();
    runner.rearm();
    render(timer);

    loop {
        match runner.step() {
            RoomEvent::Tick => {
                let phase = timer.tick_for(session);
                render(timer);
                if phase == TimerPhase::Expired {
                    return CountdownEnd::Expired;
                }
            }
            RoomEvent::Key(key) if is_cancel_key(&key) => return CountdownEnd::Cancelled,
            RoomEvent::Key(_) => {}
        }
    }
}
