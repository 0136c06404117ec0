use std::{
    error::Error,
    io::{self, stdin, Write},
    path::PathBuf,
};

use chrono::Local;
use clap::{error::ErrorKind, CommandFactory, Parser, Subcommand};
use crossterm::{
    terminal::{disable_raw_mode, enable_raw_mode},
    tty::IsTty,
};
use log::warn;

use cueroom::{
    config::{Config, ConfigStore, FileConfigStore, StoreConfig, DEFAULT_STORE_URL},
    ledger::ROSTER_SIZE,
    runtime::{run_countdown, CountdownEnd, CrosstermEventSource, FixedTicker, Runner},
    DayKey, RoomEngine, RosterEntry, SyncStatus,
};

/// slot booking, match timer and leaderboard for the pool room
#[derive(Parser, Debug)]
#[clap(version, about)]
pub struct Cli {
    /// config file to use instead of the default location
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// keep the room record in this local file instead of the configured store
    #[clap(long, global = true)]
    record_file: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// list the bookings of a day
    Slots {
        /// day as YYYY-MM-DD, defaults to today
        #[clap(short, long)]
        day: Option<DayKey>,

        /// list the free slots instead
        #[clap(long)]
        free: bool,
    },
    /// reserve a slot
    Book {
        /// day as YYYY-MM-DD, defaults to today
        #[clap(short, long)]
        day: Option<DayKey>,

        /// slot label, e.g. 18:30
        #[clap(short, long)]
        time: String,

        /// players sharing the slot
        #[clap(required = true)]
        names: Vec<String>,
    },
    /// record a finished match, one NAME:won|lost[:AVATAR] per player
    Results {
        #[clap(required = true, num_args = 1..=ROSTER_SIZE)]
        rows: Vec<RosterEntry>,
    },
    /// show the ranking
    Leaderboard,
    /// list every player seen in the results
    Players,
    /// run a live match countdown (Esc or q to cancel)
    Timer,
    /// write store settings to the config file
    Configure {
        #[clap(long)]
        url: Option<String>,

        #[clap(long)]
        bin: Option<String>,

        #[clap(long)]
        key: Option<String>,

        /// store the record in a local file
        #[clap(long, conflicts_with_all = ["url", "bin", "key"])]
        file: Option<PathBuf>,

        /// strftime pattern for result dates
        #[clap(long)]
        date_format: Option<String>,
    },
}

impl Cli {
    fn config_store(&self) -> FileConfigStore {
        match &self.config {
            Some(path) => FileConfigStore::with_path(path),
            None => FileConfigStore::new(),
        }
    }

    fn effective_config(&self, store: &FileConfigStore) -> Config {
        let mut config = store.load();
        if let Some(path) = &self.record_file {
            config.store = StoreConfig::File { path: path.clone() };
        }
        config
    }
}

fn today() -> DayKey {
    DayKey::from_datetime(&Local::now())
}

fn open_engine(config: &Config) -> Result<RoomEngine, Box<dyn Error>> {
    let store = config.store.open()?;
    let mut engine = RoomEngine::new(store).with_date_format(config.date_format.clone());
    if let Err(err) = engine.load() {
        eprintln!("warning: working from an empty local copy: {}", err);
    }
    Ok(engine)
}

/// Waits for background writes, so the warning covers the write this
/// command just made.
fn report_sync(engine: &mut RoomEngine) {
    if engine.flush().is_err() {
        warn!("last write did not reach the store");
    }
    if let SyncStatus::Stale(reason) = engine.sync_status() {
        eprintln!("warning: store not updated: {}", reason);
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli = Cli::parse();
    let config_store = cli.config_store();

    if let Command::Configure {
        url,
        bin,
        key,
        file,
        date_format,
    } = &cli.command
    {
        let mut config = config_store.load();
        configure(&mut config, url, bin, key, file, date_format);
        config_store.save(&config)?;
        println!("saved {}", config_store.path().display());
        return Ok(());
    }

    let config = cli.effective_config(&config_store);
    let mut engine = open_engine(&config)?;

    match cli.command {
        Command::Slots { day, free } => {
            let day = day.unwrap_or_else(today);
            if free {
                for label in engine.free_slots(day) {
                    println!("{}", label);
                }
            } else {
                for booking in engine.slots_for(day) {
                    println!("{}  {}", booking.time, booking.name);
                }
            }
        }
        Command::Book { day, time, names } => {
            let day = day.unwrap_or_else(today);
            match engine.reserve(day, &time, &names) {
                Ok(booking) => {
                    println!("booked {} on {} for {}", booking.time, day, booking.name);
                    report_sync(&mut engine);
                }
                Err(err) => {
                    let mut cmd = Cli::command();
                    cmd.error(ErrorKind::ValueValidation, err).exit();
                }
            }
        }
        Command::Results { rows } => {
            let appended = engine.submit_results(&rows);
            if appended.is_empty() {
                println!("nothing recorded: every row needs a name and a result");
            }
            for entry in &appended {
                println!("{} {} {} ({})", entry.avatar, entry.name, entry.result, entry.date);
            }
            report_sync(&mut engine);
        }
        Command::Leaderboard => {
            for row in engine.leaderboard() {
                println!("{:>3}. {:<20} {:>3}W {:>3}L", row.rank, row.name, row.wins, row.losses);
            }
        }
        Command::Players => {
            for name in engine.known_players() {
                println!("{}", name);
            }
        }
        Command::Timer => run_timer(&mut engine)?,
        Command::Configure { .. } => unreachable!("handled above"),
    }

    Ok(())
}

fn configure(
    config: &mut Config,
    url: &Option<String>,
    bin: &Option<String>,
    key: &Option<String>,
    file: &Option<PathBuf>,
    date_format: &Option<String>,
) {
    if let Some(path) = file {
        config.store = StoreConfig::File { path: path.clone() };
    } else if url.is_some() || bin.is_some() || key.is_some() {
        let (mut base_url, mut bin_id, mut access_key) = match &config.store {
            StoreConfig::Remote {
                base_url,
                bin_id,
                access_key,
            } => (base_url.clone(), bin_id.clone(), access_key.clone()),
            StoreConfig::File { .. } => (DEFAULT_STORE_URL.to_string(), String::new(), String::new()),
        };
        if let Some(url) = url {
            base_url = url.clone();
        }
        if let Some(bin) = bin {
            bin_id = bin.clone();
        }
        if let Some(key) = key {
            access_key = key.clone();
        }
        config.store = StoreConfig::Remote {
            base_url,
            bin_id,
            access_key,
        };
    }
    if let Some(date_format) = date_format {
        config.date_format = date_format.clone();
    }
}

fn run_timer(engine: &mut RoomEngine) -> Result<(), Box<dyn Error>> {
    if !stdin().is_tty() {
        let mut cmd = Cli::command();
        cmd.error(ErrorKind::Io, "stdin must be a tty").exit();
    }

    let mut runner = Runner::new(CrosstermEventSource::new(), FixedTicker::default());

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    let end = run_countdown(&mut runner, engine.timer_mut(), |t| {
        if write!(stdout, "\r{}   ", t.clock()).and_then(|_| stdout.flush()).is_err() {
            warn!("could not draw timer");
        }
    });
    disable_raw_mode()?;

    match end {
        CountdownEnd::Expired => println!("\nsession over, results may be submitted"),
        CountdownEnd::Cancelled => println!("\ncancelled"),
    }
    Ok(())
}
