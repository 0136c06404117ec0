use std::collections::BTreeSet;
use std::str::FromStr;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::leaderboard::{compute_leaderboard, LeaderboardEntry};
use crate::util::is_blank;

/// Number of player rows on a match sheet.
pub const ROSTER_SIZE: usize = 4;

pub const AVATARS: [&str; 7] = [
    "\u{1F468}\u{200D}\u{1F9B1}",
    "\u{1F469}\u{200D}\u{1F9B0}",
    "\u{1F9D4}",
    "\u{1F469}\u{200D}\u{1F3A4}",
    "\u{1F9D1}\u{200D}\u{1F4BB}",
    "\u{1F9D1}\u{200D}\u{1F680}",
    "\u{1F9D1}\u{200D}\u{1F3A8}",
];

/// Any index maps onto the avatar set; out-of-range values wrap.
pub fn avatar_for(index: usize) -> &'static str {
    AVATARS[index % AVATARS.len()]
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum_macros::Display)]
pub enum Outcome {
    Won,
    Lost,
}

impl Outcome {
    /// Map a stored result label onto an outcome. Records written by the old
    /// French front end use "Gagné"/"Perdu".
    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        if label.eq_ignore_ascii_case("won") || label == "Gagné" {
            Some(Outcome::Won)
        } else if label.eq_ignore_ascii_case("lost") || label == "Perdu" {
            Some(Outcome::Lost)
        } else {
            None
        }
    }
}

/// One player's result for one finished match.
///
/// `result` keeps the label exactly as stored so that entries written with an
/// unfamiliar label survive a write-back; [`ScoreEntry::outcome`] interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub result: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub avatar: String,
}

impl ScoreEntry {
    pub fn outcome(&self) -> Option<Outcome> {
        Outcome::from_label(&self.result)
    }
}

/// A row of the match sheet as the player filled it in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub name: String,
    pub result: Option<Outcome>,
    pub avatar: usize,
}

impl RosterEntry {
    pub fn new(name: impl Into<String>, result: Option<Outcome>, avatar: usize) -> Self {
        Self {
            name: name.into(),
            result,
            avatar,
        }
    }

    fn is_complete(&self) -> bool {
        !is_blank(&self.name) && self.result.is_some()
    }
}

/// Parses `NAME:RESULT[:AVATAR]`, e.g. `Alice:won:2`. An empty result leaves
/// the row unfinished.
impl FromStr for RosterEntry {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let name = parts.next().unwrap_or_default().to_string();
        let result = match parts.next().map(str::trim) {
            None | Some("") => None,
            Some(label) => Some(
                Outcome::from_label(label)
                    .ok_or_else(|| format!("unknown result '{label}', expected won or lost"))?,
            ),
        };
        let avatar = match parts.next() {
            None => 0,
            Some(idx) => idx
                .trim()
                .parse()
                .map_err(|_| format!("avatar index '{idx}' is not a number"))?,
        };
        if parts.next().is_some() {
            return Err(format!("too many fields in '{s}'"));
        }
        Ok(Self {
            name,
            result,
            avatar,
        })
    }
}

/// Append-only match history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    entries: Vec<ScoreEntry>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append every complete roster row, stamped with `date`. Rows missing a
    /// name or a result are skipped. Returns the newly appended entries.
    pub fn submit(&mut self, roster: &[RosterEntry], date: &str) -> &[ScoreEntry] {
        let start = self.entries.len();
        self.entries.extend(
            roster
                .iter()
                .filter(|row| row.is_complete())
                .filter_map(|row| {
                    row.result.map(|outcome| ScoreEntry {
                        name: row.name.trim().to_string(),
                        result: outcome.to_string(),
                        date: date.to_string(),
                        avatar: avatar_for(row.avatar).to_string(),
                    })
                }),
        );
        debug!("ledger accepted {} of {} rows", self.entries.len() - start, roster.len());
        &self.entries[start..]
    }

    pub fn entries(&self) -> &[ScoreEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn known_players(&self) -> BTreeSet<String> {
        known_players(&self.entries)
    }

    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        compute_leaderboard(&self.entries)
    }
}

impl From<Vec<ScoreEntry>> for Ledger {
    fn from(entries: Vec<ScoreEntry>) -> Self {
        Self { entries }
    }
}

/// Distinct non-blank player names, for quick-pick lists.
pub fn known_players(entries: &[ScoreEntry]) -> BTreeSet<String> {
    entries
        .iter()
        .filter(|e| !is_blank(&e.name))
        .map(|e| e.name.clone())
        .collect()
}
