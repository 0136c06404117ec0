use std::collections::BTreeMap;

use itertools::Itertools;
use serde::Serialize;

use crate::ledger::{Outcome, ScoreEntry};
use crate::util::is_blank;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeaderboardEntry {
    pub name: String,
    pub wins: u32,
    pub losses: u32,
    pub rank: usize,
}

#[derive(Default)]
struct Tally {
    wins: u32,
    losses: u32,
}

/// Rank players by number of wins.
///
/// Entries are grouped per name in name order, then sorted by wins, highest
/// first. The sort is stable, so players tied on wins stay in name order and
/// the result does not depend on the order of `entries`. Losses never break a
/// tie. Labels other than won/lost count for neither column.
pub fn compute_leaderboard(entries: &[ScoreEntry]) -> Vec<LeaderboardEntry> {
    let tallies = entries
        .iter()
        .filter(|e| !is_blank(&e.name))
        .fold(BTreeMap::<&str, Tally>::new(), |mut map, e| {
            let tally = map.entry(e.name.as_str()).or_default();
            match e.outcome() {
                Some(Outcome::Won) => tally.wins += 1,
                Some(Outcome::Lost) => tally.losses += 1,
                None => {}
            }
            map
        });

    tallies
        .into_iter()
        .sorted_by(|(_, a), (_, b)| b.wins.cmp(&a.wins))
        .enumerate()
        .map(|(idx, (name, tally))| LeaderboardEntry {
            name: name.to_string(),
            wins: tally.wins,
            losses: tally.losses,
            rank: idx + 1,
        })
        .collect()
}
