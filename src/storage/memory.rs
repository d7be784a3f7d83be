//! In-memory implementation of the five engine tables
//!
//! All tables live behind a single `RwLock`. A [`Transaction`] reads through to
//! the committed tables and stages every write on the side; the staged writes
//! are applied only when the transaction closure returns `Ok`. Holding the
//! write lock for the whole closure serialises transactions, so a
//! check-then-write (vote uniqueness, balance check before a debit) can never
//! interleave with another one.

use crate::error::{CoreResult, RoundError};
use crate::types::{
    GlobalRound, PhaseChange, Profile, ProfileId, RatingEvent, RoundId, RoundPhase, RoundStat,
    WinnerRecord,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;
use tracing::{debug, error};

/// Committed state
#[derive(Debug, Default)]
struct Tables {
    profiles: HashMap<ProfileId, Profile>,
    rating_events: Vec<RatingEvent>,
    rounds: BTreeMap<RoundId, GlobalRound>,
    round_stats: HashMap<RoundId, HashMap<ProfileId, RoundStat>>,
    winner_records: Vec<WinnerRecord>,
    next_event_id: u64,
    next_round_id: RoundId,
    next_winner_id: u64,
}

/// Writes made by a transaction that has not committed yet
#[derive(Debug, Default)]
struct Staged {
    profiles: HashMap<ProfileId, Profile>,
    rating_events: Vec<RatingEvent>,
    rounds: BTreeMap<RoundId, GlobalRound>,
    round_stats: HashMap<(RoundId, ProfileId), RoundStat>,
    winner_records: Vec<WinnerRecord>,
    next_event_id: u64,
    next_round_id: RoundId,
    next_winner_id: u64,
}

impl Staged {
    fn is_empty(&self) -> bool {
        self.profiles.is_empty()
            && self.rating_events.is_empty()
            && self.rounds.is_empty()
            && self.round_stats.is_empty()
            && self.winner_records.is_empty()
    }
}

impl Tables {
    fn apply(&mut self, staged: Staged) {
        self.profiles.extend(staged.profiles);
        self.rating_events.extend(staged.rating_events);
        self.rounds.extend(staged.rounds);
        for ((round_id, profile_id), stat) in staged.round_stats {
            self.round_stats
                .entry(round_id)
                .or_default()
                .insert(profile_id, stat);
        }
        self.winner_records.extend(staged.winner_records);
        self.next_event_id = staged.next_event_id;
        self.next_round_id = staged.next_round_id;
        self.next_winner_id = staged.next_winner_id;
    }
}

/// Store holding profiles, rating events, rounds, round stats and winner records
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` as one atomic unit: its writes are committed on `Ok` and
    /// discarded on `Err`
    pub fn transaction<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> CoreResult<T>,
    {
        let mut tables = self.tables.write().map_err(|_| {
            error!("Store write lock poisoned");
            RoundError::storage("Failed to acquire store write lock")
        })?;

        let (result, staged) = {
            let mut tx = Transaction::new(&tables);
            let result = f(&mut tx);
            (result, tx.staged)
        };

        match result {
            Ok(value) => {
                if !staged.is_empty() {
                    tables.apply(staged);
                }
                Ok(value)
            }
            Err(err) => {
                debug!("Transaction rolled back: {}", err);
                Err(err)
            }
        }
    }

    /// Run `f` against a consistent snapshot
    pub fn read<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> CoreResult<T>,
    {
        let tables = self.tables.read().map_err(|_| {
            error!("Store read lock poisoned");
            RoundError::storage("Failed to acquire store read lock")
        })?;
        let tx = Transaction::new(&tables);
        f(&tx)
    }
}

/// Staged view over the committed tables
pub struct Transaction<'a> {
    base: &'a Tables,
    staged: Staged,
}

impl<'a> Transaction<'a> {
    fn new(base: &'a Tables) -> Self {
        Self {
            base,
            staged: Staged {
                next_event_id: base.next_event_id,
                next_round_id: base.next_round_id,
                next_winner_id: base.next_winner_id,
                ..Staged::default()
            },
        }
    }

    // Profiles

    pub fn profile(&self, id: &str) -> Option<&Profile> {
        self.staged
            .profiles
            .get(id)
            .or_else(|| self.base.profiles.get(id))
    }

    pub fn require_profile(&self, id: &str) -> CoreResult<&Profile> {
        self.profile(id).ok_or_else(|| RoundError::ProfileNotFound {
            profile_id: id.to_string(),
        })
    }

    pub fn profile_mut(&mut self, id: &str) -> CoreResult<&mut Profile> {
        if !self.staged.profiles.contains_key(id) {
            let profile = self.base.profiles.get(id).cloned().ok_or_else(|| {
                RoundError::ProfileNotFound {
                    profile_id: id.to_string(),
                }
            })?;
            self.staged.profiles.insert(id.to_string(), profile);
        }
        self.staged
            .profiles
            .get_mut(id)
            .ok_or_else(|| RoundError::storage("Staged profile vanished"))
    }

    pub fn insert_profile(&mut self, profile: Profile) {
        self.staged.profiles.insert(profile.id.clone(), profile);
    }

    pub fn profiles(&self) -> impl Iterator<Item = &Profile> + '_ {
        self.base
            .profiles
            .values()
            .filter(move |profile| !self.staged.profiles.contains_key(&profile.id))
            .chain(self.staged.profiles.values())
    }

    pub fn profile_ids(&self) -> Vec<ProfileId> {
        self.profiles().map(|profile| profile.id.clone()).collect()
    }

    // Rating events

    /// Newest first
    pub fn rating_events_rev(&self) -> impl Iterator<Item = &RatingEvent> + '_ {
        self.staged
            .rating_events
            .iter()
            .rev()
            .chain(self.base.rating_events.iter().rev())
    }

    /// Events created at or after `since`, newest first
    pub fn rating_events_since(
        &self,
        since: DateTime<Utc>,
    ) -> impl Iterator<Item = &RatingEvent> + '_ {
        self.rating_events_rev()
            .take_while(move |event| event.created_at >= since)
    }

    pub fn rating_event_count(&self) -> usize {
        self.base.rating_events.len() + self.staged.rating_events.len()
    }

    /// Assigns the event id and appends the event
    pub fn insert_rating_event(&mut self, mut event: RatingEvent) -> u64 {
        self.staged.next_event_id += 1;
        event.id = self.staged.next_event_id;
        let id = event.id;
        self.staged.rating_events.push(event);
        id
    }

    // Rounds

    pub fn round(&self, id: RoundId) -> Option<&GlobalRound> {
        self.staged
            .rounds
            .get(&id)
            .or_else(|| self.base.rounds.get(&id))
    }

    pub fn round_mut(&mut self, id: RoundId) -> CoreResult<&mut GlobalRound> {
        if !self.staged.rounds.contains_key(&id) {
            let round = self
                .base
                .rounds
                .get(&id)
                .cloned()
                .ok_or(RoundError::RoundNotFound { round_id: id })?;
            self.staged.rounds.insert(id, round);
        }
        self.staged
            .rounds
            .get_mut(&id)
            .ok_or_else(|| RoundError::storage("Staged round vanished"))
    }

    /// Round ids ascending
    fn round_ids(&self) -> Vec<RoundId> {
        let mut ids: Vec<RoundId> = self
            .base
            .rounds
            .keys()
            .chain(self.staged.rounds.keys())
            .copied()
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// The round in `Active` or `FinalVoting`, if any
    pub fn current_round(&self) -> Option<&GlobalRound> {
        self.round_ids()
            .into_iter()
            .rev()
            .filter_map(|id| self.round(id))
            .find(|round| round.phase.accepts_votes())
    }

    pub fn latest_closed_round(&self) -> Option<&GlobalRound> {
        self.round_ids()
            .into_iter()
            .rev()
            .filter_map(|id| self.round(id))
            .find(|round| round.phase == RoundPhase::Closed)
    }

    /// Open a new round in `Active`
    pub fn create_round(
        &mut self,
        start_time: DateTime<Utc>,
        rating_end_time: DateTime<Utc>,
        final_voting_end_time: DateTime<Utc>,
    ) -> &GlobalRound {
        self.staged.next_round_id += 1;
        let id = self.staged.next_round_id;
        let round = GlobalRound {
            id,
            start_time,
            rating_end_time,
            final_voting_end_time,
            phase: RoundPhase::Active,
            history: vec![PhaseChange {
                phase: RoundPhase::Active,
                at: start_time,
            }],
            finalists: Vec::new(),
            standings: Vec::new(),
            closed_at: None,
            next_round_id: None,
        };
        self.staged.rounds.entry(id).or_insert(round)
    }

    // Round stats

    pub fn round_stat(&self, round_id: RoundId, profile_id: &str) -> Option<&RoundStat> {
        self.staged
            .round_stats
            .get(&(round_id, profile_id.to_string()))
            .or_else(|| {
                self.base
                    .round_stats
                    .get(&round_id)
                    .and_then(|stats| stats.get(profile_id))
            })
    }

    /// Creates a zero stat when the profile has none in this round
    pub fn round_stat_mut(&mut self, round_id: RoundId, profile_id: &str) -> &mut RoundStat {
        let key = (round_id, profile_id.to_string());
        let base = &self.base;
        self.staged.round_stats.entry(key).or_insert_with(|| {
            base.round_stats
                .get(&round_id)
                .and_then(|stats| stats.get(profile_id))
                .cloned()
                .unwrap_or_else(|| RoundStat::new(round_id, profile_id.to_string()))
        })
    }

    pub fn round_stats(&self, round_id: RoundId) -> Vec<&RoundStat> {
        let committed = self
            .base
            .round_stats
            .get(&round_id)
            .into_iter()
            .flat_map(|stats| stats.values())
            .filter(move |stat| {
                !self
                    .staged
                    .round_stats
                    .contains_key(&(round_id, stat.profile_id.clone()))
            });
        let staged = self
            .staged
            .round_stats
            .iter()
            .filter(move |((id, _), _)| *id == round_id)
            .map(|(_, stat)| stat);
        committed.chain(staged).collect()
    }

    // Winner records

    /// Assigns the record id and appends the record
    pub fn append_winner(&mut self, mut record: WinnerRecord) -> &WinnerRecord {
        self.staged.next_winner_id += 1;
        record.id = self.staged.next_winner_id;
        self.staged.winner_records.push(record);
        let last = self.staged.winner_records.len() - 1;
        &self.staged.winner_records[last]
    }

    pub fn winner_records(&self) -> impl Iterator<Item = &WinnerRecord> + '_ {
        self.base
            .winner_records
            .iter()
            .chain(self.staged.winner_records.iter())
    }
}
