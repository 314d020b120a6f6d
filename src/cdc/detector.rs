//! Change detection across poll cycles.
//!
//! The detector itself is stateless configuration. Everything learned from
//! previous cycles lives in a [`DetectorState`] that the caller owns and
//! passes into every cycle.
//!
//! # Example
//!
//! ```rust
//! use pg_poller::cdc::{ChangeDetector, ChangeEvent, DetectorState, Row};
//!
//! let detector = ChangeDetector::new("id", true);
//! let mut state = DetectorState::default();
//!
//! let rows = vec![Row::new().with("id", 1i64).with("v", "a")];
//! let events = detector.process_cycle(&mut state, rows.clone()).unwrap();
//! assert!(matches!(events[0], ChangeEvent::Insert(_)));
//!
//! // Same rows again: nothing changed.
//! assert!(detector.process_cycle(&mut state, rows).unwrap().is_empty());
//! ```

use super::fingerprint::{fingerprint, Fingerprint};
use super::types::{ChangeEvent, PrimaryKey, Row};
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// What the detector remembers between cycles.
#[derive(Debug, Default, Clone)]
pub struct DetectorState {
    fingerprints: HashMap<PrimaryKey, Fingerprint>,
    known_ids: Vec<PrimaryKey>,
}

impl DetectorState {
    pub fn fingerprint_of(&self, key: &PrimaryKey) -> Option<&Fingerprint> {
        self.fingerprints.get(key)
    }

    pub fn contains(&self, key: &PrimaryKey) -> bool {
        self.fingerprints.contains_key(key)
    }

    /// Number of keys in the fingerprint table.
    pub fn len(&self) -> usize {
        self.fingerprints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fingerprints.is_empty()
    }

    /// Ids seen in the most recently finished cycle, in first-seen order.
    pub fn known_ids(&self) -> &[PrimaryKey] {
        &self.known_ids
    }
}

#[derive(Debug, Clone)]
pub struct ChangeDetector {
    primary_key: String,
    detect_deletes: bool,
}

impl ChangeDetector {
    pub fn new(primary_key: impl Into<String>, detect_deletes: bool) -> Self {
        Self {
            primary_key: primary_key.into(),
            detect_deletes,
        }
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub fn detects_deletes(&self) -> bool {
        self.detect_deletes
    }

    /// Starts a cycle that is fed one row at a time.
    pub fn begin_cycle<'a>(&'a self, state: &'a mut DetectorState) -> Cycle<'a> {
        Cycle {
            detector: self,
            state,
            current_ids: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Runs a whole cycle over an in-memory batch.
    ///
    /// Events come back in row order, followed by deletions in the order
    /// the ids were seen in the previous cycle. On error the known id set
    /// is left as it was.
    pub fn process_cycle<I>(&self, state: &mut DetectorState, rows: I) -> Result<Vec<ChangeEvent>>
    where
        I: IntoIterator<Item = Row>,
    {
        let mut cycle = self.begin_cycle(state);
        let mut events = Vec::new();
        for row in rows {
            if let Some(event) = cycle.observe(row)? {
                events.push(event);
            }
        }
        events.extend(cycle.finish());
        Ok(events)
    }
}

/// One poll cycle in progress.
///
/// Dropping a cycle without calling [`Cycle::finish`] keeps the previous
/// known id set. Fingerprints recorded so far stay in the table.
pub struct Cycle<'a> {
    detector: &'a ChangeDetector,
    state: &'a mut DetectorState,
    current_ids: Vec<PrimaryKey>,
    seen: HashSet<PrimaryKey>,
}

impl Cycle<'_> {
    /// Classifies one row and records its fingerprint.
    pub fn observe(&mut self, row: Row) -> Result<Option<ChangeEvent>> {
        let column = &self.detector.primary_key;
        let key = row
            .get(column)
            .and_then(PrimaryKey::from_value)
            .ok_or_else(|| Error::MissingKey {
                column: column.clone(),
            })?;

        if self.seen.insert(key.clone()) {
            self.current_ids.push(key.clone());
        } else {
            warn!(primary_key = %key, "Duplicate primary key in one poll, last row wins");
        }

        let current = fingerprint(&row);
        let event = match self.state.fingerprints.get(&key) {
            None => Some(ChangeEvent::Insert(row)),
            Some(stored) if *stored != current => Some(ChangeEvent::Update(row)),
            Some(_) => None,
        };
        self.state.fingerprints.insert(key, current);

        Ok(event)
    }

    /// Ids observed so far in this cycle.
    pub fn current_ids(&self) -> &[PrimaryKey] {
        &self.current_ids
    }

    /// Closes the cycle: computes deletions when enabled and replaces the
    /// known id set with this cycle's ids.
    pub fn finish(self) -> Vec<ChangeEvent> {
        let Cycle {
            detector,
            state,
            current_ids,
            seen,
        } = self;

        let mut deleted = Vec::new();
        if detector.detect_deletes {
            for id in &state.known_ids {
                if !seen.contains(id) {
                    state.fingerprints.remove(id);
                    deleted.push(ChangeEvent::Delete(id.clone()));
                }
            }
        }

        debug!(
            ids = current_ids.len(),
            deleted = deleted.len(),
            tracked = state.fingerprints.len(),
            "Cycle finished"
        );
        state.known_ids = current_ids;
        deleted
    }
}
