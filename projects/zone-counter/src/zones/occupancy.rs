// Per-track occupancy history and the transition state machine

use super::ZoneId;
use std::collections::{HashMap, VecDeque};

/// Track identifier assigned by the detector.
pub type TrackId = u64;

/// Default number of observations kept per (track, zone) pair.
pub const DEFAULT_HISTORY_LEN: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Entered,
    Exited,
}

/// Bounded inside/outside history keyed by (track, zone).
///
/// Entries are created on first observation and only removed when their zone is
/// purged or the whole history is cleared. Tracks that vanish from the detector
/// keep their entries, so memory grows with the number of distinct track ids
/// seen during a session.
#[derive(Debug)]
pub struct OccupancyHistory {
    max_len: usize,
    entries: HashMap<(TrackId, ZoneId), VecDeque<bool>>,
}

impl OccupancyHistory {
    pub fn new(max_len: usize) -> Self {
        Self {
            // Two samples are the minimum needed to see a transition
            max_len: max_len.max(2),
            entries: HashMap::new(),
        }
    }

    /// Append one observation and report the transition it completes, if any.
    pub fn record(&mut self, track: TrackId, zone: ZoneId, inside: bool) -> Option<Transition> {
        let history = self
            .entries
            .entry((track, zone))
            .or_insert_with(|| VecDeque::with_capacity(self.max_len + 1));

        history.push_back(inside);
        if history.len() > self.max_len {
            history.pop_front();
        }

        let n = history.len();
        if n < 2 {
            return None;
        }
        match (history[n - 2], history[n - 1]) {
            (false, true) => Some(Transition::Entered),
            (true, false) => Some(Transition::Exited),
            _ => None,
        }
    }

    /// Drop every history that references `zone`.
    pub fn purge_zone(&mut self, zone: ZoneId) {
        self.entries.retain(|&(_, z), _| z != zone);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, track: TrackId, zone: ZoneId) -> Option<&VecDeque<bool>> {
        self.entries.get(&(track, zone))
    }
}

impl Default for OccupancyHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LEN)
    }
}
