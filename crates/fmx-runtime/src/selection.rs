//! Playlist selection
//!
//! Sequential, shuffled and weighted track choice with a no-repeat window.
//! Weighted draws follow the cumulative-weight walk of a random
//! container; uniform draws retry a few times before scanning.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

use fmx_core::{EventGuid, EventRef};

use crate::settings::EventWeight;

/// Random draws before falling back to a linear scan
const UNIFORM_ATTEMPTS: usize = 8;

// ═══════════════════════════════════════════════════════════════════════════════
// WEIGHT POLICY
// ═══════════════════════════════════════════════════════════════════════════════

/// Supplies per-track weights for shuffled playlists
///
/// A result is only used when it has one weight per track.
pub trait WeightPolicy: Send + Sync {
    fn weights(&self, tracks: &[EventRef]) -> Vec<f32>;
}

/// Weight lookup by event; unknown events weigh 0
#[derive(Debug, Clone, Default)]
pub struct WeightTable {
    weights: HashMap<EventGuid, f32>,
}

impl WeightTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &[EventWeight]) -> Self {
        let mut table = Self::new();
        for entry in entries {
            table.set(&entry.event, entry.weight);
        }
        table
    }

    pub fn set(&mut self, event: &EventRef, weight: f32) {
        self.weights.insert(event.guid, weight.max(0.0));
    }

    pub fn weight(&self, event: &EventRef) -> f32 {
        self.weights.get(&event.guid).copied().unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

impl WeightPolicy for WeightTable {
    fn weights(&self, tracks: &[EventRef]) -> Vec<f32> {
        tracks.iter().map(|t| self.weight(t)).collect()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT SEQUENCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Authored playlist
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventSequence {
    pub tracks: Vec<EventRef>,
    #[serde(rename = "loop")]
    pub looping: bool,
    pub shuffle: bool,
    pub no_repeat_window: usize,
    /// Per-track weights; ignored unless one per track
    pub weights: Option<Vec<f32>>,
    pub crossfade_secs: f32,
    pub pre_delay_secs: f32,
    pub post_delay_secs: f32,
}

impl Default for EventSequence {
    fn default() -> Self {
        Self {
            tracks: Vec::new(),
            looping: true,
            shuffle: false,
            no_repeat_window: 0,
            weights: None,
            crossfade_secs: 0.0,
            pre_delay_secs: 0.0,
            post_delay_secs: 0.0,
        }
    }
}

impl EventSequence {
    pub fn new(tracks: Vec<EventRef>) -> Self {
        Self {
            tracks,
            ..Self::default()
        }
    }

    pub fn with_loop(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_no_repeat_window(mut self, window: usize) -> Self {
        self.no_repeat_window = window;
        self
    }

    pub fn with_weights(mut self, weights: Vec<f32>) -> Self {
        self.weights = Some(weights);
        self
    }

    pub fn with_crossfade(mut self, secs: f32) -> Self {
        self.crossfade_secs = secs;
        self
    }

    pub fn with_delays(mut self, pre_secs: f32, post_secs: f32) -> Self {
        self.pre_delay_secs = pre_secs;
        self.post_delay_secs = post_secs;
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRACK SELECTOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Selection options captured when a playlist starts
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectionMode {
    pub shuffle: bool,
    pub no_repeat_window: usize,
    /// One weight per track when present
    pub weights: Option<Vec<f32>>,
}

impl SelectionMode {
    /// Plain in-order playback
    #[inline]
    pub fn is_sequential(&self) -> bool {
        !self.shuffle && self.weights.as_ref().is_none_or(|w| w.is_empty())
    }
}

/// Cursor, history and RNG of one playlist
pub struct TrackSelector {
    rng: StdRng,
    mode: SelectionMode,
    count: usize,
    cursor: usize,
    looping: bool,
    history: VecDeque<usize>,
}

impl TrackSelector {
    /// Seeded when `seed` is set, else from OS entropy
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            rng,
            mode: SelectionMode::default(),
            count: 0,
            cursor: 0,
            looping: true,
            history: VecDeque::new(),
        }
    }

    /// Reset for a new playlist: cursor to 0, empty history
    pub fn reset(&mut self, count: usize, looping: bool, mut mode: SelectionMode) {
        if mode.weights.as_ref().is_some_and(|w| w.len() != count) {
            log::warn!("[Music] Ignoring weights that do not match {} track(s)", count);
            mode.weights = None;
        }
        self.mode = mode;
        self.count = count;
        self.cursor = 0;
        self.looping = looping;
        self.history.clear();
    }

    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn mode(&self) -> &SelectionMode {
        &self.mode
    }

    pub fn history(&self) -> Vec<usize> {
        self.history.iter().copied().collect()
    }

    /// Choose the index of the next track and record it
    pub fn select_next(&mut self) -> usize {
        if self.count == 0 {
            return 0;
        }
        let chosen = if self.mode.is_sequential() {
            if self.cursor >= self.count {
                self.cursor = 0;
            }
            self.cursor
        } else {
            let excluded = self.excluded();
            let weighted = self
                .mode
                .weights
                .clone()
                .and_then(|w| self.choose_weighted(&w, &excluded));
            weighted.unwrap_or_else(|| self.choose_uniform(&excluded))
        };
        self.cursor = chosen;
        self.push_history(chosen);
        chosen
    }

    /// Step the cursor after a finished track in sequential mode
    ///
    /// Returns `false` when a non-looping playlist is exhausted. Shuffled
    /// playlists never end on their own.
    pub fn advance(&mut self) -> bool {
        if !self.mode.is_sequential() || self.count == 0 {
            return self.count > 0;
        }
        if self.looping {
            self.cursor = (self.cursor + 1) % self.count;
            true
        } else {
            self.cursor += 1;
            self.cursor < self.count
        }
    }

    /// Jump the cursor by `delta` (wrapping) and return the new index
    pub fn step(&mut self, delta: isize) -> Option<usize> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as isize;
        let current = (self.cursor.min(self.count - 1)) as isize;
        self.cursor = (current + delta).rem_euclid(n) as usize;
        Some(self.cursor)
    }

    /// History indices to skip, empty when exclusion would leave nothing
    fn excluded(&self) -> HashSet<usize> {
        if self.mode.no_repeat_window == 0 {
            return HashSet::new();
        }
        let excluded: HashSet<usize> = self.history.iter().copied().collect();
        if excluded.len() >= self.count {
            HashSet::new()
        } else {
            excluded
        }
    }

    fn choose_weighted(&mut self, weights: &[f32], excluded: &HashSet<usize>) -> Option<usize> {
        let eligible: Vec<(usize, f32)> = weights
            .iter()
            .enumerate()
            .filter(|(i, _)| !excluded.contains(i))
            .map(|(i, w)| (i, if w.is_finite() { w.max(0.0) } else { 0.0 }))
            .filter(|(_, w)| *w > 0.0)
            .collect();
        let total: f32 = eligible.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return None;
        }

        let r = self.rng.random::<f32>() * total;
        let mut cumulative = 0.0;
        for (i, w) in &eligible {
            cumulative += w;
            if r < cumulative {
                return Some(*i);
            }
        }
        eligible.last().map(|(i, _)| *i)
    }

    fn choose_uniform(&mut self, excluded: &HashSet<usize>) -> usize {
        if excluded.is_empty() {
            return self.rng.random_range(0..self.count);
        }
        for _ in 0..UNIFORM_ATTEMPTS {
            let i = self.rng.random_range(0..self.count);
            if !excluded.contains(&i) {
                return i;
            }
        }
        (0..self.count).find(|i| !excluded.contains(i)).unwrap_or(0)
    }

    fn push_history(&mut self, index: usize) {
        let window = self.mode.no_repeat_window;
        if window == 0 {
            return;
        }
        self.history.push_back(index);
        while self.history.len() > window {
            self.history.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selector(count: usize, looping: bool, mode: SelectionMode) -> TrackSelector {
        let mut s = TrackSelector::new(Some(0x5eed));
        s.reset(count, looping, mode);
        s
    }

    #[test]
    fn test_sequential_loop_and_end() {
        let mut s = selector(3, true, SelectionMode::default());
        let mut picks = Vec::new();
        for _ in 0..5 {
            picks.push(s.select_next());
            assert!(s.advance());
        }
        assert_eq!(picks, vec![0, 1, 2, 0, 1]);

        let mut s = selector(2, false, SelectionMode::default());
        assert_eq!(s.select_next(), 0);
        assert!(s.advance());
        assert_eq!(s.select_next(), 1);
        assert!(!s.advance());
    }

    #[test]
    fn test_single_positive_weight_always_wins() {
        let mode = SelectionMode {
            shuffle: true,
            no_repeat_window: 0,
            weights: Some(vec![0.0, 1.0, 0.0]),
        };
        let mut s = selector(3, true, mode);
        for _ in 0..200 {
            assert_eq!(s.select_next(), 1);
        }
    }

    #[test]
    fn test_zero_weights_fall_back_to_uniform() {
        let mode = SelectionMode {
            shuffle: false,
            no_repeat_window: 0,
            weights: Some(vec![0.0, 0.0, 0.0]),
        };
        let mut s = selector(3, true, mode);
        let seen: HashSet<usize> = (0..200).map(|_| s.select_next()).collect();
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_no_repeat_window_two_of_three() {
        let mode = SelectionMode {
            shuffle: true,
            no_repeat_window: 2,
            weights: None,
        };
        let mut s = selector(3, true, mode);
        let picks: Vec<usize> = (0..300).map(|_| s.select_next()).collect();
        for w in picks.windows(3) {
            assert_ne!(w[0], w[1]);
            assert_ne!(w[1], w[2]);
            assert_ne!(w[0], w[2]);
        }
        assert_eq!(s.history().len(), 2);
    }

    #[test]
    fn test_window_covering_all_tracks_does_not_stall() {
        let mode = SelectionMode {
            shuffle: true,
            no_repeat_window: 5,
            weights: None,
        };
        let mut s = selector(2, true, mode);
        for _ in 0..20 {
            assert!(s.select_next() < 2);
        }
    }

    #[test]
    fn test_mismatched_weights_ignored() {
        let mode = SelectionMode {
            shuffle: false,
            no_repeat_window: 0,
            weights: Some(vec![1.0]),
        };
        let s = selector(3, true, mode);
        assert!(s.mode().is_sequential());
    }

    #[test]
    fn test_step_wraps() {
        let mut s = selector(3, true, SelectionMode::default());
        assert_eq!(s.step(-1), Some(2));
        assert_eq!(s.step(1), Some(0));
        assert_eq!(s.step(1), Some(1));

        let mut empty = selector(0, true, SelectionMode::default());
        assert_eq!(empty.step(1), None);
    }

    #[test]
    fn test_weight_table_policy() {
        let a = EventRef::from_path("event:/Music/A");
        let b = EventRef::from_path("event:/Music/B");
        let table = WeightTable::from_entries(&[EventWeight {
            event: b.clone(),
            weight: 2.0,
        }]);
        assert_eq!(table.weights(&[a, b]), vec![0.0, 2.0]);
    }

    #[test]
    fn test_sequence_json() {
        let json = r#"{ "tracks": [ { "path": "event:/Music/A" } ], "loop": false, "shuffle": true }"#;
        let seq: EventSequence = serde_json::from_str(json).unwrap();
        assert!(!seq.looping);
        assert!(seq.shuffle);
        assert_eq!(seq.tracks.len(), 1);
    }
}
