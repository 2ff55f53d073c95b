//! Per-marker sample histories with constant-velocity prediction.

use std::collections::HashMap;

use nalgebra::Vector3;

use super::track_state::TrackState;
use crate::frame::HandTransform;

/// Samples retained per marker.
pub const HISTORY_CAPACITY: usize = 3;

/// Scales the extrapolated distance. Fixed at 1, i.e. constant velocity.
const ACCELERATION_FACTOR: f32 = 1.0;

/// One recorded transform of a marker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryEntry {
    pub transform: HandTransform,
    /// Seconds.
    pub timestamp: f64,
    /// `true` for detections, `false` for predictions.
    pub trusted: bool,
}

/// Fixed-capacity ring buffer of the most recent samples of one marker.
#[derive(Debug, Clone, Default)]
pub struct MarkerHistory {
    entries: [Option<HistoryEntry>; HISTORY_CAPACITY],
    head: usize,
    len: usize,
    untrusted_streak: u32,
}

impl MarkerHistory {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Consecutive predictions since the history was last fully trusted.
    pub fn untrusted_streak(&self) -> u32 {
        self.untrusted_streak
    }

    pub fn state(&self) -> TrackState {
        match self.latest() {
            None => TrackState::Undetected,
            Some(e) if e.trusted => TrackState::Trusted,
            Some(_) => TrackState::Predicted,
        }
    }

    /// Samples from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> + '_ {
        (0..self.len).filter_map(move |i| self.entries[(self.head + i) % HISTORY_CAPACITY].as_ref())
    }

    pub fn oldest(&self) -> Option<&HistoryEntry> {
        self.get(0)
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.len.checked_sub(1).and_then(|i| self.get(i))
    }

    fn get(&self, i: usize) -> Option<&HistoryEntry> {
        if i >= self.len {
            return None;
        }
        self.entries[(self.head + i) % HISTORY_CAPACITY].as_ref()
    }

    fn latest_mut(&mut self) -> Option<&mut HistoryEntry> {
        let i = self.len.checked_sub(1)?;
        self.entries[(self.head + i) % HISTORY_CAPACITY].as_mut()
    }

    fn push(&mut self, entry: HistoryEntry) {
        if self.len == HISTORY_CAPACITY {
            self.entries[self.head] = Some(entry);
            self.head = (self.head + 1) % HISTORY_CAPACITY;
        } else {
            self.entries[(self.head + self.len) % HISTORY_CAPACITY] = Some(entry);
            self.len += 1;
        }
    }

    fn clear(&mut self) {
        *self = Self::default();
    }

    /// Drops retained predictions, keeping detections in order.
    fn retain_trusted(&mut self) {
        let trusted: Vec<HistoryEntry> = self.iter().filter(|e| e.trusted).copied().collect();
        let streak = self.untrusted_streak;
        self.clear();
        for entry in trusted {
            self.push(entry);
        }
        self.untrusted_streak = streak;
    }

    fn fully_trusted(&self) -> bool {
        matches!((self.oldest(), self.latest()), (Some(a), Some(b)) if a.trusted && b.trusted)
    }

    /// Extrapolates the latest sample to `now`.
    fn extrapolate(&self, now: f64) -> Option<HandTransform> {
        let latest = *self.latest()?;
        if self.len < HISTORY_CAPACITY {
            return Some(latest.transform);
        }
        let (Some(prev), Some(last)) = (self.get(HISTORY_CAPACITY - 2), self.get(HISTORY_CAPACITY - 1)) else {
            return Some(latest.transform);
        };

        let step = last.transform.position - prev.transform.position;
        let dt = last.timestamp - prev.timestamp;
        let speed = if dt > 0.0 { step.norm() / dt as f32 } else { 0.0 };
        let distance = speed * ACCELERATION_FACTOR * (now - last.timestamp) as f32;
        let direction = step.try_normalize(f32::EPSILON).unwrap_or_else(Vector3::zeros);

        Some(HandTransform {
            position: last.transform.position + direction * distance,
            ..last.transform
        })
    }
}

/// Histories of every marker id seen during a session.
///
/// Slots live in an arena indexed through the id map; a lost marker keeps its slot with an empty
/// history.
#[derive(Debug, Clone)]
pub struct TrackHistory {
    slots: Vec<MarkerHistory>,
    ids: Vec<u32>,
    index: HashMap<u32, usize>,
    epsilon: f32,
    untrusted_ceiling: u32,
}

impl TrackHistory {
    pub fn new(epsilon: f32, untrusted_ceiling: u32) -> Self {
        Self {
            slots: Vec::new(),
            ids: Vec::new(),
            index: HashMap::new(),
            epsilon,
            untrusted_ceiling,
        }
    }

    /// Known ids in order of first observation.
    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn get(&self, id: u32) -> Option<&MarkerHistory> {
        self.index.get(&id).map(|&i| &self.slots[i])
    }

    pub fn state(&self, id: u32) -> TrackState {
        self.get(id).map(MarkerHistory::state).unwrap_or_default()
    }

    fn slot_mut(&mut self, id: u32) -> &mut MarkerHistory {
        let i = *self.index.entry(id).or_insert_with(|| {
            self.slots.push(MarkerHistory::default());
            self.ids.push(id);
            self.slots.len() - 1
        });
        &mut self.slots[i]
    }

    /// Records a detection of `id`.
    ///
    /// A position within `epsilon` of the latest sample only refreshes that sample's rotation and
    /// marks it trusted. Predictions still retained from an occlusion are then dropped, since a
    /// marker at rest would never push them out.
    pub fn observe(&mut self, id: u32, transform: HandTransform, timestamp: f64) {
        let epsilon = self.epsilon;
        let slot = self.slot_mut(id);
        let unmoved = slot
            .latest()
            .is_some_and(|last| (last.transform.position - transform.position).norm() <= epsilon);
        if let Some(last) = slot.latest_mut().filter(|_| unmoved) {
            last.transform.rotation = transform.rotation;
            last.trusted = true;
            if !slot.fully_trusted() {
                slot.retain_trusted();
            }
        } else {
            slot.push(HistoryEntry {
                transform,
                timestamp,
                trusted: true,
            });
        }
        if slot.fully_trusted() {
            slot.untrusted_streak = 0;
        }
    }

    /// Handles a tick in which `id` was not detected and returns the predicted transform.
    ///
    /// A prediction within `epsilon` of the latest sample marks that sample untrusted instead of
    /// appending a copy. Either way the streak grows. Once it exceeds the ceiling the history is
    /// cleared and `None` is returned until the marker is detected again.
    pub fn predict(&mut self, id: u32, now: f64) -> Option<HandTransform> {
        let (ceiling, epsilon) = (self.untrusted_ceiling, self.epsilon);
        let &i = self.index.get(&id)?;
        let slot = &mut self.slots[i];

        if slot.untrusted_streak > ceiling {
            log::debug!("marker {id} lost after {} predictions", slot.untrusted_streak);
            slot.clear();
            return None;
        }

        let predicted = slot.extrapolate(now)?;
        match slot.latest_mut() {
            Some(last) if (last.transform.position - predicted.position).norm() <= epsilon => {
                last.trusted = false;
            }
            _ => slot.push(HistoryEntry {
                transform: predicted,
                timestamp: now,
                trusted: false,
            }),
        }
        slot.untrusted_streak += 1;
        log::trace!(
            "marker {id} predicted at {:?} (streak {})",
            predicted.position,
            slot.untrusted_streak
        );
        Some(predicted)
    }

    /// Latest transform of every id with a non-empty history.
    pub fn latest_transforms(&self) -> impl Iterator<Item = (u32, HandTransform)> + '_ {
        self.ids
            .iter()
            .zip(&self.slots)
            .filter_map(|(&id, slot)| slot.latest().map(|e| (id, e.transform)))
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.ids.clear();
        self.index.clear();
    }
}

impl Default for TrackHistory {
    fn default() -> Self {
        Self::new(1e-4, 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn at(x: f32) -> HandTransform {
        HandTransform::new(Vector3::new(x, 0.0, 0.0))
    }

    #[test]
    fn ring_buffer_evicts_oldest() {
        let mut history = TrackHistory::default();
        for (t, x) in [0.0, 1.0, 2.0, 3.0].into_iter().enumerate() {
            history.observe(1, at(x), t as f64);
        }
        let slot = history.get(1).unwrap();
        assert_eq!(slot.len(), HISTORY_CAPACITY);
        let xs: Vec<f32> = slot.iter().map(|e| e.transform.position.x).collect();
        assert_eq!(xs, vec![1.0, 2.0, 3.0]);
        assert_eq!(slot.state(), TrackState::Trusted);
    }

    #[test]
    fn jitter_below_epsilon_is_not_appended() {
        let mut history = TrackHistory::default();
        history.observe(1, at(0.0), 0.0);
        let mut turned = at(0.00001);
        turned.rotation = Vector3::new(0.0, 45.0, 0.0);
        history.observe(1, turned, 1.0);

        let slot = history.get(1).unwrap();
        assert_eq!(slot.len(), 1);
        assert_eq!(slot.latest().unwrap().transform.rotation.y, 45.0);
        assert_eq!(slot.latest().unwrap().timestamp, 0.0);
    }

    #[test]
    fn constant_velocity_prediction() {
        let mut history = TrackHistory::default();
        history.observe(7, at(0.0), 0.0);
        history.observe(7, at(1.0), 1.0);
        history.observe(7, at(2.0), 2.0);

        let predicted = history.predict(7, 3.0).unwrap();
        assert_relative_eq!(predicted.position, Vector3::new(3.0, 0.0, 0.0), epsilon = 1e-5);
        assert_eq!(history.state(7), TrackState::Predicted);
        assert_eq!(history.get(7).unwrap().untrusted_streak(), 1);
    }

    #[test]
    fn short_history_repeats_latest() {
        let mut history = TrackHistory::default();
        history.observe(3, at(5.0), 0.0);
        history.observe(3, at(6.0), 1.0);
        let predicted = history.predict(3, 2.0).unwrap();
        assert_eq!(predicted.position.x, 6.0);
    }

    #[test]
    fn zero_interval_does_not_divide_by_zero() {
        let mut history = TrackHistory::default();
        history.observe(3, at(0.0), 1.0);
        history.observe(3, at(1.0), 1.0);
        history.observe(3, at(2.0), 1.0);
        let predicted = history.predict(3, 2.0).unwrap();
        assert_eq!(predicted.position.x, 2.0);
    }

    #[test]
    fn unknown_or_empty_history_predicts_nothing() {
        let mut history = TrackHistory::default();
        assert!(history.predict(42, 0.0).is_none());
        assert!(history.get(42).is_none());
        assert_eq!(history.state(42), TrackState::Undetected);
        assert_eq!(history.latest_transforms().count(), 0);
    }

    #[test]
    fn history_clears_after_streak_exceeds_ceiling() {
        let mut history = TrackHistory::new(1e-4, 10);
        for t in 0..3 {
            history.observe(1, at(t as f32), t as f64);
        }
        for i in 0..11 {
            assert!(history.predict(1, 3.0 + i as f64).is_some(), "miss {i}");
        }
        assert_eq!(history.get(1).unwrap().untrusted_streak(), 11);

        assert!(history.predict(1, 14.0).is_none());
        let slot = history.get(1).unwrap();
        assert!(slot.is_empty());
        assert_eq!(slot.untrusted_streak(), 0);
        assert_eq!(history.latest_transforms().count(), 0);
        // The slot persists.
        assert_eq!(history.ids(), &[1]);
    }

    #[test]
    fn trust_resets_only_when_oldest_and_newest_are_trusted() {
        let mut history = TrackHistory::default();
        for t in 0..3 {
            history.observe(1, at(t as f32), t as f64);
        }
        history.predict(1, 3.0);
        history.predict(1, 4.0);
        assert_eq!(history.get(1).unwrap().untrusted_streak(), 2);

        history.observe(1, at(10.0), 5.0);
        assert_eq!(history.get(1).unwrap().untrusted_streak(), 2);
        history.observe(1, at(11.0), 6.0);
        assert_eq!(history.get(1).unwrap().untrusted_streak(), 2);
        history.observe(1, at(12.0), 7.0);
        assert_eq!(history.get(1).unwrap().untrusted_streak(), 0);
    }

    #[test]
    fn stationary_marker_recovers_after_occlusion() {
        let mut history = TrackHistory::new(1e-4, 10);
        let mut t = 0.0;
        for round in 0..10 {
            for _ in 0..5 {
                history.observe(1, at(1.0), t);
                t += 1.0;
            }
            for _ in 0..3 {
                let predicted = history.predict(1, t).unwrap();
                assert_eq!(predicted.position.x, 1.0);
                t += 1.0;
            }
            let slot = history.get(1).unwrap();
            assert_eq!(slot.len(), 1, "round {round}");
            assert_eq!(slot.untrusted_streak(), 3, "round {round}");
            assert_eq!(slot.state(), TrackState::Predicted);

            history.observe(1, at(1.0), t);
            t += 1.0;
            assert_eq!(history.state(1), TrackState::Trusted, "round {round}");
            assert_eq!(history.get(1).unwrap().untrusted_streak(), 0, "round {round}");
        }
    }

    #[test]
    fn resting_after_occlusion_drops_stale_predictions() {
        let mut history = TrackHistory::default();
        for t in 0..3 {
            history.observe(1, at(t as f32), t as f64);
        }
        history.predict(1, 3.0);
        history.predict(1, 4.0);

        history.observe(1, at(10.0), 5.0);
        assert_eq!(history.get(1).unwrap().untrusted_streak(), 2);
        history.observe(1, at(10.0), 6.0);
        let slot = history.get(1).unwrap();
        assert_eq!(slot.untrusted_streak(), 0);
        assert_eq!(slot.len(), 1);
        assert_eq!(slot.latest().unwrap().transform.position.x, 10.0);
    }

    #[test]
    fn ids_keep_first_seen_order() {
        let mut history = TrackHistory::default();
        history.observe(9, at(0.0), 0.0);
        history.observe(2, at(0.0), 0.0);
        history.observe(9, at(1.0), 1.0);
        let ids: Vec<u32> = history.latest_transforms().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![9, 2]);
    }
}
