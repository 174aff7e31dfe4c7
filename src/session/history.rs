use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationAttempt {
    pub timestamp: DateTime<Utc>,
    /// Normalized similarity, present whenever a comparison took place.
    pub similarity: Option<f32>,
    pub matched: bool,
    pub lighting_level: Option<f32>,
    pub error: Option<String>,
}

/// Rolling window of the most recent attempts in one session.
#[derive(Debug, Clone)]
pub struct AttemptHistory {
    attempts: VecDeque<VerificationAttempt>,
    capacity: usize,
}

impl AttemptHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { attempts: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn record(&mut self, attempt: VerificationAttempt) {
        if self.attempts.len() == self.capacity {
            self.attempts.pop_front();
        }
        self.attempts.push_back(attempt);
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn latest(&self) -> Option<&VerificationAttempt> {
        self.attempts.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &VerificationAttempt> {
        self.attempts.iter()
    }

    /// Returns the baseline when `current` falls below `ratio` times the mean of
    /// the two most recent recorded similarities.
    pub fn sudden_drop(&self, current: f32, ratio: f32) -> Option<f32> {
        let recent: Vec<f32> = self.attempts.iter().rev().filter_map(|a| a.similarity).take(2).collect();
        if recent.len() < 2 {
            return None;
        }
        let baseline = (recent[0] + recent[1]) / 2.0;
        (current < baseline * ratio).then_some(baseline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(similarity: Option<f32>) -> VerificationAttempt {
        VerificationAttempt {
            timestamp: Utc::now(),
            similarity,
            matched: similarity.is_some(),
            lighting_level: Some(50.0),
            error: None,
        }
    }

    #[test]
    fn keeps_only_most_recent_attempts() {
        let mut history = AttemptHistory::new(3);
        for i in 0..5 {
            history.record(attempt(Some(i as f32 / 10.0)));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.iter().next().unwrap().similarity, Some(0.2));
        assert_eq!(history.latest().unwrap().similarity, Some(0.4));
    }

    #[test]
    fn drop_needs_two_prior_scores() {
        let mut history = AttemptHistory::new(10);
        assert_eq!(history.sudden_drop(0.1, 0.8), None);
        history.record(attempt(Some(0.9)));
        assert_eq!(history.sudden_drop(0.1, 0.8), None);
    }

    #[test]
    fn drop_is_relative_to_recent_mean() {
        let mut history = AttemptHistory::new(10);
        history.record(attempt(Some(0.2)));
        history.record(attempt(Some(0.9)));
        history.record(attempt(None));
        history.record(attempt(Some(0.7)));

        // baseline (0.9 + 0.7) / 2 = 0.8, cutoff 0.64
        assert!(history.sudden_drop(0.6, 0.8).is_some());
        assert_eq!(history.sudden_drop(0.65, 0.8), None);
    }
}
