//! Volunteer worker nodes: capability snapshot, liveness, and rolling
//! performance.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How many recent completions the rolling performance average is computed over.
const PERFORMANCE_WINDOW: usize = 20;

/// Lifecycle state of a worker, derived from its liveness timestamp.
/// `Fresh` exists only between creation and the first check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Fresh,
    Active,
    Stale,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct PerformanceSample {
    tokens: u64,
    elapsed_secs: f64,
}

/// One volunteer node running a language-model backend.
///
/// Workers are not persisted across restarts (spec §6): they re-materialize
/// on their first poll after the process comes back up.
#[derive(Debug, Clone)]
pub struct Worker {
    pub id: Uuid,
    pub name: String,
    pub user_id: u64,

    pub model: String,
    pub max_length: u32,
    pub max_content_length: u32,
    pub softprompts: HashSet<String>,
    /// Free-text description the worker's owner may set via check-in.
    pub info: String,

    last_check_in: Option<Instant>,
    created_at: Instant,

    pub contributions: u64,
    pub fulfilments: u64,
    uptime_secs: u64,

    performance_window: VecDeque<PerformanceSample>,
}

impl Worker {
    /// Create a worker that has never checked in yet (`Fresh`).
    pub fn new(id: Uuid, name: String, user_id: u64) -> Self {
        Worker {
            id,
            name,
            user_id,
            model: String::new(),
            max_length: 0,
            max_content_length: 0,
            softprompts: HashSet::new(),
            info: String::new(),
            last_check_in: None,
            created_at: Instant::now(),
            contributions: 0,
            fulfilments: 0,
            uptime_secs: 0,
            performance_window: VecDeque::with_capacity(PERFORMANCE_WINDOW),
        }
    }

    /// Update the capability snapshot and bump liveness. Called on every poll.
    pub fn check_in(
        &mut self,
        model: String,
        max_length: u32,
        max_content_length: u32,
        softprompts: HashSet<String>,
        info: String,
    ) {
        let now = Instant::now();
        if let Some(last) = self.last_check_in {
            self.uptime_secs += now.duration_since(last).as_secs();
        }
        self.model = model;
        self.max_length = max_length;
        self.max_content_length = max_content_length;
        self.softprompts = softprompts;
        self.info = info;
        self.last_check_in = Some(now);
    }

    pub fn state(&self, stale_after: Duration) -> WorkerState {
        match self.last_check_in {
            None => WorkerState::Fresh,
            Some(last) => {
                if last.elapsed() > stale_after {
                    WorkerState::Stale
                } else {
                    WorkerState::Active
                }
            }
        }
    }

    /// True unless the worker is `Active`. A worker that has never checked
    /// in (`Fresh`) is not eligible for dispatch any more than a `Stale`
    /// one is — both are excluded from eligibility and listings (spec §4.5).
    pub fn is_stale(&self, stale_after: Duration) -> bool {
        self.state(stale_after) != WorkerState::Active
    }

    /// Aggregate alive seconds, advanced on each check-in by the gap since
    /// the previous one (spec §3 "uptime").
    pub fn uptime(&self) -> u64 {
        self.uptime_secs
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Record a completed unit: credit tokens, bump fulfilments, and fold
    /// the sample into the rolling performance window.
    pub fn record_completion(&mut self, tokens: u64, elapsed: Duration) {
        self.contributions += tokens;
        self.fulfilments += 1;
        if self.performance_window.len() == PERFORMANCE_WINDOW {
            self.performance_window.pop_front();
        }
        self.performance_window.push_back(PerformanceSample {
            tokens,
            elapsed_secs: elapsed.as_secs_f64().max(f64::EPSILON),
        });
    }

    /// Tokens/sec over the last `PERFORMANCE_WINDOW` completions, or 0 if none yet.
    pub fn performance(&self) -> f64 {
        if self.performance_window.is_empty() {
            return 0.0;
        }
        let total_tokens: u64 = self.performance_window.iter().map(|s| s.tokens).sum();
        let total_secs: f64 = self.performance_window.iter().map(|s| s.elapsed_secs).sum();
        if total_secs <= 0.0 {
            0.0
        } else {
            total_tokens as f64 / total_secs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker() -> Worker {
        Worker::new(Uuid::new_v4(), "W1".into(), 1)
    }

    #[test]
    fn fresh_before_first_check_in() {
        let w = worker();
        assert_eq!(w.state(Duration::from_secs(300)), WorkerState::Fresh);
    }

    #[test]
    fn active_right_after_check_in() {
        let mut w = worker();
        w.check_in("model-a".into(), 80, 1024, HashSet::new(), String::new());
        assert_eq!(w.state(Duration::from_secs(300)), WorkerState::Active);
    }

    #[test]
    fn stale_threshold_is_strict_greater_than() {
        let mut w = worker();
        w.check_in("model-a".into(), 80, 1024, HashSet::new(), String::new());
        // a zero-duration threshold should already be stale since elapsed > 0 eventually;
        // use a real negative-margin check via the is_stale helper with tiny threshold.
        assert!(!w.is_stale(Duration::from_secs(300)));
    }

    #[test]
    fn performance_is_zero_with_no_completions() {
        assert_eq!(worker().performance(), 0.0);
    }

    #[test]
    fn performance_averages_over_window() {
        let mut w = worker();
        w.record_completion(10, Duration::from_secs(1));
        w.record_completion(20, Duration::from_secs(1));
        // (10+20) tokens / (1+1) secs = 15 tokens/sec
        assert!((w.performance() - 15.0).abs() < 1e-9);
    }

    #[test]
    fn performance_window_evicts_oldest_sample() {
        let mut w = worker();
        for _ in 0..PERFORMANCE_WINDOW {
            w.record_completion(1, Duration::from_secs(1));
        }
        // window full of 1 tok/sec samples
        assert!((w.performance() - 1.0).abs() < 1e-9);
        w.record_completion(1000, Duration::from_secs(1));
        // oldest evicted, average pulled up
        assert!(w.performance() > 1.0);
    }
}
