//! Insertion-ordered keyed collections for live `WaitingPrompt`s, plus a
//! lookup-only index from `ProcessingGeneration` id to its owning prompt.
//!
//! `HashMap` does not preserve insertion order, which the scheduler relies
//! on for fairness tie-breaks (spec §4.2); `indexmap::IndexMap` does.

use std::time::Duration;

use indexmap::IndexMap;
use uuid::Uuid;

use crate::domain::{User, WaitingPrompt};

/// How long a completed prompt is kept around before the sweeper removes it,
/// so a late `query_status` poll still sees the final result (spec §4.2).
const COMPLETED_RETENTION: Duration = Duration::from_secs(60);

/// Live `WaitingPrompt`s, in insertion order.
#[derive(Default)]
pub struct PromptIndex {
    prompts: IndexMap<Uuid, WaitingPrompt>,
}

impl PromptIndex {
    pub fn new() -> Self {
        PromptIndex::default()
    }

    pub fn insert(&mut self, wp: WaitingPrompt) -> Uuid {
        let id = wp.id;
        self.prompts.insert(id, wp);
        id
    }

    pub fn get(&self, id: &Uuid) -> Option<&WaitingPrompt> {
        self.prompts.get(id)
    }

    pub fn get_mut(&mut self, id: &Uuid) -> Option<&mut WaitingPrompt> {
        self.prompts.get_mut(id)
    }

    pub fn remove(&mut self, id: &Uuid) -> Option<WaitingPrompt> {
        self.prompts.shift_remove(id)
    }

    /// Iterate activated prompts in insertion order.
    pub fn iter_activated(&self) -> impl Iterator<Item = &WaitingPrompt> {
        self.prompts.values().filter(|wp| wp.activated)
    }

    /// Count non-completed, non-stale prompts owned by `user` (spec §4.2).
    pub fn count_waiting_requests(&self, user: &User, stale_after: Duration) -> usize {
        self.prompts
            .values()
            .filter(|wp| {
                wp.user_id == user.id && !wp.is_completed() && !wp.is_stale(stale_after)
            })
            .count()
    }

    /// Remove prompts that are stale, or completed and older than the
    /// retention window. Runs every 30s per spec §4.2.
    ///
    /// A stale prompt with a dispatched-but-not-yet-completed child is kept
    /// around rather than dropped outright: the worker holding that unit may
    /// still submit, and scenario 5 (spec §8) requires that late submission
    /// to still be accepted and credited even though the prompt itself has
    /// expired. It is removed once that child resolves (at which point it is
    /// either complete, cleaned up via `COMPLETED_RETENTION`, or has no more
    /// outstanding children and is swept on the next pass).
    ///
    /// Returns the ids removed for stale reasons (the caller uses this to
    /// wake any synchronous waiters so they can return `PromptExpired`).
    pub fn sweep(&mut self, stale_after: Duration) -> Vec<Uuid> {
        let mut expired = Vec::new();
        self.prompts.retain(|id, wp| {
            if wp.is_completed() {
                !wp.is_stale(COMPLETED_RETENTION)
            } else if wp.is_stale(stale_after) {
                if wp.n_processing() > 0 {
                    true
                } else {
                    expired.push(*id);
                    false
                }
            } else {
                true
            }
        });
        expired
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

/// Lookup-only index from a `ProcessingGeneration`'s id to the id of the
/// `WaitingPrompt` that owns it (spec §3 "Ownership": the Generation Index
/// holds weak, lookup-only references; the prompt owns the struct itself).
#[derive(Default)]
pub struct GenerationIndex {
    owners: IndexMap<Uuid, Uuid>,
}

impl GenerationIndex {
    pub fn new() -> Self {
        GenerationIndex::default()
    }

    pub fn register(&mut self, procgen_id: Uuid, owner_prompt_id: Uuid) {
        self.owners.insert(procgen_id, owner_prompt_id);
    }

    pub fn owner_of(&self, procgen_id: &Uuid) -> Option<Uuid> {
        self.owners.get(procgen_id).copied()
    }

    pub fn remove(&mut self, procgen_id: &Uuid) {
        self.owners.shift_remove(procgen_id);
    }

    pub fn retain_owned_by(&mut self, live_prompt_ids: &std::collections::HashSet<Uuid>) {
        self.owners.retain(|_, owner| live_prompt_ids.contains(owner));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::GenParams;
    use std::collections::HashSet;

    fn wp(user_id: u64) -> WaitingPrompt {
        WaitingPrompt::new(
            user_id,
            "hello".into(),
            GenParams::default(),
            HashSet::new(),
            HashSet::new(),
            vec!["".into()],
        )
    }

    #[test]
    fn iteration_preserves_insertion_order() {
        let mut idx = PromptIndex::new();
        let mut w1 = wp(1);
        w1.activate();
        let mut w2 = wp(1);
        w2.activate();
        let mut w3 = wp(1);
        w3.activate();
        let (id1, id2, id3) = (w1.id, w2.id, w3.id);
        idx.insert(w1);
        idx.insert(w2);
        idx.insert(w3);
        let ids: Vec<Uuid> = idx.iter_activated().map(|wp| wp.id).collect();
        assert_eq!(ids, vec![id1, id2, id3]);
    }

    #[test]
    fn only_activated_prompts_are_iterated() {
        let mut idx = PromptIndex::new();
        let inactive = wp(1);
        let mut active = wp(1);
        active.activate();
        let active_id = active.id;
        idx.insert(inactive);
        idx.insert(active);
        let ids: Vec<Uuid> = idx.iter_activated().map(|wp| wp.id).collect();
        assert_eq!(ids, vec![active_id]);
    }

    #[test]
    fn sweep_removes_stale_prompts_and_reports_them() {
        let mut idx = PromptIndex::new();
        let w = wp(1);
        let id = w.id;
        idx.insert(w);
        // a zero stale threshold makes every prompt immediately stale
        let expired = idx.sweep(Duration::from_secs(0));
        assert_eq!(expired, vec![id]);
        assert!(idx.get(&id).is_none());
    }

    #[test]
    fn sweep_parks_stale_prompt_with_outstanding_child_instead_of_dropping_it() {
        let mut idx = PromptIndex::new();
        let mut w = wp(1);
        w.activate();
        let id = w.id;
        w.n_remaining -= 1;
        w.processing_gens.push(crate::domain::ProcessingGeneration::new(
            id,
            Uuid::new_v4(),
            String::new(),
        ));
        idx.insert(w);

        let expired = idx.sweep(Duration::from_secs(0));
        assert!(expired.is_empty());
        assert!(idx.get(&id).is_some());
    }

    #[test]
    fn sweep_keeps_fresh_non_completed_prompts() {
        let mut idx = PromptIndex::new();
        let w = wp(1);
        let id = w.id;
        idx.insert(w);
        let expired = idx.sweep(Duration::from_secs(600));
        assert!(expired.is_empty());
        assert!(idx.get(&id).is_some());
    }
}
