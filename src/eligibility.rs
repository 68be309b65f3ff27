//! The pure predicate matching a worker against a waiting prompt (spec §4.3).

use std::time::Duration;

use crate::domain::{WaitingPrompt, Worker};

/// Why a worker cannot currently generate a given prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Stale,
    Models,
    ServerId,
    MaxContentLength,
    MaxLength,
    MatchingSoftprompt,
}

impl SkipReason {
    /// The key used when tallying `skipped` reasons in a poll response.
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Stale => "stale",
            SkipReason::Models => "models",
            SkipReason::ServerId => "server_id",
            SkipReason::MaxContentLength => "max_content_length",
            SkipReason::MaxLength => "max_length",
            SkipReason::MatchingSoftprompt => "matching_softprompt",
        }
    }
}

/// Outcome of `can_generate`: either the worker is eligible (carrying the
/// softprompt name it should be assigned, possibly empty) or it is not
/// (carrying the first clause that failed).
pub type Eligibility = Result<String, SkipReason>;

/// Evaluate whether `worker` can currently generate `wp`, in the order
/// specified by spec §4.3. The first failing clause wins.
pub fn can_generate(worker: &Worker, wp: &WaitingPrompt, stale_after: Duration) -> Eligibility {
    if worker.is_stale(stale_after) {
        return Err(SkipReason::Stale);
    }
    if !wp.models.is_empty() && !wp.models.contains(&worker.model) {
        return Err(SkipReason::Models);
    }
    if !wp.servers.is_empty() && !wp.servers.contains(&worker.id) {
        return Err(SkipReason::ServerId);
    }
    if wp.params.max_content_length > worker.max_content_length {
        return Err(SkipReason::MaxContentLength);
    }
    if wp.params.max_length > worker.max_length {
        return Err(SkipReason::MaxLength);
    }
    for sp in &wp.softprompts {
        if sp.is_empty() {
            return Ok(String::new());
        }
        if let Some(name) = worker.softprompts.iter().find(|n| n.contains(sp.as_str())) {
            return Ok(name.clone());
        }
    }
    Err(SkipReason::MatchingSoftprompt)
}
