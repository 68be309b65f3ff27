//! The scheduler/dispatcher: the control surface called by the API
//! boundary. Wraps Registry + Prompt Index + Generation Index behind a
//! single lock (the "Broker lock") and threads it through every operation
//! as one `Arc<Broker>` value, replacing module-level globals with an
//! explicit, sharable handle.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use tokio::sync::Notify;
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::domain::{GenParams, WaitingPrompt, Worker};
use crate::eligibility::can_generate;
use crate::error::{BrokerError, BrokerResult};
use crate::index::{GenerationIndex, PromptIndex};
use crate::registry::Registry;
use crate::tokenize::word_count;

/// Whether a submitted prompt blocks for completion or returns its id immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Sync,
    Async,
}

/// Result of `submit_prompt`.
#[derive(Debug)]
pub enum SubmitOutcome {
    Completed(Vec<String>),
    Accepted(Uuid),
}

/// Result of one `poll_work` call.
#[derive(Debug, Default)]
pub struct PollOutcome {
    pub id: Option<Uuid>,
    pub prompt: Option<String>,
    pub payload: Option<Value>,
    pub softprompt: Option<String>,
    pub skipped: HashMap<String, u32>,
}

/// Snapshot of a prompt's progress, as returned by `query_status`.
#[derive(Debug)]
pub struct StatusReport {
    pub waiting: u32,
    pub processing: u32,
    pub finished: u32,
    pub generations: Vec<String>,
}

struct BrokerState {
    registry: Registry,
    prompts: PromptIndex,
    gens: GenerationIndex,
}

/// The single lock guarding Registry + Prompt Index + Generation Index as
/// one unit (spec §5). Critical sections are dictionary-scale only; no
/// network I/O is ever performed while held.
pub struct Broker {
    state: Mutex<BrokerState>,
    notifies: Mutex<HashMap<Uuid, Arc<Notify>>>,
    pub config: Config,
}

impl Broker {
    pub fn new(config: Config, registry: Registry) -> Arc<Self> {
        Arc::new(Broker {
            state: Mutex::new(BrokerState {
                registry,
                prompts: PromptIndex::new(),
                gens: GenerationIndex::new(),
            }),
            notifies: Mutex::new(HashMap::new()),
            config,
        })
    }

    fn notify_for(&self, prompt_id: Uuid) -> Arc<Notify> {
        self.notifies
            .lock()
            .unwrap()
            .entry(prompt_id)
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    fn wake(&self, prompt_id: Uuid) {
        if let Some(n) = self.notifies.lock().unwrap().get(&prompt_id) {
            n.notify_waiters();
        }
    }

    fn forget(&self, prompt_id: &Uuid) {
        self.notifies.lock().unwrap().remove(prompt_id);
    }

    // -- submit_prompt (spec §4.4) --------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub async fn submit_prompt(
        &self,
        api_key: &str,
        prompt: String,
        models: HashSet<String>,
        params_raw: Map<String, Value>,
        servers: HashSet<Uuid>,
        softprompts: Vec<String>,
        mode: Mode,
    ) -> BrokerResult<SubmitOutcome> {
        let (user_id, max_parallel) = {
            let state = self.state.lock().unwrap();
            let user = state.registry.find_user_by_api_key(api_key).ok_or_else(|| {
                warn!("submit_prompt: invalid API key");
                BrokerError::InvalidApiKey
            })?;
            (user.id, self.config.max_parallel_prompts)
        };

        if prompt.is_empty() {
            warn!(user_id, "submit_prompt: rejected empty prompt");
            return Err(BrokerError::EmptyPrompt);
        }

        let params = GenParams::from_json(params_raw);
        let softprompts = if softprompts.is_empty() {
            vec![String::new()]
        } else {
            softprompts
        };

        let wp_id;
        {
            let mut state = self.state.lock().unwrap();
            let user = state.registry.find_user_by_id(user_id).unwrap();
            let count = state.prompts.count_waiting_requests(user, self.config.stale_prompt());
            if count >= max_parallel {
                warn!(user_id, count, limit = max_parallel, "submit_prompt: too many parallel prompts");
                return Err(BrokerError::TooManyPrompts {
                    count,
                    limit: max_parallel,
                });
            }

            let wp = WaitingPrompt::new(user_id, prompt, params, models, servers, softprompts);
            wp_id = wp.id;

            match mode {
                Mode::Async => {
                    let id = state.prompts.insert(wp);
                    if let Some(wp) = state.prompts.get_mut(&id) {
                        wp.activate();
                    }
                    return Ok(SubmitOutcome::Accepted(id));
                }
                Mode::Sync => {
                    let stale_after = self.config.stale_worker();
                    let eligible = state
                        .registry
                        .workers()
                        .any(|w| can_generate(w, &wp, stale_after).is_ok());
                    if !eligible {
                        return Err(BrokerError::NoEligibleWorker);
                    }
                    let id = state.prompts.insert(wp);
                    if let Some(wp) = state.prompts.get_mut(&id) {
                        wp.activate();
                    }
                }
            }
        }

        // Sync: block up to PROMPT_STALE_SECONDS for completion (spec §4.4 step 6).
        let notify = self.notify_for(wp_id);
        let deadline = self.config.stale_prompt();
        let start = Instant::now();
        loop {
            {
                let state = self.state.lock().unwrap();
                match state.prompts.get(&wp_id) {
                    None => {
                        self.forget(&wp_id);
                        return Err(BrokerError::PromptExpired);
                    }
                    Some(wp) => {
                        if wp.is_completed() {
                            let generations =
                                wp.generations().into_iter().map(String::from).collect();
                            drop(state);
                            self.forget(&wp_id);
                            return Ok(SubmitOutcome::Completed(generations));
                        }
                        if wp.is_stale(deadline) {
                            drop(state);
                            self.forget(&wp_id);
                            return Err(BrokerError::PromptExpired);
                        }
                    }
                }
            }
            let remaining = deadline.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                self.forget(&wp_id);
                return Err(BrokerError::PromptExpired);
            }
            // Wake on activity, but never wait past the deadline.
            let _ = timeout(remaining.min(Duration::from_secs(1)), notify.notified()).await;
        }
    }

    // -- poll_work (spec §4.4) -------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn poll_work(
        &self,
        api_key: &str,
        name: &str,
        model: String,
        max_length: u32,
        max_content_length: u32,
        softprompts: HashSet<String>,
        info: String,
        priority_usernames: Vec<String>,
    ) -> BrokerResult<PollOutcome> {
        let mut state = self.state.lock().unwrap();

        let user_id = state
            .registry
            .find_user_by_api_key(api_key)
            .ok_or_else(|| {
                warn!("poll_work: invalid API key");
                BrokerError::InvalidApiKey
            })?
            .id;

        let worker_id = match state.registry.find_worker_by_name(name) {
            Some(w) if w.user_id != user_id => {
                warn!(worker = name, "poll_work: worker name registered to another user");
                return Err(BrokerError::WorkerNameTaken {
                    name: name.to_string(),
                });
            }
            Some(w) => w.id,
            None => state.registry.create_worker(user_id, name.to_string()),
        };

        {
            let worker = state.registry.find_worker_by_id_mut(&worker_id).unwrap();
            worker.check_in(model, max_length, max_content_length, softprompts, info);
            info!(worker = %worker.name, user = %worker.user_id, "worker checked in");
        }

        // Priority ordering: own prompts, then priority_usernames' prompts, then the rest.
        let mut priority_user_ids = vec![user_id];
        for username in &priority_usernames {
            if let Some(u) = state.registry.find_user_by_username(username) {
                priority_user_ids.push(u.id);
            }
        }

        let ordered_ids: Vec<Uuid> = {
            let mut own = Vec::new();
            // One bucket per priority username, in the caller-given rank order, each
            // bucket in prompt insertion order — not flattened across users.
            let mut others_priority: Vec<Vec<Uuid>> = vec![Vec::new(); priority_user_ids.len() - 1];
            let mut rest = Vec::new();
            for wp in state.prompts.iter_activated() {
                if wp.user_id == priority_user_ids[0] {
                    own.push(wp.id);
                } else if let Some(rank) = priority_user_ids[1..].iter().position(|&id| id == wp.user_id) {
                    others_priority[rank].push(wp.id);
                } else {
                    rest.push(wp.id);
                }
            }
            own.into_iter()
                .chain(others_priority.into_iter().flatten())
                .chain(rest)
                .collect()
        };

        let stale_after = self.config.stale_worker();
        let stale_prompt_after = self.config.stale_prompt();
        let mut outcome = PollOutcome::default();

        for wp_id in ordered_ids {
            let wp = match state.prompts.get(&wp_id) {
                Some(wp) => wp,
                None => continue,
            };
            if wp.is_completed() || !wp.needs_gen() || wp.is_stale(stale_prompt_after) {
                continue;
            }
            let worker = state.registry.find_worker_by_id(&worker_id).unwrap();
            match can_generate(worker, wp, stale_after) {
                Err(reason) => {
                    *outcome.skipped.entry(reason.as_str().to_string()).or_insert(0) += 1;
                    continue;
                }
                Ok(softprompt_assigned) => {
                    let wp = state.prompts.get_mut(&wp_id).unwrap();
                    let pg = crate::domain::ProcessingGeneration::new(
                        wp_id,
                        worker_id,
                        softprompt_assigned.clone(),
                    );
                    let pg_id = pg.id;
                    let payload = wp.gen_payload();
                    let prompt_text = wp.prompt.clone();
                    wp.processing_gens.push(pg);
                    wp.n_remaining -= 1;
                    wp.touch();
                    state.gens.register(pg_id, wp_id);

                    outcome.id = Some(pg_id);
                    outcome.prompt = Some(prompt_text);
                    outcome.payload = Some(payload);
                    outcome.softprompt = Some(softprompt_assigned);
                    drop(state);
                    self.wake(wp_id);
                    return Ok(outcome);
                }
            }
        }

        Ok(outcome)
    }

    // -- submit_result (spec §4.4) ---------------------------------------

    pub fn submit_result(
        &self,
        api_key: &str,
        procgen_id: Uuid,
        generation_text: String,
    ) -> BrokerResult<u64> {
        let mut state = self.state.lock().unwrap();

        let owner_id = state
            .gens
            .owner_of(&procgen_id)
            .ok_or(BrokerError::InvalidProcgen { id: procgen_id })?;

        let caller_user_id = state
            .registry
            .find_user_by_api_key(api_key)
            .ok_or_else(|| {
                warn!("submit_result: invalid API key");
                BrokerError::InvalidApiKey
            })?
            .id;

        let wp = state
            .prompts
            .get_mut(&owner_id)
            .ok_or(BrokerError::InvalidProcgen { id: procgen_id })?;

        let pg = wp
            .processing_gens
            .iter_mut()
            .find(|g| g.id == procgen_id)
            .ok_or(BrokerError::InvalidProcgen { id: procgen_id })?;

        let worker_id = pg.worker_id;
        let owner_for_credentials = state.registry.find_worker_by_id(&worker_id).map(|w| w.user_id);
        if owner_for_credentials != Some(caller_user_id) {
            warn!(%procgen_id, "submit_result: wrong credentials for processing generation");
            return Err(BrokerError::WrongCredentials {
                resource: procgen_id.to_string(),
            });
        }

        let wp = state.prompts.get_mut(&owner_id).unwrap();
        let pg = wp
            .processing_gens
            .iter_mut()
            .find(|g| g.id == procgen_id)
            .unwrap();

        if pg.is_completed() {
            warn!(%procgen_id, "duplicate generation submission rejected");
            return Err(BrokerError::DuplicateGen { id: procgen_id });
        }

        let tokens = word_count(&generation_text);
        let elapsed = pg.start_time.elapsed();
        pg.set_generation(generation_text, tokens).expect("checked not completed above");
        wp.touch();

        let became_complete = wp.is_completed();
        let user_id = wp.user_id;

        if let Some(worker) = state.registry.find_worker_by_id_mut(&worker_id) {
            worker.record_completion(tokens as u64, elapsed);
        }
        let worker_user_id = state.registry.find_worker_by_id(&worker_id).map(|w| w.user_id);

        if let Some(worker_user_id) = worker_user_id {
            if let Some(contributor) = state.registry.find_user_by_id_mut(worker_user_id) {
                contributor.contributions.tokens += tokens as u64;
                contributor.contributions.fulfillments += 1;
                contributor.kudos += tokens as u64;
            }
        }

        let wp = state.prompts.get_mut(&owner_id).unwrap();
        if became_complete && !wp.usage_credited {
            wp.usage_credited = true;
            if let Some(requester) = state.registry.find_user_by_id_mut(user_id) {
                requester.usage.tokens += wp.tokens as u64;
                requester.usage.requests += 1;
            }
        }

        info!(%procgen_id, tokens, "generation submitted");
        drop(state);
        self.wake(owner_id);
        Ok(tokens as u64)
    }

    // -- query_status (spec §4.4) -----------------------------------------

    pub fn query_status(&self, wp_id: Uuid) -> BrokerResult<StatusReport> {
        let state = self.state.lock().unwrap();
        let wp = state
            .prompts
            .get(&wp_id)
            .ok_or(BrokerError::UnknownPrompt { id: wp_id })?;
        Ok(StatusReport {
            waiting: wp.n_remaining,
            processing: wp.n_processing(),
            finished: wp.n_finished(),
            generations: wp.generations().into_iter().map(String::from).collect(),
        })
    }

    // -- background loops --------------------------------------------------

    /// Remove stale/completed-and-aged prompts, waking any sync waiters on
    /// prompts that just expired so they can return `PromptExpired`.
    pub fn sweep(&self) {
        let expired = {
            let mut state = self.state.lock().unwrap();
            let expired = state.prompts.sweep(self.config.stale_prompt());
            let live: HashSet<Uuid> = state.prompts.iter_activated().map(|wp| wp.id).collect();
            state.gens.retain_owned_by(&live);
            expired
        };
        for id in expired {
            self.wake(id);
            self.forget(&id);
        }
    }

    /// Clone the current user list out from under the lock, then write it to
    /// disk without holding the lock across the await (spec §5).
    pub async fn snapshot(&self) -> std::io::Result<()> {
        let data_dir = std::path::Path::new(&self.config.data_dir);
        let users: Vec<crate::domain::User> = {
            let state = self.state.lock().unwrap();
            state.registry.users().to_vec()
        };
        crate::persistence::snapshot(&users, data_dir).await
    }

    // -- read-only aggregates for the HTTP boundary (§6) ------------------

    pub fn list_workers(&self) -> Vec<WorkerCard> {
        let state = self.state.lock().unwrap();
        let stale_after = self.config.stale_worker();
        state
            .registry
            .workers()
            .filter(|w| !w.is_stale(stale_after))
            .map(WorkerCard::from)
            .collect()
    }

    pub fn get_worker(&self, id: Uuid) -> Option<WorkerCard> {
        let state = self.state.lock().unwrap();
        state.registry.find_worker_by_id(&id).map(WorkerCard::from)
    }

    pub fn available_models(&self) -> HashSet<String> {
        let state = self.state.lock().unwrap();
        state.registry.get_available_models(self.config.stale_worker())
    }

    pub fn usage_map(&self) -> HashMap<String, u64> {
        let state = self.state.lock().unwrap();
        state
            .registry
            .users()
            .iter()
            .map(|u| (u.unique_alias(), u.usage.tokens))
            .collect()
    }

    pub fn contributions_map(&self) -> HashMap<String, u64> {
        let state = self.state.lock().unwrap();
        state
            .registry
            .users()
            .iter()
            .map(|u| (u.unique_alias(), u.contributions.tokens))
            .collect()
    }

    /// Create a user directly on the `Registry`. Not reachable over HTTP —
    /// user registration is the OAuth front-end's job (spec §1, out of
    /// scope) — this exists so tests can seed users without going through
    /// that external collaborator.
    pub fn register_user(
        &self,
        username: String,
        email: String,
        api_key: String,
        inviter: String,
    ) -> BrokerResult<u64> {
        let mut state = self.state.lock().unwrap();
        state
            .registry
            .create_user(username, email.clone(), api_key, inviter)
            .map(|u| u.id)
            .map_err(|_| BrokerError::DuplicateEmail { email })
    }

    pub fn summary(&self) -> Summary {
        let state = self.state.lock().unwrap();
        let stale_after = self.config.stale_worker();
        let (tokens, fulfilments) = state.registry.get_total_usage();
        Summary {
            top_contributor: state.registry.top_contributor().map(|u| u.unique_alias()),
            top_server: state.registry.top_server(stale_after).map(|w| w.name.clone()),
            total_tokens: tokens,
            total_fulfilments: fulfilments,
            active_workers: state.registry.count_active_workers(stale_after),
            queue_depth: state.prompts.len() as u64,
            avg_performance: state.registry.get_request_avg(stale_after),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct WorkerCard {
    pub id: Uuid,
    pub name: String,
    pub model: String,
    pub max_length: u32,
    pub max_content_length: u32,
    pub info: String,
    pub tokens_generated: u64,
    pub requests_fulfilled: u64,
    pub performance: f64,
    pub uptime: u64,
}

impl From<&Worker> for WorkerCard {
    fn from(w: &Worker) -> Self {
        WorkerCard {
            id: w.id,
            name: w.name.clone(),
            model: w.model.clone(),
            max_length: w.max_length,
            max_content_length: w.max_content_length,
            info: w.info.clone(),
            tokens_generated: w.contributions,
            requests_fulfilled: w.fulfilments,
            performance: w.performance(),
            uptime: w.uptime(),
        }
    }
}

#[derive(Debug, serde::Serialize)]
pub struct Summary {
    pub top_contributor: Option<String>,
    pub top_server: Option<String>,
    pub total_tokens: u64,
    pub total_fulfilments: u64,
    pub active_workers: usize,
    pub queue_depth: u64,
    pub avg_performance: f64,
}
