//! Request/response JSON shapes for the public HTTP surface (spec §6).
//! Kept separate from the domain types so the wire format can drift
//! independently of the scheduler's internal representation.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::broker::{PollOutcome, StatusReport, Summary, WorkerCard};

fn default_map() -> Map<String, Value> {
    Map::new()
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub prompt: String,
    pub api_key: String,
    #[serde(default)]
    pub models: HashSet<String>,
    #[serde(default = "default_map")]
    pub params: Map<String, Value>,
    #[serde(default)]
    pub servers: HashSet<String>,
    #[serde(default)]
    pub softprompts: Vec<String>,
}

impl GenerateRequest {
    /// `servers` arrives as worker id strings; unparseable entries are dropped.
    pub fn server_ids(&self) -> HashSet<Uuid> {
        self.servers.iter().filter_map(|s| Uuid::parse_str(s).ok()).collect()
    }
}

#[derive(Debug, Serialize)]
pub struct AsyncAccepted {
    pub id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub waiting: u32,
    pub processing: u32,
    pub finished: u32,
    pub generations: Vec<String>,
}

impl From<StatusReport> for StatusResponse {
    fn from(s: StatusReport) -> Self {
        StatusResponse {
            waiting: s.waiting,
            processing: s.processing,
            finished: s.finished,
            generations: s.generations,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PopRequest {
    pub api_key: String,
    pub name: String,
    pub model: String,
    #[serde(default)]
    pub max_length: u32,
    #[serde(default)]
    pub max_content_length: u32,
    #[serde(default)]
    pub priority_usernames: Vec<String>,
    #[serde(default)]
    pub softprompts: HashSet<String>,
    #[serde(default)]
    pub info: String,
}

#[derive(Debug, Serialize)]
pub struct PopResponse {
    pub id: Option<Uuid>,
    pub prompt: Option<String>,
    pub payload: Option<Value>,
    pub softprompt: Option<String>,
    pub skipped: HashMap<String, u32>,
}

impl From<PollOutcome> for PopResponse {
    fn from(o: PollOutcome) -> Self {
        PopResponse {
            id: o.id,
            prompt: o.prompt,
            payload: o.payload,
            softprompt: o.softprompt,
            skipped: o.skipped,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub api_key: String,
    pub id: Uuid,
    pub generation: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub reward: u64,
}

#[derive(Debug, Serialize)]
pub struct WorkerCardResponse {
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

impl From<WorkerCard> for WorkerCardResponse {
    fn from(w: WorkerCard) -> Self {
        WorkerCardResponse {
            id: w.id,
            name: w.name,
            model: w.model,
            max_length: w.max_length,
            max_content_length: w.max_content_length,
            info: w.info,
            tokens_generated: w.tokens_generated,
            requests_fulfilled: w.requests_fulfilled,
            performance: w.performance,
            uptime: w.uptime,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct InfoResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub queue_depth: u64,
    pub active_workers: usize,
    pub total_tokens: u64,
    pub total_fulfilments: u64,
    pub top_contributor: Option<String>,
    pub top_server: Option<String>,
    pub avg_performance: f64,
}

impl From<Summary> for InfoResponse {
    fn from(s: Summary) -> Self {
        InfoResponse {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            queue_depth: s.queue_depth,
            active_workers: s.active_workers,
            total_tokens: s.total_tokens,
            total_fulfilments: s.total_fulfilments,
            top_contributor: s.top_contributor,
            top_server: s.top_server,
            avg_performance: s.avg_performance,
        }
    }
}
