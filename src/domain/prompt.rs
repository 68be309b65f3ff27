//! One end-user text-generation request, decomposed into `n` sub-units.

use std::collections::HashSet;
use std::time::Instant;

use serde_json::{Map, Value};
use uuid::Uuid;

use super::generation::ProcessingGeneration;
use crate::tokenize::word_count;

/// Generation knobs recognized and typechecked by the scheduler. Any other
/// keys in the incoming JSON object are preserved verbatim in `extra` and
/// echoed back to the worker at dispatch time (spec §9 "Untyped params bag").
#[derive(Debug, Clone)]
pub struct GenParams {
    pub n: u32,
    pub max_length: u32,
    pub max_content_length: u32,
    pub extra: Map<String, Value>,
}

impl Default for GenParams {
    fn default() -> Self {
        GenParams {
            n: 1,
            max_length: 80,
            max_content_length: 1024,
            extra: Map::new(),
        }
    }
}

impl GenParams {
    /// Parse the typed subset out of a raw JSON object, leaving the rest in `extra`.
    pub fn from_json(mut raw: Map<String, Value>) -> Self {
        let defaults = GenParams::default();
        let n = raw
            .remove("n")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(defaults.n);
        let max_length = raw
            .remove("max_length")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(defaults.max_length);
        let max_content_length = raw
            .remove("max_content_length")
            .and_then(|v| v.as_u64())
            .map(|v| v as u32)
            .unwrap_or(defaults.max_content_length);
        GenParams {
            n,
            max_length,
            max_content_length,
            extra: raw,
        }
    }

    /// Payload echoed to the worker verbatim at dispatch, merging the
    /// recognized knobs back in alongside the opaque extras.
    pub fn gen_payload(&self, prompt: &str) -> Value {
        let mut obj = self.extra.clone();
        obj.insert("prompt".to_string(), Value::String(prompt.to_string()));
        obj.insert("max_length".to_string(), Value::from(self.max_length));
        obj.insert(
            "max_content_length".to_string(),
            Value::from(self.max_content_length),
        );
        Value::Object(obj)
    }
}

/// One end-user request, split into `n_total` independent sub-units.
pub struct WaitingPrompt {
    pub id: Uuid,
    pub user_id: u64,
    pub prompt: String,
    pub params: GenParams,
    pub models: HashSet<String>,
    pub servers: HashSet<Uuid>,
    /// Ordered list of acceptable softprompt substrings; an empty-string
    /// entry means "no softprompt required".
    pub softprompts: Vec<String>,

    pub n_total: u32,
    pub n_remaining: u32,
    pub tokens: u32,

    pub processing_gens: Vec<ProcessingGeneration>,

    pub activated: bool,
    last_activity: Instant,

    /// Set once, the first time the prompt transitions to fully complete,
    /// so usage.requests is credited exactly once (spec §4.4 step 5).
    pub usage_credited: bool,
}

impl WaitingPrompt {
    pub fn new(
        user_id: u64,
        prompt: String,
        params: GenParams,
        models: HashSet<String>,
        servers: HashSet<Uuid>,
        softprompts: Vec<String>,
    ) -> Self {
        let tokens = word_count(&prompt);
        let n_total = params.n;
        WaitingPrompt {
            id: Uuid::new_v4(),
            user_id,
            prompt,
            params,
            models,
            servers,
            softprompts,
            n_total,
            n_remaining: n_total,
            tokens,
            processing_gens: Vec::new(),
            activated: false,
            last_activity: Instant::now(),
            usage_credited: false,
        }
    }

    pub fn activate(&mut self) {
        self.activated = true;
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// A unit may still be dispatched: there is at least one undispatched slot.
    pub fn needs_gen(&self) -> bool {
        self.n_remaining > 0
    }

    /// `n_remaining == 0` and every dispatched child is completed (spec §3).
    pub fn is_completed(&self) -> bool {
        self.n_remaining == 0
            && self.processing_gens.len() as u32 == self.n_total
            && self.processing_gens.iter().all(|g| g.is_completed())
    }

    pub fn is_stale(&self, stale_after: std::time::Duration) -> bool {
        self.last_activity.elapsed() > stale_after
    }

    pub fn n_processing(&self) -> u32 {
        self.processing_gens.iter().filter(|g| !g.is_completed()).count() as u32
    }

    pub fn n_finished(&self) -> u32 {
        self.processing_gens.iter().filter(|g| g.is_completed()).count() as u32
    }

    pub fn generations(&self) -> Vec<&str> {
        self.processing_gens
            .iter()
            .filter_map(|g| g.generation())
            .collect()
    }

    pub fn gen_payload(&self) -> Value {
        self.params.gen_payload(&self.prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(n: u32) -> WaitingPrompt {
        let params = GenParams {
            n,
            ..GenParams::default()
        };
        WaitingPrompt::new(
            1,
            "hello world".into(),
            params,
            HashSet::new(),
            HashSet::new(),
            vec!["".to_string()],
        )
    }

    #[test]
    fn n_zero_is_immediately_complete() {
        let wp = prompt(0);
        assert_eq!(wp.n_remaining, 0);
        assert!(wp.is_completed());
        assert!(wp.generations().is_empty());
    }

    #[test]
    fn nonzero_n_is_not_complete_until_all_children_done() {
        let mut wp = prompt(1);
        assert!(!wp.is_completed());
        wp.n_remaining -= 1;
        let mut pg = ProcessingGeneration::new(wp.id, Uuid::new_v4(), String::new());
        pg.set_generation("hi".into(), 1).unwrap();
        wp.processing_gens.push(pg);
        assert!(wp.is_completed());
    }

    #[test]
    fn gen_params_from_json_extracts_typed_subset() {
        let mut raw = Map::new();
        raw.insert("n".into(), Value::from(3));
        raw.insert("max_length".into(), Value::from(16));
        raw.insert("temperature".into(), Value::from(0.8));
        let params = GenParams::from_json(raw);
        assert_eq!(params.n, 3);
        assert_eq!(params.max_length, 16);
        assert_eq!(params.max_content_length, 1024);
        assert_eq!(params.extra.get("temperature"), Some(&Value::from(0.8)));
        assert!(params.extra.get("n").is_none());
    }

    #[test]
    fn tokens_is_word_count_of_prompt() {
        let wp = prompt(1);
        assert_eq!(wp.tokens, 2);
    }
}
