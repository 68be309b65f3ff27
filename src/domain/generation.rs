//! One dispatched sub-unit of a `WaitingPrompt`.

use std::time::Instant;

use uuid::Uuid;

/// A unit of work handed to a specific worker.
///
/// Lifecycle: `Created -> (set_generation) -> Completed`. No other
/// transitions; a second `set_generation` call is rejected (spec §3).
#[derive(Debug, Clone)]
pub struct ProcessingGeneration {
    pub id: Uuid,
    pub owner: Uuid,
    pub worker_id: Uuid,
    pub softprompt_assigned: String,
    pub start_time: Instant,
    generation: Option<String>,
    pub tokens: Option<u32>,
}

impl ProcessingGeneration {
    pub fn new(owner: Uuid, worker_id: Uuid, softprompt_assigned: String) -> Self {
        ProcessingGeneration {
            id: Uuid::new_v4(),
            owner,
            worker_id,
            softprompt_assigned,
            start_time: Instant::now(),
            generation: None,
            tokens: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.generation.is_some()
    }

    pub fn generation(&self) -> Option<&str> {
        self.generation.as_deref()
    }

    /// Attach the generated text. Returns `Err(())` if this procgen was
    /// already completed (duplicate submission).
    pub fn set_generation(&mut self, text: String, tokens: u32) -> Result<(), ()> {
        if self.is_completed() {
            return Err(());
        }
        self.generation = Some(text);
        self.tokens = Some(tokens);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uncompleted() {
        let pg = ProcessingGeneration::new(Uuid::new_v4(), Uuid::new_v4(), String::new());
        assert!(!pg.is_completed());
        assert!(pg.generation().is_none());
    }

    #[test]
    fn set_generation_completes_it() {
        let mut pg = ProcessingGeneration::new(Uuid::new_v4(), Uuid::new_v4(), String::new());
        assert!(pg.set_generation("hello world".into(), 2).is_ok());
        assert!(pg.is_completed());
        assert_eq!(pg.generation(), Some("hello world"));
        assert_eq!(pg.tokens, Some(2));
    }

    #[test]
    fn second_set_generation_is_rejected() {
        let mut pg = ProcessingGeneration::new(Uuid::new_v4(), Uuid::new_v4(), String::new());
        pg.set_generation("first".into(), 1).unwrap();
        assert!(pg.set_generation("second".into(), 1).is_err());
        // first submission is untouched
        assert_eq!(pg.generation(), Some("first"));
    }
}
