//! Crate-wide error taxonomy.
//!
//! One variant per error kind the core surfaces (spec §7), each carrying
//! enough context to produce both a log line and an HTTP-facing message
//! without re-deriving either from scratch at the call site.

use uuid::Uuid;

/// Errors the brokering scheduler can return to its callers.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// No user matches the supplied API key.
    #[error("no user matching sent API key")]
    InvalidApiKey,

    /// The API key is valid but does not belong to the owner of the
    /// resource being acted on (a worker name, or a processing generation).
    #[error("wrong credentials for {resource}")]
    WrongCredentials {
        /// What the caller tried to act on (a worker name, a procgen id, ...).
        resource: String,
    },

    /// A worker `name` is already registered under a different user.
    #[error("worker name '{name}' is already registered to another user")]
    WorkerNameTaken {
        /// The contested worker name.
        name: String,
    },

    /// The submitted prompt was empty.
    #[error("you cannot specify an empty prompt")]
    EmptyPrompt,

    /// The submitting user already has too many live prompts in flight.
    #[error("too many parallel requests from user (has {count}, limit {limit})")]
    TooManyPrompts {
        /// Live prompt count the user currently holds.
        count: usize,
        /// Configured per-user cap.
        limit: usize,
    },

    /// A synchronous prompt was submitted but no worker currently online
    /// can satisfy its requirements.
    #[error("no active worker found to fulfill this request")]
    NoEligibleWorker,

    /// A synchronous prompt's wait exceeded the staleness deadline.
    #[error("prompt request expired")]
    PromptExpired,

    /// No `ProcessingGeneration` exists with the given id.
    #[error("processing generation {id} does not exist")]
    InvalidProcgen {
        /// The unknown id.
        id: Uuid,
    },

    /// A result was already submitted for this processing generation.
    #[error("processing generation {id} already submitted")]
    DuplicateGen {
        /// The id that was already completed.
        id: Uuid,
    },

    /// No `WaitingPrompt` exists with the given id.
    #[error("prompt {id} does not exist")]
    UnknownPrompt {
        /// The unknown id.
        id: Uuid,
    },

    /// No `Worker` exists with the given id (`GET /servers/{id}`, spec §6).
    #[error("worker {id} does not exist")]
    UnknownWorker {
        /// The unknown id.
        id: Uuid,
    },

    /// Registration was attempted with an email already on file.
    #[error("email '{email}' is already registered")]
    DuplicateEmail {
        /// The contested email.
        email: String,
    },
}

impl BrokerError {
    /// HTTP status code this error maps to, per spec §7.
    pub fn status_code(&self) -> u16 {
        match self {
            BrokerError::InvalidApiKey => 401,
            BrokerError::WrongCredentials { .. } => 401,
            BrokerError::WorkerNameTaken { .. } => 401,
            BrokerError::EmptyPrompt => 400,
            BrokerError::TooManyPrompts { .. } => 503,
            BrokerError::NoEligibleWorker => 503,
            BrokerError::PromptExpired => 500,
            BrokerError::InvalidProcgen { .. } => 404,
            BrokerError::DuplicateGen { .. } => 400,
            BrokerError::UnknownPrompt { .. } => 404,
            BrokerError::UnknownWorker { .. } => 404,
            BrokerError::DuplicateEmail { .. } => 400,
        }
    }
}

pub type BrokerResult<T> = Result<T, BrokerError>;
