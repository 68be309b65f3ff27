//! Domain entities: users, workers, waiting prompts, and processing generations.

pub mod generation;
pub mod prompt;
pub mod user;
pub mod worker;

pub use generation::ProcessingGeneration;
pub use prompt::{GenParams, WaitingPrompt};
pub use user::{Contributions, Usage, User};
pub use worker::{Worker, WorkerState};
