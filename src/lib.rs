//! Distributed text-generation brokering cluster.
//!
//! A registry of users and volunteer workers, a FIFO prompt queue, an
//! eligibility matcher, and a scheduler (`Broker`) that ties them together
//! behind a single lock, fronted by a thin HTTP API.

pub mod broker;
pub mod config;
pub mod domain;
pub mod eligibility;
pub mod error;
pub mod http;
pub mod index;
pub mod persistence;
pub mod registry;
pub mod tokenize;

pub use broker::Broker;
pub use config::Config;
pub use error::{BrokerError, BrokerResult};
pub use registry::Registry;
