//! End-user accounts: identity, API key, and usage/contribution counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Usage a user has requested from the cluster.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub requests: u64,
    pub tokens: u64,
}

/// Contributions the cluster has produced on a user's behalf (via their workers).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Contributions {
    pub fulfillments: u64,
    pub tokens: u64,
}

/// A registered end user. Never deleted once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Monotonic, 1-based, for display only.
    pub id: u64,
    pub username: String,
    pub email: String,
    pub api_key: String,
    pub inviter: String,
    pub creation_date: DateTime<Utc>,
    pub usage: Usage,
    pub contributions: Contributions,
    pub kudos: u64,
}

impl User {
    /// The only safe public identity for a user: `"{username}#{id}"`.
    /// Always display this, never the bare username (spec §3).
    pub fn unique_alias(&self) -> String {
        format!("{}#{}", self.username, self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> User {
        User {
            id: 7,
            username: "db0".into(),
            email: "db0@example.com".into(),
            api_key: "secret".into(),
            inviter: "".into(),
            creation_date: Utc::now(),
            usage: Usage::default(),
            contributions: Contributions::default(),
            kudos: 0,
        }
    }

    #[test]
    fn unique_alias_combines_username_and_id() {
        assert_eq!(sample().unique_alias(), "db0#7");
    }
}
