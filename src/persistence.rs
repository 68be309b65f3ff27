//! Periodic snapshot writer and startup loader for users, usage, and
//! contributions (spec §6). Workers are never persisted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::User;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedUser {
    id: u64,
    username: String,
    email: String,
    api_key: String,
    inviter: String,
    creation_date: chrono::DateTime<chrono::Utc>,
    kudos: u64,
    contributions: crate::domain::Contributions,
    usage: crate::domain::Usage,
}

impl From<&User> for PersistedUser {
    fn from(u: &User) -> Self {
        PersistedUser {
            id: u.id,
            username: u.username.clone(),
            email: u.email.clone(),
            api_key: u.api_key.clone(),
            inviter: u.inviter.clone(),
            creation_date: u.creation_date,
            kudos: u.kudos,
            contributions: u.contributions.clone(),
            usage: u.usage.clone(),
        }
    }
}

fn users_path(dir: &Path) -> PathBuf {
    dir.join("users.json")
}

fn usage_path(dir: &Path) -> PathBuf {
    dir.join("usage.json")
}

fn contributions_path(dir: &Path) -> PathBuf {
    dir.join("contributions.json")
}

/// Whole-file atomic rewrite: write to a temp file alongside the target,
/// then rename over it, so a crash mid-write never corrupts the previous
/// snapshot (spec §6).
async fn write_atomic(path: &Path, contents: &str) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, contents).await?;
    tokio::fs::rename(&tmp, path).await
}

/// Write `users.json`, `usage.json`, and `contributions.json` to `data_dir`.
///
/// Takes an owned snapshot of the users rather than `&Registry` so the
/// caller can clone the list out from under the Broker lock and release it
/// before doing any file I/O (the lock must never be held across an await).
pub async fn snapshot(users: &[User], data_dir: &Path) -> std::io::Result<()> {
    let persisted: Vec<PersistedUser> = users.iter().map(PersistedUser::from).collect();
    let users_json = serde_json::to_string_pretty(&persisted)?;
    write_atomic(&users_path(data_dir), &users_json).await?;

    let usage: HashMap<String, u64> = users.iter().map(|u| (u.unique_alias(), u.usage.tokens)).collect();
    write_atomic(&usage_path(data_dir), &serde_json::to_string_pretty(&usage)?).await?;

    let contributions: HashMap<String, u64> = users
        .iter()
        .map(|u| (u.unique_alias(), u.contributions.tokens))
        .collect();
    write_atomic(
        &contributions_path(data_dir),
        &serde_json::to_string_pretty(&contributions)?,
    )
    .await?;

    info!(users = persisted.len(), "wrote snapshot to {}", data_dir.display());
    Ok(())
}

/// Load `users.json` into a list of reconstructed users on startup, if present.
/// `usage.json`/`contributions.json` are redundant views over the same
/// counters already stored on each `User` and are not re-read.
pub async fn load(data_dir: &Path) -> std::io::Result<Vec<User>> {
    let path = users_path(data_dir);
    if !path.exists() {
        info!("no snapshot found at {}, starting empty", path.display());
        return Ok(Vec::new());
    }
    let contents = tokio::fs::read_to_string(&path).await?;
    let persisted: Vec<PersistedUser> = match serde_json::from_str(&contents) {
        Ok(p) => p,
        Err(e) => {
            warn!("failed to parse {}: {e}, starting empty", path.display());
            return Ok(Vec::new());
        }
    };
    let users = persisted
        .into_iter()
        .map(|pu| User {
            id: pu.id,
            username: pu.username,
            email: pu.email,
            api_key: pu.api_key,
            inviter: pu.inviter,
            creation_date: pu.creation_date,
            usage: pu.usage,
            contributions: pu.contributions,
            kudos: pu.kudos,
        })
        .collect();
    info!("loaded snapshot from {}", path.display());
    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Contributions, Usage};

    fn sample_user() -> User {
        User {
            id: 1,
            username: "db0".into(),
            email: "db0@x.com".into(),
            api_key: "key-1".into(),
            inviter: "".into(),
            creation_date: chrono::Utc::now(),
            usage: Usage { requests: 0, tokens: 10 },
            contributions: Contributions {
                fulfillments: 0,
                tokens: 5,
            },
            kudos: 42,
        }
    }

    #[tokio::test]
    async fn round_trips_users_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let users = vec![sample_user()];

        snapshot(&users, dir.path()).await.unwrap();
        assert!(users_path(dir.path()).exists());

        let loaded = load(dir.path()).await.unwrap();
        let user = loaded.iter().find(|u| u.email == "db0@x.com").unwrap();
        assert_eq!(user.kudos, 42);
        assert_eq!(user.usage.tokens, 10);
        assert_eq!(user.contributions.tokens, 5);
    }

    #[tokio::test]
    async fn load_with_no_snapshot_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let users = load(dir.path()).await.unwrap();
        assert!(users.is_empty());
    }
}
