//! The authoritative in-memory store of Users and Workers, and the
//! aggregates computed over them (spec §4.1).

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::domain::{Contributions, User, Usage, Worker};

#[derive(Default)]
pub struct Registry {
    users: Vec<User>,
    users_by_email: HashMap<String, usize>,
    users_by_api_key: HashMap<String, usize>,

    workers: HashMap<Uuid, Worker>,
    worker_id_by_name: HashMap<String, Uuid>,
}

impl Registry {
    pub fn new() -> Self {
        Registry::default()
    }

    // -- users ---------------------------------------------------------

    pub fn find_user_by_api_key(&self, api_key: &str) -> Option<&User> {
        self.users_by_api_key.get(api_key).map(|&i| &self.users[i])
    }

    pub fn find_user_by_email(&self, email: &str) -> Option<&User> {
        self.users_by_email.get(email).map(|&i| &self.users[i])
    }

    pub fn find_user_by_username(&self, username: &str) -> Option<&User> {
        self.users.iter().find(|u| u.username == username)
    }

    pub fn find_user_by_id(&self, id: u64) -> Option<&User> {
        self.users.iter().find(|u| u.id == id)
    }

    pub fn find_user_by_id_mut(&mut self, id: u64) -> Option<&mut User> {
        self.users.iter_mut().find(|u| u.id == id)
    }

    /// Assign the next 1-based display id, reject a duplicate email.
    pub fn create_user(
        &mut self,
        username: String,
        email: String,
        api_key: String,
        inviter: String,
    ) -> Result<&User, ()> {
        if self.users_by_email.contains_key(&email) {
            return Err(());
        }
        let id = self.users.len() as u64 + 1;
        let user = User {
            id,
            username,
            email: email.clone(),
            api_key: api_key.clone(),
            inviter,
            creation_date: Utc::now(),
            usage: Usage::default(),
            contributions: Contributions::default(),
            kudos: 0,
        };
        let idx = self.users.len();
        self.users.push(user);
        self.users_by_email.insert(email, idx);
        self.users_by_api_key.insert(api_key, idx);
        Ok(&self.users[idx])
    }

    pub fn users(&self) -> &[User] {
        &self.users
    }

    /// Rebuild the user indices from a list of already-reconstructed users
    /// (used when restoring a snapshot on startup, where ids and emails are
    /// already known-good rather than freshly assigned).
    pub fn load_users(&mut self, users: Vec<User>) {
        self.users_by_email.clear();
        self.users_by_api_key.clear();
        for (idx, user) in users.iter().enumerate() {
            self.users_by_email.insert(user.email.clone(), idx);
            self.users_by_api_key.insert(user.api_key.clone(), idx);
        }
        self.users = users;
    }

    // -- workers ---------------------------------------------------------

    pub fn find_worker_by_name(&self, name: &str) -> Option<&Worker> {
        self.worker_id_by_name.get(name).and_then(|id| self.workers.get(id))
    }

    pub fn find_worker_by_id(&self, id: &Uuid) -> Option<&Worker> {
        self.workers.get(id)
    }

    pub fn find_worker_by_id_mut(&mut self, id: &Uuid) -> Option<&mut Worker> {
        self.workers.get_mut(id)
    }

    /// Register a brand-new worker under `(user_id, name)`. The caller must
    /// have already checked that no worker with this name exists.
    pub fn create_worker(&mut self, user_id: u64, name: String) -> Uuid {
        let id = Uuid::new_v4();
        let worker = Worker::new(id, name.clone(), user_id);
        self.workers.insert(id, worker);
        self.worker_id_by_name.insert(name, id);
        id
    }

    pub fn workers(&self) -> impl Iterator<Item = &Worker> {
        self.workers.values()
    }

    pub fn count_active_workers(&self, stale_after: Duration) -> usize {
        self.workers.values().filter(|w| !w.is_stale(stale_after)).count()
    }

    pub fn get_available_models(&self, stale_after: Duration) -> std::collections::HashSet<String> {
        self.workers
            .values()
            .filter(|w| !w.is_stale(stale_after))
            .map(|w| w.model.clone())
            .collect()
    }

    pub fn top_contributor(&self) -> Option<&User> {
        self.users.iter().max_by_key(|u| u.contributions.tokens)
    }

    pub fn top_server(&self, stale_after: Duration) -> Option<&Worker> {
        self.workers
            .values()
            .filter(|w| !w.is_stale(stale_after))
            .max_by_key(|w| w.contributions)
    }

    pub fn get_total_usage(&self) -> (u64, u64) {
        let tokens: u64 = self.users.iter().map(|u| u.usage.tokens).sum();
        let fulfilments: u64 = self.workers.values().map(|w| w.fulfilments).sum();
        (tokens, fulfilments)
    }

    pub fn get_request_avg(&self, stale_after: Duration) -> f64 {
        let active: Vec<&Worker> = self.workers.values().filter(|w| !w.is_stale(stale_after)).collect();
        if active.is_empty() {
            return 0.0;
        }
        active.iter().map(|w| w.performance()).sum::<f64>() / active.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_assigns_sequential_ids() {
        let mut reg = Registry::new();
        reg.create_user("a".into(), "a@x.com".into(), "key-a".into(), "".into())
            .unwrap();
        reg.create_user("b".into(), "b@x.com".into(), "key-b".into(), "".into())
            .unwrap();
        assert_eq!(reg.find_user_by_email("a@x.com").unwrap().id, 1);
        assert_eq!(reg.find_user_by_email("b@x.com").unwrap().id, 2);
    }

    #[test]
    fn create_user_rejects_duplicate_email() {
        let mut reg = Registry::new();
        reg.create_user("a".into(), "a@x.com".into(), "key-a".into(), "".into())
            .unwrap();
        assert!(reg
            .create_user("a2".into(), "a@x.com".into(), "key-a2".into(), "".into())
            .is_err());
    }

    #[test]
    fn find_by_api_key_is_constant_time_lookup() {
        let mut reg = Registry::new();
        reg.create_user("a".into(), "a@x.com".into(), "key-a".into(), "".into())
            .unwrap();
        assert_eq!(reg.find_user_by_api_key("key-a").unwrap().username, "a");
        assert!(reg.find_user_by_api_key("nope").is_none());
    }

    #[test]
    fn count_active_workers_excludes_stale() {
        let mut reg = Registry::new();
        let id = reg.create_worker(1, "W1".into());
        assert_eq!(reg.count_active_workers(Duration::from_secs(300)), 0); // fresh, never checked in
        reg.find_worker_by_id_mut(&id)
            .unwrap()
            .check_in("m".into(), 80, 1024, Default::default(), String::new());
        assert_eq!(reg.count_active_workers(Duration::from_secs(300)), 1);
    }
}
