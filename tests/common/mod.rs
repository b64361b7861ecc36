//! Shared test utilities: a simulated transport for the pooling layer
//!
//! `MockConnector` stands in for the production connector and counts every
//! connect attempt; `MockClient` is an in-memory store with programmable
//! probe and close failures.

#![allow(dead_code)]

use async_trait::async_trait;
use kvpool::{ConnectionProfile, Connector, KvClient, KvPool, TransportError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Build a pool wired to a simulated connector
pub fn mock_pool(connector: &Arc<MockConnector>) -> KvPool {
    KvPool::with_connector(Arc::clone(connector) as Arc<dyn Connector>)
}

/// Simulated connector with attempt counting and programmable failures
#[derive(Default)]
pub struct MockConnector {
    connect_attempts: AtomicU32,
    connect_delay_ms: AtomicU32,
    refuse_connects: AtomicBool,
    // Shared budget of probe failures, consumed across all clients
    ping_failures: Arc<AtomicU32>,
    fail_close_dbs: Mutex<Vec<i64>>,
    clients: Mutex<Vec<Arc<MockClient>>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Delay each connect, so concurrent callers genuinely overlap
    pub fn set_connect_delay(&self, delay: Duration) {
        self.connect_delay_ms
            .store(delay.as_millis() as u32, Ordering::SeqCst);
    }

    /// Refuse (or stop refusing) connection attempts
    pub fn refuse_connects(&self, refuse: bool) {
        self.refuse_connects.store(refuse, Ordering::SeqCst);
    }

    /// Make the next `n` liveness probes fail, across all clients
    pub fn fail_next_pings(&self, n: u32) {
        self.ping_failures.store(n, Ordering::SeqCst);
    }

    /// Clients created for the given db index fail their close call
    pub fn fail_close_on_db(&self, db: i64) {
        self.fail_close_dbs.lock().unwrap().push(db);
    }

    pub fn connect_attempts(&self) -> u32 {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    /// Every client this connector has created, in creation order
    pub fn clients(&self) -> Vec<Arc<MockClient>> {
        self.clients.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        profile: &ConnectionProfile,
    ) -> Result<Arc<dyn KvClient>, TransportError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);

        if self.refuse_connects.load(Ordering::SeqCst) {
            return Err(TransportError::Other(
                "simulated connection refusal".to_string(),
            ));
        }

        let delay = self.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(u64::from(delay))).await;
        }

        let fail_close = self.fail_close_dbs.lock().unwrap().contains(&profile.db);
        let client = Arc::new(MockClient {
            db: profile.db,
            ping_failures: Arc::clone(&self.ping_failures),
            fail_close,
            ..MockClient::default()
        });
        self.clients.lock().unwrap().push(Arc::clone(&client));

        Ok(client)
    }
}

struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StringEntry {
    fn live(&self) -> bool {
        self.expires_at.map_or(true, |at| at > Instant::now())
    }
}

/// In-memory stand-in for one live store connection
#[derive(Default)]
pub struct MockClient {
    pub db: i64,
    strings: Mutex<HashMap<String, StringEntry>>,
    hashes: Mutex<HashMap<String, HashMap<String, String>>>,
    lists: Mutex<HashMap<String, VecDeque<String>>>,
    ping_failures: Arc<AtomicU32>,
    ping_count: AtomicU32,
    close_count: AtomicU32,
    fail_close: bool,
}

impl MockClient {
    pub fn ping_count(&self) -> u32 {
        self.ping_count.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> u32 {
        self.close_count.load(Ordering::SeqCst)
    }

    fn all_live_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .strings
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, entry)| entry.live())
            .map(|(k, _)| k.clone())
            .collect();
        keys.extend(self.hashes.lock().unwrap().keys().cloned());
        keys.extend(self.lists.lock().unwrap().keys().cloned());
        keys
    }
}

#[async_trait]
impl KvClient for MockClient {
    async fn ping(&self) -> Result<(), TransportError> {
        self.ping_count.fetch_add(1, Ordering::SeqCst);
        let consumed = self
            .ping_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| v.checked_sub(1))
            .is_ok();
        if consumed {
            Err(TransportError::Other("simulated probe failure".to_string()))
        } else {
            Ok(())
        }
    }

    async fn get(&self, key: &str) -> Result<Option<String>, TransportError> {
        let mut strings = self.strings.lock().unwrap();
        match strings.get(key) {
            Some(entry) if entry.live() => Ok(Some(entry.value.clone())),
            Some(_) => {
                strings.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), TransportError> {
        self.strings.lock().unwrap().insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: None,
            },
        );
        Ok(())
    }

    async fn set_ex(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
    ) -> Result<(), TransportError> {
        self.strings.lock().unwrap().insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_seconds)),
            },
        );
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<u64, TransportError> {
        let mut removed = 0;
        let mut strings = self.strings.lock().unwrap();
        let mut hashes = self.hashes.lock().unwrap();
        let mut lists = self.lists.lock().unwrap();
        for key in keys {
            let hit = strings.remove(key).is_some()
                | hashes.remove(key).is_some()
                | lists.remove(key).is_some();
            if hit {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> Result<bool, TransportError> {
        if let Some(entry) = self.strings.lock().unwrap().get(key) {
            if entry.live() {
                return Ok(true);
            }
        }
        Ok(self.hashes.lock().unwrap().contains_key(key)
            || self.lists.lock().unwrap().contains_key(key))
    }

    async fn expire(&self, key: &str, ttl_seconds: i64) -> Result<bool, TransportError> {
        let mut strings = self.strings.lock().unwrap();
        match strings.get_mut(key) {
            Some(entry) if entry.live() => {
                entry.expires_at =
                    Some(Instant::now() + Duration::from_secs(ttl_seconds.max(0) as u64));
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<i64, TransportError> {
        let strings = self.strings.lock().unwrap();
        match strings.get(key) {
            Some(entry) if entry.live() => match entry.expires_at {
                Some(at) => {
                    let remaining = at - Instant::now();
                    let mut secs = remaining.as_secs() as i64;
                    if remaining.subsec_nanos() > 0 {
                        secs += 1;
                    }
                    Ok(secs)
                }
                None => Ok(-1),
            },
            _ => Ok(-2),
        }
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>, TransportError> {
        Ok(self
            .all_live_keys()
            .into_iter()
            .filter(|key| glob_match(pattern, key))
            .collect())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, TransportError> {
        Ok(self
            .hashes
            .lock()
            .unwrap()
            .get(key)
            .and_then(|hash| hash.get(field).cloned()))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), TransportError> {
        self.hashes
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>, TransportError> {
        Ok(self
            .hashes
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn lpush(&self, key: &str, values: &[String]) -> Result<u64, TransportError> {
        let mut lists = self.lists.lock().unwrap();
        let list = lists.entry(key.to_string()).or_default();
        for value in values {
            list.push_front(value.clone());
        }
        Ok(list.len() as u64)
    }

    async fn rpush(&self, key: &str, values: &[String]) -> Result<u64, TransportError> {
        let mut lists = self.lists.lock().unwrap();
        let list = lists.entry(key.to_string()).or_default();
        for value in values {
            list.push_back(value.clone());
        }
        Ok(list.len() as u64)
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>, TransportError> {
        Ok(self
            .lists
            .lock()
            .unwrap()
            .get_mut(key)
            .and_then(VecDeque::pop_front))
    }

    async fn rpop(&self, key: &str) -> Result<Option<String>, TransportError> {
        Ok(self
            .lists
            .lock()
            .unwrap()
            .get_mut(key)
            .and_then(VecDeque::pop_back))
    }

    async fn ltrim(&self, key: &str, start: isize, stop: isize) -> Result<(), TransportError> {
        let mut lists = self.lists.lock().unwrap();
        if let Some(list) = lists.get_mut(key) {
            let len = list.len() as isize;
            let norm = |index: isize| {
                if index < 0 {
                    (len + index).max(0)
                } else {
                    index
                }
            };
            let start = norm(start).min(len) as usize;
            let stop = norm(stop).min(len - 1);

            if stop < start as isize {
                list.clear();
            } else {
                let kept: VecDeque<String> = list
                    .iter()
                    .skip(start)
                    .take(stop as usize - start + 1)
                    .cloned()
                    .collect();
                *list = kept;
            }
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            Err(TransportError::Other("simulated close failure".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Minimal glob matcher supporting `*`, enough for key patterns in tests
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == text;
    }

    let mut pos = 0;
    let last = parts.len() - 1;
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        if i == 0 {
            if !text.starts_with(part) {
                return false;
            }
            pos = part.len();
        } else if i == last {
            return text.len() >= pos + part.len() && text[pos..].ends_with(part);
        } else if let Some(found) = text[pos..].find(part) {
            pos += found + part.len();
        } else {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::glob_match;

    #[test]
    fn glob_matches_star_patterns() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("sess:*", "sess:a"));
        assert!(!glob_match("sess:*", "other:a"));
        assert!(glob_match("a*b*c", "a-x-b-y-c"));
        assert!(!glob_match("a*b*c", "a-x-c"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("exact", "inexact"));
    }
}
