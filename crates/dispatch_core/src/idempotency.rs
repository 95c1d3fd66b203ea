//! Idempotency layer for non-retry-safe endpoints (ride creation, payment
//! capture).
//!
//! Admission per `(endpoint, subject, client_key)`:
//! - completed record with matching fingerprint → replay the stored response
//!   verbatim;
//! - completed record with a different fingerprint → conflict;
//! - in-flight placeholder → bounded wait on its completion (singleflight);
//! - otherwise → insert a placeholder and let the caller execute.
//!
//! Completed records also persist through the state store so a restarted
//! process keeps replaying within the TTL. Retryable handler failures abandon
//! the placeholder instead of completing it, so the caller may retry with the
//! same key.

use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::IdempotencyConfig;
use crate::error::{DispatchError, Result};
use crate::store::{IdempotencyRecord, StateStore};

/// Scoped idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdemKey {
    pub endpoint: String,
    pub subject_id: String,
    pub client_key: String,
}

/// A completed response, stored serialized so replays are byte-identical.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredResponse {
    pub status_code: u16,
    pub body: String,
}

/// SHA-256 over the canonical JSON body. `serde_json` maps are ordered, so
/// logically equal bodies hash equally.
pub fn fingerprint(body: &serde_json::Value) -> String {
    let canonical = body.to_string();
    let digest = Sha256::digest(canonical.as_bytes());
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[derive(Debug)]
enum Entry {
    InFlight {
        done_tx: watch::Sender<bool>,
        done_rx: watch::Receiver<bool>,
    },
    Completed {
        fingerprint: String,
        response: StoredResponse,
        completed_at: Instant,
    },
}

/// Outcome of admission for one request.
#[derive(Debug)]
pub enum Admission {
    /// First arrival: execute the handler, then `complete` or `abandon`.
    Fresh,
    Replay(StoredResponse),
    Conflict,
}

pub struct IdempotencyCache {
    ttl: Duration,
    inflight_wait: Duration,
    store: Arc<dyn StateStore>,
    entries: Mutex<HashMap<IdemKey, Entry>>,
}

impl IdempotencyCache {
    pub fn new(config: &IdempotencyConfig, store: Arc<dyn StateStore>) -> Self {
        Self {
            ttl: Duration::from_secs(config.ttl_seconds),
            inflight_wait: Duration::from_millis(config.inflight_wait_ms),
            store,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub async fn admit(&self, key: &IdemKey, fingerprint: &str) -> Result<Admission> {
        loop {
            let in_flight = {
                let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
                match entries.get(key) {
                    Some(Entry::Completed {
                        fingerprint: stored,
                        response,
                        completed_at,
                    }) => {
                        if completed_at.elapsed() <= self.ttl {
                            return if stored == fingerprint {
                                Ok(Admission::Replay(response.clone()))
                            } else {
                                Ok(Admission::Conflict)
                            };
                        }
                        entries.remove(key);
                        None
                    }
                    Some(Entry::InFlight { done_rx, .. }) => Some(done_rx.clone()),
                    None => None,
                }
            };

            if let Some(mut done_rx) = in_flight {
                if !*done_rx.borrow() {
                    let woken = tokio::time::timeout(self.inflight_wait, done_rx.changed()).await;
                    if woken.is_err() {
                        return Err(DispatchError::Timeout {
                            dependency: "idempotency singleflight",
                        });
                    }
                    // A closed channel means the first arrival abandoned;
                    // loop and contend for the placeholder.
                }
                continue;
            }

            // Durable record from a previous process lifetime?
            if let Some(record) = self
                .store
                .load_idempotency(&key.endpoint, &key.subject_id, &key.client_key)
                .await?
            {
                let age = Utc::now().signed_duration_since(record.created_at);
                if age.num_seconds() >= 0 && (age.num_seconds() as u64) < self.ttl.as_secs() {
                    let mut entries =
                        self.entries.lock().unwrap_or_else(PoisonError::into_inner);
                    entries.entry(key.clone()).or_insert(Entry::Completed {
                        fingerprint: record.request_fingerprint.clone(),
                        response: StoredResponse {
                            status_code: record.status_code,
                            body: record.response_body.clone(),
                        },
                        completed_at: Instant::now(),
                    });
                    continue;
                }
            }

            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            match entries.entry(key.clone()) {
                MapEntry::Vacant(vacant) => {
                    let (done_tx, done_rx) = watch::channel(false);
                    vacant.insert(Entry::InFlight { done_tx, done_rx });
                    return Ok(Admission::Fresh);
                }
                // Lost the insertion race; re-inspect.
                MapEntry::Occupied(_) => continue,
            }
        }
    }

    /// Store the response for the placeholder and wake waiters.
    pub async fn complete(&self, key: &IdemKey, fingerprint: String, response: StoredResponse) {
        {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = entries.insert(
                key.clone(),
                Entry::Completed {
                    fingerprint: fingerprint.clone(),
                    response: response.clone(),
                    completed_at: Instant::now(),
                },
            );
            if let Some(Entry::InFlight { done_tx, .. }) = previous {
                let _ = done_tx.send(true);
            }
        }

        let record = IdempotencyRecord {
            endpoint: key.endpoint.clone(),
            subject_id: key.subject_id.clone(),
            key: key.client_key.clone(),
            request_fingerprint: fingerprint,
            status_code: response.status_code,
            response_body: response.body,
            created_at: Utc::now(),
        };
        if let Err(err) = self.store.save_idempotency(&record).await {
            tracing::warn!(
                endpoint = %key.endpoint,
                error = %err,
                "failed to persist idempotency record; in-memory replay still active"
            );
        }
    }

    /// Drop the placeholder so a retry with the same key re-executes.
    pub fn abandon(&self, key: &IdemKey) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(Entry::InFlight { .. }) = entries.get(key) {
            // Dropping the sender closes the channel and wakes waiters.
            entries.remove(key);
        }
    }

    /// Evict expired completions. Called by the sweep worker.
    pub fn prune_expired(&self) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, entry| match entry {
            Entry::Completed { completed_at, .. } => completed_at.elapsed() <= self.ttl,
            Entry::InFlight { .. } => true,
        });
    }
}
