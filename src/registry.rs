//! Asset Registry - Stable Identity, Dedup, TTL
//!
//! One record per stable identity while it is alive. Records are process-local
//! and vanish on restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::hashing::compute_identity_key;
use crate::templates::{ParamValues, RenderedGraph, WorkflowId};

pub const DEFAULT_TTL_HOURS: i64 = 24;

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Hand-driven clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Where an artifact lives on the engine, independent of any address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StableIdentity {
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    /// Engine folder type: `output`, `temp`, `input`.
    pub kind: String,
}

impl StableIdentity {
    pub fn new(name: impl Into<String>, subfolder: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            subfolder: subfolder.into(),
            kind: kind.into(),
        }
    }

    pub fn key(&self) -> String {
        compute_identity_key(&self.name, &self.subfolder, &self.kind)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub mime_type: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub bytes_size: Option<u64>,
}

impl AssetMetadata {
    /// Metadata knowable from the file name alone.
    pub fn from_identity(identity: &StableIdentity) -> Self {
        Self {
            mime_type: mime_guess::from_path(&identity.name)
                .first()
                .map(|m| m.essence_str().to_string()),
            ..Self::default()
        }
    }
}

/// Everything needed to re-submit the exact job that produced an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub workflow_id: WorkflowId,
    pub job_id: String,
    /// Resolved parameter values the graph was rendered from.
    pub parameters: ParamValues,
    pub graph: RenderedGraph,
    /// Full engine history snapshot for the job.
    pub history: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRecord {
    pub asset_id: String,
    pub identity: StableIdentity,
    #[serde(flatten)]
    pub metadata: AssetMetadata,
    pub provenance: Provenance,
    pub session_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl AssetRecord {
    pub fn workflow_id(&self) -> &str {
        &self.provenance.workflow_id
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, Default)]
pub struct AssetFilter {
    pub workflow_id: Option<String>,
    pub session_id: Option<String>,
    pub limit: Option<usize>,
}

impl AssetFilter {
    pub fn limit(limit: usize) -> Self {
        Self { limit: Some(limit), ..Self::default() }
    }

    fn matches(&self, record: &AssetRecord) -> bool {
        self.workflow_id.as_deref().map_or(true, |w| record.workflow_id() == w)
            && self
                .session_id
                .as_deref()
                .map_or(true, |s| record.session_id.as_deref() == Some(s))
    }
}

struct Entry {
    record: Arc<AssetRecord>,
    /// Insertion order, breaks created_at ties in listings.
    seq: u64,
}

#[derive(Default)]
struct Indices {
    by_id: HashMap<String, Entry>,
    by_key: HashMap<String, String>,
    next_seq: u64,
}

impl Indices {
    fn evict(&mut self, asset_id: &str) -> Option<Arc<AssetRecord>> {
        let entry = self.by_id.remove(asset_id)?;
        let key = entry.record.identity.key();
        if self.by_key.get(&key).map(String::as_str) == Some(asset_id) {
            self.by_key.remove(&key);
        }
        Some(entry.record)
    }
}

/// The sole writer of asset records.
pub struct AssetRegistry {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    /// `std::sync::Mutex`: never held across an `.await`.
    inner: Mutex<Indices>,
}

impl AssetRegistry {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            inner: Mutex::new(Indices::default()),
        }
    }

    /// Register an artifact, or return the live record already holding its
    /// identity. The lookup and the insert happen under one lock, so racing
    /// registrations of the same identity converge on a single record and the
    /// first provenance wins.
    pub fn register(
        &self,
        identity: StableIdentity,
        metadata: AssetMetadata,
        provenance: Provenance,
        session_id: Option<String>,
    ) -> Arc<AssetRecord> {
        let key = identity.key();
        let now = self.clock.now();
        let mut inner = self.lock();

        if let Some(asset_id) = inner.by_key.get(&key).cloned() {
            let live = inner
                .by_id
                .get(&asset_id)
                .filter(|e| !e.record.is_expired_at(now))
                .map(|e| Arc::clone(&e.record));
            if let Some(existing) = live {
                debug!(asset_id = %asset_id, name = %identity.name, "Identity already registered");
                return existing;
            }
            inner.evict(&asset_id);
            inner.by_key.remove(&key);
        }

        let record = Arc::new(AssetRecord {
            asset_id: Uuid::new_v4().to_string(),
            identity,
            metadata,
            provenance,
            session_id,
            created_at: now,
            expires_at: now.checked_add_signed(self.ttl).unwrap_or(DateTime::<Utc>::MAX_UTC),
        });
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.by_key.insert(key, record.asset_id.clone());
        inner.by_id.insert(
            record.asset_id.clone(),
            Entry { record: Arc::clone(&record), seq },
        );

        info!(
            asset_id = %record.asset_id,
            name = %record.identity.name,
            workflow_id = %record.provenance.workflow_id,
            "Registered asset"
        );
        record
    }

    /// Live record by id. Expired records are evicted on the way out.
    pub fn get(&self, asset_id: &str) -> Option<Arc<AssetRecord>> {
        let now = self.clock.now();
        let mut inner = self.lock();
        let expired = inner.by_id.get(asset_id)?.record.is_expired_at(now);
        if expired {
            inner.evict(asset_id);
            debug!(asset_id, "Evicted expired asset on lookup");
            return None;
        }
        inner.by_id.get(asset_id).map(|e| Arc::clone(&e.record))
    }

    /// Live record currently holding `identity`.
    pub fn find_by_identity(&self, identity: &StableIdentity) -> Option<Arc<AssetRecord>> {
        let asset_id = self.lock().by_key.get(&identity.key()).cloned()?;
        self.get(&asset_id)
    }

    /// Newest first.
    pub fn list(&self, filter: &AssetFilter) -> Vec<Arc<AssetRecord>> {
        let now = self.clock.now();
        let inner = self.lock();
        let mut live: Vec<&Entry> = inner
            .by_id
            .values()
            .filter(|e| !e.record.is_expired_at(now) && filter.matches(&e.record))
            .collect();
        live.sort_by(|a, b| {
            b.record
                .created_at
                .cmp(&a.record.created_at)
                .then(b.seq.cmp(&a.seq))
        });
        live.into_iter()
            .take(filter.limit.unwrap_or(usize::MAX))
            .map(|e| Arc::clone(&e.record))
            .collect()
    }

    /// Remove every expired record from both indices.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        let expired: Vec<String> = inner
            .by_id
            .values()
            .filter(|e| e.record.is_expired_at(now))
            .map(|e| e.record.asset_id.clone())
            .collect();
        for asset_id in &expired {
            inner.evict(asset_id);
        }
        if !expired.is_empty() {
            info!(removed = expired.len(), remaining = inner.by_id.len(), "Cleaned up expired assets");
        }
        expired.len()
    }

    /// Records held, live or not yet swept.
    pub fn len(&self) -> usize {
        self.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Indices> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn key_index_len(&self) -> usize {
        self.lock().by_key.len()
    }
}

impl Default for AssetRegistry {
    fn default() -> Self {
        Self::new(Duration::hours(DEFAULT_TTL_HOURS))
    }
}
