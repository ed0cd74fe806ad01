// The persistence collaborator contract: a tree-structured document store
// keyed by `auctions/{auctionId}` with push-style generated ids, atomic
// multi-path updates, guarded (compare-and-swap) updates, full-subtree
// subscriptions, and indexed owner/referral lookups.
//
// The core consumes this contract; it does not implement storage semantics
// beyond it. Two collaborators ship with the crate: `MemoryStore` for tests
// and development, `SqliteStore` for durable single-node deployments.

pub mod blob;
pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::OsRng;
use rand::Rng;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: auctions/{0}")]
    NotFound(String),

    /// Network/storage failure. Retryable; nothing was applied.
    #[error("storage backend failure: {0}")]
    Backend(#[source] anyhow::Error),
}

impl StoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Backend(_))
    }

    pub(crate) fn backend<E: Into<anyhow::Error>>(err: E) -> Self {
        StoreError::Backend(err.into())
    }
}

/// A map of document-relative paths to new values, applied as one unit.
/// Setting a path to `null` removes it, matching the store's update
/// semantics for optional fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSet {
    entries: BTreeMap<String, Value>,
}

impl UpdateSet {
    pub fn new() -> Self {
        UpdateSet::default()
    }

    /// Builder-style insert.
    pub fn set(mut self, path: impl Into<String>, value: Value) -> Self {
        self.entries.insert(path.into(), value);
        self
    }

    pub fn insert(&mut self, path: impl Into<String>, value: Value) {
        self.entries.insert(path.into(), value);
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        self.entries.get(path)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Precondition for a guarded update: the document value at `path` must
/// equal `expected` (a missing path compares as `null`).
#[derive(Debug, Clone, PartialEq)]
pub struct Guard {
    pub path: String,
    pub expected: Value,
}

impl Guard {
    pub fn new(path: impl Into<String>, expected: Value) -> Self {
        Guard {
            path: path.into(),
            expected,
        }
    }
}

/// The store contract the session controller mediates against.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert a new auction document; the store generates and returns the id
    /// (also patched into the document's `id` field).
    async fn create(&self, doc: Value) -> Result<String, StoreError>;

    /// Read the full document subtree, or `None` if absent.
    async fn read(&self, auction_id: &str) -> Result<Option<Value>, StoreError>;

    /// Apply every path in `updates` as one atomic unit. On error nothing
    /// is applied.
    async fn update(&self, auction_id: &str, updates: UpdateSet) -> Result<(), StoreError>;

    /// Atomic conditional update: apply `updates` only if every guard holds
    /// against the current document. Returns `Ok(false)` (nothing applied)
    /// when a precondition fails.
    async fn update_guarded(
        &self,
        auction_id: &str,
        guards: &[Guard],
        updates: UpdateSet,
    ) -> Result<bool, StoreError>;

    async fn delete(&self, auction_id: &str) -> Result<(), StoreError>;

    /// All documents for an owner. `ownerId` is an indexed field.
    async fn query_by_owner(&self, owner_id: &str) -> Result<Vec<Value>, StoreError>;

    /// Lookup by referral code. `referralCode` is an indexed field.
    async fn query_by_referral_code(&self, code: &str) -> Result<Option<Value>, StoreError>;

    /// Stream of full-document snapshots, one per applied update. The
    /// channel closes when the document is deleted. Snapshots are push-based
    /// and may repeat; consumers treat each as a wholesale replacement.
    fn subscribe(&self, auction_id: &str) -> broadcast::Receiver<Value>;
}

// ---------------------------------------------------------------------------
// Push ids
// ---------------------------------------------------------------------------

const PUSH_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Generate a 20-character document id: an 8-character base-62 timestamp
/// prefix (so ids sort roughly by creation time) plus 12 characters of OS
/// entropy.
pub fn push_id() -> String {
    let mut stamp = Utc::now().timestamp_millis().max(0) as u64;
    let mut prefix = ['0'; 8];
    for slot in prefix.iter_mut().rev() {
        *slot = PUSH_ALPHABET[(stamp % 62) as usize] as char;
        stamp /= 62;
    }

    let mut rng = OsRng;
    let mut id: String = prefix.iter().collect();
    for _ in 0..12 {
        id.push(PUSH_ALPHABET[rng.gen_range(0..PUSH_ALPHABET.len())] as char);
    }
    id
}

// ---------------------------------------------------------------------------
// Document tree helpers (shared by the store implementations)
// ---------------------------------------------------------------------------

/// Apply an update set to a document tree in place. Intermediate objects are
/// created as needed; `null` values remove the final key.
pub fn apply_update(doc: &mut Value, updates: &UpdateSet) {
    for (path, value) in updates.iter() {
        set_at(doc, path, value.clone());
    }
}

/// Resolve a slash-separated path inside a document.
pub fn value_at<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = doc;
    for part in path.split('/') {
        node = node.get(part)?;
    }
    Some(node)
}

/// Whether every guard precondition holds against `doc`.
pub fn guards_hold(doc: &Value, guards: &[Guard]) -> bool {
    guards
        .iter()
        .all(|g| *value_at(doc, &g.path).unwrap_or(&Value::Null) == g.expected)
}

fn set_at(node: &mut Value, path: &str, value: Value) {
    match path.split_once('/') {
        Some((head, rest)) => {
            let map = ensure_object(node);
            let child = map.entry(head.to_string()).or_insert(Value::Null);
            set_at(child, rest, value);
        }
        None => {
            let map = ensure_object(node);
            if value.is_null() {
                map.remove(path);
            } else {
                map.insert(path.to_string(), value);
            }
        }
    }
}

fn ensure_object(node: &mut Value) -> &mut serde_json::Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(serde_json::Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced with an object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn apply_update_sets_nested_paths_atomically() {
        let mut doc = json!({
            "status": "live",
            "currentAuction": { "currentBidAmount": 100 }
        });
        let updates = UpdateSet::new()
            .set("currentAuction/currentBidAmount", json!(150))
            .set("currentAuction/currentBiddingTeam", json!("t2"))
            .set("teams/t2/remainingCredits", json!(850));
        apply_update(&mut doc, &updates);

        assert_eq!(doc["currentAuction"]["currentBidAmount"], 150);
        assert_eq!(doc["currentAuction"]["currentBiddingTeam"], "t2");
        assert_eq!(doc["teams"]["t2"]["remainingCredits"], 850);
        assert_eq!(doc["status"], "live");
    }

    #[test]
    fn null_removes_the_key() {
        let mut doc = json!({
            "currentAuction": { "currentBiddingTeam": "t1", "currentBidAmount": 100 }
        });
        let updates = UpdateSet::new().set("currentAuction/currentBiddingTeam", Value::Null);
        apply_update(&mut doc, &updates);
        assert!(doc["currentAuction"].get("currentBiddingTeam").is_none());
        assert_eq!(doc["currentAuction"]["currentBidAmount"], 100);
    }

    #[test]
    fn value_at_resolves_paths() {
        let doc = json!({ "teams": { "t1": { "remainingCredits": 500 } } });
        assert_eq!(
            value_at(&doc, "teams/t1/remainingCredits"),
            Some(&json!(500))
        );
        assert!(value_at(&doc, "teams/t9/remainingCredits").is_none());
    }

    #[test]
    fn guards_compare_missing_as_null() {
        let doc = json!({ "currentAuction": { "currentBidAmount": 0 } });
        assert!(guards_hold(
            &doc,
            &[Guard::new("currentAuction/currentBidAmount", json!(0))]
        ));
        assert!(!guards_hold(
            &doc,
            &[Guard::new("currentAuction/currentBidAmount", json!(50))]
        ));
        assert!(guards_hold(
            &doc,
            &[Guard::new("currentAuction/missing", Value::Null)]
        ));
    }

    #[test]
    fn push_ids_are_unique_and_sortable() {
        let a = push_id();
        let b = push_id();
        assert_eq!(a.len(), 20);
        assert_eq!(b.len(), 20);
        assert_ne!(a, b);
        assert!(a.bytes().all(|c| PUSH_ALPHABET.contains(&c)));
        // Same-millisecond ids share the timestamp prefix.
        assert!(a[..8] <= b[..8]);
    }
}
