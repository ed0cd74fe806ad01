// In-memory document store: the test/development collaborator.
//
// Holds one JSON tree per auction behind a mutex; every applied update
// broadcasts the full document to subscribers. Queries are linear scans,
// which is fine at in-process scale.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;

use super::{
    apply_update, guards_hold, push_id, DocumentStore, Guard, StoreError, UpdateSet,
};

const SNAPSHOT_CHANNEL_CAPACITY: usize = 64;

pub struct MemoryStore {
    docs: Mutex<HashMap<String, Value>>,
    watchers: Mutex<HashMap<String, broadcast::Sender<Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            docs: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
        }
    }

    fn docs(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        self.docs.lock().expect("memory store mutex poisoned")
    }

    fn watchers(&self) -> std::sync::MutexGuard<'_, HashMap<String, broadcast::Sender<Value>>> {
        self.watchers.lock().expect("memory store watcher mutex poisoned")
    }

    fn notify(&self, auction_id: &str, doc: &Value) {
        if let Some(sender) = self.watchers().get(auction_id) {
            // No receivers is fine; the snapshot just goes nowhere.
            let _ = sender.send(doc.clone());
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        MemoryStore::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn create(&self, mut doc: Value) -> Result<String, StoreError> {
        let id = push_id();
        if let Value::Object(map) = &mut doc {
            map.insert("id".to_string(), Value::String(id.clone()));
        }
        self.docs().insert(id.clone(), doc.clone());
        self.notify(&id, &doc);
        Ok(id)
    }

    async fn read(&self, auction_id: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.docs().get(auction_id).cloned())
    }

    async fn update(&self, auction_id: &str, updates: UpdateSet) -> Result<(), StoreError> {
        let doc = {
            let mut docs = self.docs();
            let doc = docs
                .get_mut(auction_id)
                .ok_or_else(|| StoreError::NotFound(auction_id.to_string()))?;
            apply_update(doc, &updates);
            doc.clone()
        };
        self.notify(auction_id, &doc);
        Ok(())
    }

    async fn update_guarded(
        &self,
        auction_id: &str,
        guards: &[Guard],
        updates: UpdateSet,
    ) -> Result<bool, StoreError> {
        let doc = {
            let mut docs = self.docs();
            let doc = docs
                .get_mut(auction_id)
                .ok_or_else(|| StoreError::NotFound(auction_id.to_string()))?;
            if !guards_hold(doc, guards) {
                return Ok(false);
            }
            apply_update(doc, &updates);
            doc.clone()
        };
        self.notify(auction_id, &doc);
        Ok(true)
    }

    async fn delete(&self, auction_id: &str) -> Result<(), StoreError> {
        self.docs().remove(auction_id);
        // Dropping the sender closes every subscription on this document.
        self.watchers().remove(auction_id);
        Ok(())
    }

    async fn query_by_owner(&self, owner_id: &str) -> Result<Vec<Value>, StoreError> {
        Ok(self
            .docs()
            .values()
            .filter(|doc| doc.get("ownerId").and_then(Value::as_str) == Some(owner_id))
            .cloned()
            .collect())
    }

    async fn query_by_referral_code(&self, code: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .docs()
            .values()
            .find(|doc| doc.get("referralCode").and_then(Value::as_str) == Some(code))
            .cloned())
    }

    fn subscribe(&self, auction_id: &str) -> broadcast::Receiver<Value> {
        self.watchers()
            .entry(auction_id.to_string())
            .or_insert_with(|| broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_doc() -> Value {
        json!({
            "ownerId": "owner-1",
            "referralCode": "AB12CD34",
            "status": "draft",
            "currentAuction": { "currentBidAmount": 0 }
        })
    }

    #[tokio::test]
    async fn create_assigns_and_embeds_an_id() {
        let store = MemoryStore::new();
        let id = store.create(sample_doc()).await.unwrap();
        let doc = store.read(&id).await.unwrap().unwrap();
        assert_eq!(doc["id"], Value::String(id));
    }

    #[tokio::test]
    async fn update_is_all_or_nothing_on_missing_doc() {
        let store = MemoryStore::new();
        let err = store
            .update("nope", UpdateSet::new().set("status", json!("live")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn guarded_update_rejects_on_stale_precondition() {
        let store = MemoryStore::new();
        let id = store.create(sample_doc()).await.unwrap();

        let fresh = store
            .update_guarded(
                &id,
                &[Guard::new("currentAuction/currentBidAmount", json!(0))],
                UpdateSet::new().set("currentAuction/currentBidAmount", json!(100)),
            )
            .await
            .unwrap();
        assert!(fresh);

        // Second writer computed against the same prior amount; nothing lands.
        let stale = store
            .update_guarded(
                &id,
                &[Guard::new("currentAuction/currentBidAmount", json!(0))],
                UpdateSet::new().set("currentAuction/currentBidAmount", json!(100)),
            )
            .await
            .unwrap();
        assert!(!stale);

        let doc = store.read(&id).await.unwrap().unwrap();
        assert_eq!(doc["currentAuction"]["currentBidAmount"], 100);
    }

    #[tokio::test]
    async fn subscribers_get_full_snapshots_per_update() {
        let store = MemoryStore::new();
        let id = store.create(sample_doc()).await.unwrap();
        let mut rx = store.subscribe(&id);

        store
            .update(&id, UpdateSet::new().set("status", json!("live")))
            .await
            .unwrap();
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot["status"], "live");
        assert_eq!(snapshot["ownerId"], "owner-1");
    }

    #[tokio::test]
    async fn delete_closes_subscriptions() {
        let store = MemoryStore::new();
        let id = store.create(sample_doc()).await.unwrap();
        let mut rx = store.subscribe(&id);
        store.delete(&id).await.unwrap();
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
        assert!(store.read(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn indexed_lookups() {
        let store = MemoryStore::new();
        store.create(sample_doc()).await.unwrap();
        let mut other = sample_doc();
        other["ownerId"] = json!("owner-2");
        other["referralCode"] = json!("ZZ99YY88");
        store.create(other).await.unwrap();

        assert_eq!(store.query_by_owner("owner-1").await.unwrap().len(), 1);
        assert_eq!(store.query_by_owner("owner-9").await.unwrap().len(), 0);
        let hit = store.query_by_referral_code("ZZ99YY88").await.unwrap();
        assert_eq!(hit.unwrap()["ownerId"], "owner-2");
        assert!(store.query_by_referral_code("NOPE0000").await.unwrap().is_none());
    }
}
