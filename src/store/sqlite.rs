// SQLite-backed document store: the durable collaborator for single-node
// deployments.
//
// One row per auction document; `owner_id` and `referral_code` are real
// indexed columns recomputed from the document on every write, so the two
// lookup queries the contract requires never scan. Multi-path updates run
// inside a transaction, which is what makes them atomic.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use tokio::sync::broadcast;

use super::{
    apply_update, guards_hold, push_id, DocumentStore, Guard, StoreError, UpdateSet,
};

const SNAPSHOT_CHANNEL_CAPACITY: usize = 64;

pub struct SqliteStore {
    conn: Mutex<Connection>,
    watchers: Mutex<HashMap<String, broadcast::Sender<Value>>>,
}

impl SqliteStore {
    /// Open (or create) the store at `path` and ensure the schema exists.
    /// Pass `":memory:"` for an ephemeral store in tests.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open auction store at {path}"))
            .map_err(StoreError::Backend)?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to set store pragmas")
        .map_err(StoreError::Backend)?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS auctions (
                id            TEXT PRIMARY KEY,
                owner_id      TEXT NOT NULL,
                referral_code TEXT NOT NULL,
                doc           TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_auctions_owner
                ON auctions(owner_id);
            CREATE UNIQUE INDEX IF NOT EXISTS idx_auctions_referral
                ON auctions(referral_code);
            ",
        )
        .context("failed to create auction store schema")
        .map_err(StoreError::Backend)?;

        Ok(SqliteStore {
            conn: Mutex::new(conn),
            watchers: Mutex::new(HashMap::new()),
        })
    }

    /// Acquire the connection. Panics only if another thread panicked while
    /// holding the lock.
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("auction store mutex poisoned")
    }

    fn watchers(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<Value>>> {
        self.watchers.lock().expect("auction store watcher mutex poisoned")
    }

    fn notify(&self, auction_id: &str, doc: &Value) {
        if let Some(sender) = self.watchers().get(auction_id) {
            let _ = sender.send(doc.clone());
        }
    }

    /// Load, patch, and persist a document inside one transaction. Returns
    /// the new document when the guards held, `None` otherwise.
    fn apply_in_tx(
        &self,
        auction_id: &str,
        guards: &[Guard],
        updates: &UpdateSet,
    ) -> Result<Option<Value>, StoreError> {
        let mut conn = self.conn();
        let tx = conn
            .transaction()
            .context("failed to begin store transaction")
            .map_err(StoreError::Backend)?;

        let raw: Option<String> = tx
            .query_row(
                "SELECT doc FROM auctions WHERE id = ?1",
                params![auction_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to load auction document")
            .map_err(StoreError::Backend)?;
        let raw = raw.ok_or_else(|| StoreError::NotFound(auction_id.to_string()))?;

        let mut doc: Value = serde_json::from_str(&raw)
            .context("stored auction document is not valid JSON")
            .map_err(StoreError::Backend)?;
        if !guards_hold(&doc, guards) {
            return Ok(None);
        }
        apply_update(&mut doc, updates);

        let (owner_id, referral_code) = index_fields(&doc);
        let serialized = serde_json::to_string(&doc)
            .context("failed to serialize auction document")
            .map_err(StoreError::Backend)?;
        tx.execute(
            "UPDATE auctions SET doc = ?2, owner_id = ?3, referral_code = ?4 WHERE id = ?1",
            params![auction_id, serialized, owner_id, referral_code],
        )
        .context("failed to write auction document")
        .map_err(StoreError::Backend)?;
        tx.commit()
            .context("failed to commit store transaction")
            .map_err(StoreError::Backend)?;

        Ok(Some(doc))
    }
}

fn index_fields(doc: &Value) -> (String, String) {
    let owner_id = doc
        .get("ownerId")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let referral_code = doc
        .get("referralCode")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    (owner_id, referral_code)
}

#[async_trait]
impl DocumentStore for SqliteStore {
    async fn create(&self, mut doc: Value) -> Result<String, StoreError> {
        let id = push_id();
        if let Value::Object(map) = &mut doc {
            map.insert("id".to_string(), Value::String(id.clone()));
        }
        let (owner_id, referral_code) = index_fields(&doc);
        let serialized = serde_json::to_string(&doc)
            .context("failed to serialize auction document")
            .map_err(StoreError::Backend)?;

        self.conn()
            .execute(
                "INSERT INTO auctions (id, owner_id, referral_code, doc) VALUES (?1, ?2, ?3, ?4)",
                params![id, owner_id, referral_code, serialized],
            )
            .context("failed to insert auction document")
            .map_err(StoreError::Backend)?;

        self.notify(&id, &doc);
        Ok(id)
    }

    async fn read(&self, auction_id: &str) -> Result<Option<Value>, StoreError> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT doc FROM auctions WHERE id = ?1",
                params![auction_id],
                |row| row.get(0),
            )
            .optional()
            .context("failed to read auction document")
            .map_err(StoreError::Backend)?;

        match raw {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw)
                    .context("stored auction document is not valid JSON")
                    .map_err(StoreError::Backend)?,
            )),
            None => Ok(None),
        }
    }

    async fn update(&self, auction_id: &str, updates: UpdateSet) -> Result<(), StoreError> {
        // No guards: apply_in_tx only returns None on a failed guard.
        match self.apply_in_tx(auction_id, &[], &updates)? {
            Some(doc) => {
                self.notify(auction_id, &doc);
                Ok(())
            }
            None => unreachable!("unguarded update cannot fail its preconditions"),
        }
    }

    async fn update_guarded(
        &self,
        auction_id: &str,
        guards: &[Guard],
        updates: UpdateSet,
    ) -> Result<bool, StoreError> {
        match self.apply_in_tx(auction_id, guards, &updates)? {
            Some(doc) => {
                self.notify(auction_id, &doc);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, auction_id: &str) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM auctions WHERE id = ?1", params![auction_id])
            .context("failed to delete auction document")
            .map_err(StoreError::Backend)?;
        self.watchers().remove(auction_id);
        Ok(())
    }

    async fn query_by_owner(&self, owner_id: &str) -> Result<Vec<Value>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT doc FROM auctions WHERE owner_id = ?1")
            .context("failed to prepare owner query")
            .map_err(StoreError::Backend)?;
        let rows = stmt
            .query_map(params![owner_id], |row| row.get::<_, String>(0))
            .context("failed to run owner query")
            .map_err(StoreError::Backend)?;

        let mut docs = Vec::new();
        for row in rows {
            let raw = row
                .context("failed to read owner query row")
                .map_err(StoreError::Backend)?;
            docs.push(
                serde_json::from_str(&raw)
                    .context("stored auction document is not valid JSON")
                    .map_err(StoreError::Backend)?,
            );
        }
        Ok(docs)
    }

    async fn query_by_referral_code(&self, code: &str) -> Result<Option<Value>, StoreError> {
        let raw: Option<String> = self
            .conn()
            .query_row(
                "SELECT doc FROM auctions WHERE referral_code = ?1",
                params![code],
                |row| row.get(0),
            )
            .optional()
            .context("failed to run referral query")
            .map_err(StoreError::Backend)?;

        match raw {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw)
                    .context("stored auction document is not valid JSON")
                    .map_err(StoreError::Backend)?,
            )),
            None => Ok(None),
        }
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

    fn sample_doc(owner: &str, code: &str) -> Value {
        json!({
            "ownerId": owner,
            "referralCode": code,
            "status": "draft",
            "currentAuction": { "currentBidAmount": 0 }
        })
    }

    fn open_store() -> SqliteStore {
        SqliteStore::open(":memory:").unwrap()
    }

    #[tokio::test]
    async fn create_read_roundtrip() {
        let store = open_store();
        let id = store.create(sample_doc("owner-1", "AB12CD34")).await.unwrap();
        let doc = store.read(&id).await.unwrap().unwrap();
        assert_eq!(doc["id"], Value::String(id));
        assert_eq!(doc["status"], "draft");
    }

    #[tokio::test]
    async fn multi_path_update_is_transactional() {
        let store = open_store();
        let id = store.create(sample_doc("owner-1", "AB12CD34")).await.unwrap();
        store
            .update(
                &id,
                UpdateSet::new()
                    .set("status", json!("live"))
                    .set("currentAuction/isActive", json!(true)),
            )
            .await
            .unwrap();
        let doc = store.read(&id).await.unwrap().unwrap();
        assert_eq!(doc["status"], "live");
        assert_eq!(doc["currentAuction"]["isActive"], true);
    }

    #[tokio::test]
    async fn guarded_update_leaves_state_intact_on_stale_guard() {
        let store = open_store();
        let id = store.create(sample_doc("owner-1", "AB12CD34")).await.unwrap();

        let applied = store
            .update_guarded(
                &id,
                &[Guard::new("currentAuction/currentBidAmount", json!(7))],
                UpdateSet::new()
                    .set("currentAuction/currentBidAmount", json!(100))
                    .set("status", json!("live")),
            )
            .await
            .unwrap();
        assert!(!applied);

        let doc = store.read(&id).await.unwrap().unwrap();
        assert_eq!(doc["currentAuction"]["currentBidAmount"], 0);
        assert_eq!(doc["status"], "draft");
    }

    #[tokio::test]
    async fn indexed_queries_hit_the_right_rows() {
        let store = open_store();
        store.create(sample_doc("owner-1", "AB12CD34")).await.unwrap();
        store.create(sample_doc("owner-1", "EF56GH78")).await.unwrap();
        store.create(sample_doc("owner-2", "IJ90KL12")).await.unwrap();

        assert_eq!(store.query_by_owner("owner-1").await.unwrap().len(), 2);
        assert_eq!(store.query_by_owner("owner-3").await.unwrap().len(), 0);
        let hit = store.query_by_referral_code("IJ90KL12").await.unwrap().unwrap();
        assert_eq!(hit["ownerId"], "owner-2");
    }

    #[tokio::test]
    async fn duplicate_referral_codes_are_rejected_by_the_index() {
        let store = open_store();
        store.create(sample_doc("owner-1", "AB12CD34")).await.unwrap();
        let err = store.create(sample_doc("owner-2", "AB12CD34")).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn update_on_missing_document_is_not_found() {
        let store = open_store();
        let err = store
            .update("missing", UpdateSet::new().set("status", json!("live")))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn subscriptions_deliver_snapshots() {
        let store = open_store();
        let id = store.create(sample_doc("owner-1", "AB12CD34")).await.unwrap();
        let mut rx = store.subscribe(&id);
        store
            .update(&id, UpdateSet::new().set("status", json!("live")))
            .await
            .unwrap();
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot["status"], "live");
    }
}
