//! Remote datastore contract and its implementations.
//!
//! The remote speaks the remote naming convention; callers translate with
//! the [`SchemaRegistry`](crate::mapper::SchemaRegistry) before and after.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::types::{ChangeSeq, RemoteChange, RemoteError};

type Row = Map<String, Value>;

/// Per-collection create/update/delete/list-since endpoints.
pub trait RemoteStore: Send + Sync {
    /// Insert a new row. `AlreadyExists` if the id is taken.
    fn create(&self, collection: &str, row: &Row)
    -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Replace an existing row. `NotFound` if the id is unknown.
    fn update(
        &self,
        collection: &str,
        id: &str,
        row: &Row,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Delete a row. `NotFound` if the id is unknown.
    fn delete(&self, collection: &str, id: &str)
    -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Changes the remote stored after feed position `after`, in feed
    /// order; the whole collection when `None`.
    fn list_since(
        &self,
        collection: &str,
        after: Option<ChangeSeq>,
    ) -> impl Future<Output = Result<Vec<RemoteChange>, RemoteError>> + Send;
}

impl<R: RemoteStore> RemoteStore for Arc<R> {
    fn create(&self, collection: &str, row: &Row)
    -> impl Future<Output = Result<(), RemoteError>> + Send {
        (**self).create(collection, row)
    }

    fn update(
        &self,
        collection: &str,
        id: &str,
        row: &Row,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send {
        (**self).update(collection, id, row)
    }

    fn delete(&self, collection: &str, id: &str)
    -> impl Future<Output = Result<(), RemoteError>> + Send {
        (**self).delete(collection, id)
    }

    fn list_since(
        &self,
        collection: &str,
        after: Option<ChangeSeq>,
    ) -> impl Future<Output = Result<Vec<RemoteChange>, RemoteError>> + Send {
        (**self).list_since(collection, after)
    }
}

// ── HTTP ─────────────────────────────────────────────────────

/// JSON-over-HTTP remote.
///
/// | call         | request                               |
/// |--------------|---------------------------------------|
/// | `create`     | `POST {base}/{collection}`            |
/// | `update`     | `PUT {base}/{collection}/{id}`        |
/// | `delete`     | `DELETE {base}/{collection}/{id}`     |
/// | `list_since` | `GET {base}/{collection}?after=SEQ`    |
///
/// `list_since` answers
/// `{"records": [{"seq", "row"}], "deleted": [{"seq", "id", "deleted_at"}]}`
/// where `seq` is the server's change-feed position for that write.
/// 409 maps to `AlreadyExists`, 404 to `NotFound`.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    records: Vec<ChangedRow>,
    #[serde(default)]
    deleted: Vec<DeletedRow>,
}

#[derive(Debug, Deserialize)]
struct ChangedRow {
    seq: ChangeSeq,
    row: Row,
}

#[derive(Debug, Deserialize)]
struct DeletedRow {
    seq: ChangeSeq,
    id: String,
    #[serde(default)]
    deleted_at: Option<DateTime<Utc>>,
}

impl HttpRemote {
    /// Create a client for `base_url` with a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns `Unreachable` if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| RemoteError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/{collection}", self.base_url)
    }

    fn row_url(&self, collection: &str, id: &str) -> String {
        format!("{}/{collection}/{id}", self.base_url)
    }

    /// Whether the remote answers its health endpoint.
    pub async fn check_health(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(2))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

fn send_error(err: &reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout(err.to_string())
    } else if err.is_connect() || err.is_request() {
        RemoteError::Unreachable(err.to_string())
    } else {
        RemoteError::Decode(err.to_string())
    }
}

async fn check(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match status.as_u16() {
        404 => Err(RemoteError::NotFound),
        409 => Err(RemoteError::AlreadyExists),
        code => {
            let mut message = response.text().await.unwrap_or_default();
            message.truncate(200);
            Err(RemoteError::Rejected {
                status: code,
                message,
            })
        }
    }
}

impl RemoteStore for HttpRemote {
    async fn create(&self, collection: &str, row: &Row) -> Result<(), RemoteError> {
        let response = self
            .client
            .post(self.collection_url(collection))
            .json(row)
            .send()
            .await
            .map_err(|e| send_error(&e))?;
        check(response).await.map(|_| ())
    }

    async fn update(&self, collection: &str, id: &str, row: &Row) -> Result<(), RemoteError> {
        let response = self
            .client
            .put(self.row_url(collection, id))
            .json(row)
            .send()
            .await
            .map_err(|e| send_error(&e))?;
        check(response).await.map(|_| ())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        let response = self
            .client
            .delete(self.row_url(collection, id))
            .send()
            .await
            .map_err(|e| send_error(&e))?;
        check(response).await.map(|_| ())
    }

    async fn list_since(
        &self,
        collection: &str,
        after: Option<ChangeSeq>,
    ) -> Result<Vec<RemoteChange>, RemoteError> {
        let mut request = self.client.get(self.collection_url(collection));
        if let Some(after) = after {
            request = request.query(&[("after", after)]);
        }
        let response = check(request.send().await.map_err(|e| send_error(&e))?).await?;
        let body: ListResponse = response
            .json()
            .await
            .map_err(|e| RemoteError::Decode(e.to_string()))?;

        debug!(
            collection,
            records = body.records.len(),
            deleted = body.deleted.len(),
            "Listed remote changes"
        );

        let mut changes: Vec<RemoteChange> = body
            .records
            .into_iter()
            .map(|changed| RemoteChange::Upsert {
                seq: changed.seq,
                row: changed.row,
            })
            .collect();
        changes.extend(body.deleted.into_iter().map(|d| RemoteChange::Deleted {
            seq: d.seq,
            id: d.id,
            deleted_at: d.deleted_at,
        }));
        changes.sort_by_key(RemoteChange::seq);
        Ok(changes)
    }
}

// ── In-memory ────────────────────────────────────────────────

/// A call observed by [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub method: &'static str,
    pub collection: String,
    pub id: Option<String>,
}

/// A stored row and the feed position of its last write.
#[derive(Debug, Clone)]
struct StoredRow {
    seq: ChangeSeq,
    row: Row,
}

#[derive(Debug, Clone, Copy)]
struct Tombstone {
    seq: ChangeSeq,
    deleted_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    rows: BTreeMap<String, BTreeMap<String, StoredRow>>,
    deleted: BTreeMap<String, BTreeMap<String, Tombstone>>,
    last_seq: ChangeSeq,
    failures: VecDeque<RemoteError>,
    offline: bool,
    latency: Option<Duration>,
    calls: Vec<RemoteCall>,
}

/// In-process remote datastore.
///
/// Useful for demos and tests: failures can be injected, the remote can be
/// taken offline, and other clients' writes simulated with
/// [`insert_remote`](Self::insert_remote) / [`remove_remote`](Self::remove_remote).
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
}

impl MemoryState {
    fn next_seq(&mut self) -> ChangeSeq {
        self.last_seq += 1;
        self.last_seq
    }

    fn store_row(&mut self, collection: &str, id: String, row: Row) {
        let seq = self.next_seq();
        if let Some(deleted) = self.deleted.get_mut(collection) {
            deleted.remove(&id);
        }
        self.rows
            .entry(collection.to_string())
            .or_default()
            .insert(id, StoredRow { seq, row });
    }

    fn tombstone(&mut self, collection: &str, id: &str, deleted_at: DateTime<Utc>) {
        let seq = self.next_seq();
        self.deleted
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), Tombstone { seq, deleted_at });
    }
}

impl MemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `n` calls with `error`.
    pub fn fail_next(&self, n: usize, error: RemoteError) {
        let mut state = self.lock();
        for _ in 0..n {
            state.failures.push_back(error.clone());
        }
    }

    /// Make every call fail with `Unreachable` until set back.
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = Some(latency);
    }

    /// Write a row as another client would.
    pub fn insert_remote(&self, collection: &str, row: Row) {
        let Some(id) = row.get("id").and_then(Value::as_str).map(str::to_string) else {
            return;
        };
        self.lock().store_row(collection, id, row);
    }

    /// Delete a row as another client would.
    pub fn remove_remote(&self, collection: &str, id: &str, deleted_at: DateTime<Utc>) {
        let mut state = self.lock();
        if let Some(rows) = state.rows.get_mut(collection) {
            rows.remove(id);
        }
        state.tombstone(collection, id, deleted_at);
    }

    #[must_use]
    pub fn row(&self, collection: &str, id: &str) -> Option<Row> {
        self.lock()
            .rows
            .get(collection)?
            .get(id)
            .map(|stored| stored.row.clone())
    }

    #[must_use]
    pub fn rows(&self, collection: &str) -> Vec<Row> {
        self.lock()
            .rows
            .get(collection)
            .map(|rows| rows.values().map(|stored| stored.row.clone()).collect())
            .unwrap_or_default()
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    /// Write calls (create/update/delete) only.
    #[must_use]
    pub fn writes(&self) -> Vec<RemoteCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.method != "list")
            .collect()
    }

    /// Record the call, wait out the latency, and consume any injected failure.
    async fn enter(&self, method: &'static str, collection: &str, id: Option<&str>) -> Result<(), RemoteError> {
        let latency = {
            let mut state = self.lock();
            state.calls.push(RemoteCall {
                method,
                collection: collection.to_string(),
                id: id.map(str::to_string),
            });
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.lock();
        if state.offline {
            return Err(RemoteError::Unreachable("remote is offline".to_string()));
        }
        match state.failures.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl RemoteStore for MemoryRemote {
    async fn create(&self, collection: &str, row: &Row) -> Result<(), RemoteError> {
        let id = row
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::Rejected {
                status: 400,
                message: "missing id".to_string(),
            })?
            .to_string();
        self.enter("create", collection, Some(&id)).await?;

        let mut state = self.lock();
        if state
            .rows
            .get(collection)
            .is_some_and(|rows| rows.contains_key(&id))
        {
            return Err(RemoteError::AlreadyExists);
        }
        state.store_row(collection, id, row.clone());
        Ok(())
    }

    async fn update(&self, collection: &str, id: &str, row: &Row) -> Result<(), RemoteError> {
        self.enter("update", collection, Some(id)).await?;

        let mut state = self.lock();
        if !state
            .rows
            .get(collection)
            .is_some_and(|rows| rows.contains_key(id))
        {
            return Err(RemoteError::NotFound);
        }
        state.store_row(collection, id.to_string(), row.clone());
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        self.enter("delete", collection, Some(id)).await?;

        let mut state = self.lock();
        state
            .rows
            .get_mut(collection)
            .and_then(|rows| rows.remove(id))
            .ok_or(RemoteError::NotFound)?;
        state.tombstone(collection, id, Utc::now());
        Ok(())
    }

    async fn list_since(
        &self,
        collection: &str,
        after: Option<ChangeSeq>,
    ) -> Result<Vec<RemoteChange>, RemoteError> {
        self.enter("list", collection, None).await?;

        let state = self.lock();
        let after = after.unwrap_or(0);

        let mut changes: Vec<RemoteChange> = state
            .rows
            .get(collection)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|stored| stored.seq > after)
            .map(|stored| RemoteChange::Upsert {
                seq: stored.seq,
                row: stored.row.clone(),
            })
            .collect();
        changes.extend(
            state
                .deleted
                .get(collection)
                .into_iter()
                .flat_map(BTreeMap::iter)
                .filter(|(_, tombstone)| tombstone.seq > after)
                .map(|(id, tombstone)| RemoteChange::Deleted {
                    seq: tombstone.seq,
                    id: id.clone(),
                    deleted_at: Some(tombstone.deleted_at),
                }),
        );
        changes.sort_by_key(RemoteChange::seq);
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(id: &str, at: &str) -> Row {
        json!({"id": id, "updated_at": at}).as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_memory_remote_crud_semantics() {
        let remote = MemoryRemote::new();
        remote.create("tours", &row("a", "2024-01-01T00:00:00.000Z")).await.unwrap();
        assert_eq!(
            remote.create("tours", &row("a", "2024-01-01T00:00:00.000Z")).await,
            Err(RemoteError::AlreadyExists)
        );
        assert_eq!(
            remote.update("tours", "b", &row("b", "2024-01-01T00:00:00.000Z")).await,
            Err(RemoteError::NotFound)
        );
        remote.delete("tours", "a").await.unwrap();
        assert_eq!(remote.delete("tours", "a").await, Err(RemoteError::NotFound));
        assert!(remote.rows("tours").is_empty());
    }

    #[tokio::test]
    async fn test_list_since_pages_on_write_order_not_updated_at() {
        let remote = MemoryRemote::new();
        remote.insert_remote("tours", row("new", "2024-03-01T00:00:00.000Z"));

        let all = remote.list_since("tours", None).await.unwrap();
        assert_eq!(all.len(), 1);
        let cursor = all[0].seq();

        // Written later, but stamped earlier by a client that was offline.
        remote.insert_remote("tours", row("late", "2024-01-01T00:00:00.000Z"));
        remote.remove_remote("tours", "new", Utc::now());

        let newer = remote.list_since("tours", Some(cursor)).await.unwrap();
        assert_eq!(newer.len(), 2);
        assert_eq!(newer[0].id(), Some("late"));
        assert!(matches!(newer[1], RemoteChange::Deleted { .. }));
        assert!(newer[0].seq() < newer[1].seq());

        let last = newer[1].seq();
        assert!(remote.list_since("tours", Some(last)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures_and_offline() {
        let remote = MemoryRemote::new();
        remote.fail_next(1, RemoteError::Timeout("slow".into()));
        assert!(matches!(
            remote.list_since("tours", None).await,
            Err(RemoteError::Timeout(_))
        ));
        assert!(remote.list_since("tours", None).await.is_ok());

        remote.set_offline(true);
        assert!(matches!(
            remote.list_since("tours", None).await,
            Err(RemoteError::Unreachable(_))
        ));
        assert_eq!(remote.calls().len(), 3);
    }

    #[test]
    fn test_http_remote_urls() {
        let remote = HttpRemote::new("https://api.example.com/v1/", Duration::from_secs(5)).unwrap();
        assert_eq!(remote.base_url(), "https://api.example.com/v1");
        assert_eq!(remote.collection_url("tours"), "https://api.example.com/v1/tours");
        assert_eq!(remote.row_url("tours", "t1"), "https://api.example.com/v1/tours/t1");
    }
}
