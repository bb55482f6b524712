//! Rescue request persistence.
//!
//! Every request goes to the remote endpoint (best effort, bounded by a
//! timeout) and then, unconditionally, to the local log. Only a local
//! failure is reported to the caller.

use std::{
    future::Future,
    io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};
use conditions_ingest::PointConditions;
use hazard_core::GeoPoint;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Key under which the log list is stored.
pub const LOG_KEY: &str = "marine_rescue_log";

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("remote rescue endpoint is not configured")]
    RemoteDisabled,
    #[error("remote rescue endpoint timed out")]
    RemoteTimeout,
    #[error("remote rescue endpoint rejected the request: {0}")]
    Remote(String),
    #[error("local log I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("local log is not valid JSON: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("no rescue request with id {0}")]
    NotFound(Uuid),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RescueStatus {
    Pending,
    Acknowledged,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescueRequest {
    pub id: Uuid,
    pub location: GeoPoint,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    pub conditions: PointConditions,
    pub status: RescueStatus,
    pub remote_ack: bool,
}

/// What the escalation hands over for persistence.
#[derive(Clone, Debug)]
pub struct RescueDraft {
    pub location: GeoPoint,
    pub reason: String,
    pub conditions: PointConditions,
}

/// Wire form sent to the remote endpoint; omits local bookkeeping.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRescueEvent<'a> {
    pub id: Uuid,
    pub location: GeoPoint,
    pub reason: &'a str,
    pub timestamp: DateTime<Utc>,
    pub conditions: &'a PointConditions,
}

impl<'a> From<&'a RescueRequest> for RemoteRescueEvent<'a> {
    fn from(request: &'a RescueRequest) -> Self {
        Self {
            id: request.id,
            location: request.location,
            reason: &request.reason,
            timestamp: request.timestamp,
            conditions: &request.conditions,
        }
    }
}

pub trait RemoteEndpoint: Send + Sync {
    fn submit(
        &self,
        event: &RemoteRescueEvent<'_>,
    ) -> impl Future<Output = Result<(), PersistError>> + Send;
}

/// String key-value primitive backing the local log.
pub trait KeyValueStore: Send + Sync {
    fn read(&self, key: &str) -> impl Future<Output = Result<Option<String>, PersistError>> + Send;
    fn write(&self, key: &str, value: String)
    -> impl Future<Output = Result<(), PersistError>> + Send;
}

/// JSON POST to the configured rescue URL.
pub struct HttpRescueEndpoint {
    client: reqwest::Client,
    url: Option<String>,
}

impl HttpRescueEndpoint {
    pub fn new(url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

impl RemoteEndpoint for HttpRescueEndpoint {
    async fn submit(&self, event: &RemoteRescueEvent<'_>) -> Result<(), PersistError> {
        let url = self.url.as_deref().ok_or(PersistError::RemoteDisabled)?;
        let response = self
            .client
            .post(url)
            .json(event)
            .send()
            .await
            .map_err(|err| PersistError::Remote(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PersistError::Remote(format!("status {status}")));
        }
        Ok(())
    }
}

/// Key-value store kept as one JSON object on disk. Writes go through a
/// temporary file and a rename so a crash never leaves a torn file.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_object(&self) -> Result<Map<String, Value>, PersistError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(Map::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Map::new()),
            Err(err) => Err(err.into()),
        }
    }
}

impl KeyValueStore for FileStore {
    async fn read(&self, key: &str) -> Result<Option<String>, PersistError> {
        let object = self.load_object().await?;
        Ok(object.get(key).and_then(Value::as_str).map(str::to_owned))
    }

    async fn write(&self, key: &str, value: String) -> Result<(), PersistError> {
        let mut object = self.load_object().await?;
        object.insert(key.to_string(), Value::String(value));
        let body = serde_json::to_vec_pretty(&object)?;

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, &body).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

/// Append-only rescue log, most recent entry first.
pub struct LocalRescueLog<S> {
    store: S,
    entries: Vec<RescueRequest>,
}

impl<S: KeyValueStore> LocalRescueLog<S> {
    /// Read the existing log. A log that cannot be parsed is an error rather
    /// than being replaced by an empty one.
    pub async fn load(store: S) -> Result<Self, PersistError> {
        let entries = match store.read(LOG_KEY).await? {
            Some(raw) => serde_json::from_str(&raw)?,
            None => Vec::new(),
        };
        Ok(Self { store, entries })
    }

    pub fn entries(&self) -> &[RescueRequest] {
        &self.entries
    }

    /// Prepend `request`. The in-memory list only changes once the store
    /// write succeeded.
    pub async fn append(&mut self, request: RescueRequest) -> Result<(), PersistError> {
        let mut next = Vec::with_capacity(self.entries.len() + 1);
        next.push(request);
        next.extend(self.entries.iter().cloned());
        self.commit(next).await
    }

    /// Mark a request as acknowledged. Returns `false` when it already was.
    pub async fn acknowledge(&mut self, id: Uuid) -> Result<bool, PersistError> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.id == id)
            .ok_or(PersistError::NotFound(id))?;
        if self.entries[index].status == RescueStatus::Acknowledged {
            return Ok(false);
        }
        let mut next = self.entries.clone();
        next[index].status = RescueStatus::Acknowledged;
        self.commit(next).await?;
        Ok(true)
    }

    async fn commit(&mut self, next: Vec<RescueRequest>) -> Result<(), PersistError> {
        let raw = serde_json::to_string(&next)?;
        self.store.write(LOG_KEY, raw).await?;
        self.entries = next;
        Ok(())
    }
}

/// Remote-then-local persistence. Clones share the endpoint and the log.
pub struct DualPathPersister<R, S> {
    remote: Arc<R>,
    log: Arc<Mutex<LocalRescueLog<S>>>,
    remote_timeout: Duration,
}

impl<R, S> Clone for DualPathPersister<R, S> {
    fn clone(&self) -> Self {
        Self {
            remote: self.remote.clone(),
            log: self.log.clone(),
            remote_timeout: self.remote_timeout,
        }
    }
}

impl<R: RemoteEndpoint, S: KeyValueStore> DualPathPersister<R, S> {
    pub fn new(remote: R, log: LocalRescueLog<S>, remote_timeout: Duration) -> Self {
        Self {
            remote: Arc::new(remote),
            log: Arc::new(Mutex::new(log)),
            remote_timeout,
        }
    }

    pub async fn persist(&self, draft: RescueDraft) -> Result<RescueRequest, PersistError> {
        let mut request = RescueRequest {
            id: Uuid::new_v4(),
            location: draft.location,
            reason: draft.reason,
            timestamp: Utc::now(),
            conditions: draft.conditions,
            status: RescueStatus::Pending,
            remote_ack: false,
        };

        let event = RemoteRescueEvent::from(&request);
        let remote_result =
            match tokio::time::timeout(self.remote_timeout, self.remote.submit(&event)).await {
                Ok(result) => result,
                Err(_) => Err(PersistError::RemoteTimeout),
            };
        request.remote_ack = match remote_result {
            Ok(()) => true,
            Err(PersistError::RemoteDisabled) => {
                debug!("Remote rescue endpoint disabled; recording locally only");
                false
            }
            Err(err) => {
                warn!(id = %request.id, "Remote rescue submission failed: {err}");
                false
            }
        };

        if let Err(err) = self.log.lock().await.append(request.clone()).await {
            metrics::counter!("marine_rescue_local_failures_total").increment(1);
            return Err(err);
        }
        let remote_ack = if request.remote_ack { "true" } else { "false" };
        metrics::counter!("marine_rescue_persisted_total", "remote_ack" => remote_ack).increment(1);
        info!(id = %request.id, remote_ack = request.remote_ack, "Rescue request recorded");
        Ok(request)
    }

    pub async fn entries(&self) -> Vec<RescueRequest> {
        self.log.lock().await.entries().to_vec()
    }

    pub async fn acknowledge(&self, id: Uuid) -> Result<bool, PersistError> {
        self.log.lock().await.acknowledge(id).await
    }
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::{
        testing::{MemoryStore, StubRemote},
        *,
    };

    fn draft() -> RescueDraft {
        RescueDraft {
            location: GeoPoint::new(8.0, 125.0),
            reason: "sinking".into(),
            conditions: PointConditions::default(),
        }
    }

    async fn persister(
        remote: StubRemote,
        store: MemoryStore,
    ) -> DualPathPersister<StubRemote, MemoryStore> {
        let log = LocalRescueLog::load(store).await.expect("empty log");
        DualPathPersister::new(remote, log, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn remote_failure_still_appends_exactly_one_entry() {
        let store = MemoryStore::default();
        let remote = StubRemote {
            fail: true,
            ..StubRemote::default()
        };
        let persister = persister(remote.clone(), store.clone()).await;

        let request = persister.persist(draft()).await.expect("local append");

        assert!(!request.remote_ack);
        assert_eq!(remote.submissions.load(Ordering::SeqCst), 1);
        let entries = persister.entries().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, request.id);
        assert!(!entries[0].remote_ack);
        assert_eq!(entries[0].status, RescueStatus::Pending);
    }

    #[tokio::test]
    async fn entries_are_most_recent_first_and_survive_reload() {
        let store = MemoryStore::default();
        let persister = persister(StubRemote::default(), store.clone()).await;
        let first = persister.persist(draft()).await.expect("first");
        let second = persister.persist(draft()).await.expect("second");
        assert!(second.remote_ack);

        let reloaded = LocalRescueLog::load(store).await.expect("reload");
        let ids: Vec<_> = reloaded.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }

    #[tokio::test]
    async fn local_failure_is_surfaced_and_leaves_log_untouched() {
        let store = MemoryStore::default();
        let persister = persister(StubRemote::default(), store.clone()).await;
        store.fail_writes.store(true, Ordering::SeqCst);

        let err = persister.persist(draft()).await.unwrap_err();

        assert!(matches!(err, PersistError::Io(_)));
        assert!(persister.entries().await.is_empty());
        assert!(store.raw(LOG_KEY).is_none());
    }

    #[tokio::test]
    async fn disabled_remote_records_locally() {
        let store = MemoryStore::default();
        let log = LocalRescueLog::load(store).await.expect("log");
        let persister = DualPathPersister::new(
            HttpRescueEndpoint::new(None),
            log,
            Duration::from_millis(200),
        );
        let request = persister.persist(draft()).await.expect("local append");
        assert!(!request.remote_ack);
        assert_eq!(persister.entries().await.len(), 1);
    }

    #[tokio::test]
    async fn acknowledge_is_one_way() {
        let persister = persister(StubRemote::default(), MemoryStore::default()).await;
        let request = persister.persist(draft()).await.expect("append");

        assert!(persister.acknowledge(request.id).await.expect("ack"));
        assert!(!persister.acknowledge(request.id).await.expect("repeat ack"));
        assert_eq!(
            persister.entries().await[0].status,
            RescueStatus::Acknowledged
        );
        assert!(matches!(
            persister.acknowledge(Uuid::new_v4()).await,
            Err(PersistError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn corrupt_log_is_not_silently_replaced() {
        let store = MemoryStore::default();
        store
            .write(LOG_KEY, "not json".into())
            .await
            .expect("seed");
        assert!(matches!(
            LocalRescueLog::load(store).await,
            Err(PersistError::Serde(_))
        ));
    }

    #[tokio::test]
    async fn file_store_round_trips_through_rename() {
        let dir = std::env::temp_dir().join(format!("marine-watch-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&dir).await.expect("temp dir");
        let store = FileStore::new(dir.join("log.json"));

        assert_eq!(store.read(LOG_KEY).await.expect("missing file"), None);
        store.write(LOG_KEY, "[]".into()).await.expect("write");
        store.write("other", "x".into()).await.expect("write other");
        assert_eq!(store.read(LOG_KEY).await.expect("read").as_deref(), Some("[]"));
        assert!(!dir.join("log.json.tmp").exists());

        tokio::fs::remove_dir_all(&dir).await.expect("cleanup");
    }
}
