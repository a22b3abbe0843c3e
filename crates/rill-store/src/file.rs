use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rill_codec::{validate_format_tag, ItemCodec};
use rill_types::{
    Clock, IdGenerator, Item, ItemDraft, SessionId, StreamId, SystemClock, UuidGenerator,
};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::{StoreResult, StreamError};
use crate::naming::{
    item_file_name, parse_item_file_name, parse_snapshot_file_name, snapshot_file_name,
    ItemFileName,
};
use crate::session::SessionRecord;
use crate::traits::StreamProvider;

const LOCK_FILE: &str = "lock.json";
const DATA_DIR: &str = "Data";
const SNAPSHOT_DIR: &str = "Snapshots";

/// Poll cadence while waiting for a held lock file.
const ACQUIRE_RETRY: Duration = Duration::from_millis(100);
/// Slack added to the caller's budget before giving up on the lock.
const ACQUIRE_SLACK: Duration = Duration::from_secs(1);

/// File-backed stream provider.
///
/// One directory per stream under the configured root. Each item is one
/// file whose name encodes `(version, idempotency_key, format_tag)`, so
/// version discovery and idempotency lookup are directory scans -- the
/// format stays self-describing and inspectable at the cost of O(N) scans.
/// No in-memory index is kept.
///
/// The stream's `lock.json` is the exclusive-access token shared by every
/// process using the same root.
pub struct FileProvider<T> {
    config: StoreConfig,
    codec: Arc<dyn ItemCodec<T>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl<T> std::fmt::Debug for FileProvider<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileProvider")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Outcome of a single lock-acquisition attempt.
enum Acquire {
    /// We own the stream now.
    Granted(SessionId),
    /// A live lease holds the stream; back off and retry.
    Held,
    /// A stale or corrupt lock was cleared; retry without sleeping.
    Cleared,
}

/// What the lock file currently says.
enum LockState {
    Missing,
    Live(SessionRecord),
    Expired,
    Corrupt,
}

impl<T> FileProvider<T> {
    /// Create a provider over the given root, validating the configuration
    /// and the codec's format tag eagerly.
    pub fn new(config: StoreConfig, codec: Arc<dyn ItemCodec<T>>) -> StoreResult<Self> {
        config.validate()?;
        validate_format_tag(codec.format_tag())?;
        Ok(Self {
            config,
            codec,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidGenerator),
        })
    }

    /// Substitute the wall clock (tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Substitute the session id generator (tests).
    pub fn with_ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    fn stream_dir(&self, stream_id: &StreamId) -> PathBuf {
        self.config.root_path.join(stream_id.as_str())
    }

    fn lock_path(&self, stream_id: &StreamId) -> PathBuf {
        self.stream_dir(stream_id).join(LOCK_FILE)
    }

    fn data_dir(&self, stream_id: &StreamId) -> PathBuf {
        self.stream_dir(stream_id).join(DATA_DIR)
    }

    fn snapshot_dir(&self, stream_id: &StreamId) -> PathBuf {
        self.data_dir(stream_id).join(SNAPSHOT_DIR)
    }

    async fn read_lock(&self, path: &Path) -> StoreResult<LockState> {
        let bytes = match fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LockState::Missing),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_slice::<SessionRecord>(&bytes) {
            Ok(record) if record.is_expired(self.clock.now()) => Ok(LockState::Expired),
            Ok(record) => Ok(LockState::Live(record)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "unreadable lock record");
                Ok(LockState::Corrupt)
            }
        }
    }

    /// One acquisition attempt: grab the lock file exclusively, or clear a
    /// stale record so the next attempt's exclusive create decides the
    /// winner between racing processes.
    async fn try_acquire(&self, stream_id: &StreamId) -> StoreResult<Acquire> {
        let path = self.lock_path(stream_id);

        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                let session_id = SessionId::new(self.ids.next_id())?;
                let record = SessionRecord::leased(
                    session_id.as_str(),
                    self.clock.now(),
                    self.config.lock_timeout,
                );
                let bytes = serde_json::to_vec(&record)
                    .map_err(|e| StreamError::Codec(e.to_string()))?;
                file.write_all(&bytes).await?;
                file.sync_all().await?;
                debug!(stream = %stream_id, session = %session_id, "session opened");
                return Ok(Acquire::Granted(session_id));
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        match self.read_lock(&path).await? {
            LockState::Live(_) => Ok(Acquire::Held),
            LockState::Missing => Ok(Acquire::Cleared),
            LockState::Expired | LockState::Corrupt => {
                // Clear the stale record. Losing the removal race to
                // another process is fine; the create_new above decides.
                match fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
                warn!(stream = %stream_id, "cleared stale session lock");
                Ok(Acquire::Cleared)
            }
        }
    }

    async fn validate_session(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
    ) -> StoreResult<()> {
        let path = self.lock_path(stream_id);
        match self.read_lock(&path).await? {
            LockState::Live(record) if record.authorizes(session_id, self.clock.now()) => Ok(()),
            _ => Err(StreamError::InvalidSession {
                stream_id: stream_id.clone(),
                session_id: session_id.clone(),
            }),
        }
    }

    /// Scan the data directory, parsing item file names. Unrecognized
    /// files are skipped with a warning; a missing directory is an empty
    /// stream.
    async fn scan_items(&self, stream_id: &StreamId) -> StoreResult<Vec<ItemFileName>> {
        let dir = self.data_dir(stream_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                warn!(stream = %stream_id, "skipping non-UTF-8 data file name");
                continue;
            };
            match parse_item_file_name(name) {
                Some(parsed) => names.push(parsed),
                None => {
                    warn!(stream = %stream_id, file = name, "skipping unrecognized data file")
                }
            }
        }
        Ok(names)
    }

    async fn scan_snapshots(&self, stream_id: &StreamId) -> StoreResult<Vec<(u64, String)>> {
        let dir = self.snapshot_dir(stream_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                warn!(stream = %stream_id, "skipping non-UTF-8 snapshot file name");
                continue;
            };
            match parse_snapshot_file_name(name) {
                Some(parsed) => names.push(parsed),
                None => {
                    warn!(stream = %stream_id, file = name, "skipping unrecognized snapshot file")
                }
            }
        }
        Ok(names)
    }

    fn max_version(names: &[ItemFileName]) -> u64 {
        names.iter().map(|n| n.version).max().unwrap_or(0)
    }
}

impl<T> FileProvider<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn read_item(&self, stream_id: &StreamId, name: &ItemFileName) -> StoreResult<Item<T>> {
        let path = self
            .data_dir(stream_id)
            .join(item_file_name(name.version, &name.key, &name.tag));
        let bytes = fs::read(&path).await?;
        Ok(self.codec.decode(&bytes)?)
    }

    /// Write a new item file. `create_new` guards against clobbering a
    /// concurrently-written version file.
    async fn write_item(&self, stream_id: &StreamId, item: &Item<T>) -> StoreResult<()> {
        let dir = self.data_dir(stream_id);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(item_file_name(
            item.version(),
            item.idempotency_key(),
            self.codec.format_tag(),
        ));
        let bytes = self.codec.encode(item)?;
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        debug!(stream = %stream_id, version = item.version(), "item appended");
        Ok(())
    }

    /// Pre-append checks shared by both append paths: duplicate key, then
    /// the current version. A failed check leaves the stream untouched.
    async fn prepare_append(&self, stream_id: &StreamId, key: &str) -> StoreResult<u64> {
        let names = self.scan_items(stream_id).await?;
        if let Some(existing) = names.iter().find(|n| n.key == key) {
            return Err(StreamError::DuplicateIdempotency {
                key: key.to_string(),
                existing_version: existing.version,
            });
        }
        Ok(Self::max_version(&names))
    }
}

#[async_trait]
impl<T> StreamProvider<T> for FileProvider<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn open_session(
        &self,
        stream_id: &StreamId,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> StoreResult<SessionId> {
        let timeout = timeout.unwrap_or(self.config.lock_timeout);
        let budget = timeout + ACQUIRE_SLACK;
        let deadline = Instant::now() + budget;

        fs::create_dir_all(self.stream_dir(stream_id)).await?;

        loop {
            if cancel.is_cancelled() {
                return Err(StreamError::Cancelled);
            }

            match self.try_acquire(stream_id).await? {
                Acquire::Granted(session_id) => return Ok(session_id),
                Acquire::Cleared => {
                    // Retry immediately; the next exclusive create decides
                    // the winner between racing processes.
                    if Instant::now() >= deadline {
                        return Err(StreamError::SessionTimeout {
                            stream_id: stream_id.clone(),
                            waited_ms: budget.as_millis() as u64,
                        });
                    }
                }
                Acquire::Held => {
                    if Instant::now() + ACQUIRE_RETRY > deadline {
                        return Err(StreamError::SessionTimeout {
                            stream_id: stream_id.clone(),
                            waited_ms: budget.as_millis() as u64,
                        });
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(StreamError::Cancelled),
                        _ = tokio::time::sleep(ACQUIRE_RETRY) => {}
                    }
                }
            }
        }
    }

    async fn close_session(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        let path = self.lock_path(stream_id);
        let owned = match self.read_lock(&path).await? {
            LockState::Live(record) => record.session_id == session_id.as_str(),
            LockState::Expired | LockState::Corrupt | LockState::Missing => false,
        };
        if owned {
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            debug!(stream = %stream_id, session = %session_id, "session closed");
        } else {
            warn!(stream = %stream_id, session = %session_id, "closing unknown session");
        }
        Ok(())
    }

    async fn get_version(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        cancel: &CancellationToken,
    ) -> StoreResult<u64> {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        self.validate_session(session_id, stream_id).await?;
        let names = self.scan_items(stream_id).await?;
        Ok(Self::max_version(&names))
    }

    async fn get_by_version(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        version: u64,
        cancel: &CancellationToken,
    ) -> StoreResult<Item<T>> {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        self.validate_session(session_id, stream_id).await?;

        let names = self.scan_items(stream_id).await?;
        let mut matches = names.into_iter().filter(|n| n.version == version);
        let Some(found) = matches.next() else {
            return Err(StreamError::VersionNotFound {
                stream_id: stream_id.clone(),
                version,
            });
        };
        if matches.next().is_some() {
            return Err(StreamError::DuplicateOnDisk {
                stream_id: stream_id.clone(),
                what: format!("version {version}"),
            });
        }
        self.read_item(stream_id, &found).await
    }

    async fn get_by_idempotency(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        key: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<Item<T>> {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        self.validate_session(session_id, stream_id).await?;

        let names = self.scan_items(stream_id).await?;
        let mut matches = names.into_iter().filter(|n| n.key == key);
        let Some(found) = matches.next() else {
            return Err(StreamError::IdempotencyNotFound {
                stream_id: stream_id.clone(),
                key: key.to_string(),
            });
        };
        if matches.next().is_some() {
            return Err(StreamError::DuplicateOnDisk {
                stream_id: stream_id.clone(),
                what: format!("idempotency key {key:?}"),
            });
        }
        self.read_item(stream_id, &found).await
    }

    async fn append(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        item: Item<T>,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        self.validate_session(session_id, stream_id).await?;

        let current = self
            .prepare_append(stream_id, item.idempotency_key())
            .await?;
        if item.version() != current + 1 {
            return Err(StreamError::VersionMismatch {
                expected: current + 1,
                actual: item.version(),
            });
        }
        self.write_item(stream_id, &item).await
    }

    async fn append_with_idempotency(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        draft: ItemDraft<T>,
        cancel: &CancellationToken,
    ) -> StoreResult<u64> {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        self.validate_session(session_id, stream_id).await?;

        let current = self
            .prepare_append(stream_id, draft.idempotency_key())
            .await?;
        let version = current + 1;
        let item = draft.into_item(version)?;
        self.write_item(stream_id, &item).await?;
        Ok(version)
    }

    async fn get_snapshot_versions(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<u64>> {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        self.validate_session(session_id, stream_id).await?;

        let mut versions: Vec<u64> = self
            .scan_snapshots(stream_id)
            .await?
            .into_iter()
            .map(|(version, _)| version)
            .collect();
        versions.sort_unstable();
        versions.dedup();
        Ok(versions)
    }

    async fn get_snapshot(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        version: u64,
        cancel: &CancellationToken,
    ) -> StoreResult<Item<T>> {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        self.validate_session(session_id, stream_id).await?;

        let names = self.scan_snapshots(stream_id).await?;
        let mut matches = names.into_iter().filter(|(v, _)| *v == version);
        let Some((_, tag)) = matches.next() else {
            return Err(StreamError::SnapshotVersionNotFound {
                stream_id: stream_id.clone(),
                version,
            });
        };
        if matches.next().is_some() {
            return Err(StreamError::DuplicateOnDisk {
                stream_id: stream_id.clone(),
                what: format!("snapshot version {version}"),
            });
        }

        let path = self
            .snapshot_dir(stream_id)
            .join(snapshot_file_name(version, &tag));
        let bytes = fs::read(&path).await?;
        Ok(self.codec.decode(&bytes)?)
    }

    async fn set_snapshot(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        item: Item<T>,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        self.validate_session(session_id, stream_id).await?;

        let names = self.scan_items(stream_id).await?;
        let current = Self::max_version(&names);
        if item.version() > current {
            return Err(StreamError::BadArgument(format!(
                "snapshot version {} out of range 1..={current}",
                item.version()
            )));
        }

        let dir = self.snapshot_dir(stream_id);
        fs::create_dir_all(&dir).await?;
        let path = dir.join(snapshot_file_name(item.version(), self.codec.format_tag()));
        let bytes = self.codec.encode(&item)?;
        fs::write(&path, &bytes).await?;
        debug!(stream = %stream_id, version = item.version(), "snapshot stored");
        Ok(())
    }

    async fn remove_snapshot(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        version: u64,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        self.validate_session(session_id, stream_id).await?;

        let names = self.scan_snapshots(stream_id).await?;
        let matches: Vec<_> = names.into_iter().filter(|(v, _)| *v == version).collect();
        if matches.is_empty() {
            warn!(stream = %stream_id, version, "removing absent snapshot");
            return Ok(());
        }
        if matches.len() > 1 {
            warn!(stream = %stream_id, version, count = matches.len(),
                "removing duplicate snapshot files");
        }
        for (v, tag) in matches {
            let path = self.snapshot_dir(stream_id).join(snapshot_file_name(v, &tag));
            match fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(stream = %stream_id, version, "snapshot removed");
        Ok(())
    }
}
