use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rill_types::{
    Clock, IdGenerator, Item, ItemDraft, SessionId, StreamId, SystemClock, UuidGenerator,
};
use time::OffsetDateTime;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{StoreResult, StreamError};
use crate::session::SessionRecord;
use crate::traits::StreamProvider;

/// Poll cadence while waiting for a held stream.
const ACQUIRE_RETRY: Duration = Duration::from_millis(50);

/// In-memory, map-based stream provider.
///
/// Intended for tests and embedding. All state sits behind a single mutex;
/// items are cloned on read and write. The guard is never held across an
/// await point.
pub struct InMemoryProvider<T> {
    lock_timeout: Duration,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    inner: Mutex<ProviderState<T>>,
}

struct ProviderState<T> {
    /// Items per stream, keyed by version. `BTreeMap` keeps enumeration
    /// ordered and makes the max version the last key.
    streams: HashMap<StreamId, BTreeMap<u64, Item<T>>>,
    /// Idempotency key -> version, per stream.
    idempotency: HashMap<StreamId, HashMap<String, u64>>,
    /// Snapshots per stream, keyed by version.
    snapshots: HashMap<StreamId, BTreeMap<u64, Item<T>>>,
    /// Active session per stream.
    sessions: HashMap<StreamId, SessionRecord>,
}

impl<T> Default for ProviderState<T> {
    fn default() -> Self {
        Self {
            streams: HashMap::new(),
            idempotency: HashMap::new(),
            snapshots: HashMap::new(),
            sessions: HashMap::new(),
        }
    }
}

impl<T> InMemoryProvider<T> {
    /// Create a provider with the default 60 s session lease.
    pub fn new() -> Self {
        Self::with_lock_timeout(Duration::from_secs(60))
    }

    /// Create a provider with an explicit session lease length.
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            lock_timeout,
            clock: Arc::new(SystemClock),
            ids: Arc::new(UuidGenerator),
            inner: Mutex::new(ProviderState::default()),
        }
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

    fn lock(&self) -> std::sync::MutexGuard<'_, ProviderState<T>> {
        self.inner.lock().expect("provider mutex poisoned")
    }
}

impl<T> Default for InMemoryProvider<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn check_session<T>(
    state: &ProviderState<T>,
    session_id: &SessionId,
    stream_id: &StreamId,
    now: OffsetDateTime,
) -> StoreResult<()> {
    match state.sessions.get(stream_id) {
        Some(rec) if rec.authorizes(session_id, now) => Ok(()),
        _ => Err(StreamError::InvalidSession {
            stream_id: stream_id.clone(),
            session_id: session_id.clone(),
        }),
    }
}

fn current_version<T>(state: &ProviderState<T>, stream_id: &StreamId) -> u64 {
    state
        .streams
        .get(stream_id)
        .and_then(|items| items.keys().next_back().copied())
        .unwrap_or(0)
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> StoreResult<()> {
    if cancel.is_cancelled() {
        return Err(StreamError::Cancelled);
    }
    Ok(())
}

#[async_trait]
impl<T> StreamProvider<T> for InMemoryProvider<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn open_session(
        &self,
        stream_id: &StreamId,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> StoreResult<SessionId> {
        let timeout = timeout.unwrap_or(self.lock_timeout);
        let deadline = Instant::now() + timeout;

        loop {
            ensure_not_cancelled(cancel)?;

            {
                let mut state = self.lock();
                let now = self.clock.now();
                let held = state
                    .sessions
                    .get(stream_id)
                    .is_some_and(|rec| !rec.is_expired(now));
                if !held {
                    let session_id = SessionId::new(self.ids.next_id())?;
                    let record =
                        SessionRecord::leased(session_id.as_str(), now, self.lock_timeout);
                    state.sessions.insert(stream_id.clone(), record);
                    debug!(stream = %stream_id, session = %session_id, "session opened");
                    return Ok(session_id);
                }
            }

            if Instant::now() + ACQUIRE_RETRY > deadline {
                return Err(StreamError::SessionTimeout {
                    stream_id: stream_id.clone(),
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(StreamError::Cancelled),
                _ = tokio::time::sleep(ACQUIRE_RETRY) => {}
            }
        }
    }

    async fn close_session(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        ensure_not_cancelled(cancel)?;
        let mut state = self.lock();
        match state.sessions.get(stream_id) {
            Some(rec) if rec.session_id == session_id.as_str() => {
                state.sessions.remove(stream_id);
                debug!(stream = %stream_id, session = %session_id, "session closed");
            }
            _ => {
                warn!(stream = %stream_id, session = %session_id, "closing unknown session");
            }
        }
        Ok(())
    }

    async fn get_version(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        cancel: &CancellationToken,
    ) -> StoreResult<u64> {
        ensure_not_cancelled(cancel)?;
        let state = self.lock();
        check_session(&state, session_id, stream_id, self.clock.now())?;
        Ok(current_version(&state, stream_id))
    }

    async fn get_by_version(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        version: u64,
        cancel: &CancellationToken,
    ) -> StoreResult<Item<T>> {
        ensure_not_cancelled(cancel)?;
        let state = self.lock();
        check_session(&state, session_id, stream_id, self.clock.now())?;
        state
            .streams
            .get(stream_id)
            .and_then(|items| items.get(&version))
            .cloned()
            .ok_or_else(|| StreamError::VersionNotFound {
                stream_id: stream_id.clone(),
                version,
            })
    }

    async fn get_by_idempotency(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        key: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<Item<T>> {
        ensure_not_cancelled(cancel)?;
        let state = self.lock();
        check_session(&state, session_id, stream_id, self.clock.now())?;
        let version = state
            .idempotency
            .get(stream_id)
            .and_then(|keys| keys.get(key))
            .copied()
            .ok_or_else(|| StreamError::IdempotencyNotFound {
                stream_id: stream_id.clone(),
                key: key.to_string(),
            })?;
        state
            .streams
            .get(stream_id)
            .and_then(|items| items.get(&version))
            .cloned()
            .ok_or_else(|| StreamError::VersionNotFound {
                stream_id: stream_id.clone(),
                version,
            })
    }

    async fn append(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        item: Item<T>,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        ensure_not_cancelled(cancel)?;
        let mut state = self.lock();
        check_session(&state, session_id, stream_id, self.clock.now())?;

        if let Some(existing) = state
            .idempotency
            .get(stream_id)
            .and_then(|keys| keys.get(item.idempotency_key()))
        {
            return Err(StreamError::DuplicateIdempotency {
                key: item.idempotency_key().to_string(),
                existing_version: *existing,
            });
        }

        let expected = current_version(&state, stream_id) + 1;
        if item.version() != expected {
            return Err(StreamError::VersionMismatch {
                expected,
                actual: item.version(),
            });
        }

        state
            .idempotency
            .entry(stream_id.clone())
            .or_default()
            .insert(item.idempotency_key().to_string(), item.version());
        debug!(stream = %stream_id, version = item.version(), "item appended");
        state
            .streams
            .entry(stream_id.clone())
            .or_default()
            .insert(item.version(), item);
        Ok(())
    }

    async fn append_with_idempotency(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        draft: ItemDraft<T>,
        cancel: &CancellationToken,
    ) -> StoreResult<u64> {
        ensure_not_cancelled(cancel)?;
        let mut state = self.lock();
        check_session(&state, session_id, stream_id, self.clock.now())?;

        if let Some(existing) = state
            .idempotency
            .get(stream_id)
            .and_then(|keys| keys.get(draft.idempotency_key()))
        {
            return Err(StreamError::DuplicateIdempotency {
                key: draft.idempotency_key().to_string(),
                existing_version: *existing,
            });
        }

        let version = current_version(&state, stream_id) + 1;
        let item = draft.into_item(version)?;
        state
            .idempotency
            .entry(stream_id.clone())
            .or_default()
            .insert(item.idempotency_key().to_string(), version);
        state
            .streams
            .entry(stream_id.clone())
            .or_default()
            .insert(version, item);
        debug!(stream = %stream_id, version, "item appended");
        Ok(version)
    }

    async fn get_snapshot_versions(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<u64>> {
        ensure_not_cancelled(cancel)?;
        let state = self.lock();
        check_session(&state, session_id, stream_id, self.clock.now())?;
        Ok(state
            .snapshots
            .get(stream_id)
            .map(|snaps| snaps.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn get_snapshot(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        version: u64,
        cancel: &CancellationToken,
    ) -> StoreResult<Item<T>> {
        ensure_not_cancelled(cancel)?;
        let state = self.lock();
        check_session(&state, session_id, stream_id, self.clock.now())?;
        state
            .snapshots
            .get(stream_id)
            .and_then(|snaps| snaps.get(&version))
            .cloned()
            .ok_or_else(|| StreamError::SnapshotVersionNotFound {
                stream_id: stream_id.clone(),
                version,
            })
    }

    async fn set_snapshot(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        item: Item<T>,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        ensure_not_cancelled(cancel)?;
        let mut state = self.lock();
        check_session(&state, session_id, stream_id, self.clock.now())?;

        let current = current_version(&state, stream_id);
        if item.version() > current {
            return Err(StreamError::BadArgument(format!(
                "snapshot version {} out of range 1..={current}",
                item.version()
            )));
        }

        debug!(stream = %stream_id, version = item.version(), "snapshot stored");
        state
            .snapshots
            .entry(stream_id.clone())
            .or_default()
            .insert(item.version(), item);
        Ok(())
    }

    async fn remove_snapshot(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        version: u64,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        ensure_not_cancelled(cancel)?;
        let mut state = self.lock();
        check_session(&state, session_id, stream_id, self.clock.now())?;
        let removed = state
            .snapshots
            .get_mut(stream_id)
            .and_then(|snaps| snaps.remove(&version));
        if removed.is_none() {
            warn!(stream = %stream_id, version, "removing absent snapshot");
        }
        Ok(())
    }
}
