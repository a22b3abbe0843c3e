use std::sync::Arc;
use std::time::Duration;

use rill_store::{StoreResult, StreamError, StreamProvider};
use rill_types::{Item, ItemDraft, SessionId, StreamId, StreamResult};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Session lifecycle of a handle: a session is acquired lazily before the
/// first operation and released by [`StreamHandle::close`].
enum HandleState {
    Fresh,
    Open(SessionId),
    Closed(SessionId),
}

/// Per-stream façade over a [`StreamProvider`].
///
/// A handle is single-client by contract: one task drives it at a time.
/// Operations on a closed handle fail with
/// [`InvalidSession`](StreamError::InvalidSession). Dropping a handle
/// without closing it leaves the session lease to expire on its own,
/// since release requires I/O that `Drop` cannot perform.
pub struct StreamHandle<T> {
    provider: Arc<dyn StreamProvider<T>>,
    stream_id: StreamId,
    open_timeout: Option<Duration>,
    state: Mutex<HandleState>,
}

impl<T> StreamHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(provider: Arc<dyn StreamProvider<T>>, stream_id: StreamId) -> Self {
        Self {
            provider,
            stream_id,
            open_timeout: None,
            state: Mutex::new(HandleState::Fresh),
        }
    }

    /// Override the session-acquisition timeout (the provider's configured
    /// lock timeout applies otherwise).
    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = Some(timeout);
        self
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    /// The current session, opening one on first use.
    async fn session(&self, cancel: &CancellationToken) -> StoreResult<SessionId> {
        let mut state = self.state.lock().await;
        match &*state {
            HandleState::Open(session_id) => Ok(session_id.clone()),
            HandleState::Closed(session_id) => Err(StreamError::InvalidSession {
                stream_id: self.stream_id.clone(),
                session_id: session_id.clone(),
            }),
            HandleState::Fresh => {
                let session_id = self
                    .provider
                    .open_session(&self.stream_id, self.open_timeout, cancel)
                    .await?;
                *state = HandleState::Open(session_id.clone());
                Ok(session_id)
            }
        }
    }

    /// Current version of the stream; 0 when empty.
    pub async fn version(&self, cancel: &CancellationToken) -> StoreResult<u64> {
        let session = self.session(cancel).await?;
        self.provider
            .get_version(&session, &self.stream_id, cancel)
            .await
    }

    /// Append drafts in order; the k-th draft becomes version
    /// `current + k`. Returns the new stream version.
    ///
    /// The batch is not atomic on the file backend: a failure mid-batch
    /// leaves the already-appended prefix persisted. Callers detect
    /// partial progress via [`version`](Self::version).
    pub async fn append(
        &self,
        drafts: Vec<ItemDraft<T>>,
        cancel: &CancellationToken,
    ) -> StoreResult<u64> {
        let session = self.session(cancel).await?;
        let mut version = self
            .provider
            .get_version(&session, &self.stream_id, cancel)
            .await?;
        for draft in drafts {
            version = self
                .provider
                .append_with_idempotency(&session, &self.stream_id, draft, cancel)
                .await?;
        }
        Ok(version)
    }

    /// Append drafts only if the stream is currently at
    /// `expected_version`; fails with
    /// [`VersionMismatch`](StreamError::VersionMismatch) before writing
    /// anything otherwise.
    pub async fn append_expected(
        &self,
        drafts: Vec<ItemDraft<T>>,
        expected_version: u64,
        cancel: &CancellationToken,
    ) -> StoreResult<u64> {
        let session = self.session(cancel).await?;
        let current = self
            .provider
            .get_version(&session, &self.stream_id, cancel)
            .await?;
        if current != expected_version {
            return Err(StreamError::VersionMismatch {
                expected: expected_version,
                actual: current,
            });
        }
        let mut version = current;
        for draft in drafts {
            version = self
                .provider
                .append_with_idempotency(&session, &self.stream_id, draft, cancel)
                .await?;
        }
        Ok(version)
    }

    /// Read the whole stream.
    ///
    /// With `use_snapshot` and a snapshot at some `s <= current`, the
    /// result is `[snapshot_at_max_s, items[s+1..=current]]`; otherwise it
    /// is `items[1..=current]`. Either way `result.version == current`.
    pub async fn read_all(
        &self,
        use_snapshot: bool,
        cancel: &CancellationToken,
    ) -> StoreResult<StreamResult<T>> {
        let session = self.session(cancel).await?;
        let current = self
            .provider
            .get_version(&session, &self.stream_id, cancel)
            .await?;
        if current == 0 {
            return Ok(StreamResult::empty(0));
        }

        let mut items = Vec::new();
        let mut next = 1;
        if use_snapshot {
            let snapshot_version = self.latest_snapshot_version(&session, current, cancel).await?;
            if snapshot_version > 0 {
                let snapshot = self
                    .provider
                    .get_snapshot(&session, &self.stream_id, snapshot_version, cancel)
                    .await?;
                items.push(snapshot);
                next = snapshot_version + 1;
            }
        }
        for version in next..=current {
            let item = self
                .provider
                .get_by_version(&session, &self.stream_id, version, cancel)
                .await?;
            items.push(item);
        }
        Ok(StreamResult::new(items, current))
    }

    /// Read items `first..=last` (1-based, inclusive on both ends).
    ///
    /// Requires `1 <= first <= last <= current`. When `use_snapshot` and a
    /// snapshot exists at some `s` with `first <= s < last`, the snapshot
    /// at the largest such `s` replaces items `first..=s` in the result.
    pub async fn read_slice(
        &self,
        first: u64,
        last: u64,
        use_snapshot: bool,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<Item<T>>> {
        let session = self.session(cancel).await?;
        let current = self
            .provider
            .get_version(&session, &self.stream_id, cancel)
            .await?;
        if first < 1 || first > last || last > current {
            return Err(StreamError::BadArgument(format!(
                "slice {first}..={last} out of bounds for stream at version {current}"
            )));
        }

        let mut items = Vec::new();
        let mut next = first;
        if use_snapshot {
            let snapshot_version = self
                .snapshot_version_in(&session, first, last, cancel)
                .await?;
            if let Some(s) = snapshot_version {
                let snapshot = self
                    .provider
                    .get_snapshot(&session, &self.stream_id, s, cancel)
                    .await?;
                items.push(snapshot);
                next = s + 1;
            }
        }
        for version in next..=last {
            let item = self
                .provider
                .get_by_version(&session, &self.stream_id, version, cancel)
                .await?;
            items.push(item);
        }
        Ok(items)
    }

    /// Store a snapshot of the prefix `1..=version`.
    ///
    /// The payload is the caller's pre-computed digest; `version` must
    /// satisfy `1 <= version <= current`.
    pub async fn snapshot(
        &self,
        version: u64,
        draft: ItemDraft<T>,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        let session = self.session(cancel).await?;
        let item = draft.into_item(version)?;
        self.provider
            .set_snapshot(&session, &self.stream_id, item, cancel)
            .await
    }

    /// Remove the snapshot at `version` (idempotent).
    pub async fn clear_snapshot(
        &self,
        version: u64,
        cancel: &CancellationToken,
    ) -> StoreResult<()> {
        let session = self.session(cancel).await?;
        self.provider
            .remove_snapshot(&session, &self.stream_id, version, cancel)
            .await
    }

    /// Remove every snapshot of the stream.
    pub async fn clear_all_snapshots(&self, cancel: &CancellationToken) -> StoreResult<()> {
        let session = self.session(cancel).await?;
        let versions = self
            .provider
            .get_snapshot_versions(&session, &self.stream_id, cancel)
            .await?;
        for version in versions {
            self.provider
                .remove_snapshot(&session, &self.stream_id, version, cancel)
                .await?;
        }
        Ok(())
    }

    /// Highest snapshot version `<= current`; 0 if none.
    pub async fn snapshot_version(&self, cancel: &CancellationToken) -> StoreResult<u64> {
        let session = self.session(cancel).await?;
        let current = self
            .provider
            .get_version(&session, &self.stream_id, cancel)
            .await?;
        self.latest_snapshot_version(&session, current, cancel).await
    }

    /// Re-snapshot the stream at every `chunk_size` boundary.
    ///
    /// Clears existing snapshots, then for each `k * chunk_size <=
    /// current` reads the prefix, folds it through `fold` to produce the
    /// snapshot draft, and stores it at that boundary.
    pub async fn snapshot_all<F>(
        &self,
        chunk_size: u64,
        mut fold: F,
        cancel: &CancellationToken,
    ) -> StoreResult<()>
    where
        F: FnMut(&[Item<T>]) -> ItemDraft<T> + Send,
    {
        if chunk_size == 0 {
            return Err(StreamError::BadArgument(
                "chunk_size must be at least 1".into(),
            ));
        }
        let session = self.session(cancel).await?;
        let current = self
            .provider
            .get_version(&session, &self.stream_id, cancel)
            .await?;

        let versions = self
            .provider
            .get_snapshot_versions(&session, &self.stream_id, cancel)
            .await?;
        for version in versions {
            self.provider
                .remove_snapshot(&session, &self.stream_id, version, cancel)
                .await?;
        }

        let mut boundary = chunk_size;
        while boundary <= current {
            let prefix = self.read_slice(1, boundary, false, cancel).await?;
            let draft = fold(&prefix);
            let item = draft.into_item(boundary)?;
            self.provider
                .set_snapshot(&session, &self.stream_id, item, cancel)
                .await?;
            boundary += chunk_size;
        }
        Ok(())
    }

    /// Release the session. Further operations fail with
    /// [`InvalidSession`](StreamError::InvalidSession).
    pub async fn close(&self, cancel: &CancellationToken) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        match &*state {
            HandleState::Closed(_) => Ok(()),
            HandleState::Fresh => {
                // Never opened; mark closed with a placeholder id.
                let placeholder = SessionId::new("closed").expect("valid literal session id");
                *state = HandleState::Closed(placeholder);
                Ok(())
            }
            HandleState::Open(session_id) => {
                let session_id = session_id.clone();
                self.provider
                    .close_session(&session_id, &self.stream_id, cancel)
                    .await?;
                debug!(stream = %self.stream_id, "handle closed");
                *state = HandleState::Closed(session_id);
                Ok(())
            }
        }
    }

    async fn latest_snapshot_version(
        &self,
        session: &SessionId,
        current: u64,
        cancel: &CancellationToken,
    ) -> StoreResult<u64> {
        let versions = self
            .provider
            .get_snapshot_versions(session, &self.stream_id, cancel)
            .await?;
        Ok(versions
            .into_iter()
            .filter(|v| *v <= current)
            .next_back()
            .unwrap_or(0))
    }

    /// Largest snapshot version `s` with `first <= s < last`, if any.
    async fn snapshot_version_in(
        &self,
        session: &SessionId,
        first: u64,
        last: u64,
        cancel: &CancellationToken,
    ) -> StoreResult<Option<u64>> {
        let versions = self
            .provider
            .get_snapshot_versions(session, &self.stream_id, cancel)
            .await?;
        Ok(versions
            .into_iter()
            .filter(|s| first <= *s && *s < last)
            .next_back())
    }
}

#[cfg(test)]
mod tests {
    use rill_store::InMemoryProvider;

    use super::*;

    fn handle_on(provider: Arc<InMemoryProvider<String>>, id: &str) -> StreamHandle<String> {
        StreamHandle::new(provider, StreamId::new(id).unwrap())
    }

    fn fresh_handle(id: &str) -> StreamHandle<String> {
        handle_on(Arc::new(InMemoryProvider::new()), id)
    }

    fn draft(key: &str, payload: &str) -> ItemDraft<String> {
        ItemDraft::new(key, payload.to_string()).unwrap()
    }

    fn cancel() -> CancellationToken {
        CancellationToken::new()
    }

    fn payloads(items: &[Item<String>]) -> Vec<&str> {
        items.iter().map(|i| i.payload().as_str()).collect()
    }

    // -----------------------------------------------------------------------
    // Append
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn appending_two_items_bumps_version_to_two() {
        let handle = fresh_handle("orders");
        let version = handle
            .append(
                vec![draft("idem1", "data1"), draft("idem2", "data2")],
                &cancel(),
            )
            .await
            .unwrap();
        assert_eq!(version, 2);
        assert_eq!(handle.version(&cancel()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn empty_append_returns_current_version() {
        let handle = fresh_handle("orders");
        handle.append(vec![draft("k1", "a")], &cancel()).await.unwrap();
        let version = handle.append(vec![], &cancel()).await.unwrap();
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn expected_version_append_succeeds_when_matched() {
        let handle = fresh_handle("orders");
        let version = handle
            .append_expected(vec![draft("idem1", "data1")], 0, &cancel())
            .await
            .unwrap();
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn expected_version_append_fails_when_mismatched() {
        let handle = fresh_handle("orders");
        let err = handle
            .append_expected(vec![draft("idem1", "data1")], 1, &cancel())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StreamError::VersionMismatch {
                expected: 1,
                actual: 0
            }
        ));
        assert_eq!(handle.version(&cancel()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn failed_batch_leaves_valid_prefix() {
        let handle = fresh_handle("orders");
        handle.append(vec![draft("k1", "a")], &cancel()).await.unwrap();

        // Second draft collides with the existing key; the first lands.
        let err = handle
            .append(vec![draft("k2", "b"), draft("k1", "dup")], &cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::DuplicateIdempotency { .. }));
        assert_eq!(handle.version(&cancel()).await.unwrap(), 2);

        let all = handle.read_all(false, &cancel()).await.unwrap();
        assert_eq!(payloads(&all.items), vec!["a", "b"]);
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn read_all_of_empty_stream() {
        let handle = fresh_handle("orders");
        let result = handle.read_all(true, &cancel()).await.unwrap();
        assert!(result.is_empty());
        assert_eq!(result.version, 0);
    }

    #[tokio::test]
    async fn read_all_replays_in_version_order() {
        let handle = fresh_handle("orders");
        handle
            .append(
                vec![draft("k1", "data1"), draft("k2", "data2"), draft("k3", "data3")],
                &cancel(),
            )
            .await
            .unwrap();

        let result = handle.read_all(false, &cancel()).await.unwrap();
        assert_eq!(payloads(&result.items), vec!["data1", "data2", "data3"]);
        assert_eq!(result.version, 3);
        for (index, item) in result.items.iter().enumerate() {
            assert_eq!(item.version(), index as u64 + 1);
        }
    }

    #[tokio::test]
    async fn snapshot_composes_with_tail() {
        let handle = fresh_handle("orders");
        handle
            .append(
                vec![draft("k1", "data1"), draft("k2", "data2"), draft("k3", "data3")],
                &cancel(),
            )
            .await
            .unwrap();
        handle
            .snapshot(2, draft("snap", "snap"), &cancel())
            .await
            .unwrap();

        let result = handle.read_all(true, &cancel()).await.unwrap();
        assert_eq!(payloads(&result.items), vec!["snap", "data3"]);
        assert_eq!(result.version, 3);

        // Without the snapshot flag the full replay is unchanged.
        let plain = handle.read_all(false, &cancel()).await.unwrap();
        assert_eq!(payloads(&plain.items), vec!["data1", "data2", "data3"]);
    }

    #[tokio::test]
    async fn clearing_snapshot_restores_full_replay() {
        let handle = fresh_handle("orders");
        handle
            .append(
                vec![draft("k1", "data1"), draft("k2", "data2"), draft("k3", "data3")],
                &cancel(),
            )
            .await
            .unwrap();
        handle
            .snapshot(2, draft("snap", "snap"), &cancel())
            .await
            .unwrap();
        handle.clear_snapshot(2, &cancel()).await.unwrap();

        let result = handle.read_all(true, &cancel()).await.unwrap();
        assert_eq!(payloads(&result.items), vec!["data1", "data2", "data3"]);
        assert_eq!(result.version, 3);
    }

    #[tokio::test]
    async fn read_all_uses_latest_applicable_snapshot() {
        let handle = fresh_handle("orders");
        let drafts: Vec<_> = (1..=5).map(|k| draft(&format!("k{k}"), &format!("d{k}"))).collect();
        handle.append(drafts, &cancel()).await.unwrap();

        handle.snapshot(2, draft("s2", "snap2"), &cancel()).await.unwrap();
        handle.snapshot(4, draft("s4", "snap4"), &cancel()).await.unwrap();

        let result = handle.read_all(true, &cancel()).await.unwrap();
        assert_eq!(payloads(&result.items), vec!["snap4", "d5"]);
    }

    #[tokio::test]
    async fn read_slice_bounds_and_order() {
        let handle = fresh_handle("orders");
        let drafts: Vec<_> = (1..=5).map(|k| draft(&format!("k{k}"), &format!("d{k}"))).collect();
        handle.append(drafts, &cancel()).await.unwrap();

        let slice = handle.read_slice(2, 4, false, &cancel()).await.unwrap();
        assert_eq!(slice.len(), 3);
        for (index, item) in slice.iter().enumerate() {
            assert_eq!(item.version(), 2 + index as u64);
        }
        assert_eq!(payloads(&slice), vec!["d2", "d3", "d4"]);
    }

    #[tokio::test]
    async fn read_slice_rejects_out_of_bounds() {
        let handle = fresh_handle("orders");
        handle
            .append(vec![draft("k1", "a"), draft("k2", "b")], &cancel())
            .await
            .unwrap();

        assert!(matches!(
            handle.read_slice(0, 1, false, &cancel()).await,
            Err(StreamError::BadArgument(_))
        ));
        assert!(matches!(
            handle.read_slice(2, 1, false, &cancel()).await,
            Err(StreamError::BadArgument(_))
        ));
        assert!(matches!(
            handle.read_slice(1, 3, false, &cancel()).await,
            Err(StreamError::BadArgument(_))
        ));
    }

    #[tokio::test]
    async fn read_slice_substitutes_snapshot_for_prefix() {
        let handle = fresh_handle("orders");
        let drafts: Vec<_> = (1..=5).map(|k| draft(&format!("k{k}"), &format!("d{k}"))).collect();
        handle.append(drafts, &cancel()).await.unwrap();
        handle.snapshot(3, draft("s3", "snap3"), &cancel()).await.unwrap();

        // Snapshot at 3 sits inside [2, 5): replaces items 2..=3.
        let slice = handle.read_slice(2, 5, true, &cancel()).await.unwrap();
        assert_eq!(payloads(&slice), vec!["snap3", "d4", "d5"]);

        // Snapshot version == last is not used (it would leave no tail).
        let slice = handle.read_slice(1, 3, true, &cancel()).await.unwrap();
        assert_eq!(payloads(&slice), vec!["d1", "d2", "d3"]);
    }

    // -----------------------------------------------------------------------
    // Snapshot management
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn snapshot_version_reports_latest() {
        let handle = fresh_handle("orders");
        assert_eq!(handle.snapshot_version(&cancel()).await.unwrap(), 0);

        let drafts: Vec<_> = (1..=4).map(|k| draft(&format!("k{k}"), "d")).collect();
        handle.append(drafts, &cancel()).await.unwrap();
        handle.snapshot(1, draft("s1", "snap1"), &cancel()).await.unwrap();
        handle.snapshot(3, draft("s3", "snap3"), &cancel()).await.unwrap();

        assert_eq!(handle.snapshot_version(&cancel()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn clear_all_snapshots_removes_every_one() {
        let handle = fresh_handle("orders");
        let drafts: Vec<_> = (1..=4).map(|k| draft(&format!("k{k}"), "d")).collect();
        handle.append(drafts, &cancel()).await.unwrap();
        handle.snapshot(2, draft("s2", "snap2"), &cancel()).await.unwrap();
        handle.snapshot(4, draft("s4", "snap4"), &cancel()).await.unwrap();

        handle.clear_all_snapshots(&cancel()).await.unwrap();
        assert_eq!(handle.snapshot_version(&cancel()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn snapshot_all_folds_each_boundary() {
        let handle = fresh_handle("orders");
        let drafts: Vec<_> = (1..=7).map(|k| draft(&format!("k{k}"), &format!("d{k}"))).collect();
        handle.append(drafts, &cancel()).await.unwrap();
        // A stale snapshot that must be cleared first.
        handle.snapshot(5, draft("old", "stale"), &cancel()).await.unwrap();

        handle
            .snapshot_all(
                3,
                |prefix| {
                    let digest = prefix
                        .iter()
                        .map(|i| i.payload().as_str())
                        .collect::<Vec<_>>()
                        .join("+");
                    ItemDraft::new(format!("fold-{}", prefix.len()), digest).unwrap()
                },
                &cancel(),
            )
            .await
            .unwrap();

        // Boundaries at 3 and 6; 9 > current. The stale snapshot is gone.
        assert_eq!(handle.snapshot_version(&cancel()).await.unwrap(), 6);
        let result = handle.read_all(true, &cancel()).await.unwrap();
        assert_eq!(payloads(&result.items), vec!["d1+d2+d3+d4+d5+d6", "d7"]);

        let slice = handle.read_slice(1, 4, true, &cancel()).await.unwrap();
        assert_eq!(payloads(&slice), vec!["d1+d2+d3", "d4"]);
    }

    #[tokio::test]
    async fn snapshot_all_rejects_zero_chunk() {
        let handle = fresh_handle("orders");
        let err = handle
            .snapshot_all(0, |_| ItemDraft::new("s", "x".to_string()).unwrap(), &cancel())
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::BadArgument(_)));
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn closed_handle_rejects_operations() {
        let handle = fresh_handle("orders");
        handle.append(vec![draft("k1", "a")], &cancel()).await.unwrap();
        handle.close(&cancel()).await.unwrap();

        assert!(matches!(
            handle.version(&cancel()).await,
            Err(StreamError::InvalidSession { .. })
        ));
        assert!(matches!(
            handle.append(vec![draft("k2", "b")], &cancel()).await,
            Err(StreamError::InvalidSession { .. })
        ));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let handle = fresh_handle("orders");
        handle.close(&cancel()).await.unwrap();
        handle.close(&cancel()).await.unwrap();
        assert!(matches!(
            handle.version(&cancel()).await,
            Err(StreamError::InvalidSession { .. })
        ));
    }

    #[tokio::test]
    async fn close_releases_the_stream_for_others() {
        let provider = Arc::new(InMemoryProvider::new());
        let first = handle_on(provider.clone(), "orders");
        first.append(vec![draft("k1", "a")], &cancel()).await.unwrap();

        let second =
            handle_on(provider.clone(), "orders").with_open_timeout(Duration::from_millis(120));
        let err = second.version(&cancel()).await.unwrap_err();
        assert!(matches!(err, StreamError::SessionTimeout { .. }));

        first.close(&cancel()).await.unwrap();
        // The failed attempt left the second handle fresh, so this retries.
        assert_eq!(second.version(&cancel()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancelled_token_aborts_handle_operations() {
        let handle = fresh_handle("orders");
        let cancelled = CancellationToken::new();
        cancelled.cancel();

        assert!(matches!(
            handle.version(&cancelled).await,
            Err(StreamError::Cancelled)
        ));
    }

    /// Delegating provider that trips the shared token once an append
    /// lands, so cancellation arrives between the items of a batch.
    struct CancelAfterAppend {
        inner: InMemoryProvider<String>,
        token: CancellationToken,
    }

    #[async_trait::async_trait]
    impl StreamProvider<String> for CancelAfterAppend {
        async fn open_session(
            &self,
            stream_id: &StreamId,
            timeout: Option<Duration>,
            cancel: &CancellationToken,
        ) -> StoreResult<SessionId> {
            self.inner.open_session(stream_id, timeout, cancel).await
        }

        async fn close_session(
            &self,
            session_id: &SessionId,
            stream_id: &StreamId,
            cancel: &CancellationToken,
        ) -> StoreResult<()> {
            self.inner.close_session(session_id, stream_id, cancel).await
        }

        async fn get_version(
            &self,
            session_id: &SessionId,
            stream_id: &StreamId,
            cancel: &CancellationToken,
        ) -> StoreResult<u64> {
            self.inner.get_version(session_id, stream_id, cancel).await
        }

        async fn get_by_version(
            &self,
            session_id: &SessionId,
            stream_id: &StreamId,
            version: u64,
            cancel: &CancellationToken,
        ) -> StoreResult<Item<String>> {
            self.inner
                .get_by_version(session_id, stream_id, version, cancel)
                .await
        }

        async fn get_by_idempotency(
            &self,
            session_id: &SessionId,
            stream_id: &StreamId,
            key: &str,
            cancel: &CancellationToken,
        ) -> StoreResult<Item<String>> {
            self.inner
                .get_by_idempotency(session_id, stream_id, key, cancel)
                .await
        }

        async fn append(
            &self,
            session_id: &SessionId,
            stream_id: &StreamId,
            item: Item<String>,
            cancel: &CancellationToken,
        ) -> StoreResult<()> {
            let result = self.inner.append(session_id, stream_id, item, cancel).await;
            self.token.cancel();
            result
        }

        async fn append_with_idempotency(
            &self,
            session_id: &SessionId,
            stream_id: &StreamId,
            draft: ItemDraft<String>,
            cancel: &CancellationToken,
        ) -> StoreResult<u64> {
            let version = self
                .inner
                .append_with_idempotency(session_id, stream_id, draft, cancel)
                .await?;
            self.token.cancel();
            Ok(version)
        }

        async fn get_snapshot_versions(
            &self,
            session_id: &SessionId,
            stream_id: &StreamId,
            cancel: &CancellationToken,
        ) -> StoreResult<Vec<u64>> {
            self.inner
                .get_snapshot_versions(session_id, stream_id, cancel)
                .await
        }

        async fn get_snapshot(
            &self,
            session_id: &SessionId,
            stream_id: &StreamId,
            version: u64,
            cancel: &CancellationToken,
        ) -> StoreResult<Item<String>> {
            self.inner
                .get_snapshot(session_id, stream_id, version, cancel)
                .await
        }

        async fn set_snapshot(
            &self,
            session_id: &SessionId,
            stream_id: &StreamId,
            item: Item<String>,
            cancel: &CancellationToken,
        ) -> StoreResult<()> {
            self.inner
                .set_snapshot(session_id, stream_id, item, cancel)
                .await
        }

        async fn remove_snapshot(
            &self,
            session_id: &SessionId,
            stream_id: &StreamId,
            version: u64,
            cancel: &CancellationToken,
        ) -> StoreResult<()> {
            self.inner
                .remove_snapshot(session_id, stream_id, version, cancel)
                .await
        }
    }

    #[tokio::test]
    async fn cancellation_mid_batch_leaves_prefix_persisted() {
        let token = CancellationToken::new();
        let provider = Arc::new(CancelAfterAppend {
            inner: InMemoryProvider::new(),
            token: token.clone(),
        });
        let handle = StreamHandle::new(provider, StreamId::new("orders").unwrap());

        // The token trips once the first draft lands; the second draft
        // observes it and aborts the batch.
        let err = handle
            .append(
                vec![draft("k1", "a"), draft("k2", "b"), draft("k3", "c")],
                &token,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StreamError::Cancelled));

        // No rollback: the persisted prefix is visible afterwards.
        assert_eq!(handle.version(&cancel()).await.unwrap(), 1);
        let all = handle.read_all(false, &cancel()).await.unwrap();
        assert_eq!(payloads(&all.items), vec!["a"]);
    }

    // -----------------------------------------------------------------------
    // File backend end-to-end
    // -----------------------------------------------------------------------

    mod file_backend {
        use rill_codec::JsonItemCodec;
        use rill_store::{FileProvider, StoreConfig};

        use super::*;

        fn file_handle(root: &std::path::Path, id: &str) -> StreamHandle<String> {
            let provider = FileProvider::new(
                StoreConfig::rooted_at(root),
                Arc::new(JsonItemCodec::<String>::new()),
            )
            .unwrap();
            StreamHandle::new(Arc::new(provider), StreamId::new(id).unwrap())
        }

        #[tokio::test]
        async fn snapshot_composes_with_tail_on_disk() {
            let dir = tempfile::tempdir().unwrap();
            let handle = file_handle(dir.path(), "orders");

            handle
                .append(
                    vec![draft("k1", "data1"), draft("k2", "data2"), draft("k3", "data3")],
                    &cancel(),
                )
                .await
                .unwrap();
            handle
                .snapshot(2, draft("snap", "snap"), &cancel())
                .await
                .unwrap();

            let result = handle.read_all(true, &cancel()).await.unwrap();
            assert_eq!(payloads(&result.items), vec!["snap", "data3"]);
            assert_eq!(result.version, 3);

            handle.clear_snapshot(2, &cancel()).await.unwrap();
            let result = handle.read_all(true, &cancel()).await.unwrap();
            assert_eq!(payloads(&result.items), vec!["data1", "data2", "data3"]);
        }

        #[tokio::test]
        async fn failed_batch_leaves_readable_prefix_on_disk() {
            let dir = tempfile::tempdir().unwrap();
            let handle = file_handle(dir.path(), "orders");

            handle.append(vec![draft("k1", "a")], &cancel()).await.unwrap();
            let err = handle
                .append(vec![draft("k2", "b"), draft("k1", "dup")], &cancel())
                .await
                .unwrap_err();
            assert!(matches!(err, StreamError::DuplicateIdempotency { .. }));

            // The first item of the batch is persisted; replay stays valid.
            assert_eq!(handle.version(&cancel()).await.unwrap(), 2);
            let all = handle.read_all(false, &cancel()).await.unwrap();
            assert_eq!(payloads(&all.items), vec!["a", "b"]);
        }

        #[tokio::test]
        async fn handle_session_survives_across_operations() {
            let dir = tempfile::tempdir().unwrap();
            let handle = file_handle(dir.path(), "orders");

            handle.append(vec![draft("k1", "a")], &cancel()).await.unwrap();
            assert_eq!(handle.version(&cancel()).await.unwrap(), 1);
            handle.close(&cancel()).await.unwrap();

            // The lease is released on disk; a fresh handle can take over.
            let next = file_handle(dir.path(), "orders");
            assert_eq!(next.version(&cancel()).await.unwrap(), 1);
        }
    }
}
