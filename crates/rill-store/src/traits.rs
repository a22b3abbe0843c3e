use std::time::Duration;

use async_trait::async_trait;
use rill_types::{Item, ItemDraft, SessionId, StreamId};
use tokio_util::sync::CancellationToken;

use crate::error::StoreResult;

/// Low-level per-stream storage contract.
///
/// All implementations must satisfy these invariants:
/// - Versions are dense and 1-based: after N successful appends the stream
///   holds exactly versions `1..=N`.
/// - Idempotency keys are unique within a stream; a duplicate append fails
///   and leaves the stream unchanged.
/// - The session is the single gate: every operation except
///   [`open_session`](Self::open_session) fails with
///   [`InvalidSession`](crate::StreamError::InvalidSession) unless the
///   given session id is the stream's active, non-expired session.
/// - At most one non-expired session exists per stream at any instant
///   across all processes sharing the backend.
/// - Serialization *within* a session is the caller's responsibility; a
///   single handle is single-client by contract.
///
/// Every operation takes a [`CancellationToken`] and surfaces
/// [`Cancelled`](crate::StreamError::Cancelled) when it fires at a
/// suspension point.
#[async_trait]
pub trait StreamProvider<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// Acquire exclusive, time-limited access to a stream.
    ///
    /// Retries while another non-expired session holds the stream, up to
    /// `timeout` (the configured lock timeout when `None`), then fails
    /// with [`SessionTimeout`](crate::StreamError::SessionTimeout).
    /// Expired leases are overwritten in place.
    async fn open_session(
        &self,
        stream_id: &StreamId,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> StoreResult<SessionId>;

    /// Release a session.
    ///
    /// Closing a session that is unknown or no longer active logs the
    /// anomaly and returns `Ok` (idempotent).
    async fn close_session(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        cancel: &CancellationToken,
    ) -> StoreResult<()>;

    /// Current max version of the stream; 0 if the stream has no items.
    async fn get_version(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        cancel: &CancellationToken,
    ) -> StoreResult<u64>;

    /// Read the item at the given version.
    async fn get_by_version(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        version: u64,
        cancel: &CancellationToken,
    ) -> StoreResult<Item<T>>;

    /// Read the item with the given idempotency key.
    async fn get_by_idempotency(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        key: &str,
        cancel: &CancellationToken,
    ) -> StoreResult<Item<T>>;

    /// Append a fully-versioned item.
    ///
    /// Fails with [`DuplicateIdempotency`](crate::StreamError::DuplicateIdempotency)
    /// if the key exists, and with
    /// [`VersionMismatch`](crate::StreamError::VersionMismatch) if
    /// `item.version() != current + 1`. A failed append leaves the stream
    /// unchanged.
    async fn append(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        item: Item<T>,
        cancel: &CancellationToken,
    ) -> StoreResult<()>;

    /// Append a draft, assigning the next version atomically.
    ///
    /// Returns the assigned version. Same duplicate-key failure as
    /// [`append`](Self::append).
    async fn append_with_idempotency(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        draft: ItemDraft<T>,
        cancel: &CancellationToken,
    ) -> StoreResult<u64>;

    /// All snapshot versions of the stream, ascending; empty if none.
    async fn get_snapshot_versions(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        cancel: &CancellationToken,
    ) -> StoreResult<Vec<u64>>;

    /// Read the snapshot at the given version.
    async fn get_snapshot(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        version: u64,
        cancel: &CancellationToken,
    ) -> StoreResult<Item<T>>;

    /// Store a snapshot at `item.version()`, overwriting any existing
    /// snapshot there.
    ///
    /// The version must satisfy `1 <= version <= current`; out-of-range
    /// versions fail with [`BadArgument`](crate::StreamError::BadArgument).
    async fn set_snapshot(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        item: Item<T>,
        cancel: &CancellationToken,
    ) -> StoreResult<()>;

    /// Remove the snapshot at the given version.
    ///
    /// Removing an absent snapshot logs the anomaly and returns `Ok`
    /// (idempotent).
    async fn remove_snapshot(
        &self,
        session_id: &SessionId,
        stream_id: &StreamId,
        version: u64,
        cancel: &CancellationToken,
    ) -> StoreResult<()>;
}
