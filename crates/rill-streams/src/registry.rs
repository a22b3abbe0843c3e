use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rill_store::StreamProvider;
use rill_types::StreamId;

use crate::handle::StreamHandle;

/// Registry vending one shared [`StreamHandle`] per stream id.
///
/// `get_stream` is get-or-insert: the same id always yields the same
/// handle. The registry never arbitrates sessions -- that is the
/// provider's job.
pub struct StreamStore<T> {
    provider: Arc<dyn StreamProvider<T>>,
    handles: Mutex<HashMap<StreamId, Arc<StreamHandle<T>>>>,
}

impl<T> StreamStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(provider: Arc<dyn StreamProvider<T>>) -> Self {
        Self {
            provider,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// The handle for `stream_id`, creating it on first request.
    pub fn get_stream(&self, stream_id: &StreamId) -> Arc<StreamHandle<T>> {
        let mut handles = self.handles.lock().expect("registry mutex poisoned");
        handles
            .entry(stream_id.clone())
            .or_insert_with(|| {
                Arc::new(StreamHandle::new(
                    Arc::clone(&self.provider),
                    stream_id.clone(),
                ))
            })
            .clone()
    }

    /// Ids of all streams a handle has been requested for, sorted.
    pub fn stream_ids(&self) -> Vec<StreamId> {
        let handles = self.handles.lock().expect("registry mutex poisoned");
        let mut ids: Vec<StreamId> = handles.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of handles vended so far.
    pub fn len(&self) -> usize {
        self.handles.lock().expect("registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles
            .lock()
            .expect("registry mutex poisoned")
            .is_empty()
    }
}

impl<T> std::fmt::Debug for StreamStore<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamStore")
            .field("stream_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use rill_store::InMemoryProvider;

    use super::*;

    fn store() -> StreamStore<String> {
        StreamStore::new(Arc::new(InMemoryProvider::new()))
    }

    fn id(name: &str) -> StreamId {
        StreamId::new(name).unwrap()
    }

    #[test]
    fn same_id_yields_the_same_handle() {
        let store = store();
        let a1 = store.get_stream(&id("a"));
        let a2 = store.get_stream(&id("a"));
        assert!(Arc::ptr_eq(&a1, &a2));
    }

    #[test]
    fn different_ids_yield_different_handles() {
        let store = store();
        let a = store.get_stream(&id("a"));
        let b = store.get_stream(&id("b"));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a.stream_id().as_str(), "a");
        assert_eq!(b.stream_id().as_str(), "b");
    }

    #[test]
    fn stream_ids_are_sorted() {
        let store = store();
        for name in ["c", "a", "b"] {
            store.get_stream(&id(name));
        }
        let ids: Vec<String> = store
            .stream_ids()
            .into_iter()
            .map(|s| s.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn len_counts_vended_handles() {
        let store = store();
        assert!(store.is_empty());
        store.get_stream(&id("a"));
        store.get_stream(&id("a"));
        store.get_stream(&id("b"));
        assert_eq!(store.len(), 2);
        assert!(!store.is_empty());
    }

    #[test]
    fn debug_format() {
        let store = store();
        store.get_stream(&id("a"));
        let debug = format!("{store:?}");
        assert!(debug.contains("StreamStore"));
        assert!(debug.contains("stream_count"));
    }
}
