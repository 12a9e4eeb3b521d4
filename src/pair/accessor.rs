//! PairAccessor: the entry point for pair streams
//!
//! ```text
//! get_pair(ids)
//!   ↓ (first poll)
//! cache lookup by published id ── hit ──▶ attach
//!   ↓ miss
//! checkout_pair(ids) → draft + published handles
//!   ↓
//! to_local_document × 2 → merge_pair → shared entry
//! ```

use std::sync::Arc;

use futures_util::future;
use futures_util::stream::{self, BoxStream, StreamExt};

use super::cache::SharedStreamCache;
use super::local::to_local_document;
use super::merge::{merge_pair, LocalPair};
use crate::config::PairCacheConfig;
use crate::document::{DocumentStore, IdPair};
use crate::error::PairError;

/// Hands out shared [`LocalPair`] streams, one upstream per published id.
#[derive(Clone)]
pub struct PairAccessor {
    store: Arc<dyn DocumentStore>,
    cache: Arc<SharedStreamCache<LocalPair>>,
}

impl PairAccessor {
    /// Fails with [`PairError::Config`] if `config` does not validate.
    pub fn new(
        store: Arc<dyn DocumentStore>,
        config: PairCacheConfig,
    ) -> Result<Self, PairError> {
        let cache = SharedStreamCache::new(config)?;
        Ok(Self::with_cache(store, Arc::new(cache)))
    }

    /// Build on an existing cache, e.g. one shared with another accessor.
    pub fn with_cache(
        store: Arc<dyn DocumentStore>,
        cache: Arc<SharedStreamCache<LocalPair>>,
    ) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &Arc<SharedStreamCache<LocalPair>> {
        &self.cache
    }

    /// The pair stream for `ids`.
    ///
    /// Lazy: the store is not touched until the stream is first polled, and
    /// then only if no stream for the same published id is running.
    pub fn get_pair(&self, ids: &IdPair) -> BoxStream<'static, Result<LocalPair, PairError>> {
        let store = Arc::clone(&self.store);
        let cache = Arc::clone(&self.cache);
        let ids = ids.clone();

        stream::once(future::lazy(move |_| {
            let key = ids.published_id.clone();
            cache.subscribe(&key, move || checkout_pair_stream(store.as_ref(), ids))
        }))
        .flatten()
        .boxed()
    }

    /// End every running pair stream.
    pub fn shutdown(&self) {
        self.cache.shutdown();
    }
}

fn checkout_pair_stream(
    store: &dyn DocumentStore,
    ids: IdPair,
) -> BoxStream<'static, Result<LocalPair, PairError>> {
    match store.checkout_pair(&ids) {
        Ok(pair) => merge_pair(
            ids,
            to_local_document(pair.draft),
            to_local_document(pair.published),
        )
        .boxed(),
        Err(e) => {
            log::warn!("Checkout of {} failed: {}", ids.published_id, e);
            stream::once(future::ready(Err(e))).boxed()
        }
    }
}
