//! In-process document store simulator
//!
//! Provides buffered documents backed by tokio broadcast channels so pair
//! streams can be exercised end to end without a real storage backend.
//! Each document starts unloaded; a remote snapshot arrives through
//! `set_remote`, after which every new event subscriber is seeded with the
//! current snapshot.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{
    BufferedDocument, BufferedDocumentEvent, CheckedOutPair, Document, DocumentStore, IdPair,
    Mutation, Patch,
};
use crate::error::PairError;
use crate::stream::broadcast_stream;

type EventResult = Result<BufferedDocumentEvent, PairError>;

const EVENT_CAPACITY: usize = 64;

struct SimState {
    snapshot: Option<Document>,
    loaded: bool,
    pending: Vec<Mutation>,
    committed: Vec<Mutation>,
    commit_failure: Option<String>,
    events_tx: broadcast::Sender<EventResult>,
}

impl SimState {
    fn emit(&self, event: BufferedDocumentEvent) {
        // No subscribers is fine; the snapshot is replayed on subscribe.
        let _ = self.events_tx.send(Ok(event));
    }

    fn emit_snapshot(&self) {
        self.emit(BufferedDocumentEvent::Snapshot {
            document: self.snapshot.clone(),
        });
    }

    /// End the current feed. Later subscribers get a fresh one.
    fn reset_feed(&mut self) {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        self.events_tx = events_tx;
    }
}

/// A simulated buffered document for one variant.
pub struct SimulatedDocument {
    id: String,
    state: Mutex<SimState>,
}

impl SimulatedDocument {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            id: id.into(),
            state: Mutex::new(SimState {
                snapshot: None,
                loaded: false,
                pending: Vec::new(),
                committed: Vec::new(),
                commit_failure: None,
                events_tx,
            }),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver a snapshot from the remote side.
    pub fn set_remote(&self, snapshot: Option<Document>) {
        let mut state = self.state();
        state.snapshot = snapshot;
        state.loaded = true;
        state.emit_snapshot();
    }

    /// Emit a transport error and end the current feed.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        log::warn!("Simulated transport failure on {}: {}", self.id, reason);
        let mut state = self.state();
        let _ = state.events_tx.send(Err(PairError::Transport(reason)));
        state.reset_feed();
    }

    /// End the current feed without an error.
    pub fn close(&self) {
        self.state().reset_feed();
    }

    /// Make the next `commit` fail with the given reason.
    pub fn fail_next_commit(&self, reason: impl Into<String>) {
        self.state().commit_failure = Some(reason.into());
    }

    pub fn snapshot(&self) -> Option<Document> {
        self.state().snapshot.clone()
    }

    pub fn pending_mutations(&self) -> Vec<Mutation> {
        self.state().pending.clone()
    }

    pub fn committed_mutations(&self) -> Vec<Mutation> {
        self.state().committed.clone()
    }

    /// Number of live event subscribers on the current feed.
    pub fn subscriber_count(&self) -> usize {
        self.state().events_tx.receiver_count()
    }

    fn apply_local(&self, mutation: Mutation) {
        let mut state = self.state();
        let current = state.snapshot.take();
        state.snapshot = mutation.apply(current);
        state.pending.push(mutation.clone());
        state.emit(BufferedDocumentEvent::Mutation {
            mutations: vec![mutation],
        });
        state.emit_snapshot();
    }
}

#[async_trait]
impl BufferedDocument for SimulatedDocument {
    fn id(&self) -> &str {
        &self.id
    }

    fn events(&self) -> BoxStream<'static, EventResult> {
        let state = self.state();
        let rx = state.events_tx.subscribe();
        let seed = state.loaded.then(|| {
            Ok(BufferedDocumentEvent::Snapshot {
                document: state.snapshot.clone(),
            })
        });
        stream::iter(seed).chain(broadcast_stream(rx)).boxed()
    }

    fn patch(&self, patches: Vec<Patch>) {
        self.apply_local(Mutation::Patch { patches });
    }

    fn create(&self, document: Document) {
        self.apply_local(Mutation::Create { document });
    }

    fn create_if_not_exists(&self, document: Document) {
        self.apply_local(Mutation::CreateIfNotExists { document });
    }

    fn create_or_replace(&self, document: Document) {
        self.apply_local(Mutation::CreateOrReplace { document });
    }

    fn delete(&self) {
        self.apply_local(Mutation::Delete);
    }

    async fn commit(&self) -> Result<(), PairError> {
        let mut state = self.state();
        if let Some(reason) = state.commit_failure.take() {
            log::warn!("Simulated commit failure on {}: {}", self.id, reason);
            return Err(PairError::CommitFailed {
                id: self.id.clone(),
                reason,
            });
        }
        if state.pending.is_empty() {
            return Ok(());
        }

        let flushed: Vec<Mutation> = state.pending.drain(..).collect();
        state.committed.extend(flushed);
        if let Some(object) = state.snapshot.as_mut().and_then(Value::as_object_mut) {
            object.insert("_rev".into(), Value::String(Uuid::new_v4().to_string()));
            object.insert(
                "_updatedAt".into(),
                Value::String(chrono::Utc::now().to_rfc3339()),
            );
        }
        state.emit(BufferedDocumentEvent::Committed);
        state.emit_snapshot();
        Ok(())
    }
}

/// A simulated store handing out one [`SimulatedDocument`] per id.
pub struct SimulatedDocumentStore {
    documents: Mutex<HashMap<String, Arc<SimulatedDocument>>>,
    checkouts: AtomicUsize,
    checkout_failure: Mutex<Option<String>>,
}

impl SimulatedDocumentStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            documents: Mutex::new(HashMap::new()),
            checkouts: AtomicUsize::new(0),
            checkout_failure: Mutex::new(None),
        })
    }

    /// Get (or create) the document with this id.
    pub fn document(&self, id: &str) -> Arc<SimulatedDocument> {
        let mut documents = self.documents.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(
            documents
                .entry(id.to_string())
                .or_insert_with(|| SimulatedDocument::new(id)),
        )
    }

    /// Number of `checkout_pair` calls so far, failed ones included.
    pub fn checkout_count(&self) -> usize {
        self.checkouts.load(Ordering::SeqCst)
    }

    /// Make the next checkout fail with the given reason.
    pub fn fail_next_checkout(&self, reason: impl Into<String>) {
        *self
            .checkout_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(reason.into());
    }
}

impl DocumentStore for SimulatedDocumentStore {
    fn checkout_pair(&self, ids: &IdPair) -> Result<CheckedOutPair, PairError> {
        self.checkouts.fetch_add(1, Ordering::SeqCst);
        let failure = self
            .checkout_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(reason) = failure {
            return Err(PairError::Checkout {
                id: ids.published_id.clone(),
                reason,
            });
        }

        log::debug!("Checked out {} / {}", ids.draft_id, ids.published_id);
        Ok(CheckedOutPair {
            draft: self.document(&ids.draft_id),
            published: self.document(&ids.published_id),
        })
    }
}
