//! Local document views
//!
//! Adapts a buffered document's raw event feed into a stream of
//! [`LocalDocument`] values: the current snapshot plus the document's
//! operations. Every view from one handle delegates to that same handle.

use std::fmt;
use std::sync::Arc;

use futures_util::future;
use futures_util::stream::{Stream, StreamExt};

use crate::document::{BufferedDocument, BufferedDocumentEvent, Document, Patch};
use crate::error::PairError;

/// A snapshot of one variant together with its mutation operations.
#[derive(Clone)]
pub struct LocalDocument {
    pub snapshot: Option<Document>,
    handle: Arc<dyn BufferedDocument>,
}

impl LocalDocument {
    pub fn new(snapshot: Option<Document>, handle: Arc<dyn BufferedDocument>) -> Self {
        Self { snapshot, handle }
    }

    pub fn id(&self) -> &str {
        self.handle.id()
    }

    pub fn patch(&self, patches: Vec<Patch>) {
        self.handle.patch(patches);
    }

    pub fn create(&self, document: Document) {
        self.handle.create(document);
    }

    pub fn create_if_not_exists(&self, document: Document) {
        self.handle.create_if_not_exists(document);
    }

    pub fn create_or_replace(&self, document: Document) {
        self.handle.create_or_replace(document);
    }

    pub fn delete(&self) {
        self.handle.delete();
    }

    pub async fn commit(&self) -> Result<(), PairError> {
        self.handle.commit().await
    }

    /// Whether both views operate on the same buffered document.
    pub fn shares_handle(&self, other: &LocalDocument) -> bool {
        Arc::ptr_eq(&self.handle, &other.handle)
    }
}

impl fmt::Debug for LocalDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalDocument")
            .field("id", &self.id())
            .field("snapshot", &self.snapshot)
            .finish()
    }
}

/// Snapshot events of `handle` as local views. Other events are dropped;
/// errors pass through.
pub fn to_local_document(
    handle: Arc<dyn BufferedDocument>,
) -> impl Stream<Item = Result<LocalDocument, PairError>> + Send + 'static {
    let events = handle.events();
    events.filter_map(move |event| {
        let view = match event {
            Ok(BufferedDocumentEvent::Snapshot { document }) => {
                Some(Ok(LocalDocument::new(document, Arc::clone(&handle))))
            }
            Ok(_) => None,
            Err(e) => Some(Err(e)),
        };
        future::ready(view)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::simulated::SimulatedDocument;
    use serde_json::json;

    #[tokio::test]
    async fn test_only_snapshots_become_views() {
        let doc = SimulatedDocument::new("a");
        let mut views = Box::pin(to_local_document(doc.clone()));

        doc.set_remote(Some(json!({ "_id": "a", "title": "A" })));
        // Emits Mutation and Snapshot; only the snapshot comes through.
        doc.patch(vec![Patch::set("title", "B")]);
        doc.close();

        let seen: Vec<_> = views.by_ref().collect().await;
        let titles: Vec<_> = seen
            .into_iter()
            .map(|view| view.unwrap().snapshot.unwrap()["title"].clone())
            .collect();
        assert_eq!(titles, vec![json!("A"), json!("B")]);
    }

    #[tokio::test]
    async fn test_views_share_the_handle() {
        let doc = SimulatedDocument::new("a");
        doc.set_remote(Some(json!({ "title": "A" })));
        let mut views = Box::pin(to_local_document(doc.clone()));

        let first = views.next().await.unwrap().unwrap();
        doc.set_remote(Some(json!({ "title": "B" })));
        let second = views.next().await.unwrap().unwrap();

        assert!(first.shares_handle(&second));
        assert_ne!(first.snapshot, second.snapshot);
    }

    #[tokio::test]
    async fn test_operations_reach_the_handle() {
        let doc = SimulatedDocument::new("a");
        doc.set_remote(None);
        let mut views = Box::pin(to_local_document(doc.clone()));
        let view = views.next().await.unwrap().unwrap();
        assert_eq!(view.snapshot, None);

        view.create(json!({ "_id": "a" }));
        view.commit().await.unwrap();

        assert_eq!(doc.committed_mutations().len(), 1);
        let updated = views.next().await.unwrap().unwrap();
        assert_eq!(updated.snapshot.unwrap()["_id"], json!("a"));
    }

    #[tokio::test]
    async fn test_errors_pass_through() {
        let doc = SimulatedDocument::new("a");
        let mut views = Box::pin(to_local_document(doc.clone()));
        doc.fail("offline");

        assert_eq!(
            views.next().await.unwrap().unwrap_err(),
            PairError::Transport("offline".into())
        );
        assert!(views.next().await.is_none());
    }
}
