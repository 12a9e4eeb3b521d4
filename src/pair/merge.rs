//! Pair merging
//!
//! Interleaves the draft and published view streams in arrival order and
//! folds them into a [`PartialPair`]. Nothing is emitted until both sides
//! have produced a view; after that every update from either side emits a
//! complete [`LocalPair`] carrying the other side's last value.

use futures_util::stream::{self, Stream, StreamExt};

use super::local::LocalDocument;
use crate::document::IdPair;
use crate::error::PairError;

/// Both variants of a document. Treat as a read-only snapshot; mutate through
/// the embedded operations.
#[derive(Clone, Debug)]
pub struct LocalPair {
    pub ids: IdPair,
    pub draft: LocalDocument,
    pub published: LocalDocument,
}

/// A single-sided update.
#[derive(Clone, Debug)]
pub enum PairUpdate {
    Draft(LocalDocument),
    Published(LocalDocument),
}

/// Fold accumulator. A side, once set, is only ever replaced.
#[derive(Clone, Debug, Default)]
pub struct PartialPair {
    pub draft: Option<LocalDocument>,
    pub published: Option<LocalDocument>,
}

impl PartialPair {
    pub fn apply(&mut self, update: PairUpdate) {
        match update {
            PairUpdate::Draft(view) => self.draft = Some(view),
            PairUpdate::Published(view) => self.published = Some(view),
        }
    }

    /// The full pair, once both sides are known.
    pub fn complete(&self, ids: &IdPair) -> Option<LocalPair> {
        match (&self.draft, &self.published) {
            (Some(draft), Some(published)) => Some(LocalPair {
                ids: ids.clone(),
                draft: draft.clone(),
                published: published.clone(),
            }),
            _ => None,
        }
    }
}

/// Merge the two view streams into a stream of complete pairs.
///
/// Completes when both inputs complete. The first error from either side is
/// emitted and ends the stream.
pub fn merge_pair<D, P>(
    ids: IdPair,
    draft: D,
    published: P,
) -> impl Stream<Item = Result<LocalPair, PairError>>
where
    D: Stream<Item = Result<LocalDocument, PairError>>,
    P: Stream<Item = Result<LocalDocument, PairError>>,
{
    let draft = draft.map(|view| view.map(PairUpdate::Draft));
    let published = published.map(|view| view.map(PairUpdate::Published));
    let updates = Box::pin(stream::select(draft, published));

    // `None` state: an error was emitted and both inputs have been dropped.
    stream::unfold(
        Some((updates, PartialPair::default())),
        move |state| {
            let ids = ids.clone();
            async move {
                let (mut updates, mut partial) = state?;
                loop {
                    match updates.next().await? {
                        Ok(update) => {
                            partial.apply(update);
                            if let Some(pair) = partial.complete(&ids) {
                                return Some((Ok(pair), Some((updates, partial))));
                            }
                        }
                        Err(e) => return Some((Err(e), None)),
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::simulated::SimulatedDocument;
    use crate::document::BufferedDocument;
    use futures_util::stream::BoxStream;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    type ViewResult = Result<LocalDocument, PairError>;

    struct Side {
        handle: Arc<dyn BufferedDocument>,
        tx: mpsc::UnboundedSender<ViewResult>,
    }

    impl Side {
        fn emit(&self, title: &str) {
            let view = LocalDocument::new(Some(json!({ "title": title })), Arc::clone(&self.handle));
            self.tx.send(Ok(view)).unwrap();
        }

        fn fail(&self, reason: &str) {
            self.tx.send(Err(PairError::Transport(reason.into()))).unwrap();
        }
    }

    fn side(id: &str) -> (Side, BoxStream<'static, ViewResult>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let views = UnboundedReceiverStream::new(rx).boxed();
        let handle: Arc<dyn BufferedDocument> = SimulatedDocument::new(id);
        (Side { handle, tx }, views)
    }

    fn title(view: &LocalDocument) -> String {
        view.snapshot.as_ref().unwrap()["title"].as_str().unwrap().to_string()
    }

    fn pairs() -> (Side, Side, BoxStream<'static, Result<LocalPair, PairError>>) {
        let (draft, draft_views) = side("drafts.a");
        let (published, published_views) = side("a");
        let merged = merge_pair(IdPair::from_id("a"), draft_views, published_views).boxed();
        (draft, published, merged)
    }

    async fn assert_silent(merged: &mut BoxStream<'static, Result<LocalPair, PairError>>) {
        let next = tokio::time::timeout(Duration::from_millis(100), merged.next()).await;
        assert!(next.is_err(), "expected no emission, got {next:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_until_both_sides_emit() {
        let (draft, published, mut merged) = pairs();

        draft.emit("A");
        draft.emit("A2");
        assert_silent(&mut merged).await;

        published.emit("P");
        let pair = merged.next().await.unwrap().unwrap();
        assert_eq!(title(&pair.draft), "A2");
        assert_eq!(title(&pair.published), "P");
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_pair_per_update_after_gate() {
        let (draft, published, mut merged) = pairs();

        draft.emit("A");
        published.emit("A");
        let first = merged.next().await.unwrap().unwrap();
        assert_eq!(title(&first.draft), "A");
        assert_eq!(title(&first.published), "A");
        assert_eq!(first.ids, IdPair::from_id("a"));
        assert_silent(&mut merged).await;

        draft.emit("B");
        let second = merged.next().await.unwrap().unwrap();
        assert_eq!(title(&second.draft), "B");
        assert_eq!(title(&second.published), "A");
        assert!(second.published.shares_handle(&first.published));
        assert!(second.draft.shares_handle(&first.draft));
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_value_retained_across_sides() {
        let (draft, published, mut merged) = pairs();

        published.emit("P1");
        draft.emit("D1");
        merged.next().await.unwrap().unwrap();

        published.emit("P2");
        let pair = merged.next().await.unwrap().unwrap();
        assert_eq!((title(&pair.draft), title(&pair.published)), ("D1".into(), "P2".into()));

        draft.emit("D2");
        let pair = merged.next().await.unwrap().unwrap();
        assert_eq!((title(&pair.draft), title(&pair.published)), ("D2".into(), "P2".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_before_gate_terminates_without_pairs() {
        let (draft, published, mut merged) = pairs();

        draft.fail("boom");
        published.emit("P");

        assert_eq!(
            merged.next().await.unwrap().unwrap_err(),
            PairError::Transport("boom".into())
        );
        assert!(merged.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_ends_stream_while_other_side_is_silent() {
        let (draft, published, mut merged) = pairs();

        draft.fail("boom");
        assert_eq!(
            merged.next().await.unwrap().unwrap_err(),
            PairError::Transport("boom".into())
        );

        let next = tokio::time::timeout(Duration::from_secs(3600), merged.next()).await;
        assert!(matches!(next, Ok(None)), "stream kept running: {next:?}");
        // Both inputs were released with the error.
        assert!(published.tx.is_closed());
        assert!(draft.tx.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_completes_only_when_both_sides_complete() {
        let (draft, published, mut merged) = pairs();

        draft.emit("D");
        published.emit("P");
        merged.next().await.unwrap().unwrap();

        drop(draft);
        assert_silent(&mut merged).await;

        published.emit("P2");
        let pair = merged.next().await.unwrap().unwrap();
        assert_eq!(title(&pair.draft), "D");

        drop(published);
        assert!(merged.next().await.is_none());
    }

    #[test]
    fn test_partial_pair_gate() {
        let ids = IdPair::from_id("a");
        let handle: Arc<dyn BufferedDocument> = SimulatedDocument::new("a");
        let mut partial = PartialPair::default();
        assert!(partial.complete(&ids).is_none());

        partial.apply(PairUpdate::Published(LocalDocument::new(None, Arc::clone(&handle))));
        assert!(partial.complete(&ids).is_none());

        partial.apply(PairUpdate::Draft(LocalDocument::new(None, handle)));
        let pair = partial.complete(&ids).unwrap();
        assert!(pair.draft.snapshot.is_none());
        assert!(pair.published.snapshot.is_none());
    }
}
