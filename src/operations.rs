//! Document operations built on a [`LocalPair`]
//!
//! An operation reports whether it can run for the pair it was built from
//! and executes by issuing mutations through the pair's handles, then
//! committing. Presenting operations is left to the caller.

use std::fmt;

use async_trait::async_trait;
use futures_util::future;
use serde_json::Value;

use crate::error::PairError;
use crate::pair::LocalPair;

/// Why an operation cannot run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisabledReason {
    /// The document type is edited live, without drafts.
    LiveEdit,
    /// There is no published variant.
    NotPublished,
}

impl fmt::Display for DisabledReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisabledReason::LiveEdit => write!(f, "LIVE_EDIT_ENABLED"),
            DisabledReason::NotPublished => write!(f, "NOT_PUBLISHED"),
        }
    }
}

#[async_trait]
pub trait DocumentOperation: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Some` when the operation cannot run for this pair.
    fn disabled(&self) -> Option<DisabledReason>;

    async fn execute(&self) -> Result<(), PairError>;
}

/// Remove the published variant, keeping its content as the draft.
pub struct Unpublish {
    pair: LocalPair,
    live_edit: bool,
}

impl Unpublish {
    pub fn new(pair: LocalPair, live_edit: bool) -> Self {
        Self { pair, live_edit }
    }
}

#[async_trait]
impl DocumentOperation for Unpublish {
    fn name(&self) -> &'static str {
        "unpublish"
    }

    fn disabled(&self) -> Option<DisabledReason> {
        if self.live_edit {
            Some(DisabledReason::LiveEdit)
        } else if self.pair.published.snapshot.is_none() {
            Some(DisabledReason::NotPublished)
        } else {
            None
        }
    }

    async fn execute(&self) -> Result<(), PairError> {
        if let Some(reason) = self.disabled() {
            return Err(PairError::OperationDisabled {
                operation: self.name(),
                reason,
            });
        }

        let LocalPair {
            ids,
            draft,
            published,
        } = &self.pair;

        if draft.snapshot.is_none() {
            if let Some(mut document) = published.snapshot.clone() {
                if let Some(object) = document.as_object_mut() {
                    object.insert("_id".into(), Value::String(ids.draft_id.clone()));
                    object.remove("_rev");
                }
                draft.create_if_not_exists(document);
            }
        }
        published.delete();

        future::try_join(draft.commit(), published.commit()).await?;
        log::debug!("Unpublished {}", ids.published_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::simulated::SimulatedDocument;
    use crate::document::{BufferedDocument, IdPair, Mutation};
    use crate::pair::LocalDocument;
    use serde_json::json;
    use std::sync::Arc;

    struct Fixture {
        draft: Arc<SimulatedDocument>,
        published: Arc<SimulatedDocument>,
        pair: LocalPair,
    }

    fn fixture(draft_snapshot: Option<Value>, published_snapshot: Option<Value>) -> Fixture {
        let ids = IdPair::from_id("movie-1");
        let draft = SimulatedDocument::new(&ids.draft_id);
        let published = SimulatedDocument::new(&ids.published_id);
        draft.set_remote(draft_snapshot.clone());
        published.set_remote(published_snapshot.clone());

        let draft_handle: Arc<dyn BufferedDocument> = draft.clone();
        let published_handle: Arc<dyn BufferedDocument> = published.clone();
        let pair = LocalPair {
            ids,
            draft: LocalDocument::new(draft_snapshot, draft_handle),
            published: LocalDocument::new(published_snapshot, published_handle),
        };
        Fixture {
            draft,
            published,
            pair,
        }
    }

    #[test]
    fn test_unpublish_disabled_without_published_variant() {
        let f = fixture(Some(json!({ "_id": "drafts.movie-1" })), None);
        let op = Unpublish::new(f.pair, false);
        assert_eq!(op.disabled(), Some(DisabledReason::NotPublished));
    }

    #[test]
    fn test_unpublish_disabled_for_live_edit() {
        let f = fixture(None, Some(json!({ "_id": "movie-1" })));
        let op = Unpublish::new(f.pair, true);
        assert_eq!(op.disabled(), Some(DisabledReason::LiveEdit));
    }

    #[tokio::test]
    async fn test_executing_disabled_operation_fails() {
        let f = fixture(None, None);
        let op = Unpublish::new(f.pair, false);
        assert_eq!(
            op.execute().await.unwrap_err(),
            PairError::OperationDisabled {
                operation: "unpublish",
                reason: DisabledReason::NotPublished
            }
        );
        assert!(f.published.committed_mutations().is_empty());
    }

    #[tokio::test]
    async fn test_unpublish_moves_content_to_draft() {
        let f = fixture(
            None,
            Some(json!({ "_id": "movie-1", "_rev": "r1", "title": "Alien" })),
        );
        let op = Unpublish::new(f.pair, false);
        assert_eq!(op.disabled(), None);

        op.execute().await.unwrap();

        assert_eq!(f.published.snapshot(), None);
        assert_eq!(f.published.committed_mutations(), vec![Mutation::Delete]);
        let draft = f.draft.snapshot().unwrap();
        assert_eq!(draft["_id"], json!("drafts.movie-1"));
        assert_eq!(draft["title"], json!("Alien"));
        assert!(f.draft.pending_mutations().is_empty());
    }

    #[tokio::test]
    async fn test_unpublish_keeps_existing_draft() {
        let f = fixture(
            Some(json!({ "_id": "drafts.movie-1", "title": "Alien (edit)" })),
            Some(json!({ "_id": "movie-1", "title": "Alien" })),
        );
        Unpublish::new(f.pair, false).execute().await.unwrap();

        assert!(f.draft.committed_mutations().is_empty());
        assert_eq!(f.draft.snapshot().unwrap()["title"], json!("Alien (edit)"));
        assert_eq!(f.published.snapshot(), None);
    }

    #[tokio::test]
    async fn test_commit_failure_is_reported() {
        let f = fixture(None, Some(json!({ "_id": "movie-1" })));
        f.published.fail_next_commit("permission denied");

        let err = Unpublish::new(f.pair, false).execute().await.unwrap_err();
        assert!(matches!(err, PairError::CommitFailed { .. }));
    }
}
