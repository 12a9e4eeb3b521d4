//! Document model and the store-side collaborator contracts
//!
//! A logical document exists as two variants: a mutable draft and a
//! published copy. The storage layer hands out one [`BufferedDocument`] per
//! variant through [`DocumentStore::checkout_pair`]; everything above this
//! module only talks to those two traits.

pub mod simulated;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PairError;

/// Document content. Conventionally a JSON object carrying `_id`.
pub type Document = Value;

/// Prefix that turns a published id into its draft id.
pub const DRAFTS_PREFIX: &str = "drafts.";

/// The two identifiers naming one logical document.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdPair {
    pub draft_id: String,
    pub published_id: String,
}

impl IdPair {
    pub fn new(draft_id: impl Into<String>, published_id: impl Into<String>) -> Self {
        Self {
            draft_id: draft_id.into(),
            published_id: published_id.into(),
        }
    }

    /// Derive the pair from either variant's id.
    pub fn from_id(id: &str) -> Self {
        let published = id.strip_prefix(DRAFTS_PREFIX).unwrap_or(id);
        Self::new(format!("{DRAFTS_PREFIX}{published}"), published)
    }
}

/// A single field change, addressed by a dotted path into the document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "op")]
pub enum Patch {
    Set { path: String, value: Value },
    Unset { path: String },
}

impl Patch {
    pub fn set(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Patch::Set {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn unset(path: impl Into<String>) -> Self {
        Patch::Unset { path: path.into() }
    }

    /// Apply to a document in place. Non-object documents are left untouched.
    pub fn apply_to(&self, document: &mut Document) {
        match self {
            Patch::Set { path, value } => {
                let (parents, leaf) = split_path(path);
                let mut target = document;
                for key in parents {
                    let Some(object) = target.as_object_mut() else {
                        return;
                    };
                    target = object
                        .entry(key.to_string())
                        .or_insert_with(|| Value::Object(Map::new()));
                }
                if let Some(object) = target.as_object_mut() {
                    object.insert(leaf.to_string(), value.clone());
                }
            }
            Patch::Unset { path } => {
                let (parents, leaf) = split_path(path);
                let mut target = document;
                for key in parents {
                    match target.get_mut(key) {
                        Some(next) => target = next,
                        None => return,
                    }
                }
                if let Some(object) = target.as_object_mut() {
                    object.remove(leaf);
                }
            }
        }
    }
}

fn split_path(path: &str) -> (Vec<&str>, &str) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let leaf = segments.pop().unwrap_or_default();
    (segments, leaf)
}

/// A queued local change to one variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum Mutation {
    Patch { patches: Vec<Patch> },
    Create { document: Document },
    CreateIfNotExists { document: Document },
    CreateOrReplace { document: Document },
    Delete,
}

impl Mutation {
    /// Optimistically apply to the current snapshot.
    ///
    /// `Create` on an existing document and `Patch` on a missing one are
    /// no-ops here; rejecting them is the storage layer's job at commit.
    pub fn apply(&self, current: Option<Document>) -> Option<Document> {
        match self {
            Mutation::Patch { patches } => current.map(|mut document| {
                for patch in patches {
                    patch.apply_to(&mut document);
                }
                document
            }),
            Mutation::Create { document } | Mutation::CreateIfNotExists { document } => {
                current.or_else(|| Some(document.clone()))
            }
            Mutation::CreateOrReplace { document } => Some(document.clone()),
            Mutation::Delete => None,
        }
    }
}

/// Events emitted by a buffered document.
#[derive(Clone, Debug, PartialEq)]
pub enum BufferedDocumentEvent {
    /// Current content of the variant, `None` if it does not exist.
    Snapshot { document: Option<Document> },
    /// Local mutations were applied optimistically.
    Mutation { mutations: Vec<Mutation> },
    /// Local mutations were rebased onto a remote change.
    Rebase { document: Option<Document> },
    /// Pending mutations were accepted by the store.
    Committed,
    /// The transport reconnected.
    Reconnect,
}

/// One variant of a checked-out document.
///
/// Precondition on `events`: once the variant's snapshot is known, every new
/// call re-emits it as the first `Snapshot` event. Shared pair streams rely on
/// this to seed each fresh checkout.
#[async_trait]
pub trait BufferedDocument: Send + Sync {
    /// The variant's id.
    fn id(&self) -> &str;

    /// Subscribe to the event feed. Errors end the feed.
    fn events(&self) -> BoxStream<'static, Result<BufferedDocumentEvent, PairError>>;

    fn patch(&self, patches: Vec<Patch>);

    fn create(&self, document: Document);

    fn create_if_not_exists(&self, document: Document);

    fn create_or_replace(&self, document: Document);

    fn delete(&self);

    /// Flush pending mutations to the store.
    async fn commit(&self) -> Result<(), PairError>;
}

/// The draft and published handles returned by a checkout.
#[derive(Clone)]
pub struct CheckedOutPair {
    pub draft: Arc<dyn BufferedDocument>,
    pub published: Arc<dyn BufferedDocument>,
}

/// The storage layer entry point.
pub trait DocumentStore: Send + Sync {
    /// Open both variants of a document.
    fn checkout_pair(&self, ids: &IdPair) -> Result<CheckedOutPair, PairError>;
}
