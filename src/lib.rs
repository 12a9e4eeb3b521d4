// Soradyne DocPair - shared draft/published document streams

pub mod config;
pub mod document;
pub mod error;
pub mod operations;
pub mod pair;
pub mod stream;

pub use config::PairCacheConfig;
pub use document::{
    BufferedDocument, BufferedDocumentEvent, CheckedOutPair, Document, DocumentStore, IdPair,
    Mutation, Patch,
};
pub use error::PairError;
pub use operations::{DisabledReason, DocumentOperation, Unpublish};
pub use pair::{LocalDocument, LocalPair, PairAccessor, SharedStreamCache};
