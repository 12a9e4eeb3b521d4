//! Broadcast receivers as streams
//!
//! Both the simulated buffered documents and the shared pair cache fan
//! values out through `broadcast` channels; consumers see them as
//! `futures_util` streams that end when the sender side is dropped.

use futures_util::future;
use futures_util::stream::{BoxStream, StreamExt};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

/// A lagging receiver skips the values it missed and keeps going.
pub fn broadcast_stream<T>(rx: broadcast::Receiver<T>) -> BoxStream<'static, T>
where
    T: Clone + Send + 'static,
{
    BroadcastStream::new(rx)
        .filter_map(|item| {
            future::ready(match item {
                Ok(value) => Some(value),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    log::warn!("Broadcast subscriber lagged, skipped {} values", skipped);
                    None
                }
            })
        })
        .boxed()
}
