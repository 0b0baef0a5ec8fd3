//! Cancellation handles.
//!
//! A [`CancelHandle`] is a shared flag checked between events and between
//! loop phases. Wrapped streams stop at the next item once cancellation is
//! requested; dropping the cancelled stream closes the underlying connection
//! so providers stop generating tokens.

use std::pin::Pin;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use futures::Stream;

/// A handle that can request cancellation of a run.
#[derive(Clone, Debug, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Request cancellation. Observers stop as soon as they next check.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Create a standalone handle that can be shared across tasks.
pub fn new_cancel_handle() -> CancelHandle {
    CancelHandle::default()
}

/// Wrap any stream so it ends early when the handle fires.
///
/// Implemented with `async_stream` to avoid pin projection; the check runs
/// before each item is forwarded.
pub fn make_cancellable<S, T>(
    stream: S,
    handle: &CancelHandle,
) -> Pin<Box<dyn Stream<Item = T> + Send>>
where
    S: Stream<Item = T> + Send + 'static,
    T: Send + 'static,
{
    let flag = handle.flag.clone();
    let mut inner = Box::pin(stream);
    let wrapped = async_stream::stream! {
        use futures::StreamExt;
        while let Some(item) = inner.next().await {
            if flag.load(Ordering::SeqCst) {
                break;
            }
            yield item;
        }
    };
    Box::pin(wrapped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn cancel_stops_the_stream_mid_flight() {
        let handle = new_cancel_handle();
        let source = futures::stream::iter(0..100);
        let mut wrapped = make_cancellable(source, &handle);

        assert_eq!(wrapped.next().await, Some(0));
        assert_eq!(wrapped.next().await, Some(1));
        handle.cancel();
        assert_eq!(wrapped.next().await, None);
    }

    #[tokio::test]
    async fn uncancelled_stream_runs_to_completion() {
        let handle = new_cancel_handle();
        let source = futures::stream::iter(vec!["a", "b"]);
        let collected: Vec<_> = make_cancellable(source, &handle).collect().await;
        assert_eq!(collected, vec!["a", "b"]);
    }
}
