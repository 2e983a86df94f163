//! Idle-timeout wrapper for a topic stream: the same `tokio::select! {
//! event = stream.next() => ..., _ = interval.tick() => ... }` shape as
//! `margin_topup::bot::MarginTopUpBot::run`, except an idle tick here ends
//! the task instead of just logging, so its supervisor restarts it.

use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use futures::StreamExt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchdogError<E> {
    #[error("no event within the watchdog timeout")]
    Idle,

    #[error("event stream closed")]
    StreamClosed,

    #[error(transparent)]
    Upstream(E),
}

/// Pulls items from `stream` until either an item arrives, the timeout
/// elapses with no item, or the stream ends. Callers loop this to drive a
/// single topic; on `Idle`/`StreamClosed` the caller's restart policy
/// (backfill-on-restart, §4.4) takes over.
pub async fn next_or_idle<T, E>(
    stream: &mut Pin<&mut (impl Stream<Item = Result<T, E>> + ?Sized)>,
    timeout: Duration,
) -> Result<T, WatchdogError<E>> {
    tokio::select! {
        item = stream.next() => {
            match item {
                Some(Ok(item)) => Ok(item),
                Some(Err(e)) => Err(WatchdogError::Upstream(e)),
                None => Err(WatchdogError::StreamClosed),
            }
        }
        _ = tokio::time::sleep(timeout) => Err(WatchdogError::Idle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::pin::pin;

    #[tokio::test]
    async fn returns_item_before_timeout() {
        let mut s = pin!(stream::iter(vec![Ok::<_, ()>(1)]));
        let item = next_or_idle(&mut s, Duration::from_secs(1)).await.unwrap();
        assert_eq!(item, 1);
    }

    #[tokio::test]
    async fn idles_after_timeout_with_no_item() {
        let mut s = pin!(stream::pending::<Result<i32, ()>>());
        let err = next_or_idle(&mut s, Duration::from_millis(10)).await;
        assert!(matches!(err, Err(WatchdogError::Idle)));
    }

    #[tokio::test]
    async fn reports_stream_closed() {
        let mut s = pin!(stream::iter(Vec::<Result<i32, ()>>::new()));
        let err = next_or_idle(&mut s, Duration::from_secs(1)).await;
        assert!(matches!(err, Err(WatchdogError::StreamClosed)));
    }
}
