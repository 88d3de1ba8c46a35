//! Source Module
//!
//! The three shapes a value source can take, normalized into one future.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};

use crate::error::{CacheError, Result};

// == Source ==
/// A value producer: plain value, one-shot future or multi-value stream.
pub enum Source<E> {
    /// Already computed value
    Value(E),
    /// Single deferred result
    Deferred(BoxFuture<'static, anyhow::Result<E>>),
    /// Stream of results. Only the last value before completion counts.
    Stream(BoxStream<'static, anyhow::Result<E>>),
}

impl<E> fmt::Debug for Source<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Value(_) => f.write_str("Source::Value"),
            Source::Deferred(_) => f.write_str("Source::Deferred"),
            Source::Stream(_) => f.write_str("Source::Stream"),
        }
    }
}

impl<E> Source<E>
where
    E: Send + 'static,
{
    pub fn value(value: E) -> Self {
        Source::Value(value)
    }

    pub fn deferred<F>(future: F) -> Self
    where
        F: Future<Output = anyhow::Result<E>> + Send + 'static,
    {
        Source::Deferred(future.boxed())
    }

    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = anyhow::Result<E>> + Send + 'static,
    {
        Source::Stream(stream.boxed())
    }

    // == Into Future ==
    /// Evaluates the source once and resolves to its final value.
    ///
    /// A stream resolves to its last item; the first error ends evaluation,
    /// and a stream that completes without items fails with
    /// [`CacheError::EmptySource`].
    pub fn into_future(self) -> BoxFuture<'static, Result<E>> {
        match self {
            Source::Value(value) => futures::future::ready(Ok(value)).boxed(),
            Source::Deferred(future) => future.map(|result| result.map_err(CacheError::from)).boxed(),
            Source::Stream(mut stream) => async move {
                let mut last = None;
                while let Some(item) = stream.next().await {
                    last = Some(item?);
                }
                last.ok_or(CacheError::EmptySource)
            }
            .boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_value_source() {
        let value = Source::value(5).into_future().await.unwrap();
        assert_eq!(value, 5);
    }

    #[tokio::test]
    async fn test_deferred_source() {
        let value = Source::deferred(async { Ok("ready".to_string()) })
            .into_future()
            .await
            .unwrap();
        assert_eq!(value, "ready");
    }

    #[tokio::test]
    async fn test_deferred_failure() {
        let result = Source::<u32>::deferred(async { Err(anyhow::anyhow!("boom")) })
            .into_future()
            .await;
        assert!(matches!(result, Err(CacheError::Source(_))));
    }

    #[tokio::test]
    async fn test_stream_resolves_to_last_value() {
        let stream = futures::stream::iter(vec![Ok(1), Ok(2), Ok(3)]);
        let value = Source::stream(stream).into_future().await.unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test]
    async fn test_stream_error_stops_evaluation() {
        let stream = futures::stream::iter(vec![Ok(1), Err(anyhow::anyhow!("bad")), Ok(3)]);
        let result = Source::stream(stream).into_future().await;
        assert!(matches!(result, Err(CacheError::Source(_))));
    }

    #[tokio::test]
    async fn test_empty_stream() {
        let stream = futures::stream::empty::<anyhow::Result<u8>>();
        let result = Source::stream(stream).into_future().await;
        assert!(matches!(result, Err(CacheError::EmptySource)));
    }
}
