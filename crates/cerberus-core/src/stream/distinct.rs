use futures_core::Stream;
use futures_util::StreamExt;

/// Suppress consecutive duplicates.
pub fn distinct_until_changed<S>(stream: S) -> impl Stream<Item = S::Item> + Send
where
    S: Stream + Send + 'static,
    S::Item: PartialEq + Clone + Send,
{
    async_stream::stream! {
        let mut last: Option<S::Item> = None;
        let mut stream = std::pin::pin!(stream);
        while let Some(item) = stream.next().await {
            if last.as_ref() != Some(&item) {
                last = Some(item.clone());
                yield item;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures_util::stream;

    #[tokio::test]
    async fn drops_only_consecutive_repeats() {
        let out: Vec<i32> = distinct_until_changed(stream::iter([1, 1, 2, 2, 2, 1, 3, 3]))
            .collect()
            .await;
        assert_eq!(out, [1, 2, 1, 3]);
    }
}
