// ── Live stream fan-out ──
//
// One topic per exact message type. Each topic keeps a short replay history
// and a broadcast channel; publishing and subscribing happen under the same
// map-entry lock, so a new subscriber sees every value exactly once: either
// in its replay batch or live, never both.

mod distinct;

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;

use cerberus_api::Envelope;
use dashmap::DashMap;
use futures_core::Stream;
use serde::de::DeserializeOwned;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

pub use distinct::distinct_until_changed;

use crate::config::{StreamConfig, StreamPolicy};

struct Topic {
    history: VecDeque<Arc<Envelope>>,
    replay: usize,
    tx: broadcast::Sender<Arc<Envelope>>,
}

impl Topic {
    fn new(policy: StreamPolicy) -> Self {
        let (tx, _) = broadcast::channel(policy.capacity.max(1));
        Self {
            history: VecDeque::with_capacity(policy.replay),
            replay: policy.replay,
            tx,
        }
    }
}

/// Routes `stream.*` and `event.*` envelopes to per-type subscribers.
pub struct Multiplexer {
    topics: DashMap<String, Topic>,
    config: StreamConfig,
}

impl Multiplexer {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            topics: DashMap::new(),
            config,
        }
    }

    /// Cache and broadcast a push envelope. Other kinds are ignored.
    pub fn publish(&self, envelope: Arc<Envelope>) -> bool {
        if !envelope.kind().is_push() {
            return false;
        }
        let mut topic = self
            .topics
            .entry(envelope.msg_type.clone())
            .or_insert_with(|| Topic::new(self.config.policy_for(&envelope.msg_type)));

        if topic.replay > 0 {
            if topic.history.len() == topic.replay {
                topic.history.pop_front();
            }
            topic.history.push_back(Arc::clone(&envelope));
        }
        // No subscribers is fine; the history still holds the value.
        let _ = topic.tx.send(envelope);
        true
    }

    /// Subscribe to one exact message type.
    pub fn subscribe(&self, msg_type: &str) -> RawSubscription {
        let topic = self
            .topics
            .entry(msg_type.to_owned())
            .or_insert_with(|| Topic::new(self.config.policy_for(msg_type)));
        RawSubscription {
            msg_type: msg_type.to_owned(),
            backlog: topic.history.clone(),
            rx: topic.tx.subscribe(),
        }
    }

    /// Most recent cached envelope of `msg_type`.
    pub fn latest(&self, msg_type: &str) -> Option<Arc<Envelope>> {
        self.topics
            .get(msg_type)
            .and_then(|topic| topic.history.back().cloned())
    }

    pub fn subscriber_count(&self, msg_type: &str) -> usize {
        self.topics
            .get(msg_type)
            .map_or(0, |topic| topic.tx.receiver_count())
    }
}

// ── Subscriptions ────────────────────────────────────────────────────

/// Untyped subscription: replayed history first, then live envelopes.
pub struct RawSubscription {
    msg_type: String,
    backlog: VecDeque<Arc<Envelope>>,
    rx: broadcast::Receiver<Arc<Envelope>>,
}

impl RawSubscription {
    pub fn msg_type(&self) -> &str {
        &self.msg_type
    }

    /// Next envelope. A subscriber that fell behind skips ahead with a warning.
    /// `None` once the multiplexer is gone.
    pub async fn recv(&mut self) -> Option<Arc<Envelope>> {
        if let Some(envelope) = self.backlog.pop_front() {
            return Some(envelope);
        }
        loop {
            match self.rx.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(msg_type = %self.msg_type, skipped, "stream subscriber lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Typed view decoding each payload as `T`.
    pub fn typed<T: DeserializeOwned>(self) -> Subscription<T> {
        Subscription {
            raw: self,
            _marker: PhantomData,
        }
    }

    pub fn into_stream(mut self) -> impl Stream<Item = Arc<Envelope>> + Send {
        async_stream::stream! {
            while let Some(envelope) = self.recv().await {
                yield envelope;
            }
        }
    }
}

/// Subscription yielding decoded payloads. Undecodable payloads are skipped.
pub struct Subscription<T> {
    raw: RawSubscription,
    _marker: PhantomData<fn() -> T>,
}

impl<T: DeserializeOwned> Subscription<T> {
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            let envelope = self.raw.recv().await?;
            match envelope.decode_payload::<T>() {
                Ok(value) => return Some(value),
                Err(e) => {
                    tracing::debug!(msg_type = %envelope.msg_type, error = %e, "skipping undecodable stream payload");
                }
            }
        }
    }

    pub fn into_stream(mut self) -> impl Stream<Item = T> + Send
    where
        T: Send + 'static,
    {
        async_stream::stream! {
            while let Some(value) = self.recv().await {
                yield value;
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use futures_util::StreamExt;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn push(msg_type: &str, n: i64) -> Arc<Envelope> {
        Arc::new(Envelope {
            payload: json!({ "n": n }),
            ..Envelope::new(msg_type)
        })
    }

    fn n(env: &Envelope) -> i64 {
        env.payload["n"].as_i64().unwrap_or(-1)
    }

    fn mux(replay: usize, capacity: usize) -> Multiplexer {
        Multiplexer::new(StreamConfig {
            default: StreamPolicy { replay, capacity },
            overrides: HashMap::new(),
        })
    }

    #[tokio::test]
    async fn replays_last_n_in_order_then_live() {
        let mux = mux(3, 16);
        for i in 1..=5 {
            mux.publish(push("stream.x", i));
        }
        let mut sub = mux.subscribe("stream.x");
        mux.publish(push("stream.x", 6));

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(n(&sub.recv().await.unwrap()));
        }
        assert_eq!(seen, [3, 4, 5, 6]);
    }

    #[tokio::test]
    async fn replay_shorter_than_history_limit() {
        let mux = mux(5, 16);
        mux.publish(push("stream.x", 1));
        mux.publish(push("stream.x", 2));

        let mut sub = mux.subscribe("stream.x");
        assert_eq!(n(&sub.recv().await.unwrap()), 1);
        assert_eq!(n(&sub.recv().await.unwrap()), 2);
        assert!(
            tokio::time::timeout(Duration::from_millis(20), sub.recv())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn exact_type_filter() {
        let mux = mux(1, 16);
        let mut logs = mux.subscribe("stream.new_log_entry");
        mux.publish(push("stream.dashboard_update", 1));
        mux.publish(push("stream.new_log_entry", 2));
        assert_eq!(n(&logs.recv().await.unwrap()), 2);
    }

    #[test]
    fn only_pushes_are_published() {
        let mux = mux(1, 16);
        assert!(!mux.publish(push("resp.all_policies", 1)));
        assert!(!mux.publish(push("hello.ui", 1)));
        assert!(mux.publish(push("event.app_start", 1)));
        assert!(mux.latest("resp.all_policies").is_none());
        assert_eq!(n(&mux.latest("event.app_start").unwrap()), 1);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_but_stays_ordered() {
        let mux = mux(0, 2);
        let mut sub = mux.subscribe("stream.x");
        for i in 1..=6 {
            mux.publish(push("stream.x", i));
        }
        let a = n(&sub.recv().await.unwrap());
        let b = n(&sub.recv().await.unwrap());
        assert!(a < b);
        assert_eq!(b, 6);
    }

    #[tokio::test]
    async fn typed_stream_skips_bad_payloads() {
        #[derive(serde::Deserialize)]
        struct N {
            n: i64,
        }

        let mux = mux(4, 16);
        mux.publish(push("stream.x", 1));
        mux.publish(Arc::new(Envelope {
            payload: json!({"n": "not a number"}),
            ..Envelope::new("stream.x")
        }));
        mux.publish(push("stream.x", 3));

        let values: Vec<i64> = mux
            .subscribe("stream.x")
            .typed::<N>()
            .into_stream()
            .map(|v| v.n)
            .take(2)
            .collect()
            .await;
        assert_eq!(values, [1, 3]);
    }
}
