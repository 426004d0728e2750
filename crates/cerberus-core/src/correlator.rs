// ── Request/response correlation ──
//
// Each correlated request gets a fresh UUID, a single-assignment slot and a
// deadline. Whichever of reply, deadline or disconnect claims the table entry
// first decides the outcome; the entry is removed exactly once.

use std::sync::Arc;
use std::time::Duration;

use cerberus_api::protocol::payloads::DaemonErrorPayload;
use cerberus_api::{Envelope, MessageKind};
use dashmap::DashMap;
use tokio::sync::oneshot;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::CoreError;

/// Terminal failure delivered through a pending slot.
#[derive(Debug, Clone)]
enum Failure {
    ConnectionLost,
    Daemon {
        message: String,
        code: Option<String>,
    },
}

type Completion = Result<Arc<Envelope>, Failure>;

struct PendingRequest {
    msg_type: String,
    slot: oneshot::Sender<Completion>,
    created_at: Instant,
    deadline: Instant,
}

/// Table of in-flight correlated requests.
#[derive(Default)]
pub struct Correlator {
    pending: DashMap<String, PendingRequest>,
}

/// Removes its entry when the caller's future is dropped mid-wait.
struct PendingGuard<'a> {
    pending: &'a DashMap<String, PendingRequest>,
    id: &'a str,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `envelope` under a fresh request id, hand it to `send`, and
    /// wait up to `timeout` for the matching reply.
    pub async fn request<F>(
        &self,
        envelope: Envelope,
        timeout: Duration,
        send: F,
    ) -> Result<Arc<Envelope>, CoreError>
    where
        F: FnOnce(&Envelope) -> Result<(), cerberus_api::Error>,
    {
        let id = Uuid::new_v4().to_string();
        let msg_type = envelope.msg_type.clone();
        let envelope = envelope.request_id(id.as_str());

        let (tx, mut rx) = oneshot::channel();
        let now = Instant::now();
        self.pending.insert(
            id.clone(),
            PendingRequest {
                msg_type: msg_type.clone(),
                slot: tx,
                created_at: now,
                deadline: now + timeout,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            id: &id,
        };

        send(&envelope).map_err(|e| {
            tracing::debug!(req_id = %id, msg_type, error = %e, "request not sent");
            if e.is_disconnect() {
                CoreError::ConnectionLost
            } else {
                CoreError::from(e)
            }
        })?;
        tracing::debug!(req_id = %id, msg_type, "request sent");

        let completion = match tokio::time::timeout(timeout, &mut rx).await {
            Ok(received) => received,
            Err(_) => {
                if self.pending.remove(&id).is_some() {
                    tracing::warn!(req_id = %id, msg_type, "request timed out");
                    return Err(CoreError::Timeout {
                        msg_type,
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    });
                }
                // A reply or disconnect claimed the entry first; its value is in flight.
                rx.await
            }
        };

        match completion {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(Failure::Daemon { message, code })) => Err(CoreError::Daemon {
                msg_type,
                message,
                code,
            }),
            Ok(Err(Failure::ConnectionLost)) | Err(_) => Err(CoreError::ConnectionLost),
        }
    }

    /// Deliver a `resp.*` / `error.*` envelope to its waiter.
    ///
    /// Returns `false` when nothing is waiting for it (orphan); the envelope
    /// is then discarded.
    pub fn complete(&self, envelope: Arc<Envelope>) -> bool {
        let Some(id) = envelope.request_id.as_deref() else {
            tracing::debug!(msg_type = %envelope.msg_type, "reply without req_id discarded");
            return false;
        };
        let Some((_, pending)) = self.pending.remove(id) else {
            tracing::debug!(req_id = id, msg_type = %envelope.msg_type, "orphaned reply discarded");
            return false;
        };

        let now = Instant::now();
        if now > pending.deadline {
            tracing::debug!(req_id = id, "reply arrived past its deadline but before expiry");
        }
        tracing::debug!(
            req_id = id,
            request = %pending.msg_type,
            reply = %envelope.msg_type,
            elapsed_ms = u64::try_from(now.duration_since(pending.created_at).as_millis()).unwrap_or(u64::MAX),
            "reply correlated"
        );

        let outcome = if envelope.kind() == MessageKind::Error {
            let detail: DaemonErrorPayload = envelope.decode_payload().unwrap_or_default();
            Err(Failure::Daemon {
                message: detail
                    .message
                    .unwrap_or_else(|| envelope.msg_type.clone()),
                code: detail.code.or_else(|| Some(envelope.msg_type.clone())),
            })
        } else {
            Ok(envelope)
        };
        // The waiter may have gone away; nothing to do then.
        let _ = pending.slot.send(outcome);
        true
    }

    /// Fail every in-flight request with `ConnectionLost`.
    pub fn fail_all(&self) -> usize {
        let ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        let mut failed = 0;
        for id in ids {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.slot.send(Err(Failure::ConnectionLost));
                failed += 1;
            }
        }
        if failed > 0 {
            tracing::warn!(failed, "failing pending requests, connection lost");
        }
        failed
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
