#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

//! In-process stand-in for cerberusd.

use std::time::Duration;

use cerberus_api::protocol::codec;
use cerberus_api::transport::FramedTransport;
use cerberus_api::{Endpoint, Envelope};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

pub const WAIT: Duration = Duration::from_secs(5);

pub struct FakeDaemon {
    pub endpoint: Endpoint,
    sessions: mpsc::UnboundedReceiver<Session>,
}

pub struct Session {
    transport: FramedTransport,
}

impl FakeDaemon {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::tcp(listener.local_addr().unwrap().to_string());
        let (tx, sessions) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let session = Session {
                    transport: FramedTransport::from_stream(stream),
                };
                if tx.send(session).is_err() {
                    break;
                }
            }
        });
        Self { endpoint, sessions }
    }

    pub async fn accept(&mut self) -> Session {
        tokio::time::timeout(WAIT, self.sessions.recv())
            .await
            .expect("client did not connect")
            .unwrap()
    }

    /// Accept and consume the handshake.
    pub async fn accept_hello(&mut self) -> (Session, Envelope) {
        let mut session = self.accept().await;
        let hello = session.recv().await;
        (session, hello)
    }
}

impl Session {
    pub async fn recv_line(&mut self) -> String {
        tokio::time::timeout(WAIT, self.transport.read_frame())
            .await
            .expect("no frame from client")
            .unwrap()
            .expect("client closed the socket")
    }

    pub async fn recv(&mut self) -> Envelope {
        codec::decode(&self.recv_line().await).unwrap()
    }

    pub async fn send_raw(&mut self, line: &str) {
        self.transport.write_frame(line).await.unwrap();
    }

    /// Send a daemon-style frame: no `v`, optional `req_id`.
    pub async fn send(&mut self, msg_type: &str, req_id: Option<&str>, payload: Value) {
        let mut frame = serde_json::json!({ "type": msg_type, "payload": payload });
        if let Some(id) = req_id {
            frame["req_id"] = Value::String(id.to_owned());
        }
        self.send_raw(&frame.to_string()).await;
    }

    pub async fn close(self) {
        self.transport.close().await;
    }
}
