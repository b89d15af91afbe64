// src/extract/publisher.rs
//! Hand-off point between extraction and the rest of the pipeline.
//!
//! The publisher is the only component that talks to the broker. Each record
//! is wrapped into an [`Envelope`], keyed, and sent to its source's topic.
//! A broken connection is re-established and the send retried once, so
//! delivery is at-least-once and consumers must tolerate duplicates.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;

use crate::config::RunConfig;
use crate::error::PublishError;
use crate::extract::types::RawRecord;

/// Canonical broker payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub source_name: String,
    pub page_number: u32,
    pub record: RawRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub topic: String,
    pub key: String,
    pub payload: Vec<u8>,
}

/// Broker acknowledgement for one published record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ack {
    pub topic: String,
    pub key: String,
}

#[async_trait::async_trait]
pub trait Broker: Send + Sync {
    async fn send(&self, message: &BrokerMessage) -> Result<(), PublishError>;
    /// Re-establish the connection after a [`PublishError::Connection`].
    async fn reconnect(&self) -> Result<(), PublishError>;
    fn name(&self) -> &'static str;
}

/// Stable message key: SHA-256 over source, page and position in the page.
pub fn message_key(source_name: &str, page_number: u32, index: usize) -> String {
    let mut h = Sha256::new();
    h.update(source_name.as_bytes());
    h.update(b":");
    h.update(page_number.to_be_bytes());
    h.update(b":");
    h.update((index as u64).to_be_bytes());
    format!("{:x}", h.finalize())
}

pub struct Publisher {
    broker: Arc<dyn Broker>,
    topics: HashMap<String, String>,
}

impl Publisher {
    pub fn new(broker: Arc<dyn Broker>, topics: HashMap<String, String>) -> Self {
        Self { broker, topics }
    }

    /// One topic per configured source.
    pub fn from_config(cfg: &RunConfig, broker: Arc<dyn Broker>) -> Self {
        let topics = cfg
            .sources
            .iter()
            .map(|s| (s.name.clone(), s.topic()))
            .collect();
        Self::new(broker, topics)
    }

    pub fn topic_for(&self, source_name: &str) -> String {
        self.topics
            .get(source_name)
            .cloned()
            .unwrap_or_else(|| format!("{}-api", source_name.to_ascii_lowercase()))
    }

    /// Serialize and send one record. The record is moved in; nothing is shared
    /// with the fetching worker afterwards.
    pub async fn publish(
        &self,
        source_name: &str,
        page_number: u32,
        index: usize,
        record: RawRecord,
    ) -> Result<Ack, PublishError> {
        let envelope = Envelope {
            source_name: source_name.to_string(),
            page_number,
            record,
        };
        let payload =
            serde_json::to_vec(&envelope).map_err(|e| PublishError::Serialize(e.to_string()))?;
        let message = BrokerMessage {
            topic: self.topic_for(source_name),
            key: message_key(source_name, page_number, index),
            payload,
        };

        match self.broker.send(&message).await {
            Ok(()) => {}
            Err(e) if e.is_connection() => {
                tracing::warn!(
                    error = %e,
                    broker = self.broker.name(),
                    source = source_name,
                    page = page_number,
                    "broker connection lost; reconnecting once"
                );
                self.broker.reconnect().await?;
                self.broker.send(&message).await?;
            }
            Err(e) => return Err(e),
        }

        Ok(Ack {
            topic: message.topic,
            key: message.key,
        })
    }
}

/// In-process broker backed by a bounded tokio channel.
pub struct ChannelBroker {
    tx: mpsc::Sender<BrokerMessage>,
}

impl ChannelBroker {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<BrokerMessage>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait::async_trait]
impl Broker for ChannelBroker {
    async fn send(&self, message: &BrokerMessage) -> Result<(), PublishError> {
        self.tx
            .send(message.clone())
            .await
            .map_err(|_| PublishError::Connection("channel consumer dropped".into()))
    }

    async fn reconnect(&self) -> Result<(), PublishError> {
        if self.tx.is_closed() {
            return Err(PublishError::Connection(
                "channel consumer dropped; cannot reconnect".into(),
            ));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "channel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `fail_first` sends with a connection error.
    struct FlakyBroker {
        fail_first: u32,
        sends: AtomicU32,
        reconnects: AtomicU32,
        sent: parking_lot::Mutex<Vec<BrokerMessage>>,
    }

    #[async_trait::async_trait]
    impl Broker for FlakyBroker {
        async fn send(&self, message: &BrokerMessage) -> Result<(), PublishError> {
            let n = self.sends.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(PublishError::Connection("reset by peer".into()));
            }
            self.sent.lock().push(message.clone());
            Ok(())
        }
        async fn reconnect(&self) -> Result<(), PublishError> {
            self.reconnects.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn name(&self) -> &'static str {
            "flaky"
        }
    }

    fn flaky(fail_first: u32) -> Arc<FlakyBroker> {
        Arc::new(FlakyBroker {
            fail_first,
            sends: AtomicU32::new(0),
            reconnects: AtomicU32::new(0),
            sent: parking_lot::Mutex::new(Vec::new()),
        })
    }

    fn record() -> RawRecord {
        let mut r = RawRecord::new();
        r.insert("title".into(), serde_json::json!("Heat"));
        r
    }

    #[tokio::test]
    async fn reconnects_once_then_succeeds() {
        let broker = flaky(1);
        let p = Publisher::new(broker.clone(), HashMap::new());
        let ack = p.publish("tmdb", 3, 0, record()).await.expect("ack");
        assert_eq!(ack.topic, "tmdb-api");
        assert_eq!(broker.reconnects.load(Ordering::SeqCst), 1);

        let sent = broker.sent.lock();
        let env: Envelope = serde_json::from_slice(&sent[0].payload).unwrap();
        assert_eq!(env.source_name, "tmdb");
        assert_eq!(env.page_number, 3);
        assert_eq!(env.record["title"], "Heat");
    }

    #[tokio::test]
    async fn second_connection_failure_surfaces() {
        let broker = flaky(2);
        let p = Publisher::new(broker.clone(), HashMap::new());
        let err = p.publish("tmdb", 1, 0, record()).await.unwrap_err();
        assert!(err.is_connection());
        assert_eq!(broker.sends.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn envelope_uses_camel_case() {
        let env = Envelope {
            source_name: "omdb".into(),
            page_number: 2,
            record: record(),
        };
        let v = serde_json::to_value(&env).unwrap();
        assert!(v.get("sourceName").is_some());
        assert!(v.get("pageNumber").is_some());
    }

    #[test]
    fn keys_differ_per_position() {
        assert_ne!(message_key("tmdb", 1, 0), message_key("tmdb", 1, 1));
        assert_eq!(message_key("tmdb", 1, 0), message_key("tmdb", 1, 0));
        assert_eq!(message_key("tmdb", 1, 0).len(), 64);
    }

    #[tokio::test]
    async fn channel_broker_delivers() {
        let (broker, mut rx) = ChannelBroker::new(4);
        let p = Publisher::new(Arc::new(broker), HashMap::new());
        p.publish("omdb", 1, 0, record()).await.unwrap();
        let msg = rx.recv().await.expect("message");
        assert_eq!(msg.topic, "omdb-api");
    }
}
