//! In-memory per-owner event bus. Delivery is at-most-once: publishing never
//! waits on a subscriber, and a subscriber whose buffer is full misses events.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::Stream;
use satcat_vendors::Vendor;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use uuid::Uuid;

pub const DEFAULT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RealtimeEvent {
    SiteUpdate(SiteUpdateMessage),
    NewRecords(NewRecordsMessage),
    PeerText(PeerTextMessage),
    Presence(PresenceMessage),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteUpdateMessage {
    pub site_id: i64,
    pub site_name: String,
    pub new_updates: i64,
    pub time: DateTime<Utc>,
}

/// Emitted after an ingestion pass that inserted records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecordsMessage {
    pub vendor: Vendor,
    pub inserted: i64,
    pub window_end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerTextMessage {
    pub from: String,
    pub text: String,
    pub time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceMessage {
    pub owner: String,
    pub online: bool,
    pub time: DateTime<Utc>,
}

/// Channel an owner's own notifications are published on.
pub fn self_channel(owner: &str) -> String {
    format!("{owner}-SELF")
}

struct Subscriber {
    id: Uuid,
    tx: mpsc::Sender<RealtimeEvent>,
}

/// Outcome of one publish call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

pub struct RealtimeBus {
    channels: RwLock<HashMap<String, Vec<Subscriber>>>,
    buffer: usize,
    dropped: AtomicU64,
}

impl Default for RealtimeBus {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER)
    }
}

impl RealtimeBus {
    pub fn new(buffer: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    pub async fn subscribe(&self, channel: &str) -> Subscription {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.buffer);
        self.channels
            .write()
            .await
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber { id, tx });
        tracing::debug!(channel, subscriber = %id, "subscribed");
        Subscription {
            id,
            channel: channel.to_string(),
            rx,
        }
    }

    pub async fn unsubscribe(&self, channel: &str, id: Uuid) {
        let mut channels = self.channels.write().await;
        if let Some(subscribers) = channels.get_mut(channel) {
            subscribers.retain(|subscriber| subscriber.id != id);
            if subscribers.is_empty() {
                channels.remove(channel);
            }
        }
    }

    /// Non-blocking fan-out to every subscriber of `channel`.
    pub async fn publish(&self, channel: &str, event: RealtimeEvent) -> Delivery {
        let mut delivery = Delivery::default();
        let mut closed = Vec::new();
        {
            let channels = self.channels.read().await;
            let Some(subscribers) = channels.get(channel) else {
                return delivery;
            };
            for subscriber in subscribers {
                match subscriber.tx.try_send(event.clone()) {
                    Ok(()) => delivery.delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        delivery.dropped += 1;
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(channel, subscriber = %subscriber.id, "subscriber buffer full, dropping event");
                    }
                    Err(TrySendError::Closed(_)) => closed.push(subscriber.id),
                }
            }
        }

        if !closed.is_empty() {
            let mut channels = self.channels.write().await;
            if let Some(subscribers) = channels.get_mut(channel) {
                subscribers.retain(|subscriber| !closed.contains(&subscriber.id));
                if subscribers.is_empty() {
                    channels.remove(channel);
                }
            }
        }
        delivery
    }

    /// Publishes on every channel that currently has subscribers.
    pub async fn broadcast(&self, event: RealtimeEvent) -> Delivery {
        let channels: Vec<String> = self.channels.read().await.keys().cloned().collect();
        let mut total = Delivery::default();
        for channel in channels {
            let delivery = self.publish(&channel, event.clone()).await;
            total.delivered += delivery.delivered;
            total.dropped += delivery.dropped;
        }
        total
    }

    pub async fn subscriber_count(&self, channel: &str) -> usize {
        self.channels.read().await.get(channel).map_or(0, Vec::len)
    }

    /// Events dropped because a subscriber was too slow, since startup.
    pub fn dropped_total(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

pub struct Subscription {
    id: Uuid,
    channel: String,
    rx: mpsc::Receiver<RealtimeEvent>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub async fn recv(&mut self) -> Option<RealtimeEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RealtimeEvent> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = RealtimeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    fn site_update(n: i64) -> RealtimeEvent {
        RealtimeEvent::SiteUpdate(SiteUpdateMessage {
            site_id: 7,
            site_name: "harbor".into(),
            new_updates: n,
            time: Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap(),
        })
    }

    #[test]
    fn events_are_tagged() {
        let value = serde_json::to_value(site_update(2)).unwrap();
        assert_eq!(value["type"], json!("site_update"));
        assert_eq!(value["data"]["new_updates"], json!(2));
        assert_eq!(value["data"]["site_id"], json!(7));

        let presence = RealtimeEvent::Presence(PresenceMessage {
            owner: "u1".into(),
            online: true,
            time: Utc.with_ymd_and_hms(2024, 6, 10, 0, 0, 0).unwrap(),
        });
        assert_eq!(serde_json::to_value(presence).unwrap()["type"], json!("presence"));
    }

    #[tokio::test]
    async fn publish_reaches_only_that_channel() {
        let bus = RealtimeBus::default();
        let mut mine = bus.subscribe(&self_channel("alice")).await;
        let mut theirs = bus.subscribe(&self_channel("bob")).await;

        let delivery = bus.publish("alice-SELF", site_update(1)).await;
        assert_eq!(delivery.delivered, 1);
        assert_eq!(mine.recv().await, Some(site_update(1)));
        assert!(theirs.try_recv().is_none());
    }

    #[tokio::test]
    async fn slow_subscriber_drops_instead_of_blocking() {
        let bus = RealtimeBus::new(2);
        let mut slow = bus.subscribe("c").await;
        for n in 0..5 {
            bus.publish("c", site_update(n)).await;
        }
        assert_eq!(bus.dropped_total(), 3);
        assert_eq!(slow.recv().await, Some(site_update(0)));
        assert_eq!(slow.recv().await, Some(site_update(1)));
        assert!(slow.try_recv().is_none());
    }

    #[tokio::test]
    async fn closed_subscribers_are_pruned() {
        let bus = RealtimeBus::default();
        let sub = bus.subscribe("c").await;
        drop(sub);
        assert_eq!(bus.subscriber_count("c").await, 1);
        bus.publish("c", site_update(1)).await;
        assert_eq!(bus.subscriber_count("c").await, 0);
    }
}
