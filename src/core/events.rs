//! Per-stream topic fan-out with bounded history.
//!
//! Grounded on the order-book cache's optional broadcast-notification
//! pattern: subscribers join a stream's room and receive a
//! [`tokio::sync::broadcast`] receiver; there is no cluster-wide fan-out and
//! no delivery guarantee to late joiners, who are expected to read
//! `history` to catch up.

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::core::domain::Event;

const DEFAULT_ROOM_CAPACITY: usize = 256;

struct Room {
    sender: broadcast::Sender<Event>,
    history: VecDeque<Event>,
    history_cap: usize,
}

pub struct EventBus {
    rooms: RwLock<HashMap<String, Room>>,
    history_cap: usize,
}

impl EventBus {
    #[must_use]
    pub fn new(history_cap: usize) -> Self {
        Self { rooms: RwLock::new(HashMap::new()), history_cap }
    }

    /// Join a stream's room, creating it if this is the first subscriber.
    #[must_use]
    pub fn join(&self, stream_id: &str) -> broadcast::Receiver<Event> {
        let mut rooms = self.rooms.write();
        let room = rooms.entry(stream_id.to_string()).or_insert_with(|| Room {
            sender: broadcast::channel(DEFAULT_ROOM_CAPACITY).0,
            history: VecDeque::new(),
            history_cap: self.history_cap,
        });
        room.sender.subscribe()
    }

    /// Record and best-effort broadcast an event. Never blocks on a slow or
    /// absent subscriber.
    pub fn publish(&self, event: Event) {
        let mut rooms = self.rooms.write();
        let room = rooms.entry(event.stream_id.clone()).or_insert_with(|| Room {
            sender: broadcast::channel(DEFAULT_ROOM_CAPACITY).0,
            history: VecDeque::new(),
            history_cap: self.history_cap,
        });
        room.history.push_back(event.clone());
        while room.history.len() > room.history_cap {
            room.history.pop_front();
        }
        let _ = room.sender.send(event);
    }

    /// Fetch recorded history for a stream, optionally filtered by topic and
    /// capped at `limit`.
    #[must_use]
    pub fn history(&self, stream_id: &str, topic: Option<&str>, limit: usize) -> Vec<Event> {
        let rooms = self.rooms.read();
        let Some(room) = rooms.get(stream_id) else {
            return Vec::new();
        };
        room.history
            .iter()
            .rev()
            .filter(|e| topic.map_or(true, |t| e.topic == t))
            .take(limit)
            .cloned()
            .rev()
            .collect()
    }

    /// Drop a room with no remaining event history interest. Called by the
    /// stream manager when a stream is stopped.
    pub fn remove_room(&self, stream_id: &str) {
        self.rooms.write().remove(stream_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn evt(stream_id: &str, topic: &str, seq: u64) -> Event {
        Event {
            stream_id: stream_id.to_string(),
            topic: topic.to_string(),
            payload: serde_json::json!({}),
            timestamp: Utc::now(),
            sequence: seq,
        }
    }

    #[tokio::test]
    async fn join_then_publish_delivers() {
        let bus = EventBus::new(100);
        let mut rx = bus.join("s1");
        bus.publish(evt("s1", "stream:tweet", 1));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.sequence, 1);
    }

    #[test]
    fn history_respects_topic_filter_and_limit() {
        let bus = EventBus::new(100);
        bus.publish(evt("s1", "stream:tweet", 1));
        bus.publish(evt("s1", "stream:mention", 2));
        bus.publish(evt("s1", "stream:tweet", 3));
        let tweets = bus.history("s1", Some("stream:tweet"), 10);
        assert_eq!(tweets.len(), 2);
        let limited = bus.history("s1", None, 1);
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].sequence, 3);
    }

    #[test]
    fn history_caps_at_configured_size() {
        let bus = EventBus::new(2);
        for i in 0..5 {
            bus.publish(evt("s1", "stream:tweet", i));
        }
        let all = bus.history("s1", None, 100);
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].sequence, 3);
        assert_eq!(all[1].sequence, 4);
    }
}
