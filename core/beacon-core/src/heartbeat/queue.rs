//! Multi-producer FIFO buffer between the classifier and the dispatcher.

use beacon_protocol::{Heartbeat, HeartbeatBatch};
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct HeartbeatQueue {
    items: Mutex<VecDeque<Heartbeat>>,
}

impl HeartbeatQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, heartbeat: Heartbeat) {
        self.lock().push_back(heartbeat);
    }

    pub fn try_dequeue(&self) -> Option<Heartbeat> {
        self.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Takes the oldest heartbeat as primary and everything queued behind it
    /// as extras, in order. Heartbeats enqueued after this call takes the lock
    /// stay for the next batch.
    pub fn drain_batch(&self) -> Option<HeartbeatBatch> {
        let mut items = self.lock();
        let primary = items.pop_front()?;
        let extras: Vec<Heartbeat> = items.drain(..).collect();
        Some(HeartbeatBatch::new(primary, extras))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Heartbeat>> {
        self.items
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_protocol::ActivityEvent;
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use std::thread;

    fn hb(path: &str) -> Heartbeat {
        Heartbeat::from_event(&ActivityEvent::new(
            path,
            false,
            Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        ))
    }

    #[test]
    fn empty_queue_has_no_batch() {
        let q = HeartbeatQueue::new();
        assert!(q.drain_batch().is_none());
        assert!(q.try_dequeue().is_none());
    }

    #[test]
    fn batch_is_oldest_primary_plus_remaining_extras_in_order() {
        let q = HeartbeatQueue::new();
        for p in ["/1", "/2", "/3", "/4"] {
            q.enqueue(hb(p));
        }

        let batch = q.drain_batch().unwrap();
        assert_eq!(batch.primary.entity, "/1");
        let extras: Vec<_> = batch.extras.iter().map(|h| h.entity.as_str()).collect();
        assert_eq!(extras, vec!["/2", "/3", "/4"]);
        assert!(q.is_empty());
    }

    #[test]
    fn later_enqueues_go_to_next_batch() {
        let q = HeartbeatQueue::new();
        q.enqueue(hb("/1"));
        q.enqueue(hb("/2"));
        let first = q.drain_batch().unwrap();
        q.enqueue(hb("/3"));

        assert_eq!(first.len(), 2);
        let second = q.drain_batch().unwrap();
        assert_eq!(second.primary.entity, "/3");
        assert!(!second.has_extras());
    }

    #[test]
    fn preserves_per_producer_order_under_concurrency() {
        let q = Arc::new(HeartbeatQueue::new());
        let producers: Vec<_> = (0..4)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..100 {
                        q.enqueue(hb(&format!("/{}/{}", p, i)));
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        assert_eq!(q.len(), 400);
        let batch = q.drain_batch().unwrap();
        assert_eq!(batch.len(), 400);

        let all: Vec<Heartbeat> = std::iter::once(batch.primary).chain(batch.extras).collect();
        for p in 0..4 {
            let prefix = format!("/{}/", p);
            let seq: Vec<usize> = all
                .iter()
                .filter_map(|h| h.entity.strip_prefix(&prefix))
                .map(|i| i.parse().unwrap())
                .collect();
            assert_eq!(seq, (0..100).collect::<Vec<_>>());
        }
    }
}
