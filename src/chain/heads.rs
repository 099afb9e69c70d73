use tokio::sync::watch;

/// Latest observed chain head, shared between the head feed and every watcher.
///
/// Watchers hold a [`watch::Receiver`] and wake on each new height. Heights only move
/// forward; a stale or repeated height is ignored.
#[derive(Debug, Clone)]
pub struct HeadTracker {
    tx: watch::Sender<u64>,
}

impl HeadTracker {
    pub fn new(initial: u64) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn latest(&self) -> u64 {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }

    /// Publishes `head` if it is newer than the last one. Returns whether it advanced.
    pub fn publish(&self, head: u64) -> bool {
        self.tx.send_if_modified(|current| {
            if head > *current {
                *current = head;
                true
            } else {
                false
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::HeadTracker;

    #[tokio::test]
    async fn subscribers_wake_only_on_newer_heads() {
        let tracker = HeadTracker::new(100);
        let mut rx = tracker.subscribe();
        assert!(!tracker.publish(100));
        assert!(!tracker.publish(99));
        assert!(!rx.has_changed().expect("sender alive"));

        assert!(tracker.publish(101));
        rx.changed().await.expect("sender alive");
        assert_eq!(*rx.borrow_and_update(), 101);
        assert_eq!(tracker.latest(), 101);
    }
}
