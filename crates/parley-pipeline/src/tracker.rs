use tokio::sync::watch;

/// Tracks assistant-turn epochs for one session.
///
/// The epoch only moves on interruption. Frames tagged with an epoch
/// lower than [`current`](Self::current) are stale.
#[derive(Debug)]
pub struct TurnTracker {
    epoch: watch::Sender<u64>,
    responding: watch::Sender<bool>,
}

impl Default for TurnTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnTracker {
    pub fn new() -> Self {
        let (epoch, _) = watch::channel(0);
        let (responding, _) = watch::channel(false);
        Self { epoch, responding }
    }

    pub fn current(&self) -> u64 {
        *self.epoch.borrow()
    }

    /// Receiver that is notified whenever the epoch is bumped.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.epoch.subscribe()
    }

    /// Marks an assistant response as active and returns the epoch it
    /// belongs to.
    pub fn begin_response(&self) -> u64 {
        self.responding.send_replace(true);
        self.current()
    }

    /// Marks the response for `epoch` as played and recorded. Ignored for
    /// stale epochs.
    pub fn finish_response(&self, epoch: u64) {
        if epoch == self.current() {
            self.responding.send_replace(false);
        }
    }

    /// True while a response has begun and is not yet part of the context.
    pub fn is_responding(&self) -> bool {
        *self.responding.borrow()
    }

    /// Resolves once no response is active.
    pub async fn wait_idle(&self) {
        let mut responding = self.responding.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = responding.wait_for(|active| !*active).await;
    }

    pub fn is_stale(&self, epoch: u64) -> bool {
        epoch < self.current()
    }

    /// Cuts off the active response. Returns the new epoch, or `None` if
    /// nothing was being said.
    pub fn interrupt(&self) -> Option<u64> {
        if !self.responding.send_replace(false) {
            return None;
        }
        let mut next = 0;
        self.epoch.send_modify(|epoch| {
            *epoch += 1;
            next = *epoch;
        });
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupt_only_bumps_while_responding() {
        let tracker = TurnTracker::new();
        assert_eq!(tracker.interrupt(), None);

        let epoch = tracker.begin_response();
        assert_eq!(epoch, 0);
        assert_eq!(tracker.interrupt(), Some(1));
        assert!(tracker.is_stale(0));
        assert!(!tracker.is_responding());
        assert_eq!(tracker.interrupt(), None);
    }

    #[test]
    fn finishing_a_stale_response_keeps_the_new_one_active() {
        let tracker = TurnTracker::new();
        tracker.begin_response();
        tracker.interrupt();
        tracker.begin_response();

        tracker.finish_response(0);
        assert!(tracker.is_responding());
        tracker.finish_response(1);
        assert!(!tracker.is_responding());
    }

    #[tokio::test]
    async fn wait_idle_resolves_when_the_response_finishes() {
        let tracker = std::sync::Arc::new(TurnTracker::new());
        tracker.wait_idle().await;

        let epoch = tracker.begin_response();
        let waiter = {
            let tracker = tracker.clone();
            tokio::spawn(async move { tracker.wait_idle().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        tracker.finish_response(epoch);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn subscribers_see_interruptions() {
        let tracker = TurnTracker::new();
        let mut epochs = tracker.subscribe();
        tracker.begin_response();
        tracker.interrupt();
        epochs.changed().await.unwrap();
        assert_eq!(*epochs.borrow_and_update(), 1);
    }
}
