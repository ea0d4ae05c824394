use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentDecision {
    Accepted,
    Rejected { reason: Option<String> },
    Timeout,
    Error(String),
}

/// Receiving side of one watched assignment. Yields at most one decision.
#[derive(Debug)]
pub struct DecisionHandle {
    assignment_id: Uuid,
    rx: oneshot::Receiver<AssignmentDecision>,
}

impl DecisionHandle {
    pub fn assignment_id(&self) -> Uuid {
        self.assignment_id
    }

    /// Waits for the decision. `None` means the watch was dropped or
    /// replaced without one being delivered.
    pub async fn recv(self) -> Option<AssignmentDecision> {
        self.rx.await.ok()
    }
}

/// One-shot wakeups for dispatch loops blocked on a driver's answer.
///
/// The entry for an assignment is removed the moment a decision is
/// delivered, whether or not the waiting side ever reads it. Delivery never
/// blocks: the oneshot slot holds the single message.
#[derive(Debug, Default)]
pub struct AssignmentWatcher {
    pending: DashMap<Uuid, oneshot::Sender<AssignmentDecision>>,
}

impl AssignmentWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in `assignment_id`. Watching the same id twice
    /// closes the earlier handle.
    pub fn watch(&self, assignment_id: Uuid) -> DecisionHandle {
        let (tx, rx) = oneshot::channel();
        if self.pending.insert(assignment_id, tx).is_some() {
            debug!(assignment_id = %assignment_id, "replaced existing watch");
        }
        DecisionHandle { assignment_id, rx }
    }

    /// Drops the watch without delivering anything.
    pub fn unwatch(&self, assignment_id: Uuid) -> bool {
        self.pending.remove(&assignment_id).is_some()
    }

    pub fn notify_accepted(&self, assignment_id: Uuid) -> bool {
        self.notify(assignment_id, AssignmentDecision::Accepted)
    }

    pub fn notify_rejected(&self, assignment_id: Uuid, reason: Option<String>) -> bool {
        self.notify(assignment_id, AssignmentDecision::Rejected { reason })
    }

    pub fn notify_timeout(&self, assignment_id: Uuid) -> bool {
        self.notify(assignment_id, AssignmentDecision::Timeout)
    }

    pub fn notify_error(&self, assignment_id: Uuid, err: impl std::fmt::Display) -> bool {
        self.notify(assignment_id, AssignmentDecision::Error(err.to_string()))
    }

    /// Returns whether a waiting handle received the decision. Unknown ids
    /// and abandoned handles are a no-op.
    fn notify(&self, assignment_id: Uuid, decision: AssignmentDecision) -> bool {
        match self.pending.remove(&assignment_id) {
            Some((_, tx)) => tx.send(decision).is_ok(),
            None => false,
        }
    }

    pub fn watching_count(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::timeout;
    use uuid::Uuid;

    use super::{AssignmentDecision, AssignmentWatcher};

    #[tokio::test]
    async fn delivers_single_decision_and_forgets_entry() {
        let watcher = AssignmentWatcher::new();
        let id = Uuid::new_v4();
        let handle = watcher.watch(id);

        assert!(watcher.notify_accepted(id));
        assert!(!watcher.notify_accepted(id));
        assert_eq!(watcher.watching_count(), 0);
        assert_eq!(handle.recv().await, Some(AssignmentDecision::Accepted));
    }

    #[tokio::test]
    async fn notify_without_watch_is_noop() {
        let watcher = AssignmentWatcher::new();
        assert!(!watcher.notify_rejected(Uuid::new_v4(), Some("busy".to_string())));
        assert!(!watcher.notify_timeout(Uuid::new_v4()));
    }

    #[tokio::test(start_paused = true)]
    async fn watch_blocks_until_caller_timeout() {
        let watcher = AssignmentWatcher::new();
        let id = Uuid::new_v4();
        let handle = watcher.watch(id);

        let waited = timeout(Duration::from_secs(10), handle.recv()).await;
        assert!(waited.is_err());
        // Abandoned wait leaves an entry until someone cleans it up.
        assert!(watcher.unwatch(id));
        assert_eq!(watcher.watching_count(), 0);
    }

    #[tokio::test]
    async fn notify_from_another_task_wakes_waiter() {
        let watcher = Arc::new(AssignmentWatcher::new());
        let id = Uuid::new_v4();
        let handle = watcher.watch(id);

        let notifier = Arc::clone(&watcher);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            notifier.notify_rejected(id, Some("too far".to_string()));
        });

        let decision = timeout(Duration::from_secs(1), handle.recv()).await.unwrap();
        assert_eq!(
            decision,
            Some(AssignmentDecision::Rejected {
                reason: Some("too far".to_string())
            })
        );
    }

    #[tokio::test]
    async fn abandoned_handle_does_not_block_notifier() {
        let watcher = AssignmentWatcher::new();
        let id = Uuid::new_v4();
        drop(watcher.watch(id));

        assert!(!watcher.notify_error(id, "boom"));
        assert_eq!(watcher.watching_count(), 0);
    }

    #[tokio::test]
    async fn rewatch_closes_previous_handle() {
        let watcher = AssignmentWatcher::new();
        let id = Uuid::new_v4();
        let first = watcher.watch(id);
        let second = watcher.watch(id);

        assert_eq!(first.recv().await, None);
        watcher.notify_timeout(id);
        assert_eq!(second.recv().await, Some(AssignmentDecision::Timeout));
    }
}
