//! Coordination of concurrent token refreshes
//!
//! At most one refresh exchange runs at a time. Requests that hit a 401 while
//! one is running queue behind it and are resolved, in arrival order, with
//! the outcome of that single exchange.

use crate::error::ClientError;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

/// Outcome handed to every queued request: the new access token, or the shared cause of failure.
pub(crate) type RefreshOutcome = Result<String, Arc<ClientError>>;

/// Role assigned to a request that needs a refresh
pub(crate) enum Ticket {
    /// This request starts the refresh and must call [`RefreshCoordinator::complete`].
    Leader,
    /// A refresh is already running; wait here for its outcome.
    Follower(oneshot::Receiver<RefreshOutcome>),
}

#[derive(Default)]
struct State {
    in_progress: bool,
    pending: VecDeque<oneshot::Sender<RefreshOutcome>>,
}

#[derive(Default)]
pub(crate) struct RefreshCoordinator {
    state: Mutex<State>,
}

impl RefreshCoordinator {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Check-and-set the refresh flag, or queue behind the running refresh.
    ///
    /// Both branches happen under one lock with no suspension point.
    pub(crate) fn join(&self) -> Ticket {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.in_progress {
            let (tx, rx) = oneshot::channel();
            state.pending.push_back(tx);
            Ticket::Follower(rx)
        } else {
            state.in_progress = true;
            Ticket::Leader
        }
    }

    /// Resolve every queued request with `outcome` in FIFO order and clear the flag.
    ///
    /// Returns how many queued requests were resolved.
    pub(crate) fn complete(&self, outcome: &RefreshOutcome) -> usize {
        let pending = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.in_progress = false;
            std::mem::take(&mut state.pending)
        };

        let drained = pending.len();
        for waiter in pending {
            // A waiter whose request was dropped has nobody to tell.
            let _ = waiter.send(outcome.clone());
        }
        drained
    }

    pub(crate) fn in_progress(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_progress
    }

    pub(crate) fn pending(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pending
            .len()
    }
}

/// Completes the refresh with a failure if dropped before [`CompletionGuard::finish`].
///
/// Keeps queued requests from waiting forever when the refresh task panics.
pub(crate) struct CompletionGuard {
    coordinator: Arc<RefreshCoordinator>,
    finished: bool,
}

impl CompletionGuard {
    pub(crate) fn new(coordinator: Arc<RefreshCoordinator>) -> Self {
        Self {
            coordinator,
            finished: false,
        }
    }

    pub(crate) fn finish(mut self, outcome: &RefreshOutcome) -> usize {
        self.finished = true;
        self.coordinator.complete(outcome)
    }
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if !self.finished {
            let aborted = Err(Arc::new(ClientError::InvalidResponse(
                "token refresh aborted".to_string(),
            )));
            self.coordinator.complete(&aborted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn follower(ticket: Ticket) -> oneshot::Receiver<RefreshOutcome> {
        match ticket {
            Ticket::Follower(rx) => rx,
            Ticket::Leader => panic!("expected follower"),
        }
    }

    #[test]
    fn test_single_leader() {
        let coordinator = RefreshCoordinator::new();

        assert!(matches!(coordinator.join(), Ticket::Leader));
        assert!(coordinator.in_progress());
        let _a = follower(coordinator.join());
        let _b = follower(coordinator.join());
        assert_eq!(coordinator.pending(), 2);
    }

    #[tokio::test]
    async fn test_drain_in_arrival_order() {
        let coordinator = RefreshCoordinator::new();
        assert!(matches!(coordinator.join(), Ticket::Leader));

        let receivers: Vec<_> = (0..3).map(|_| follower(coordinator.join())).collect();
        let drained = coordinator.complete(&Ok("A2".to_string()));

        assert_eq!(drained, 3);
        assert!(!coordinator.in_progress());
        assert_eq!(coordinator.pending(), 0);
        for rx in receivers {
            assert_eq!(rx.await.unwrap().unwrap(), "A2");
        }

        // The next 401 starts a fresh refresh
        assert!(matches!(coordinator.join(), Ticket::Leader));
    }

    #[test]
    fn test_fifo_send_order() {
        let coordinator = RefreshCoordinator::new();
        assert!(matches!(coordinator.join(), Ticket::Leader));

        let mut receivers: Vec<_> = (0..3).map(|_| follower(coordinator.join())).collect();
        coordinator.complete(&Ok("token".to_string()));

        // Each sender fired before complete() returned
        for rx in receivers.iter_mut() {
            assert_eq!(rx.try_recv().unwrap().unwrap(), "token");
        }
    }

    #[tokio::test]
    async fn test_failure_shared_by_all_waiters() {
        let coordinator = RefreshCoordinator::new();
        assert!(matches!(coordinator.join(), Ticket::Leader));
        let a = follower(coordinator.join());
        let b = follower(coordinator.join());

        let cause = Arc::new(ClientError::InvalidResponse("no token".into()));
        coordinator.complete(&Err(cause.clone()));

        let err_a = a.await.unwrap().unwrap_err();
        let err_b = b.await.unwrap().unwrap_err();
        assert!(Arc::ptr_eq(&err_a, &cause));
        assert!(Arc::ptr_eq(&err_b, &cause));
    }

    #[tokio::test]
    async fn test_guard_rejects_queue_when_dropped() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        assert!(matches!(coordinator.join(), Ticket::Leader));
        let rx = follower(coordinator.join());

        drop(CompletionGuard::new(Arc::clone(&coordinator)));

        assert!(rx.await.unwrap().is_err());
        assert!(!coordinator.in_progress());
    }

    #[test]
    fn test_guard_finish_does_not_double_complete() {
        let coordinator = Arc::new(RefreshCoordinator::new());
        assert!(matches!(coordinator.join(), Ticket::Leader));
        let guard = CompletionGuard::new(Arc::clone(&coordinator));
        assert_eq!(guard.finish(&Ok("A2".to_string())), 0);

        // A new leader is not disturbed by the finished guard
        assert!(matches!(coordinator.join(), Ticket::Leader));
        assert!(coordinator.in_progress());
    }
}
