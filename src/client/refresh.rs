//! Single-flight token refresh coordination
//!
//! A state register (`Idle | Refreshing`) plus the ordered list of requests
//! waiting on the refresh in flight. The first request to hit a 401 while the
//! register is idle becomes the refresher and receives a [`RefreshGuard`];
//! everyone after it gets a channel that is answered when the refresher
//! settles. Check-and-set and drain-and-reset each happen under one lock
//! acquisition with no await in between.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

use crate::error::SessionError;

pub(crate) type RefreshOutcome = Result<String, SessionError>;

struct Waiter {
    position: u64,
    sender: oneshot::Sender<RefreshOutcome>,
}

enum RefreshState {
    Idle,
    Refreshing { waiters: Vec<Waiter>, joined: u64 },
}

pub(crate) enum Ticket<'a> {
    /// Drive the refresh; the guard must be settled with the outcome
    Refresher(RefreshGuard<'a>),
    /// Wait for the refresher. `position` is 1-based queue order.
    Queued {
        position: u64,
        receiver: oneshot::Receiver<RefreshOutcome>,
    },
}

pub(crate) struct RefreshCoordinator {
    state: Mutex<RefreshState>,
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self {
            state: Mutex::new(RefreshState::Idle),
        }
    }
}

impl RefreshCoordinator {
    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn join(&self) -> Ticket<'_> {
        let mut state = self.lock();
        match &mut *state {
            RefreshState::Refreshing { waiters, joined } => {
                *joined += 1;
                let (sender, receiver) = oneshot::channel();
                waiters.push(Waiter {
                    position: *joined,
                    sender,
                });
                Ticket::Queued {
                    position: *joined,
                    receiver,
                }
            }
            RefreshState::Idle => {
                *state = RefreshState::Refreshing {
                    waiters: Vec::new(),
                    joined: 0,
                };
                Ticket::Refresher(RefreshGuard {
                    coordinator: self,
                    settled: false,
                })
            }
        }
    }

    pub(crate) fn is_refreshing(&self) -> bool {
        matches!(*self.lock(), RefreshState::Refreshing { .. })
    }

    pub(crate) fn queued(&self) -> usize {
        match &*self.lock() {
            RefreshState::Refreshing { waiters, .. } => waiters.len(),
            RefreshState::Idle => 0,
        }
    }

    /// Answer every waiter in arrival order, then go back to idle. Returns the
    /// queue positions in the order they were answered.
    fn settle(&self, outcome: RefreshOutcome) -> Vec<u64> {
        let mut state = self.lock();
        let waiters = match &mut *state {
            RefreshState::Refreshing { waiters, .. } => std::mem::take(waiters),
            RefreshState::Idle => Vec::new(),
        };

        let mut answered = Vec::with_capacity(waiters.len());
        for waiter in waiters {
            // A waiter whose caller went away has dropped its receiver.
            let _ = waiter.sender.send(outcome.clone());
            answered.push(waiter.position);
        }
        *state = RefreshState::Idle;
        answered
    }
}

/// Held by the refresher. Dropping it unsettled fails every waiter with
/// [`SessionError::RefreshAbandoned`] and resets the register.
pub(crate) struct RefreshGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl RefreshGuard<'_> {
    pub(crate) fn resolve(mut self, access_token: &str) -> Vec<u64> {
        self.settled = true;
        self.coordinator.settle(Ok(access_token.to_string()))
    }

    pub(crate) fn reject(mut self, error: SessionError) -> Vec<u64> {
        self.settled = true;
        self.coordinator.settle(Err(error))
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let abandoned = self.coordinator.settle(Err(SessionError::RefreshAbandoned));
            tracing::warn!(waiters = abandoned.len(), "Token refresh abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn expect_refresher(ticket: Ticket<'_>) -> RefreshGuard<'_> {
        match ticket {
            Ticket::Refresher(guard) => guard,
            Ticket::Queued { .. } => panic!("Expected to become the refresher"),
        }
    }

    fn expect_queued(ticket: Ticket<'_>) -> (u64, oneshot::Receiver<RefreshOutcome>) {
        match ticket {
            Ticket::Queued { position, receiver } => (position, receiver),
            Ticket::Refresher(_) => panic!("Expected to be queued"),
        }
    }

    #[test]
    fn test_only_first_joiner_refreshes() {
        let coordinator = RefreshCoordinator::default();
        let guard = expect_refresher(coordinator.join());

        let (first, _rx1) = expect_queued(coordinator.join());
        let (second, _rx2) = expect_queued(coordinator.join());

        assert_eq!((first, second), (1, 2));
        assert!(coordinator.is_refreshing());
        assert_eq!(coordinator.queued(), 2);

        assert_eq!(guard.resolve("new"), vec![1, 2]);
        assert!(!coordinator.is_refreshing());
        assert_eq!(coordinator.queued(), 0);
    }

    #[test]
    fn test_register_reopens_after_settle() {
        let coordinator = RefreshCoordinator::default();
        expect_refresher(coordinator.join()).resolve("new");

        let guard = expect_refresher(coordinator.join());
        let (position, _rx) = expect_queued(coordinator.join());
        assert_eq!(position, 1);
        guard.reject(SessionError::NoRefreshCredential);
    }

    #[test]
    fn test_rejection_reaches_every_waiter() {
        let coordinator = RefreshCoordinator::default();
        let guard = expect_refresher(coordinator.join());
        let receivers: Vec<_> = (0..3).map(|_| expect_queued(coordinator.join()).1).collect();

        let error = SessionError::RefreshRejected {
            status: Some(401),
            reason: "token_not_valid".to_string(),
        };
        guard.reject(error.clone());

        for mut receiver in receivers {
            assert_eq!(receiver.try_recv().unwrap(), Err(error.clone()));
        }
    }

    #[test]
    fn test_dropped_refresher_abandons_queue() {
        let coordinator = RefreshCoordinator::default();
        let guard = expect_refresher(coordinator.join());
        let (_, mut receiver) = expect_queued(coordinator.join());

        drop(guard);

        assert_eq!(receiver.try_recv().unwrap(), Err(SessionError::RefreshAbandoned));
        assert!(!coordinator.is_refreshing());
    }

    #[tokio::test]
    async fn test_settle_answers_waiters_in_arrival_order() {
        let coordinator = RefreshCoordinator::default();
        let guard = expect_refresher(coordinator.join());
        let resumed = Arc::new(Mutex::new(Vec::new()));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let (position, receiver) = expect_queued(coordinator.join());
            let resumed = Arc::clone(&resumed);
            handles.push(tokio::spawn(async move {
                let token = receiver.await.expect("refresher dropped").expect("refresh failed");
                resumed.lock().unwrap().push((position, token));
            }));
        }
        // Let every waiter park on its receiver first.
        tokio::task::yield_now().await;

        assert_eq!(guard.resolve("fresh"), vec![1, 2, 3, 4, 5]);
        for handle in handles {
            handle.await.unwrap();
        }

        let resumed = resumed.lock().unwrap();
        assert_eq!(resumed.len(), 5);
        assert!(resumed.iter().all(|(_, token)| token == "fresh"));
    }
}
