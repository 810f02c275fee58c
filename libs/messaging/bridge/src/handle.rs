//! Delivery handles
//!
//! A [`DeliveryHandle`] is the producer's view of one submitted message. Its
//! status starts `Pending` and moves to a terminal state exactly once.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Transport a message was handed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    Socket,
    Mailbox,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Socket => "socket",
            Route::Mailbox => "mailbox",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a delivery did not complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// No Confirmation arrived before the acknowledgment deadline
    Unacknowledged,
    /// The mailbox lock stayed contended through every retry
    LockContention,
    /// The mailbox rejected the write
    Mailbox(String),
    /// The coordinator shut down first
    ShutDown,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Unacknowledged => f.write_str("unacknowledged"),
            FailureReason::LockContention => f.write_str("lock contention"),
            FailureReason::Mailbox(reason) => write!(f, "mailbox: {}", reason),
            FailureReason::ShutDown => f.write_str("shut down"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Confirmed(Route),
    Failed(FailureReason),
}

impl DeliveryStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DeliveryStatus::Pending)
    }
}

/// Producer-side view of one submitted message
#[derive(Debug, Clone)]
pub struct DeliveryHandle {
    sequence_id: u64,
    status: watch::Receiver<DeliveryStatus>,
}

impl DeliveryHandle {
    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    /// Current status without waiting
    pub fn status(&self) -> DeliveryStatus {
        self.status.borrow().clone()
    }

    /// Wait until the status is terminal
    ///
    /// Bounded by the acknowledgment deadline of the coordinator that issued
    /// the handle.
    pub async fn wait(&self) -> DeliveryStatus {
        let mut status = self.status.clone();
        let result = status.wait_for(DeliveryStatus::is_terminal).await.map(|s| s.clone());
        match result {
            Ok(terminal) => terminal,
            Err(_) => {
                let last = status.borrow().clone();
                if last.is_terminal() {
                    last
                } else {
                    DeliveryStatus::Failed(FailureReason::ShutDown)
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct TrackerState {
    route: Option<Route>,
    acknowledged: bool,
    deadline: Option<JoinHandle<()>>,
}

/// Coordinator-side state behind a handle
///
/// A Confirmation can overtake the return of the send that produced it, so an
/// early acknowledgment is parked until the route is known.
#[derive(Debug)]
pub(crate) struct DeliveryTracker {
    sequence_id: u64,
    status: watch::Sender<DeliveryStatus>,
    state: Mutex<TrackerState>,
}

impl DeliveryTracker {
    pub(crate) fn new(sequence_id: u64) -> (Arc<Self>, DeliveryHandle) {
        let (tx, rx) = watch::channel(DeliveryStatus::Pending);
        let tracker = Arc::new(Self {
            sequence_id,
            status: tx,
            state: Mutex::new(TrackerState::default()),
        });
        (tracker, DeliveryHandle { sequence_id, status: rx })
    }

    pub(crate) fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    fn resolve(&self, terminal: DeliveryStatus) -> bool {
        self.status.send_if_modified(|current| {
            if current.is_terminal() {
                false
            } else {
                *current = terminal;
                true
            }
        })
    }

    pub(crate) fn is_resolved(&self) -> bool {
        self.status.borrow().is_terminal()
    }

    /// Record the transport used; resolves if the ack already arrived
    pub(crate) fn record_route(&self, route: Route) -> bool {
        let mut state = self.state.lock();
        state.route = Some(route);
        if state.acknowledged {
            let deadline = state.deadline.take();
            drop(state);
            if let Some(deadline) = deadline {
                deadline.abort();
            }
            self.resolve(DeliveryStatus::Confirmed(route))
        } else {
            false
        }
    }

    /// Apply a Confirmation; resolves once the route is known
    pub(crate) fn acknowledge(&self) -> bool {
        let mut state = self.state.lock();
        match state.route {
            Some(route) => {
                let deadline = state.deadline.take();
                drop(state);
                if let Some(deadline) = deadline {
                    deadline.abort();
                }
                self.resolve(DeliveryStatus::Confirmed(route))
            }
            None => {
                state.acknowledged = true;
                false
            }
        }
    }

    /// Fail and cancel the deadline timer
    pub(crate) fn fail(&self, reason: FailureReason) -> bool {
        let deadline = self.state.lock().deadline.take();
        if let Some(deadline) = deadline {
            deadline.abort();
        }
        self.resolve(DeliveryStatus::Failed(reason))
    }

    /// Called from the deadline timer itself
    pub(crate) fn expire(&self) -> bool {
        self.state.lock().deadline.take();
        self.resolve(DeliveryStatus::Failed(FailureReason::Unacknowledged))
    }

    pub(crate) fn set_deadline(&self, timer: JoinHandle<()>) {
        let mut state = self.state.lock();
        if self.is_resolved() {
            drop(state);
            timer.abort();
        } else {
            state.deadline = Some(timer);
        }
    }
}
