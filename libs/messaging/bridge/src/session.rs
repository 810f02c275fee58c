//! Session Protocol
//!
//! Message semantics on top of delivery: Signals are acknowledged by a
//! Confirmation carrying their sequence id, StatusRequests are answered with a
//! StatusResponse, Heartbeats only prove liveness. The session never picks a
//! transport; it hands every outbound message to an [`Outbound`].

use crate::dedup::DedupWindow;
use crate::error::{DeliveryError, SessionError};
use crate::handle::{DeliveryHandle, DeliveryTracker, FailureReason, Route};
use crate::handler::{HandlerOutcome, HandlerRegistry, MessageHandler};
use async_trait::async_trait;
use codec::{
    ConfirmationPayload, Message, MessageType, Payload, ProtocolResult, StatusMap,
    StatusRequestPayload, StatusResponsePayload,
};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Transport-facing side the session sends through
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Build a message with this sender's next sequence id
    fn stamp(&self, payload: Payload) -> ProtocolResult<Message>;

    /// Hand a message to exactly one transport
    async fn dispatch(&self, message: &Message) -> Result<Route, DeliveryError>;

    /// Built-in `bridge.*` status entries
    fn bridge_status(&self) -> StatusMap;
}

/// What the receiver should do with the carrier of an inbound message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    Accepted,
    /// Seen before within the dedup window; handlers were not invoked
    Duplicate,
    /// Not processed; the reason is recorded with a failed mailbox entry
    Rejected(String),
}

/// Per-coordinator protocol state
#[derive(Debug)]
pub struct Session {
    ack_deadline: Duration,
    handlers: HandlerRegistry,
    pending: Arc<DashMap<u64, Arc<DeliveryTracker>>>,
    pending_status: DashMap<u64, oneshot::Sender<StatusMap>>,
    dedup: DedupWindow,
}

impl Session {
    pub fn new(ack_deadline: Duration, dedup_window: usize) -> Self {
        Self {
            ack_deadline,
            handlers: HandlerRegistry::new(),
            pending: Arc::new(DashMap::new()),
            pending_status: DashMap::new(),
            dedup: DedupWindow::new(dedup_window),
        }
    }

    pub fn register_handler(&self, message_type: MessageType, handler: Arc<dyn MessageHandler>) {
        info!(%message_type, "Registered message handler");
        self.handlers.register(message_type, handler);
    }

    /// Deliveries still waiting for a Confirmation
    pub fn pending_deliveries(&self) -> usize {
        self.pending.len()
    }

    pub fn pending_status_requests(&self) -> usize {
        self.pending_status.len()
    }

    /// Send a payload and track it until confirmed, failed or expired
    ///
    /// Only payload validation errors are returned; every later outcome is
    /// reported through the handle.
    pub async fn submit(
        &self,
        outbound: &dyn Outbound,
        payload: Payload,
    ) -> Result<DeliveryHandle, DeliveryError> {
        let started = Instant::now();
        let message = outbound.stamp(payload)?;
        let sequence_id = message.sequence_id();
        let needs_ack = message.message_type().requires_confirmation();

        let (tracker, handle) = DeliveryTracker::new(sequence_id);
        if needs_ack {
            // Registered before sending so a fast Confirmation finds it
            self.pending.insert(sequence_id, tracker.clone());
        }

        match outbound.dispatch(&message).await {
            Ok(route) => {
                debug!(sequence_id, %route, message_type = %message.message_type(), "Message dispatched");
                if !needs_ack {
                    tracker.acknowledge();
                    tracker.record_route(route);
                } else if tracker.record_route(route) {
                    self.pending.remove(&sequence_id);
                } else {
                    self.arm_deadline(&tracker, started + self.ack_deadline);
                }
            }
            Err(e) => {
                warn!(sequence_id, error = %e, category = e.category(), "Delivery failed");
                self.pending.remove(&sequence_id);
                tracker.fail(failure_reason(&e));
            }
        }

        Ok(handle)
    }

    fn arm_deadline(&self, tracker: &Arc<DeliveryTracker>, deadline: Instant) {
        let pending = self.pending.clone();
        let timer_tracker = tracker.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let sequence_id = timer_tracker.sequence_id();
            pending.remove(&sequence_id);
            if timer_tracker.expire() {
                warn!(sequence_id, "No confirmation before the acknowledgment deadline");
            }
        });
        tracker.set_deadline(timer);
    }

    /// Ask the peer for status and wait for the correlated response
    ///
    /// Fails with [`SessionError::StatusTimeout`] at or after the
    /// acknowledgment deadline, never before.
    pub async fn request_status(
        &self,
        outbound: &dyn Outbound,
        fields: Vec<String>,
    ) -> Result<StatusMap, SessionError> {
        let deadline = Instant::now() + self.ack_deadline;
        let message = outbound
            .stamp(StatusRequestPayload { fields }.into())
            .map_err(DeliveryError::from)?;
        let sequence_id = message.sequence_id();

        let (tx, rx) = oneshot::channel();
        self.pending_status.insert(sequence_id, tx);
        // Also covers callers that abandon the request mid-wait
        let _waiter = StatusWaiter {
            pending: &self.pending_status,
            sequence_id,
        };

        outbound
            .dispatch(&message)
            .await
            .map_err(SessionError::Delivery)?;

        match tokio::time::timeout_at(deadline, rx).await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(_)) => Err(SessionError::ShutDown),
            Err(_) => {
                warn!(sequence_id, "Status request timed out");
                Err(SessionError::StatusTimeout {
                    timeout_ms: self.ack_deadline.as_millis() as u64,
                })
            }
        }
    }

    /// Process one decoded inbound message
    ///
    /// `origin` identifies the sender for duplicate suppression.
    pub async fn handle_inbound(
        &self,
        outbound: &dyn Outbound,
        message: &Message,
        origin: &str,
    ) -> InboundOutcome {
        let message_type = message.message_type();
        let sequence_id = message.sequence_id();

        if message_type != MessageType::Heartbeat && !self.dedup.observe(origin, sequence_id) {
            debug!(origin, sequence_id, %message_type, "Dropping duplicate message");
            return InboundOutcome::Duplicate;
        }

        match message.payload() {
            Payload::Heartbeat(_) => {
                self.observe(message).await;
                InboundOutcome::Accepted
            }
            Payload::Confirmation(confirmation) => {
                self.apply_confirmation(confirmation);
                self.observe(message).await;
                InboundOutcome::Accepted
            }
            Payload::StatusResponse(response) => {
                match self.pending_status.remove(&response.request_sequence_id) {
                    Some((_, waiter)) => {
                        let _ = waiter.send(response.status.clone());
                    }
                    None => debug!(
                        request_sequence_id = response.request_sequence_id,
                        "Status response for unknown or expired request"
                    ),
                }
                self.observe(message).await;
                InboundOutcome::Accepted
            }
            Payload::Signal(_) => self.handle_signal(outbound, message).await,
            Payload::StatusRequest(request) => {
                self.handle_status_request(outbound, message, request).await
            }
        }
    }

    fn apply_confirmation(&self, confirmation: &ConfirmationPayload) {
        let acked = confirmation.acked_sequence_id;
        let tracker = self.pending.get(&acked).map(|entry| entry.value().clone());
        match tracker {
            Some(tracker) => {
                if tracker.acknowledge() {
                    self.pending.remove(&acked);
                    debug!(sequence_id = acked, "Delivery confirmed");
                }
            }
            None => debug!(sequence_id = acked, "Confirmation for unknown or expired delivery"),
        }
    }

    /// Run an optional observer handler; its result does not affect the outcome
    async fn observe(&self, message: &Message) {
        if let Some(handler) = self.handlers.get(message.message_type()) {
            if let Err(e) = handler.handle(message).await {
                debug!(message_type = %message.message_type(), error = %e, "Observer handler failed");
            }
        }
    }

    async fn handle_signal(&self, outbound: &dyn Outbound, message: &Message) -> InboundOutcome {
        let sequence_id = message.sequence_id();
        let Some(handler) = self.handlers.get(MessageType::Signal) else {
            warn!(sequence_id, "No handler registered for signals");
            return InboundOutcome::Rejected("no handler registered for signal".to_string());
        };

        match handler.handle(message).await {
            Ok(_) => {
                let confirmation = ConfirmationPayload {
                    acked_sequence_id: sequence_id,
                };
                self.send_reply(outbound, confirmation.into()).await;
                InboundOutcome::Accepted
            }
            Err(e) => {
                warn!(sequence_id, error = %e, "Signal handler failed; no confirmation sent");
                InboundOutcome::Rejected(e.to_string())
            }
        }
    }

    async fn handle_status_request(
        &self,
        outbound: &dyn Outbound,
        message: &Message,
        request: &StatusRequestPayload,
    ) -> InboundOutcome {
        let mut status = outbound.bridge_status();

        if let Some(handler) = self.handlers.get(MessageType::StatusRequest) {
            match handler.handle(message).await {
                Ok(HandlerOutcome::Status(extra)) => status.extend(extra),
                Ok(HandlerOutcome::Processed) => {}
                Err(e) => {
                    warn!(sequence_id = message.sequence_id(), error = %e, "Status handler failed");
                    return InboundOutcome::Rejected(e.to_string());
                }
            }
        }

        if !request.fields.is_empty() {
            status.retain(|key, _| request.fields.iter().any(|field| field == key));
        }

        let response = StatusResponsePayload {
            request_sequence_id: message.sequence_id(),
            status,
        };
        self.send_reply(outbound, response.into()).await;
        InboundOutcome::Accepted
    }

    /// Replies are fire-and-forget; the requester's deadline covers losses
    async fn send_reply(&self, outbound: &dyn Outbound, payload: Payload) {
        let message_type = payload.message_type();
        let message = match outbound.stamp(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(%message_type, error = %e, "Failed to build reply");
                return;
            }
        };
        if let Err(e) = outbound.dispatch(&message).await {
            warn!(%message_type, error = %e, category = e.category(), "Failed to dispatch reply");
        }
    }

    /// Fail every outstanding delivery and request
    pub fn shutdown(&self) {
        let trackers: Vec<Arc<DeliveryTracker>> =
            self.pending.iter().map(|entry| entry.value().clone()).collect();
        self.pending.clear();
        for tracker in trackers {
            tracker.fail(FailureReason::ShutDown);
        }
        // Dropping the senders wakes waiters with ShutDown
        self.pending_status.clear();
    }
}

/// Unregisters a status request when its future completes or is dropped
struct StatusWaiter<'a> {
    pending: &'a DashMap<u64, oneshot::Sender<StatusMap>>,
    sequence_id: u64,
}

impl Drop for StatusWaiter<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.sequence_id);
    }
}

fn failure_reason(error: &DeliveryError) -> FailureReason {
    match error {
        DeliveryError::LockContention { .. } => FailureReason::LockContention,
        DeliveryError::ShutDown => FailureReason::ShutDown,
        other => FailureReason::Mailbox(other.to_string()),
    }
}
