//! The contract between the orchestrator and the bus it runs on.
//!
//! The transport owns the wire: it accepts calls and broadcasts, and when
//! [`Transport::spin`] is driven it reports what happened since the last
//! spin through the [`EventSink`]. Everything is delivered on the caller's
//! thread, from inside `spin`.

use std::time::Duration;

use crate::NodeId;
use crate::error::{BusError, CallFailure, SubmitError};
use crate::msg::{BeepCommand, Indication, RequestPayload, ResponsePayload};
use crate::service::{CallId, CallKind};

/// A call handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub id: CallId,
    pub kind: CallKind,
    pub target: NodeId,
    pub request: RequestPayload,
}

/// The single outcome of a [`Call`].
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub id: CallId,
    pub kind: CallKind,
    pub server: NodeId,
    pub outcome: Result<ResponsePayload, CallFailure>,
}

impl Completion {
    pub fn success(call: &Call, response: impl Into<ResponsePayload>) -> Self {
        Self {
            id: call.id,
            kind: call.kind,
            server: call.target,
            outcome: Ok(response.into()),
        }
    }

    pub fn failure(call: &Call, failure: CallFailure) -> Self {
        Self {
            id: call.id,
            kind: call.kind,
            server: call.target,
            outcome: Err(failure),
        }
    }
}

/// Fire-and-forget messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Broadcast {
    Beep(BeepCommand),
}

#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Completion(Completion),
    Indication(Indication),
}

/// Where a transport reports completions and indications.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: flume::Sender<BusEvent>,
}

impl EventSink {
    pub fn channel() -> (EventSink, flume::Receiver<BusEvent>) {
        let (tx, rx) = flume::unbounded();
        (EventSink { tx }, rx)
    }

    pub fn complete(&self, completion: Completion) {
        if self.tx.send(BusEvent::Completion(completion)).is_err() {
            tracing::trace!("[BUS] completion dropped, orchestrator gone");
        }
    }

    pub fn indicate(&self, indication: Indication) {
        if self.tx.send(BusEvent::Indication(indication)).is_err() {
            tracing::trace!("[BUS] indication dropped, orchestrator gone");
        }
    }
}

pub trait Transport: Send {
    /// Queue `call` for transmission. Exactly one [`Completion`] for
    /// `call.id` must follow through a later `spin`, unless this returns an
    /// error.
    fn submit(&mut self, call: Call) -> Result<(), SubmitError>;

    fn broadcast(&mut self, message: Broadcast) -> Result<(), SubmitError>;

    /// Drive bus I/O for at most `budget`.
    fn spin(&mut self, budget: Duration, sink: &EventSink) -> Result<(), BusError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn submit(&mut self, call: Call) -> Result<(), SubmitError> {
        (**self).submit(call)
    }

    fn broadcast(&mut self, message: Broadcast) -> Result<(), SubmitError> {
        (**self).broadcast(message)
    }

    fn spin(&mut self, budget: Duration, sink: &EventSink) -> Result<(), BusError> {
        (**self).spin(budget, sink)
    }
}
