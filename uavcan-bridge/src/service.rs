use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::NodeId;
use crate::error::{CallFailure, SubmitError};
use crate::msg::Service;
use crate::transport::{Call, Completion, Transport};

/// Which logical client a call belongs to. Completions are routed back by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum CallKind {
    #[strum(serialize = "param get/set")]
    ParamGetSet,
    #[strum(serialize = "enumeration begin")]
    EnumerationBegin,
    #[strum(serialize = "enumeration get/set")]
    EnumerationGetSet,
    #[strum(serialize = "enumeration save")]
    EnumerationSave,
    #[strum(serialize = "restart")]
    RestartNode,
    #[strum(serialize = "opcode")]
    ExecuteOpcode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u64);

/// Source of call ids, shared by every client of one orchestrator.
#[derive(Debug, Default)]
pub struct CallCounter(AtomicU64);

impl CallCounter {
    pub fn next(&self) -> CallId {
        CallId(self.0.fetch_add(1, Ordering::AcqRel))
    }
}

#[derive(Debug)]
struct Pending<C> {
    id: CallId,
    target: NodeId,
    context: C,
}

/// The resolved outcome of one call, with the context it was submitted with.
#[derive(Debug)]
pub struct Reply<R, C> {
    pub server: NodeId,
    pub context: C,
    pub outcome: Result<R, CallFailure>,
}

/// A typed client for service `S`.
///
/// The client remembers which calls it has outstanding and refuses new ones
/// once `max_pending` is reached. With `max_pending == 1` it is either idle
/// or awaiting exactly one reply. `C` is caller-defined state carried with
/// each call and handed back in its [`Reply`].
pub struct ServiceClient<S: Service, C = ()> {
    kind: CallKind,
    counter: Arc<CallCounter>,
    max_pending: usize,
    pending: Vec<Pending<C>>,
    _phantom_data: PhantomData<S>,
}

impl<S: Service, C> ServiceClient<S, C> {
    pub fn new(kind: CallKind, counter: Arc<CallCounter>) -> Self {
        Self::with_capacity(kind, counter, 1)
    }

    pub fn with_capacity(kind: CallKind, counter: Arc<CallCounter>, max_pending: usize) -> Self {
        Self {
            kind,
            counter,
            max_pending: max_pending.max(1),
            pending: Vec::new(),
            _phantom_data: PhantomData,
        }
    }

    pub fn kind(&self) -> CallKind {
        self.kind
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending_for(&self, target: NodeId) -> bool {
        self.pending.iter().any(|p| p.target == target)
    }

    /// Contexts of the outstanding calls, oldest first.
    pub fn pending_contexts(&self) -> impl Iterator<Item = (NodeId, &C)> {
        self.pending.iter().map(|p| (p.target, &p.context))
    }

    pub fn call(
        &mut self,
        transport: &mut dyn Transport,
        target: NodeId,
        request: S::Request,
        context: C,
    ) -> Result<CallId, SubmitError> {
        if self.pending.len() >= self.max_pending {
            return Err(SubmitError::Busy { kind: self.kind });
        }
        let id = self.counter.next();
        transport.submit(Call {
            id,
            kind: self.kind,
            target,
            request: request.into(),
        })?;
        tracing::trace!("[CLN] {} call {:?} -> node {target}", S::NAME, id);
        self.pending.push(Pending {
            id,
            target,
            context,
        });
        Ok(id)
    }

    /// Match a completion against the outstanding calls.
    ///
    /// Returns `None` for completions this client did not issue, or already
    /// resolved.
    pub fn resolve(&mut self, completion: Completion) -> Option<Reply<S::Response, C>> {
        if completion.kind != self.kind {
            return None;
        }
        let Some(pos) = self.pending.iter().position(|p| p.id == completion.id) else {
            tracing::debug!(
                "[CLN] {} ignoring unknown completion {:?} from node {}",
                S::NAME,
                completion.id,
                completion.server
            );
            return None;
        };
        let pending = self.pending.remove(pos);
        let outcome = completion
            .outcome
            .and_then(|payload| {
                <S::Response as TryFrom<_>>::try_from(payload).map_err(|_| CallFailure::Malformed)
            });
        Some(Reply {
            server: pending.target,
            context: pending.context,
            outcome,
        })
    }
}
