use crate::NodeId;
use crate::transport::Transport;

/// What a state machine may touch while handling one step.
pub struct BusContext<'a> {
    pub transport: &'a mut dyn Transport,
    pub directory: &'a dyn NodeDirectory,
    /// Own address, never a walk target.
    pub local: Option<NodeId>,
}

impl BusContext<'_> {
    pub fn walk(&self) -> NodeWalk<'_> {
        NodeWalk::new(self.directory, self.local)
    }
}

/// Knowledge of which nodes are present on the bus.
pub trait NodeDirectory: Send {
    fn is_known(&self, node: NodeId) -> bool;

    /// Drop all cached node metadata, forcing re-discovery.
    fn invalidate_all(&mut self);
}

impl<D: NodeDirectory + ?Sized> NodeDirectory for Box<D> {
    fn is_known(&self, node: NodeId) -> bool {
        (**self).is_known(node)
    }

    fn invalidate_all(&mut self) {
        (**self).invalidate_all()
    }
}

/// Ordered walk over the known remote nodes, skipping the local node.
#[derive(Clone, Copy)]
pub struct NodeWalk<'a> {
    directory: &'a dyn NodeDirectory,
    local: Option<NodeId>,
}

impl<'a> NodeWalk<'a> {
    pub fn new(directory: &'a dyn NodeDirectory, local: Option<NodeId>) -> Self {
        Self { directory, local }
    }

    fn is_remote_known(&self, node: NodeId) -> bool {
        Some(node) != self.local && self.directory.is_known(node)
    }

    /// Lowest known node at or above `start`.
    pub fn first_known_from(&self, start: NodeId) -> Option<NodeId> {
        start.upward().find(|n| self.is_remote_known(*n))
    }

    /// Lowest known node strictly above `node`.
    pub fn next_known_after(&self, node: NodeId) -> Option<NodeId> {
        node.successor().and_then(|n| self.first_known_from(n))
    }

    pub fn first(&self) -> Option<NodeId> {
        self.first_known_from(NodeId::MIN)
    }

    /// All known remote nodes, ascending.
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        NodeId::MIN.upward().filter(|n| self.is_remote_known(*n))
    }
}
