//! In-process typed topics connecting the bridge to the rest of the vehicle.
//!
//! Every subscriber owns a bounded queue that drops the OLDEST element when
//! full, so a depth of 1 gives latest-value semantics. Subscribers only see
//! messages published after they subscribed.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

/// A bounded queue that drops the OLDEST element when full.
pub struct BoundedQueue<T> {
    data: Mutex<VecDeque<T>>,
    not_empty: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            data: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    /// Push an item, dropping the oldest if at capacity.
    ///
    /// Returns `true` if an item was dropped.
    pub fn push(&self, item: T) -> bool {
        let mut data = self.data.lock();
        let dropped = if data.len() >= self.capacity {
            data.pop_front();
            true
        } else {
            false
        };
        data.push_back(item);
        self.not_empty.notify_one();
        dropped
    }

    pub fn try_recv(&self) -> Option<T> {
        self.data.lock().pop_front()
    }

    /// Returns `None` if nothing arrived within `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        let mut data = self.data.lock();
        if data.is_empty() {
            let result = self.not_empty.wait_for(&mut data, timeout);
            if result.timed_out() && data.is_empty() {
                return None;
            }
        }
        data.pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.data.lock().len()
    }
}

struct TopicInner<T> {
    name: String,
    depth: usize,
    subscribers: Mutex<Vec<Weak<BoundedQueue<T>>>>,
}

/// A named, typed, in-process topic. Cloning yields another handle to the
/// same topic.
pub struct Topic<T> {
    inner: Arc<TopicInner<T>>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Clone> Topic<T> {
    pub fn new(name: impl Into<String>, depth: usize) -> Self {
        Self {
            inner: Arc::new(TopicInner {
                name: name.into(),
                depth: depth.max(1),
                subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn advertise(&self) -> Publisher<T> {
        tracing::debug!("advertise {}", self.inner.name);
        Publisher {
            topic: self.inner.clone(),
        }
    }

    pub fn subscribe(&self) -> Subscriber<T> {
        let queue = Arc::new(BoundedQueue::new(self.inner.depth));
        self.inner.subscribers.lock().push(Arc::downgrade(&queue));
        Subscriber { queue }
    }
}

pub struct Publisher<T> {
    topic: Arc<TopicInner<T>>,
}

impl<T: Clone> Publisher<T> {
    /// Deliver `msg` to every live subscriber. Returns how many received it.
    pub fn publish(&self, msg: &T) -> usize {
        let mut subscribers = self.topic.subscribers.lock();
        subscribers.retain(|weak| weak.strong_count() > 0);
        let mut delivered = 0;
        for queue in subscribers.iter().filter_map(Weak::upgrade) {
            if queue.push(msg.clone()) {
                tracing::trace!("{}: subscriber queue full, dropped oldest", self.topic.name);
            }
            delivered += 1;
        }
        delivered
    }
}

pub struct Subscriber<T> {
    queue: Arc<BoundedQueue<T>>,
}

impl<T> Subscriber<T> {
    /// Whether a message is waiting.
    pub fn check(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn take(&self) -> Option<T> {
        self.queue.try_recv()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.queue.recv_timeout(timeout)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}
