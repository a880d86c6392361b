//! Event plumbing over crossbeam-channel.

use crossbeam_channel::{unbounded, Receiver, Sender};

use super::Event;

/// Where the cache reports what it did. Cheap to clone.
#[derive(Clone)]
pub struct EventSender {
    inner: Sender<Event>,
}

impl EventSender {
    /// Events sent after the receiver is gone are dropped
    pub fn send(&self, event: Event) {
        let _ = self.inner.send(event);
    }
}

/// Consumer side of an [`EventChannel`]
pub struct EventReceiver {
    inner: Receiver<Event>,
}

impl EventReceiver {
    /// Blocks between events; ends once every sender is dropped
    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.inner.iter()
    }

    /// Everything queued right now, without blocking
    pub fn drain(&self) -> Vec<Event> {
        self.inner.try_iter().collect()
    }
}

pub struct EventChannel;

impl EventChannel {
    /// Unbounded: lookups never wait on a slow listener
    pub fn new() -> (EventSender, EventReceiver) {
        let (inner, receiver) = unbounded();
        (EventSender { inner }, EventReceiver { inner: receiver })
    }
}

/// A sender nobody listens to
pub fn null_sender() -> EventSender {
    EventChannel::new().0
}
