use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use super::connection::ConnectionId;
use super::protocol::MessageKind;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub connection: ConnectionId,
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

/// Hand-off point between transport threads and the frame loop.
///
/// Clones share the same queue. Transport callbacks push from any thread; the
/// protocol loop drains once per frame.
#[derive(Debug, Clone, Default)]
pub struct InboundQueue {
    inner: Arc<Mutex<VecDeque<InboundMessage>>>,
}

impl InboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, message: InboundMessage) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(message);
    }

    pub fn drain(&self) -> Vec<InboundMessage> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_cross_thread_handoff() {
        let queue = InboundQueue::new();
        let connection = ConnectionId::new(1).unwrap();

        let handles: Vec<_> = (0..4u8)
            .map(|worker| {
                let queue = queue.clone();
                thread::spawn(move || {
                    for i in 0..25u8 {
                        queue.push(InboundMessage {
                            connection,
                            kind: MessageKind::Pong,
                            payload: vec![worker, i],
                        });
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(queue.len(), 100);
        assert_eq!(queue.drain().len(), 100);
        assert!(queue.is_empty());
    }
}
