//! Chat history.

use std::collections::VecDeque;

use parking_lot::Mutex;

use livecast_ipc::ChatMessage;
use livecast_transport::ChatPayload;

/// Recent chat messages in both directions, oldest first.
pub struct ChatRelay {
    history: Mutex<VecDeque<ChatMessage>>,
    capacity: usize,
}

impl ChatRelay {
    pub fn new(capacity: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    fn remember(&self, message: ChatMessage) {
        if self.capacity == 0 {
            return;
        }
        let mut history = self.history.lock();
        while history.len() >= self.capacity {
            history.pop_front();
        }
        history.push_back(message);
    }

    /// Record an outgoing message and build its payload.
    pub fn outgoing(&self, text: String) -> ChatPayload {
        self.remember(ChatMessage {
            from: None,
            text: text.clone(),
        });
        ChatPayload { from: None, text }
    }

    /// Record an inbound message and convert it for the caller.
    pub fn incoming(&self, payload: ChatPayload) -> ChatMessage {
        let message = ChatMessage {
            from: payload.from,
            text: payload.text,
        };
        self.remember(message.clone());
        message
    }

    pub fn history(&self) -> Vec<ChatMessage> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.history.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded() {
        let relay = ChatRelay::new(2);
        relay.outgoing("one".into());
        relay.incoming(ChatPayload {
            from: Some("viewer".into()),
            text: "two".into(),
        });
        relay.outgoing("three".into());

        let history = relay.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].from.as_deref(), Some("viewer"));
        assert_eq!(history[1].text, "three");
        assert!(history[1].from.is_none());
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let relay = ChatRelay::new(0);
        let payload = relay.outgoing("hi".into());
        assert_eq!(payload.text, "hi");
        assert!(relay.history().is_empty());
    }
}
