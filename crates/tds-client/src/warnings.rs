//! Warning chain.
//!
//! Messages are kept in arrival order. The first error at or above the
//! fatal severity is held back and raised once, at the next checkpoint;
//! fatal errors after it are ordinary entries of the chain.

use tds_protocol::{MessageKind, ServerMessage};

use crate::error::Error;

/// Messages accumulated during one execution.
#[derive(Debug, Clone)]
pub struct WarningChain {
    messages: Vec<ServerMessage>,
    fatal: Option<ServerMessage>,
    fatal_seen: bool,
    fatal_severity: u8,
}

impl WarningChain {
    pub(crate) fn new(fatal_severity: u8) -> Self {
        Self {
            messages: Vec::new(),
            fatal: None,
            fatal_seen: false,
            fatal_severity,
        }
    }

    pub(crate) fn push(&mut self, msg: ServerMessage) {
        let fatal = msg.kind == MessageKind::Error && msg.class >= self.fatal_severity;
        if fatal && !self.fatal_seen {
            tracing::debug!(number = msg.number, class = msg.class, "fatal server error queued");
            self.fatal_seen = true;
            self.fatal = Some(msg);
            return;
        }
        match msg.kind {
            MessageKind::Info => tracing::debug!(number = msg.number, message = %msg.message, "server info"),
            MessageKind::Error => tracing::debug!(number = msg.number, class = msg.class, message = %msg.message, "server warning"),
        }
        self.messages.push(msg);
    }

    /// Whether a fatal error is waiting to be raised.
    pub(crate) fn has_fatal(&self) -> bool {
        self.fatal.is_some()
    }

    /// Surface the pending fatal error. Yields it at most once per execution.
    pub(crate) fn take_fatal(&mut self) -> Option<Error> {
        self.fatal.take().map(|msg| Error::from(&msg))
    }

    /// Messages in arrival order, without the raised fatal error.
    #[must_use]
    pub fn messages(&self) -> &[ServerMessage] {
        &self.messages
    }

    /// Iterate over the messages in arrival order.
    pub fn iter(&self) -> std::slice::Iter<'_, ServerMessage> {
        self.messages.iter()
    }

    /// Number of messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Forget all messages, including a fatal error not yet raised.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.fatal = None;
        self.fatal_seen = false;
    }
}

impl<'a> IntoIterator for &'a WarningChain {
    type Item = &'a ServerMessage;
    type IntoIter = std::slice::Iter<'a, ServerMessage>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn msg(kind: MessageKind, number: i32, class: u8) -> ServerMessage {
        ServerMessage {
            kind,
            number,
            state: 1,
            class,
            message: format!("message {number}"),
            server: String::new(),
            procedure: String::new(),
            line: 1,
        }
    }

    #[test]
    fn test_fifo_and_single_fatal() {
        let mut chain = WarningChain::new(11);
        chain.push(msg(MessageKind::Info, 1, 0));
        chain.push(msg(MessageKind::Error, 2, 10));
        chain.push(msg(MessageKind::Error, 3, 16));
        chain.push(msg(MessageKind::Error, 4, 16));
        chain.push(msg(MessageKind::Info, 5, 0));

        let numbers: Vec<_> = chain.iter().map(|m| m.number).collect();
        assert_eq!(numbers, [1, 2, 4, 5]);
        assert!(chain.has_fatal());
        assert!(chain.take_fatal().unwrap().is_server_error(3));
        assert!(chain.take_fatal().is_none());
        assert_eq!(chain.len(), 4);
    }

    #[test]
    fn test_threshold() {
        let mut chain = WarningChain::new(17);
        chain.push(msg(MessageKind::Error, 1, 16));
        assert!(!chain.has_fatal());
        // informational messages are never fatal
        chain.push(msg(MessageKind::Info, 2, 20));
        assert!(!chain.has_fatal());
    }

    #[test]
    fn test_clear_resets_fatal() {
        let mut chain = WarningChain::new(11);
        chain.push(msg(MessageKind::Error, 1, 16));
        chain.clear();
        assert!(chain.is_empty());
        assert!(chain.take_fatal().is_none());
        chain.push(msg(MessageKind::Error, 2, 16));
        assert!(chain.has_fatal());
    }
}
