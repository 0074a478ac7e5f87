//! Outbound messages and the sink that receives them.
//!
//! The packetizer fills in only the envelope fields it owns. Encoding the
//! envelope and transmitting it belong to the transport layer behind the
//! [`MessageSink`].

/// `function_id` carried by streamed data frames.
pub const NO_FUNCTION_ID: u32 = 0;

/// `correlation_id` carried by streamed data frames.
pub const NO_CORRELATION_ID: u32 = 0;

/// Service type tag of the outer protocol envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[non_exhaustive]
pub enum SessionType {
    /// Video stream for the navigation projection channel.
    MobileNav = 0x0B,
}

impl SessionType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// One chunk of stream data wrapped for the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub session_id: u8,
    pub session_type: SessionType,
    pub function_id: u32,
    pub correlation_id: u32,
    pub payload: Vec<u8>,
}

impl OutboundMessage {
    /// Navigation video data: no function, no correlation.
    pub fn nav_data(session_id: u8, payload: Vec<u8>) -> Self {
        Self {
            session_id,
            session_type: SessionType::MobileNav,
            function_id: NO_FUNCTION_ID,
            correlation_id: NO_CORRELATION_ID,
            payload,
        }
    }
}

/// Receiver of outbound messages.
///
/// Delivery has no return value: retries, queuing and failure handling are
/// the sink's own concern. Implemented for any `Fn(OutboundMessage)` closure,
/// so a channel sender can be adapted with `move |m| { let _ = tx.send(m); }`.
pub trait MessageSink: Send + Sync {
    fn deliver(&self, message: OutboundMessage);
}

impl<F> MessageSink for F
where
    F: Fn(OutboundMessage) + Send + Sync,
{
    fn deliver(&self, message: OutboundMessage) {
        self(message)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn nav_data_uses_sentinel_ids() {
        let message = OutboundMessage::nav_data(7, vec![1, 2]);
        assert_eq!(message.session_id, 7);
        assert_eq!(message.session_type, SessionType::MobileNav);
        assert_eq!(message.function_id, NO_FUNCTION_ID);
        assert_eq!(message.correlation_id, NO_CORRELATION_ID);
        assert_eq!(message.payload, vec![1, 2]);
    }

    #[test]
    fn nav_session_type_wire_value() {
        assert_eq!(SessionType::MobileNav.as_u8(), 0x0B);
        assert_eq!(OutboundMessage::nav_data(0, Vec::new()).session_type.as_u8(), 0x0B);
    }

    #[test]
    fn closure_sink_forwards_to_channel() {
        let (tx, rx) = mpsc::channel();
        let sink = move |message: OutboundMessage| {
            let _ = tx.send(message);
        };
        sink.deliver(OutboundMessage::nav_data(1, vec![9]));
        assert_eq!(rx.recv().unwrap().payload, vec![9]);
    }
}
