use serde_json::Value;

use crate::Xid;

/// Tag of an [`Event`]: either a synthetic lifecycle event the core
/// generates itself, or a message type name forwarded verbatim from the
/// helper.
///
/// Kept as a string rather than a closed enum of OpenFlow message types —
/// the core treats the message body as an opaque mapping and deliberately
/// does not attempt to statically model every OpenFlow message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    ChannelUp,
    ChannelDown,
    ChannelAlert,
    /// An in-band shutdown request translated from an OS signal.
    Signal,
    /// Any other message type name the helper forwards, lowercased.
    Message(String),
}

impl EventType {
    /// Classifies a raw `type` string from an `OFP.MESSAGE` notification.
    pub fn from_raw(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "CHANNEL_UP" => EventType::ChannelUp,
            "CHANNEL_DOWN" => EventType::ChannelDown,
            "CHANNEL_ALERT" => EventType::ChannelAlert,
            "SIGNAL" => EventType::Signal,
            _ => EventType::Message(raw.to_ascii_lowercase()),
        }
    }

    /// The handler-selection name used to build `on_<event>`, e.g.
    /// `"channel_up"`, `"packet_in"`.
    pub fn handler_name(&self) -> String {
        match self {
            EventType::ChannelUp => "channel_up".to_string(),
            EventType::ChannelDown => "channel_down".to_string(),
            EventType::ChannelAlert => "channel_alert".to_string(),
            EventType::Signal => "signal".to_string(),
            EventType::Message(name) => name.clone(),
        }
    }

    pub fn is_lifecycle(&self) -> bool {
        matches!(self, EventType::ChannelUp | EventType::ChannelDown)
    }
}

/// A decoded controller event: either synthesized by the core (CHANNEL_UP,
/// CHANNEL_DOWN, SIGNAL) or forwarded from the helper's `OFP.MESSAGE`
/// notifications.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: EventType,
    pub conn_id: Option<u64>,
    pub xid: Option<Xid>,
    pub body: Value,
}

impl Event {
    pub fn new(event_type: EventType, conn_id: Option<u64>, body: Value) -> Self {
        Self {
            event_type,
            conn_id,
            xid: None,
            body,
        }
    }

    pub fn with_xid(mut self, xid: Xid) -> Self {
        self.xid = Some(xid);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_lifecycle_events() {
        assert_eq!(EventType::from_raw("CHANNEL_UP"), EventType::ChannelUp);
        assert_eq!(EventType::from_raw("channel_down"), EventType::ChannelDown);
        assert!(EventType::ChannelUp.is_lifecycle());
        assert!(!EventType::ChannelAlert.is_lifecycle());
    }

    #[test]
    fn falls_back_to_message() {
        let ty = EventType::from_raw("PACKET_IN");
        assert_eq!(ty, EventType::Message("packet_in".to_string()));
        assert_eq!(ty.handler_name(), "packet_in");
    }
}
