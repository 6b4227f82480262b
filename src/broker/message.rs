use serde::{Deserialize, Serialize};

/// An event published to a topic.
///
/// Events are immutable once published; the broker clones them once per
/// group it dispatches to. On the wire the payload is base64 encoded, the
/// same mapping protobuf uses for `bytes` in JSON.
///
/// # Example
///
/// ```rust
/// use switchback::broker::message::Event;
///
/// let event = Event::new("orders", b"{\"id\":1}".to_vec());
/// assert_eq!(event.topic, "orders");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    #[serde(with = "base64_payload")]
    pub payload: Vec<u8>,
}

impl Event {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// A request to join `topic` as a member of `group`.
///
/// An empty `group` asks the broker for a private, freshly named group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub topic: String,
    #[serde(default)]
    pub group: String,
}

impl Subscription {
    pub fn new(topic: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
        }
    }
}

mod base64_payload {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(payload))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded.as_bytes()).map_err(de::Error::custom)
    }
}
