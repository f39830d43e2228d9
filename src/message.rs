//! The messages delivered to subscribers, and their JSON wire form.

use serde::{Deserialize, Serialize};

/// A message sent to a subscriber channel.
///
/// Serializes as `{"type": "historical", "lines": [..]}` or
/// `{"type": "realtime", "log_id": "..", "message": ".."}`. Clients depend on
/// those field names and `type` values.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Message {
    /// Backlog sent once to a newly connected subscriber.
    Historical { lines: Vec<String> },
    /// One line appended to a watched file.
    Realtime {
        log_id: String,
        #[serde(rename = "message")]
        text: String,
    },
}

impl Message {
    pub fn historical(lines: Vec<String>) -> Self {
        Message::Historical { lines }
    }

    pub fn realtime(log_id: impl Into<String>, text: impl Into<String>) -> Self {
        Message::Realtime {
            log_id: log_id.into(),
            text: text.into(),
        }
    }

    /// Encodes the message in its wire form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_historical_wire_shape() {
        let msg = Message::historical(vec!["[app] a".to_string(), "[app] b".to_string()]);
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({"type": "historical", "lines": ["[app] a", "[app] b"]})
        );
    }

    #[test]
    fn test_realtime_wire_shape() {
        let msg = Message::realtime("nginx", "GET /");
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();

        assert_eq!(
            value,
            json!({"type": "realtime", "log_id": "nginx", "message": "GET /"})
        );
    }

    #[test]
    fn test_parse_client_payload() {
        let raw = r#"{"type":"realtime","log_id":"db","message":"ready"}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();

        assert_eq!(msg, Message::realtime("db", "ready"));
        assert!(serde_json::from_str::<Message>(r#"{"type":"other"}"#).is_err());
    }
}
