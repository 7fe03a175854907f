use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages a peer sends to the relay.
///
/// The `signal` payload is deliberately opaque here: the relay routes it
/// verbatim and never inspects offer/answer/candidate contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Associate this connection with a caller-supplied identifier.
    Register { id: String },
    /// Forward a negotiation payload to another registered identifier.
    Signal {
        target: String,
        from: String,
        signal: Value,
    },
}

/// Messages the relay sends to a peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    Signal { signal: Value, from: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn register_wire_shape() {
        let env: ClientEnvelope =
            serde_json::from_value(json!({"type": "register", "id": "sender"})).unwrap();
        match env {
            ClientEnvelope::Register { id } => assert_eq!(id, "sender"),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn signal_payload_stays_opaque() {
        let env: ClientEnvelope = serde_json::from_value(json!({
            "type": "signal",
            "target": "receiver",
            "from": "sender",
            "signal": {"type": "offer", "sdp": "v=0"},
        }))
        .unwrap();
        match env {
            ClientEnvelope::Signal { target, from, signal } => {
                assert_eq!(target, "receiver");
                assert_eq!(from, "sender");
                assert_eq!(signal, json!({"type": "offer", "sdp": "v=0"}));
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn relayed_signal_wire_shape() {
        let env = ServerEnvelope::Signal {
            signal: json!({"type": "answer", "sdp": "v=0"}),
            from: "receiver".to_string(),
        };
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "signal",
                "signal": {"type": "answer", "sdp": "v=0"},
                "from": "receiver",
            })
        );
    }
}
