//! Wire protocol spoken with the relay.
//!
//! The relay routes `signal` payloads verbatim; only peers interpret them.

use serde::{Deserialize, Serialize};

/// Negotiation payload carried inside a signal envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalPayload {
    Offer {
        sdp: String,
    },
    Answer {
        sdp: String,
    },
    Candidate {
        candidate: String,
        #[serde(rename = "sdpMLineIndex")]
        sdp_mline_index: u32,
        #[serde(rename = "sdpMid")]
        sdp_mid: String,
    },
}

/// Messages sent from peer to relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    Register {
        id: String,
    },
    Signal {
        target: String,
        from: String,
        signal: SignalPayload,
    },
}

/// Messages sent from relay to peer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    Signal { signal: SignalPayload, from: String },
}
