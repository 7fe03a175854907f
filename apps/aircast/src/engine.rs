//! Negotiation engine abstraction and its WebRTC-backed implementation.
//!
//! The controller only ever talks to the trait; tests substitute a mock and
//! count instantiations through the factory seam.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::debug;

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::TrackLocal;

use crate::media::LocalAudioStream;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine setup failed: {0}")]
    Setup(String),
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("engine already released")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdpKind {
    Offer,
    Answer,
}

/// A committed or proposed session description.
#[derive(Debug, Clone)]
pub struct SessionDescription {
    pub kind: SdpKind,
    pub sdp: String,
}

/// A single connectivity candidate in transferable form.
#[derive(Debug, Clone)]
pub struct CandidateInit {
    pub candidate: String,
    pub sdp_mline_index: u32,
    pub sdp_mid: String,
}

/// Notifications the engine pushes up to the controller.
#[derive(Debug)]
pub enum EngineEvent {
    /// A local connectivity candidate was discovered.
    LocalCandidate(CandidateInit),
    /// A remote media track started flowing.
    RemoteTrack { id: String },
}

#[async_trait]
pub trait NegotiationEngine: Send + Sync {
    async fn attach_local_audio(&self, stream: &LocalAudioStream) -> Result<(), EngineError>;
    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;
    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;
    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError>;
    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError>;
    async fn add_remote_candidate(&self, candidate: CandidateInit) -> Result<(), EngineError>;

    /// Take the engine's event stream; yields None after the first call.
    async fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>>;

    async fn close(&self) -> Result<(), EngineError>;
}

/// Creation seam so role selection can be guarded and tested.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self) -> Result<Arc<dyn NegotiationEngine>, EngineError>;
}

fn setup_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Setup(e.to_string())
}

fn negotiation_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Negotiation(e.to_string())
}

/// Engine backed by `webrtc::RTCPeerConnection`.
pub struct WebRtcEngine {
    pc: Arc<RTCPeerConnection>,
    events_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
}

impl WebRtcEngine {
    pub async fn new(stun_servers: &[String]) -> Result<Self, EngineError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(setup_err)?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(setup_err)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: stun_servers.to_vec(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await.map_err(setup_err)?);

        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let candidate_tx = events_tx.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let tx = candidate_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(json) => {
                        let _ = tx.send(EngineEvent::LocalCandidate(CandidateInit {
                            candidate: json.candidate,
                            sdp_mline_index: u32::from(json.sdp_mline_index.unwrap_or(0)),
                            sdp_mid: json.sdp_mid.unwrap_or_default(),
                        }));
                    }
                    Err(e) => debug!(error = %e, "failed to serialize local candidate"),
                }
            })
        }));

        let track_tx = events_tx;
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let tx = track_tx.clone();
            Box::pin(async move {
                if track.kind() == RTPCodecType::Audio {
                    let _ = tx.send(EngineEvent::RemoteTrack { id: track.id() });
                }
            })
        }));

        Ok(Self {
            pc,
            events_rx: AsyncMutex::new(Some(events_rx)),
        })
    }
}

#[async_trait]
impl NegotiationEngine for WebRtcEngine {
    async fn attach_local_audio(&self, stream: &LocalAudioStream) -> Result<(), EngineError> {
        for track in &stream.tracks {
            self.pc
                .add_track(Arc::clone(track) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .map_err(setup_err)?;
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self.pc.create_offer(None).await.map_err(negotiation_err)?;
        Ok(SessionDescription {
            kind: SdpKind::Offer,
            sdp: offer.sdp,
        })
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let answer = self.pc.create_answer(None).await.map_err(negotiation_err)?;
        Ok(SessionDescription {
            kind: SdpKind::Answer,
            sdp: answer.sdp,
        })
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let desc = to_rtc_description(&desc)?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(negotiation_err)
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let desc = to_rtc_description(&desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(negotiation_err)
    }

    async fn add_remote_candidate(&self, candidate: CandidateInit) -> Result<(), EngineError> {
        let init = to_rtc_candidate(candidate)?;
        self.pc.add_ice_candidate(init).await.map_err(negotiation_err)
    }

    async fn take_events(&self) -> Option<mpsc::UnboundedReceiver<EngineEvent>> {
        self.events_rx.lock().await.take()
    }

    async fn close(&self) -> Result<(), EngineError> {
        self.pc.close().await.map_err(negotiation_err)
    }
}

fn to_rtc_description(desc: &SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp.clone()).map_err(negotiation_err),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp.clone()).map_err(negotiation_err),
    }
}

fn to_rtc_candidate(candidate: CandidateInit) -> Result<RTCIceCandidateInit, EngineError> {
    let sdp_mline_index = u16::try_from(candidate.sdp_mline_index)
        .map_err(|_| EngineError::Negotiation(format!(
            "media line index {} out of range",
            candidate.sdp_mline_index
        )))?;
    Ok(RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: Some(candidate.sdp_mid),
        sdp_mline_index: Some(sdp_mline_index),
        username_fragment: None,
    })
}

pub struct WebRtcEngineFactory {
    stun_servers: Vec<String>,
}

impl WebRtcEngineFactory {
    pub fn new(stun_servers: Vec<String>) -> Self {
        Self { stun_servers }
    }
}

#[async_trait]
impl EngineFactory for WebRtcEngineFactory {
    async fn create(&self) -> Result<Arc<dyn NegotiationEngine>, EngineError> {
        let engine = WebRtcEngine::new(&self.stun_servers).await?;
        Ok(Arc::new(engine))
    }
}
