//! Local audio acquisition.
//!
//! Device capture proper lives outside this core; the controller only needs
//! something that can enumerate sources and hand back engine-ready tracks.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use webrtc::api::media_engine::MIME_TYPE_OPUS;
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Opus DTX silence frame; keeps the track alive without a real capture.
const OPUS_SILENCE: &[u8] = &[0xf8, 0xff, 0xfe];
const FRAME_DURATION: Duration = Duration::from_millis(20);

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("no audio source matched {0:?}")]
    NoSource(String),
    #[error("audio capture failed: {0}")]
    Capture(String),
}

#[derive(Debug, Clone)]
pub struct AudioSourceInfo {
    pub id: String,
    pub label: String,
}

/// A live local audio stream whose tracks can be attached to an engine.
pub struct LocalAudioStream {
    pub label: String,
    pub tracks: Vec<Arc<TrackLocalStaticSample>>,
    pumps: Vec<tokio::task::JoinHandle<()>>,
}

impl Drop for LocalAudioStream {
    fn drop(&mut self) {
        for handle in self.pumps.drain(..) {
            handle.abort();
        }
    }
}

#[async_trait]
pub trait MediaCapture: Send + Sync {
    fn enumerate(&self) -> Vec<AudioSourceInfo>;

    /// Acquire a stream from the selected source, or the default source when
    /// no selector is given. Failure is terminal for the streaming attempt.
    async fn acquire(&self, source_id: Option<&str>) -> Result<LocalAudioStream, MediaError>;
}

/// Built-in capture that produces a silent Opus track.
///
/// Stands in for system-audio capture, which is delegated to the platform
/// layer outside this crate.
pub struct ToneCapture;

impl ToneCapture {
    const SOURCE_ID: &'static str = "tone";

    pub fn new() -> Self {
        Self
    }
}

impl Default for ToneCapture {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaCapture for ToneCapture {
    fn enumerate(&self) -> Vec<AudioSourceInfo> {
        vec![AudioSourceInfo {
            id: Self::SOURCE_ID.to_string(),
            label: "Built-in silent tone".to_string(),
        }]
    }

    async fn acquire(&self, source_id: Option<&str>) -> Result<LocalAudioStream, MediaError> {
        if let Some(id) = source_id {
            if id != Self::SOURCE_ID {
                return Err(MediaError::NoSource(id.to_string()));
            }
        }

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            "aircast".to_owned(),
        ));

        let writer = track.clone();
        let pump = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(FRAME_DURATION);
            loop {
                ticker.tick().await;
                let sample = Sample {
                    data: Bytes::from_static(OPUS_SILENCE),
                    duration: FRAME_DURATION,
                    ..Default::default()
                };
                // Errors here just mean the track is not attached yet.
                let _ = writer.write_sample(&sample).await;
            }
        });

        Ok(LocalAudioStream {
            label: "Built-in silent tone".to_string(),
            tracks: vec![track],
            pumps: vec![pump],
        })
    }
}

impl LocalAudioStream {
    /// Assemble a stream from pre-built tracks; used by captures that manage
    /// their own sample production.
    pub fn from_tracks(label: impl Into<String>, tracks: Vec<Arc<TrackLocalStaticSample>>) -> Self {
        Self {
            label: label.into(),
            tracks,
            pumps: Vec::new(),
        }
    }
}
