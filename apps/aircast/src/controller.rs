//! Per-peer negotiation state machine.
//!
//! One controller drives one peer's half of the offer/answer/candidate
//! exchange. All transitions run under a single async mutex so an inbound
//! candidate can never land on an engine that is being replaced.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

use crate::engine::{
    CandidateInit, EngineError, EngineEvent, EngineFactory, NegotiationEngine, SdpKind,
    SessionDescription,
};
use crate::media::{LocalAudioStream, MediaCapture, MediaError};
use crate::protocol::{ClientEnvelope, ServerEnvelope, SignalPayload};
use crate::relay::{RelayError, RelayLink};

/// The part this peer plays in the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Listener,
}

impl Role {
    /// Default registration identifier for the two-party flow.
    pub fn default_id(&self) -> &'static str {
        match self {
            Role::Sender => "sender",
            Role::Listener => "receiver",
        }
    }

    /// Default counterpart identifier for the two-party flow.
    pub fn default_peer_id(&self) -> &'static str {
        match self {
            Role::Sender => "receiver",
            Role::Listener => "sender",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    RoleChosen,
    Negotiating,
    Connected,
    Closed,
}

#[derive(Debug, Error)]
pub enum NegotiationError {
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("media error: {0}")]
    Media(#[from] MediaError),
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),
    #[error("negotiation timed out waiting for answer")]
    TimedOut,
    #[error("operation invalid in phase {0:?}")]
    InvalidPhase(Phase),
}

/// Notifications surfaced to the user-facing layer.
#[derive(Debug)]
pub enum ControllerEvent {
    PhaseChanged(Phase),
    RemoteTrack { id: String },
    NegotiationTimedOut,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Identifier this peer registers under.
    pub local_id: String,
    /// Identifier the counterpart registers under.
    pub peer_id: String,
    /// Deadline for the offer -> answer round trip.
    pub answer_timeout: Duration,
}

impl ControllerConfig {
    pub fn for_role(role: Role) -> Self {
        Self {
            local_id: role.default_id().to_string(),
            peer_id: role.default_peer_id().to_string(),
            answer_timeout: Duration::from_secs(30),
        }
    }
}

struct ControllerState {
    phase: Phase,
    role: Option<Role>,
    engine: Option<Arc<dyn NegotiationEngine>>,
    local_stream: Option<LocalAudioStream>,
    /// Candidates that arrived before the remote description settled.
    pending_candidates: Vec<CandidateInit>,
    have_remote_description: bool,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

pub struct NegotiationController {
    relay: Arc<dyn RelayLink>,
    factory: Arc<dyn EngineFactory>,
    capture: Arc<dyn MediaCapture>,
    config: ControllerConfig,
    state: AsyncMutex<ControllerState>,
    events_tx: mpsc::UnboundedSender<ControllerEvent>,
    events_rx: AsyncMutex<Option<mpsc::UnboundedReceiver<ControllerEvent>>>,
}

impl NegotiationController {
    pub fn new(
        relay: Arc<dyn RelayLink>,
        factory: Arc<dyn EngineFactory>,
        capture: Arc<dyn MediaCapture>,
        config: ControllerConfig,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            relay,
            factory,
            capture,
            config,
            state: AsyncMutex::new(ControllerState {
                phase: Phase::Idle,
                role: None,
                engine: None,
                local_stream: None,
                pending_candidates: Vec::new(),
                have_remote_description: false,
                tasks: Vec::new(),
            }),
            events_tx,
            events_rx: AsyncMutex::new(Some(events_rx)),
        })
    }

    /// Take the controller's event stream; yields None after the first call.
    pub async fn take_events(&self) -> Option<mpsc::UnboundedReceiver<ControllerEvent>> {
        self.events_rx.lock().await.take()
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase
    }

    /// Idle -> RoleChosen. Creates exactly one engine instance; re-selecting
    /// the current role is a no-op, a different role tears down and
    /// re-creates.
    pub async fn choose_role(self: &Arc<Self>, role: Role) -> Result<(), NegotiationError> {
        let mut state = self.state.lock().await;

        if state.engine.is_some() && state.role == Some(role) {
            debug!(?role, "role unchanged, keeping existing engine");
            return Ok(());
        }
        if state.engine.is_some() {
            info!(?role, "role changed, releasing previous engine");
            self.teardown_locked(&mut state).await;
        }

        let engine = self.factory.create().await?;

        if let Some(events) = engine.take_events().await {
            let controller = Arc::clone(self);
            state
                .tasks
                .push(tokio::spawn(controller.pump_engine_events(events)));
        }

        // Queued until the relay channel opens if it is not open yet.
        self.relay.send(ClientEnvelope::Register {
            id: self.config.local_id.clone(),
        })?;

        state.engine = Some(engine);
        state.role = Some(role);
        self.set_phase(&mut state, Phase::RoleChosen);
        Ok(())
    }

    /// RoleChosen -> Negotiating, sender path: acquire media, commit an
    /// offer, and forward it to the counterpart.
    pub async fn start_streaming(
        self: &Arc<Self>,
        source_id: Option<&str>,
    ) -> Result<(), NegotiationError> {
        let mut state = self.state.lock().await;

        if state.role != Some(Role::Sender) || state.phase != Phase::RoleChosen {
            return Err(NegotiationError::InvalidPhase(state.phase));
        }
        let engine = state
            .engine
            .clone()
            .ok_or(NegotiationError::InvalidPhase(state.phase))?;

        let stream = self.capture.acquire(source_id).await?;
        engine.attach_local_audio(&stream).await?;
        state.local_stream = Some(stream);

        let offer = engine.create_offer().await?;
        engine.set_local_description(offer.clone()).await?;
        self.send_signal(
            &self.config.peer_id,
            SignalPayload::Offer { sdp: offer.sdp },
        )?;
        self.set_phase(&mut state, Phase::Negotiating);

        // Deadline for the answer; surfaced as an event, never a hang. The
        // handle is registered under the same lock hold so a concurrent
        // shutdown always sees it.
        let controller = Arc::clone(self);
        let deadline = self.config.answer_timeout;
        let watchdog = tokio::spawn(async move {
            tokio::time::sleep(deadline).await;
            let state = controller.state.lock().await;
            if state.phase == Phase::Negotiating && !state.have_remote_description {
                warn!("no answer within {:?}", deadline);
                let _ = controller
                    .events_tx
                    .send(ControllerEvent::NegotiationTimedOut);
            }
        });
        state.tasks.push(watchdog);
        Ok(())
    }

    /// Dispatch a relayed envelope into the state machine.
    pub async fn handle_envelope(&self, envelope: ServerEnvelope) -> Result<(), NegotiationError> {
        let ServerEnvelope::Signal { signal, from } = envelope;
        match signal {
            SignalPayload::Offer { sdp } => self.handle_offer(sdp, &from).await,
            SignalPayload::Answer { sdp } => self.handle_answer(sdp).await,
            SignalPayload::Candidate {
                candidate,
                sdp_mline_index,
                sdp_mid,
            } => {
                self.handle_candidate(CandidateInit {
                    candidate,
                    sdp_mline_index,
                    sdp_mid,
                })
                .await
            }
        }
    }

    /// Offer received: commit remote, answer back to whoever sent it.
    async fn handle_offer(&self, sdp: String, from: &str) -> Result<(), NegotiationError> {
        let mut state = self.state.lock().await;
        let engine = match state.engine.clone() {
            Some(engine) if state.phase != Phase::Closed => engine,
            _ => return Err(NegotiationError::InvalidPhase(state.phase)),
        };

        engine
            .set_remote_description(SessionDescription {
                kind: SdpKind::Offer,
                sdp,
            })
            .await?;
        state.have_remote_description = true;
        Self::flush_pending_candidates(&mut state, &engine).await;

        let answer = engine.create_answer().await?;
        engine.set_local_description(answer.clone()).await?;
        self.send_signal(from, SignalPayload::Answer { sdp: answer.sdp })?;

        if state.phase == Phase::RoleChosen {
            self.set_phase(&mut state, Phase::Negotiating);
        }
        Ok(())
    }

    /// Answer received: commit remote, nothing to send back.
    async fn handle_answer(&self, sdp: String) -> Result<(), NegotiationError> {
        let mut state = self.state.lock().await;
        let engine = match state.engine.clone() {
            Some(engine) if state.phase != Phase::Closed => engine,
            _ => return Err(NegotiationError::InvalidPhase(state.phase)),
        };

        engine
            .set_remote_description(SessionDescription {
                kind: SdpKind::Answer,
                sdp,
            })
            .await?;
        state.have_remote_description = true;
        Self::flush_pending_candidates(&mut state, &engine).await;
        Ok(())
    }

    /// Candidate received: apply now, or park it until the remote
    /// description settles. Either arrival order is valid.
    async fn handle_candidate(&self, candidate: CandidateInit) -> Result<(), NegotiationError> {
        let mut state = self.state.lock().await;
        let engine = match state.engine.clone() {
            Some(engine) if state.phase != Phase::Closed => engine,
            _ => return Err(NegotiationError::InvalidPhase(state.phase)),
        };

        if state.have_remote_description {
            engine.add_remote_candidate(candidate).await?;
        } else {
            debug!("queueing candidate ahead of remote description");
            state.pending_candidates.push(candidate);
        }
        Ok(())
    }

    async fn flush_pending_candidates(
        state: &mut ControllerState,
        engine: &Arc<dyn NegotiationEngine>,
    ) {
        for candidate in state.pending_candidates.drain(..) {
            if let Err(e) = engine.add_remote_candidate(candidate).await {
                debug!(error = %e, "failed to apply queued candidate");
            }
        }
    }

    /// Consume relayed envelopes until the channel goes away.
    pub async fn run(self: Arc<Self>) {
        while let Some(envelope) = self.relay.recv().await {
            if let Err(e) = self.handle_envelope(envelope).await {
                // Engine negotiation failures are surfaced, not fatal.
                error!(error = %e, "failed to handle relayed signal");
            }
        }
        debug!("relay channel ended");
    }

    /// * -> Closed: release the engine so a later role change starts clean.
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        self.teardown_locked(&mut state).await;
    }

    async fn teardown_locked(&self, state: &mut ControllerState) {
        if let Some(engine) = state.engine.take() {
            if let Err(e) = engine.close().await {
                debug!(error = %e, "engine close failed");
            }
        }
        for task in state.tasks.drain(..) {
            task.abort();
        }
        state.local_stream = None;
        state.pending_candidates.clear();
        state.have_remote_description = false;
        state.role = None;
        self.set_phase(state, Phase::Closed);
    }

    async fn pump_engine_events(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::LocalCandidate(candidate) => {
                    // Forwarded opportunistically, whatever the phase.
                    let result = self.send_signal(
                        &self.config.peer_id,
                        SignalPayload::Candidate {
                            candidate: candidate.candidate,
                            sdp_mline_index: candidate.sdp_mline_index,
                            sdp_mid: candidate.sdp_mid,
                        },
                    );
                    if let Err(e) = result {
                        debug!(error = %e, "failed to forward local candidate");
                    }
                }
                EngineEvent::RemoteTrack { id } => {
                    self.on_remote_track(id).await;
                }
            }
        }
    }

    async fn on_remote_track(&self, id: String) {
        let mut state = self.state.lock().await;
        if state.phase == Phase::Closed {
            return;
        }
        info!(track = %id, "remote media track received");
        self.set_phase(&mut state, Phase::Connected);
        let _ = self.events_tx.send(ControllerEvent::RemoteTrack { id });
    }

    fn send_signal(&self, target: &str, signal: SignalPayload) -> Result<(), NegotiationError> {
        self.relay.send(ClientEnvelope::Signal {
            target: target.to_string(),
            from: self.config.local_id.clone(),
            signal,
        })?;
        Ok(())
    }

    fn set_phase(&self, state: &mut ControllerState, phase: Phase) {
        if state.phase != phase {
            debug!(from = ?state.phase, to = ?phase, "phase transition");
            state.phase = phase;
            let _ = self.events_tx.send(ControllerEvent::PhaseChanged(phase));
        }
    }
}
