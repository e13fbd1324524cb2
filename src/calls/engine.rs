//! Session engine.
//!
//! A single task owns all call state and consumes one queue of inputs:
//! user commands, decoded signals, relay status changes and completions
//! reported by the session worker. Each input is handled to completion
//! without awaiting platform work, so inputs are observed in arrival order.

use super::handler;
use super::worker::{StepOutcome, WorkerHandle, WorkerOp};
use crate::signaling::{ChannelStatus, SignalingChannel};
use callcore::{
    CallError, CallEvent, CallSession, CandidateBuffer, CallTransition, CallView, ConnectionFactory, CoreEventBus,
    IceCandidate, InboundSignal, InvalidTransition, MediaSource, MediaStream, Notice,
    OutboundSignal, PeerId, PeerRegistry, Phase, PlatformError, Role, SessionDescription,
    SessionId,
};
use log::{debug, info, warn};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// User intents accepted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SelectTarget(PeerId),
    InitiateCall,
    AcceptCall,
    RejectCall,
    EndCall,
}

pub(crate) enum EngineInput {
    Command {
        command: Command,
        reply: oneshot::Sender<Result<(), CallError>>,
    },
    /// A decoded signal, or the decode failure of a known event.
    Signal(Result<InboundSignal, CallError>),
    Channel(ChannelStatus),
    LocalMedia(Result<MediaStream, PlatformError>),
    Step {
        session: SessionId,
        outcome: StepOutcome,
    },
    Shutdown,
}

/// Cloneable handle to a running engine.
#[derive(Clone)]
pub struct CallEngine {
    inputs: mpsc::UnboundedSender<EngineInput>,
    view: watch::Receiver<CallView>,
    bus: CoreEventBus,
}

impl CallEngine {
    /// Wires the engine to `channel`, starts local media acquisition and
    /// spawns the engine task.
    pub fn start(
        channel: Arc<SignalingChannel>,
        media: Arc<dyn MediaSource>,
        connections: Arc<dyn ConnectionFactory>,
        bus: CoreEventBus,
    ) -> (Self, JoinHandle<()>) {
        let local_id = channel.local_id().clone();
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();

        let mut initial = CallView::idle(local_id.clone());
        initial.channel_available = channel.is_connected();
        let (view_tx, view_rx) = watch::channel(initial);

        handler::install(&channel, inputs_tx.clone());

        let media_tx = inputs_tx.clone();
        tokio::spawn(async move {
            let result = media.acquire_local_media().await;
            let _ = media_tx.send(EngineInput::LocalMedia(result));
        });

        let engine = Engine {
            registry: PeerRegistry::new(local_id.clone()),
            local_id,
            selected: None,
            session: None,
            last_session: SessionId::new(0),
            local_media: None,
            channel_available: channel.is_connected(),
            channel,
            connections,
            inputs: inputs_tx.clone(),
            view: view_tx,
            bus: bus.clone(),
        };
        let task = tokio::spawn(engine.run(inputs_rx));

        (
            Self {
                inputs: inputs_tx,
                view: view_rx,
                bus,
            },
            task,
        )
    }

    pub async fn execute(&self, command: Command) -> Result<(), CallError> {
        let (reply, response) = oneshot::channel();
        self.inputs
            .send(EngineInput::Command { command, reply })
            .map_err(|_| CallError::EngineStopped)?;
        response.await.map_err(|_| CallError::EngineStopped)?
    }

    pub async fn select_target(&self, peer: impl Into<PeerId>) -> Result<(), CallError> {
        self.execute(Command::SelectTarget(peer.into())).await
    }

    pub async fn initiate_call(&self) -> Result<(), CallError> {
        self.execute(Command::InitiateCall).await
    }

    pub async fn accept_call(&self) -> Result<(), CallError> {
        self.execute(Command::AcceptCall).await
    }

    pub async fn reject_call(&self) -> Result<(), CallError> {
        self.execute(Command::RejectCall).await
    }

    pub async fn end_call(&self) -> Result<(), CallError> {
        self.execute(Command::EndCall).await
    }

    pub fn view(&self) -> CallView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallView> {
        self.view.clone()
    }

    pub fn event_bus(&self) -> &CoreEventBus {
        &self.bus
    }

    pub fn shutdown(&self) {
        let _ = self.inputs.send(EngineInput::Shutdown);
    }
}

struct ActiveSession {
    call: CallSession,
    worker: WorkerHandle,
    /// A remote description is queued on the worker but not yet applied.
    applying_remote: bool,
    /// Local candidates wait until our description has gone out, so the
    /// peer never sees them before the session exists on its side.
    held_local: CandidateBuffer,
    description_sent: bool,
    /// The peer's crossing offer is rejected once our own offer is out.
    reject_after_offer: bool,
}

impl ActiveSession {
    fn new(call: CallSession, worker: WorkerHandle, applying_remote: bool) -> Self {
        Self {
            call,
            worker,
            applying_remote,
            held_local: CandidateBuffer::new(),
            description_sent: false,
            reject_after_offer: false,
        }
    }
}

struct Engine {
    local_id: PeerId,
    registry: PeerRegistry,
    selected: Option<PeerId>,
    session: Option<ActiveSession>,
    last_session: SessionId,
    local_media: Option<Result<MediaStream, String>>,
    channel_available: bool,
    channel: Arc<SignalingChannel>,
    connections: Arc<dyn ConnectionFactory>,
    inputs: mpsc::UnboundedSender<EngineInput>,
    view: watch::Sender<CallView>,
    bus: CoreEventBus,
}

impl Engine {
    async fn run(mut self, mut inputs: mpsc::UnboundedReceiver<EngineInput>) {
        info!(target: "Call/Engine", "Engine started for {}", self.local_id);
        while let Some(input) = inputs.recv().await {
            // Replies wait for the publish so callers observe the new view.
            let mut pending_reply = None;
            match input {
                EngineInput::Command { command, reply } => {
                    let result = self.handle_command(command.clone());
                    if let Err(e) = &result {
                        debug!(target: "Call/Engine", "{command:?} refused: {e}");
                    }
                    pending_reply = Some((reply, result));
                }
                EngineInput::Signal(Ok(signal)) => self.handle_signal(signal),
                EngineInput::Signal(Err(e)) => {
                    warn!(target: "Call/Engine", "Ignoring signal: {e}");
                    self.emit_error(e);
                }
                EngineInput::Channel(status) => self.handle_channel(status),
                EngineInput::LocalMedia(result) => self.handle_local_media(result),
                EngineInput::Step { session, outcome } => self.handle_step(session, outcome),
                EngineInput::Shutdown => break,
            }
            self.publish();
            if let Some((reply, result)) = pending_reply {
                let _ = reply.send(result);
            }
        }

        if let Some(mut active) = self.session.take() {
            active.worker.close();
        }
        info!(target: "Call/Engine", "Engine stopped");
    }

    fn handle_command(&mut self, command: Command) -> Result<(), CallError> {
        match command {
            Command::SelectTarget(peer) => self.select_target(peer),
            Command::InitiateCall => self.initiate_call(),
            Command::AcceptCall => self.accept_call(),
            Command::RejectCall => self.reject_call(),
            Command::EndCall => {
                self.end_call();
                Ok(())
            }
        }
    }

    fn handle_signal(&mut self, signal: InboundSignal) {
        match signal {
            InboundSignal::PeerList(ids) => self.update_peers(ids),
            InboundSignal::Offer { sender, offer } => self.receive_offer(sender, offer),
            InboundSignal::Answer { sender, answer } => self.receive_answer(sender, answer),
            InboundSignal::IceCandidate { sender, candidate } => {
                self.receive_ice_candidate(sender, candidate)
            }
            InboundSignal::CallRejected { target, sender } => {
                self.receive_call_rejected(target, sender)
            }
            InboundSignal::CallEnded { target, sender } => {
                self.receive_call_ended(target, sender)
            }
        }
    }

    // Commands

    fn select_target(&mut self, peer: PeerId) -> Result<(), CallError> {
        if !self.registry.contains(&peer) {
            return Err(CallError::UnknownPeer(peer));
        }
        info!(target: "Call/Engine", "Selected {peer} as call target");
        self.selected = Some(peer);
        Ok(())
    }

    fn initiate_call(&mut self) -> Result<(), CallError> {
        if let Some(active) = &self.session {
            return Err(CallError::ConcurrentSession(active.call.remote.clone()));
        }
        let target = self.selected.clone().ok_or(CallError::NoTargetSelected)?;
        if !self.channel_available {
            return Err(CallError::ChannelUnavailable);
        }
        let media = self.ready_media()?;

        let id = self.next_session_id();
        let worker = WorkerHandle::spawn(id, Arc::clone(&self.connections), self.inputs.clone());
        worker.queue(WorkerOp::StartOffer(media));

        info!(target: "Call/Engine", "Calling {target} (session {id})");
        self.session = Some(ActiveSession::new(
            CallSession::new_outgoing(id, target),
            worker,
            false,
        ));
        Ok(())
    }

    fn accept_call(&mut self) -> Result<(), CallError> {
        let phase = self.phase();
        if !phase.can_accept() {
            return Err(match self.session {
                None => CallError::NoActiveSession,
                Some(_) => InvalidTransition::new(phase, "accept").into(),
            });
        }
        if !self.channel_available {
            return Err(CallError::ChannelUnavailable);
        }
        let media = self.ready_media()?;

        let Some(active) = self.session.as_mut() else {
            return Err(CallError::NoActiveSession);
        };
        active.call.apply_transition(CallTransition::LocalAccepted)?;
        active.worker.queue(WorkerOp::Answer(media));
        info!(target: "Call/Engine", "Accepted call from {}", active.call.remote);
        if active.call.settle_media() {
            info!(target: "Call/Engine", "Connected with {}", active.call.remote);
        }
        Ok(())
    }

    fn reject_call(&mut self) -> Result<(), CallError> {
        let phase = self.phase();
        if !phase.can_reject() {
            return Err(match self.session {
                None => CallError::NoActiveSession,
                Some(_) => InvalidTransition::new(phase, "reject").into(),
            });
        }
        if let Some(remote) = self.teardown("rejected locally") {
            self.notify_remote(OutboundSignal::CallRejected { target: remote });
        }
        Ok(())
    }

    /// Hangs up. A no-op when there is no session.
    fn end_call(&mut self) {
        let Some(active) = self.session.as_ref() else {
            debug!(target: "Call/Engine", "end_call with no session");
            return;
        };
        let duration_secs = active.call.connected_secs();
        if let Some(remote) = self.teardown("ended locally") {
            self.notify_remote(OutboundSignal::CallEnded {
                target: remote.clone(),
            });
            self.emit(CallEvent::Notice(Notice::CallEnded {
                with: remote,
                duration_secs,
            }));
        }
    }

    // Inbound signals

    fn update_peers(&mut self, ids: Vec<PeerId>) {
        let session_peer = self
            .session
            .as_ref()
            .map(|a| a.call.remote.clone())
            .filter(|remote| self.registry.contains(remote));

        self.registry.replace(ids);
        debug!(target: "Call/Engine", "Peers: {:?}", self.registry.list());

        if self
            .selected
            .as_ref()
            .is_some_and(|selected| !self.registry.contains(selected))
        {
            if let Some(left) = self.selected.take() {
                info!(target: "Call/Engine", "Selected peer {left} left");
            }
        }

        if let Some(remote) = session_peer {
            if !self.registry.contains(&remote) {
                info!(target: "Call/Engine", "{remote} left the relay during the call");
                self.teardown("remote peer left");
                self.emit(CallEvent::Notice(Notice::PeerLeft { peer: remote }));
            }
        }
    }

    fn receive_offer(&mut self, sender: PeerId, offer: SessionDescription) {
        if let Some(active) = &self.session {
            if active.call.remote != sender {
                info!(
                    target: "Call/Engine",
                    "Busy with {}; rejecting offer from {sender}", active.call.remote
                );
                self.notify_remote(OutboundSignal::CallRejected {
                    target: sender.clone(),
                });
                self.emit(CallEvent::Notice(Notice::AutoRejected { from: sender }));
                return;
            }
            // Both sides called each other. The lower id yields and answers
            // the higher id's offer; the higher id rejects the lower's.
            let glare = active.call.role == Role::Caller && active.call.phase == Phase::Calling;
            if !glare {
                log_stale("offer", format!("duplicate offer from {sender}"));
                return;
            }
            if self.local_id > sender {
                info!(target: "Call/Engine", "{sender} called us while we called them; keeping our call");
                self.reject_crossed_offer();
                return;
            }
            info!(target: "Call/Engine", "{sender} called us while we called them; answering theirs");
            self.teardown("yielded to the peer's offer");
        }

        let id = self.next_session_id();
        let worker = WorkerHandle::spawn(id, Arc::clone(&self.connections), self.inputs.clone());
        worker.queue(WorkerOp::ApplyRemote(offer));

        info!(target: "Call/Engine", "Incoming call from {sender} (session {id})");
        self.session = Some(ActiveSession::new(
            CallSession::new_incoming(id, sender),
            worker,
            true,
        ));
    }

    fn receive_answer(&mut self, sender: Option<PeerId>, answer: SessionDescription) {
        let Some(active) = self.session.as_ref() else {
            warn!(target: "Call/Engine", "Answer with no active call");
            self.emit_error(CallError::NoActiveSession);
            return;
        };
        if let Some(sender) = sender.filter(|s| *s != active.call.remote) {
            log_stale("answer", format!("from unrelated peer {sender}"));
            return;
        }
        if !active.call.phase.awaiting_answer() {
            let err = InvalidTransition::new(active.call.phase, "answer");
            self.emit_error(err.into());
            return;
        }
        if active.applying_remote {
            log_stale("answer", "an answer is already being applied");
            return;
        }

        if let Some(active) = self.session.as_mut() {
            active.applying_remote = true;
            active.worker.queue(WorkerOp::ApplyRemote(answer));
        }
    }

    fn receive_ice_candidate(&mut self, sender: Option<PeerId>, candidate: IceCandidate) {
        let Some(active) = self.session.as_mut() else {
            log_stale("ice-candidate", "no active call");
            return;
        };
        if let Some(sender) = sender.filter(|s| *s != active.call.remote) {
            log_stale("ice-candidate", format!("from unrelated peer {sender}"));
            return;
        }
        match active.call.accept_candidate(candidate) {
            Some(candidate) => active.worker.queue(WorkerOp::AddCandidate(candidate)),
            None => debug!(
                target: "Call/Engine",
                "Buffered remote candidate ({} waiting)",
                active.call.buffered_candidates()
            ),
        }
    }

    fn receive_call_rejected(&mut self, target: Option<PeerId>, sender: Option<PeerId>) {
        if let Some(target) = target.filter(|t| *t != self.local_id) {
            log_stale("call-rejected", format!("addressed to {target}"));
            return;
        }
        let Some(remote) = self.bound_remote("call-rejected", sender) else {
            return;
        };
        // Only an outgoing call can be rejected. A callee sees this after
        // yielding a simultaneous call, when the peer rejects our dropped offer.
        if self.session.as_ref().is_some_and(|a| !a.call.is_caller()) {
            log_stale("call-rejected", format!("{remote} rejected an offer we withdrew"));
            return;
        }
        info!(target: "Call/Engine", "{remote} rejected the call");
        self.teardown("rejected by peer");
        self.emit(CallEvent::Notice(Notice::CallRejected { by: remote }));
    }

    fn receive_call_ended(&mut self, target: PeerId, sender: Option<PeerId>) {
        if target != self.local_id {
            log_stale("call-ended", format!("addressed to {target}"));
            return;
        }
        let Some(remote) = self.bound_remote("call-ended", sender) else {
            return;
        };
        info!(target: "Call/Engine", "{remote} ended the call");
        self.teardown("ended by peer");
        self.emit(CallEvent::Notice(Notice::EndedByPeer { by: remote }));
    }

    // Relay status and local media

    fn handle_channel(&mut self, status: ChannelStatus) {
        match status {
            ChannelStatus::Connected => {
                info!(target: "Call/Engine", "Signaling channel available");
                self.channel_available = true;
            }
            ChannelStatus::Disconnected => {
                warn!(target: "Call/Engine", "Signaling channel unavailable");
                self.channel_available = false;
                self.registry.replace(Vec::new());
                self.selected = None;
                // A connected call keeps its direct media path; anything still
                // negotiating cannot finish without the relay.
                if self.phase() != Phase::Connected && self.session.is_some() {
                    self.teardown("signaling channel lost");
                    self.emit_error(CallError::ChannelUnavailable);
                }
            }
        }
    }

    fn handle_local_media(&mut self, result: Result<MediaStream, PlatformError>) {
        match result {
            Ok(stream) => {
                info!(target: "Call/Engine", "Local media ready ({})", stream.id);
                self.local_media = Some(Ok(stream));
            }
            Err(e) => {
                let err = CallError::from(e);
                warn!(target: "Call/Engine", "{err}");
                self.local_media = Some(Err(err.to_string()));
                self.emit_error(err);
            }
        }
    }

    // Worker completions

    fn handle_step(&mut self, session: SessionId, outcome: StepOutcome) {
        let current = self.session.as_ref().map(|a| a.call.id);
        if current != Some(session) {
            match outcome {
                StepOutcome::Closed => {
                    debug!(target: "Call/Engine", "Session {session} connection released")
                }
                other => debug!(
                    target: "Call/Engine",
                    "Discarding stale completion for session {session}: {other:?}"
                ),
            }
            return;
        }

        match outcome {
            StepOutcome::Opened(Ok(())) => {
                debug!(target: "Call/Engine", "Session {session} connection open")
            }
            StepOutcome::Opened(Err(e)) => self.fail_session(e.into()),
            StepOutcome::OfferCreated(result) => self.offer_created(result),
            StepOutcome::AnswerCreated(result) => self.answer_created(result),
            StepOutcome::RemoteApplied(result) => self.remote_applied(result),
            StepOutcome::CandidateApplied(Ok(())) => {}
            StepOutcome::CandidateApplied(Err(e)) => {
                warn!(target: "Call/Engine", "Remote candidate rejected: {e}")
            }
            StepOutcome::LocalCandidate(candidate) => self.local_candidate(candidate),
            StepOutcome::RemoteMedia(stream) => self.remote_media(stream),
            StepOutcome::Closed => {
                warn!(target: "Call/Engine", "Session {session} connection closed unexpectedly");
                self.teardown("connection closed");
            }
        }
    }

    fn offer_created(&mut self, result: Result<SessionDescription, PlatformError>) {
        let Some(active) = self.session.as_ref() else {
            return;
        };
        if active.call.phase != Phase::Calling {
            log_stale("offer", "offer produced after the call moved on");
            return;
        }
        let target = active.call.remote.clone();
        match result {
            Ok(offer) => {
                let sent = self.channel.send(OutboundSignal::Offer {
                    target: target.clone(),
                    offer,
                });
                match sent {
                    Ok(()) => {
                        debug!(target: "Call/Engine", "Offer sent to {target}");
                        self.release_local_candidates();
                        if let Some(active) = self.session.as_mut().filter(|a| a.reject_after_offer) {
                            active.reject_after_offer = false;
                            self.notify_remote(OutboundSignal::CallRejected { target });
                        }
                    }
                    Err(e) => self.fail_session(e),
                }
            }
            Err(e) => self.fail_session(e.into()),
        }
    }

    fn answer_created(&mut self, result: Result<SessionDescription, PlatformError>) {
        let Some(active) = self.session.as_ref() else {
            return;
        };
        let target = active.call.remote.clone();
        match result {
            Ok(answer) => {
                let sent = self.channel.send(OutboundSignal::Answer {
                    target: target.clone(),
                    answer,
                });
                match sent {
                    Ok(()) => {
                        debug!(target: "Call/Engine", "Answer sent to {target}");
                        self.release_local_candidates();
                    }
                    Err(e) => self.fail_session(e),
                }
            }
            Err(e) => self.fail_session(e.into()),
        }
    }

    fn remote_applied(&mut self, result: Result<(), PlatformError>) {
        let Some(active) = self.session.as_mut() else {
            return;
        };
        active.applying_remote = false;

        match result {
            Ok(()) => {
                let worker = &active.worker;
                let drained = active
                    .call
                    .remote_description_applied(|c| worker.queue(WorkerOp::AddCandidate(c)));
                if drained > 0 {
                    debug!(target: "Call/Engine", "Applied {drained} buffered candidates");
                }
                if active.call.is_caller() {
                    if let Err(e) = active.call.apply_transition(CallTransition::AnswerApplied) {
                        warn!(target: "Call/Engine", "{e}");
                        return;
                    }
                    info!(target: "Call/Engine", "Answer applied; negotiating with {}", active.call.remote);
                    if active.call.settle_media() {
                        info!(target: "Call/Engine", "Connected with {}", active.call.remote);
                    }
                }
            }
            Err(e) if active.call.is_caller() => {
                // The session stays in Calling; a later well-formed answer may still land.
                warn!(target: "Call/Engine", "Failed to apply answer: {e}");
                self.emit_error(e.into());
            }
            Err(e) => self.fail_session(e.into()),
        }
    }

    fn local_candidate(&mut self, candidate: IceCandidate) {
        let Some(active) = self.session.as_mut() else {
            return;
        };
        if !active.description_sent {
            active.held_local.enqueue(candidate);
            return;
        }
        let target = active.call.remote.clone();
        self.send_candidate(target, candidate);
    }

    /// Rejects the offer of the peer we are calling. The rejection has to
    /// follow our own offer on the relay, otherwise the peer reads it as a
    /// refusal of the call it has not yet yielded.
    fn reject_crossed_offer(&mut self) {
        let Some(active) = self.session.as_mut() else {
            return;
        };
        if active.description_sent {
            let target = active.call.remote.clone();
            self.notify_remote(OutboundSignal::CallRejected { target });
        } else {
            active.reject_after_offer = true;
        }
    }

    fn release_local_candidates(&mut self) {
        let Some(active) = self.session.as_mut() else {
            return;
        };
        active.description_sent = true;
        let target = active.call.remote.clone();
        let mut held = Vec::new();
        active.held_local.drain_into(|c| held.push(c));
        for candidate in held {
            self.send_candidate(target.clone(), candidate);
        }
    }

    fn send_candidate(&self, target: PeerId, candidate: IceCandidate) {
        if let Err(e) = self.channel.send(OutboundSignal::IceCandidate { target, candidate }) {
            debug!(target: "Call/Engine", "Local candidate not forwarded: {e}");
        }
    }

    fn remote_media(&mut self, stream: MediaStream) {
        let Some(active) = self.session.as_mut() else {
            return;
        };
        if active.call.record_remote_media(stream) {
            info!(target: "Call/Engine", "Connected with {}", active.call.remote);
        } else {
            debug!(
                target: "Call/Engine",
                "Remote media held until negotiation (phase {})", active.call.phase
            );
        }
    }

    // Helpers

    fn phase(&self) -> Phase {
        self.session
            .as_ref()
            .map(|a| a.call.phase)
            .unwrap_or(Phase::Idle)
    }

    fn next_session_id(&mut self) -> SessionId {
        self.last_session = self.last_session.next();
        self.last_session
    }

    fn ready_media(&self) -> Result<MediaStream, CallError> {
        match &self.local_media {
            Some(Ok(stream)) => Ok(stream.clone()),
            Some(Err(reason)) => Err(CallError::MediaUnavailable(reason.clone())),
            None => Err(CallError::MediaUnavailable("still acquiring".into())),
        }
    }

    /// Returns the bound peer when a termination signal applies to the
    /// current session.
    fn bound_remote(&self, event: &'static str, sender: Option<PeerId>) -> Option<PeerId> {
        let Some(active) = self.session.as_ref() else {
            log_stale(event, "no active call");
            return None;
        };
        if let Some(sender) = sender.filter(|s| *s != active.call.remote) {
            log_stale(event, format!("from unrelated peer {sender}"));
            return None;
        }
        Some(active.call.remote.clone())
    }

    /// Drops the current session and closes its connection. Returns the peer
    /// it was bound to.
    fn teardown(&mut self, reason: &str) -> Option<PeerId> {
        let mut active = self.session.take()?;
        info!(
            target: "Call/Engine",
            "Session {} with {} over: {reason}", active.call.id, active.call.remote
        );
        active.worker.close();
        Some(active.call.remote)
    }

    /// Tears the session down after a local platform or relay failure and
    /// tells the remote side when it is waiting on us.
    fn fail_session(&mut self, err: CallError) {
        let Some(active) = self.session.as_ref() else {
            return;
        };
        let (role, phase) = (active.call.role, active.call.phase);
        let owes_reject = active.reject_after_offer;
        let Some(remote) = self.teardown("local failure") else {
            return;
        };
        warn!(target: "Call/Engine", "Call with {remote} failed: {err}");
        match (role, phase) {
            // Our offer never left, but the peer's crossing offer still
            // waits for an answer.
            (Role::Caller, Phase::Calling) if owes_reject => {
                self.notify_remote(OutboundSignal::CallRejected { target: remote })
            }
            // The offer never left, so the callee knows nothing yet.
            (Role::Caller, Phase::Calling) => {}
            (_, Phase::RingingIncoming) => {
                self.notify_remote(OutboundSignal::CallRejected { target: remote })
            }
            _ => self.notify_remote(OutboundSignal::CallEnded { target: remote }),
        }
        self.emit_error(err);
    }

    fn notify_remote(&self, signal: OutboundSignal) {
        let event = signal.event_name();
        if let Err(e) = self.channel.send(signal) {
            warn!(target: "Call/Engine", "Could not deliver {event}: {e}");
        }
    }

    fn emit_error(&self, err: CallError) {
        if err.is_user_visible() {
            self.emit(CallEvent::Error(err));
        }
    }

    fn emit(&self, event: CallEvent) {
        self.bus.dispatch(&event);
    }

    fn snapshot(&self) -> CallView {
        let call = self.session.as_ref().map(|a| &a.call);
        let phase = self.phase();
        CallView {
            local_id: self.local_id.clone(),
            phase,
            peers: self.registry.list().to_vec(),
            selected_target: self.selected.clone(),
            remote_peer: call.map(|c| c.remote.clone()),
            incoming_call_from: call
                .filter(|c| c.phase == Phase::RingingIncoming)
                .map(|c| c.remote.clone()),
            remote_media_stream: call.and_then(|c| c.remote_media().cloned()),
            channel_available: self.channel_available,
            local_media_ready: matches!(self.local_media, Some(Ok(_))),
        }
    }

    fn publish(&mut self) {
        let view = self.snapshot();
        let changed = self.view.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view.clone();
                true
            }
        });
        if changed {
            debug!(target: "Call/Engine", "Phase {}", view.phase);
            self.emit(CallEvent::StateChanged(view));
        }
    }
}

fn log_stale(event: &'static str, reason: impl Into<String>) {
    let err = CallError::stale(event, reason);
    debug!(target: "Call/Engine", "{err}");
}
