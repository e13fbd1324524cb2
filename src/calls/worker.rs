//! Per-session connection worker.
//!
//! The worker owns the session's [`PeerConnection`] and runs platform steps
//! strictly in the order the engine queued them. Results come back to the
//! engine tagged with the session id, so the engine never awaits platform
//! work and late results for an ended session are easy to discard.

use super::engine::EngineInput;
use callcore::{
    ConnectionFactory, ConnectionObserver, IceCandidate, MediaStream, PeerConnection,
    PlatformError, SessionDescription, SessionId,
};
use log::{debug, trace, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug)]
pub(crate) enum WorkerOp {
    /// Caller: attach local media and produce an offer.
    StartOffer(MediaStream),
    /// Callee: attach local media and produce an answer.
    Answer(MediaStream),
    ApplyRemote(SessionDescription),
    AddCandidate(IceCandidate),
    Close,
}

/// Completion of one worker step, or a callback from the connection.
#[derive(Debug)]
pub(crate) enum StepOutcome {
    Opened(Result<(), PlatformError>),
    OfferCreated(Result<SessionDescription, PlatformError>),
    AnswerCreated(Result<SessionDescription, PlatformError>),
    RemoteApplied(Result<(), PlatformError>),
    CandidateApplied(Result<(), PlatformError>),
    LocalCandidate(IceCandidate),
    RemoteMedia(MediaStream),
    Closed,
}

/// Engine-side handle. Dropping it without [`WorkerHandle::close`] still
/// closes the connection once the queue drains.
pub(crate) struct WorkerHandle {
    ops: mpsc::UnboundedSender<WorkerOp>,
    closing: bool,
}

impl WorkerHandle {
    pub(crate) fn spawn(
        session: SessionId,
        factory: Arc<dyn ConnectionFactory>,
        engine: mpsc::UnboundedSender<EngineInput>,
    ) -> Self {
        let (ops_tx, ops_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(session, factory, engine, ops_rx));
        Self {
            ops: ops_tx,
            closing: false,
        }
    }

    pub(crate) fn queue(&self, op: WorkerOp) {
        if self.closing {
            trace!(target: "Call/Worker", "Dropping {op:?} queued after close");
            return;
        }
        if self.ops.send(op).is_err() {
            debug!(target: "Call/Worker", "Worker already stopped");
        }
    }

    /// Requests the connection be closed after any queued steps.
    pub(crate) fn close(&mut self) {
        if !self.closing {
            self.closing = true;
            let _ = self.ops.send(WorkerOp::Close);
        }
    }
}

struct SessionObserver {
    session: SessionId,
    engine: mpsc::UnboundedSender<EngineInput>,
}

impl SessionObserver {
    fn report(&self, outcome: StepOutcome) {
        let _ = self.engine.send(EngineInput::Step {
            session: self.session,
            outcome,
        });
    }
}

impl ConnectionObserver for SessionObserver {
    fn on_local_candidate(&self, candidate: IceCandidate) {
        self.report(StepOutcome::LocalCandidate(candidate));
    }

    fn on_remote_media(&self, stream: MediaStream) {
        self.report(StepOutcome::RemoteMedia(stream));
    }
}

async fn run(
    session: SessionId,
    factory: Arc<dyn ConnectionFactory>,
    engine: mpsc::UnboundedSender<EngineInput>,
    mut ops: mpsc::UnboundedReceiver<WorkerOp>,
) {
    let observer = Arc::new(SessionObserver {
        session,
        engine: engine.clone(),
    });

    let connection = match factory.create_connection(observer.clone()).await {
        Ok(connection) => {
            observer.report(StepOutcome::Opened(Ok(())));
            connection
        }
        Err(e) => {
            warn!(target: "Call/Worker", "Session {session}: connection setup failed: {e}");
            observer.report(StepOutcome::Opened(Err(e)));
            // Nothing to close; wait for the engine to let go.
            while let Some(op) = ops.recv().await {
                if matches!(op, WorkerOp::Close) {
                    break;
                }
            }
            observer.report(StepOutcome::Closed);
            return;
        }
    };

    while let Some(op) = ops.recv().await {
        let outcome = match op {
            WorkerOp::StartOffer(media) => {
                let result = match connection.attach_local_media(&media).await {
                    Ok(()) => connection.create_offer().await,
                    Err(e) => Err(e),
                };
                StepOutcome::OfferCreated(result)
            }
            WorkerOp::Answer(media) => {
                let result = match connection.attach_local_media(&media).await {
                    Ok(()) => connection.create_answer().await,
                    Err(e) => Err(e),
                };
                StepOutcome::AnswerCreated(result)
            }
            WorkerOp::ApplyRemote(desc) => {
                StepOutcome::RemoteApplied(connection.set_remote_description(desc).await)
            }
            WorkerOp::AddCandidate(candidate) => {
                StepOutcome::CandidateApplied(connection.add_ice_candidate(candidate).await)
            }
            WorkerOp::Close => break,
        };
        observer.report(outcome);
    }

    close_connection(session, connection.as_ref()).await;
    observer.report(StepOutcome::Closed);
}

async fn close_connection(session: SessionId, connection: &dyn PeerConnection) {
    match connection.close().await {
        Ok(()) => debug!(target: "Call/Worker", "Session {session}: connection closed"),
        Err(e) => warn!(target: "Call/Worker", "Session {session}: close failed: {e}"),
    }
}
