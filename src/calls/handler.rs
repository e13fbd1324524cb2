//! Routes signaling channel callbacks into the engine queue.

use super::engine::EngineInput;
use crate::signaling::SignalingChannel;
use callcore::SignalKind;
use log::debug;
use tokio::sync::mpsc;

/// Registers one handler per inbound event name plus the status handler.
/// Calling it again replaces the previous routing.
pub(crate) fn install(channel: &SignalingChannel, inputs: mpsc::UnboundedSender<EngineInput>) {
    for kind in SignalKind::ALL {
        let inputs = inputs.clone();
        channel.on_event(kind, move |signal| {
            if inputs.send(EngineInput::Signal(signal)).is_err() {
                debug!(target: "Call/Handler", "Engine stopped; dropping {kind}");
            }
        });
    }

    channel.on_status(move |status| {
        if inputs.send(EngineInput::Channel(status)).is_err() {
            debug!(target: "Call/Handler", "Engine stopped; dropping status {status:?}");
        }
    });
}
