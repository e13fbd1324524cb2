//! JSON-lines adapter for embedding hosts.
//!
//! Output, one object per line:
//! `{"type":"state","view":{..}}`, `{"type":"notice","notice":{..},"message":".."}`,
//! `{"type":"error","message":".."}`.
//!
//! Input, one object per line: `{"command":"select","peer":"bob"}`,
//! `{"command":"call"}`, `{"command":"accept"}` and so on.

use super::{Presenter, UserInput};
use crate::calls::Command;
use callcore::{CallError, CallEvent, CallView, EventHandler, Notice, PeerId};
use log::warn;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Mutex;

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
enum JsonCommand {
    Select { peer: PeerId },
    Call { peer: Option<PeerId> },
    Accept,
    Reject,
    Hangup,
    Peers,
    State,
    Help,
    Quit,
}

pub fn parse_command(line: &str) -> Result<UserInput, String> {
    let command: JsonCommand = serde_json::from_str(line).map_err(|e| e.to_string())?;
    Ok(match command {
        JsonCommand::Select { peer } => UserInput::Engine(Command::SelectTarget(peer)),
        JsonCommand::Call { peer: Some(peer) } => UserInput::CallPeer(peer),
        JsonCommand::Call { peer: None } => UserInput::Engine(Command::InitiateCall),
        JsonCommand::Accept => UserInput::Engine(Command::AcceptCall),
        JsonCommand::Reject => UserInput::Engine(Command::RejectCall),
        JsonCommand::Hangup => UserInput::Engine(Command::EndCall),
        JsonCommand::Peers => UserInput::ShowPeers,
        JsonCommand::State => UserInput::ShowState,
        JsonCommand::Help => UserInput::Help,
        JsonCommand::Quit => UserInput::Quit,
    })
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum Output<'a> {
    State {
        view: &'a CallView,
    },
    Peers {
        peers: &'a [PeerId],
    },
    Notice {
        notice: &'a Notice,
        message: String,
    },
    Error {
        message: String,
    },
    Help {
        commands: &'static [&'static str],
    },
}

pub struct JsonPresenter {
    out: Mutex<Box<dyn Write + Send>>,
}

impl JsonPresenter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    fn emit(&self, output: &Output<'_>) {
        let line = match serde_json::to_string(output) {
            Ok(line) => line,
            Err(e) => {
                warn!(target: "Ui/Json", "Failed to encode output: {e}");
                return;
            }
        };
        let mut out = self.out.lock().unwrap_or_else(|p| p.into_inner());
        let _ = writeln!(out, "{line}");
        let _ = out.flush();
    }
}

impl EventHandler for JsonPresenter {
    fn handle_event(&self, event: &CallEvent) {
        match event {
            CallEvent::StateChanged(view) => self.emit(&Output::State { view }),
            CallEvent::Notice(notice) => self.emit(&Output::Notice {
                notice,
                message: notice.to_string(),
            }),
            CallEvent::Error(err) => self.emit(&Output::Error {
                message: err.to_string(),
            }),
        }
    }
}

impl Presenter for JsonPresenter {
    fn show_view(&self, view: &CallView) {
        self.emit(&Output::State { view });
    }

    fn show_peers(&self, view: &CallView) {
        self.emit(&Output::Peers { peers: &view.peers });
    }

    fn show_help(&self) {
        self.emit(&Output::Help {
            commands: &[
                "select", "call", "accept", "reject", "hangup", "peers", "state", "help", "quit",
            ],
        });
    }

    fn show_refusal(&self, err: &CallError) {
        self.emit(&Output::Error {
            message: err.to_string(),
        });
    }

    fn show_unparsed(&self, line: &str, reason: &str) {
        self.emit(&Output::Error {
            message: format!("unparsed input {line:?}: {reason}"),
        });
    }
}
