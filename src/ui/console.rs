//! Interactive terminal adapter.

use super::{Presenter, UserInput};
use crate::calls::Command;
use callcore::{CallError, CallEvent, CallView, EventHandler, Phase};
use std::io::Write;
use std::sync::Mutex;

const HELP: &str = "\
Commands:
  peers              list reachable peers
  select <peer>      choose who to call
  call [peer]        call the selected (or given) peer
  accept | reject    answer an incoming call
  hangup             end the current call
  state              show the current call state
  quit";

pub fn parse_command(line: &str) -> Result<UserInput, String> {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_ascii_lowercase();
    let arg = words.next();
    if words.next().is_some() {
        return Err("too many arguments".into());
    }

    let input = match (verb.as_str(), arg) {
        ("select", Some(peer)) => UserInput::Engine(Command::SelectTarget(peer.into())),
        ("select", None) => return Err("select needs a peer id".into()),
        ("call", Some(peer)) => UserInput::CallPeer(peer.into()),
        ("call", None) => UserInput::Engine(Command::InitiateCall),
        ("accept" | "answer", None) => UserInput::Engine(Command::AcceptCall),
        ("reject" | "decline", None) => UserInput::Engine(Command::RejectCall),
        ("hangup" | "end", None) => UserInput::Engine(Command::EndCall),
        ("peers", None) => UserInput::ShowPeers,
        ("state", None) => UserInput::ShowState,
        ("help" | "?", None) => UserInput::Help,
        ("quit" | "exit", None) => UserInput::Quit,
        (
            "accept" | "answer" | "reject" | "decline" | "hangup" | "end" | "peers" | "state"
            | "help" | "?" | "quit" | "exit",
            Some(_),
        ) => return Err(format!("{verb} takes no arguments")),
        _ => return Err(format!("unknown command {verb:?}")),
    };
    Ok(input)
}

fn describe_phase(view: &CallView) -> String {
    let remote = view
        .remote_peer
        .as_ref()
        .map(|p| p.as_str())
        .unwrap_or("?");
    match view.phase {
        Phase::Idle => "No call in progress.".to_string(),
        Phase::Calling => format!("Calling {remote}..."),
        Phase::RingingIncoming => {
            format!("Incoming call from {remote}. Type `accept` or `reject`.")
        }
        Phase::Negotiating => format!("Connecting to {remote}..."),
        Phase::Connected => match &view.remote_media_stream {
            Some(stream) => format!("Connected with {remote} (audio stream {}).", stream.id),
            None => format!("Connected with {remote}."),
        },
    }
}

fn describe_peers(view: &CallView) -> String {
    if view.peers.is_empty() {
        return "No peers online.".to_string();
    }
    let list = view
        .peers
        .iter()
        .map(|peer| {
            if view.selected_target.as_ref() == Some(peer) {
                format!("{peer} (selected)")
            } else {
                peer.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(", ");
    format!("Peers online: {list}")
}

/// Prints human-readable lines, only for what changed since the last view.
pub struct ConsolePresenter {
    out: Mutex<Box<dyn Write + Send>>,
    last: Mutex<Option<CallView>>,
}

impl ConsolePresenter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
            last: Mutex::new(None),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    fn line(&self, text: &str) {
        let mut out = self.out.lock().unwrap_or_else(|p| p.into_inner());
        let _ = writeln!(out, "{text}");
        let _ = out.flush();
    }

    fn render_changes(&self, view: &CallView) {
        let previous = self
            .last
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .replace(view.clone());

        let Some(previous) = previous else {
            self.line(&format!("You are {}.", view.local_id));
            self.line(&describe_phase(view));
            return;
        };

        if previous.channel_available != view.channel_available {
            self.line(if view.channel_available {
                "Relay connected."
            } else {
                "Relay unavailable."
            });
        }
        if !previous.local_media_ready && view.local_media_ready {
            self.line("Microphone ready.");
        }
        if previous.peers != view.peers || previous.selected_target != view.selected_target {
            self.line(&describe_peers(view));
        }
        if previous.phase != view.phase || previous.remote_peer != view.remote_peer {
            self.line(&describe_phase(view));
        }
    }
}

impl EventHandler for ConsolePresenter {
    fn handle_event(&self, event: &CallEvent) {
        match event {
            CallEvent::StateChanged(view) => self.render_changes(view),
            CallEvent::Notice(notice) => self.line(&format!("* {notice}")),
            CallEvent::Error(err) => self.line(&format!("! {err}")),
        }
    }
}

impl Presenter for ConsolePresenter {
    fn show_view(&self, view: &CallView) {
        self.line(&describe_phase(view));
    }

    fn show_peers(&self, view: &CallView) {
        self.line(&describe_peers(view));
    }

    fn show_help(&self) {
        self.line(HELP);
    }

    fn show_refusal(&self, err: &CallError) {
        self.line(&format!("! {err}"));
    }

    fn show_unparsed(&self, _line: &str, reason: &str) {
        self.line(&format!("? {reason} (type `help`)"));
    }
}
