//! Presentation adapters.
//!
//! Both adapters render engine events through the [`CoreEventBus`] and read
//! user intents from a line-oriented input, one command per line.
//!
//! [`CoreEventBus`]: callcore::CoreEventBus

pub mod console;
pub mod json;

pub use console::ConsolePresenter;
pub use json::JsonPresenter;

use crate::calls::{CallEngine, Command};
use callcore::{CallError, CallView, PeerId};
use log::debug;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// A parsed input line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserInput {
    Engine(Command),
    /// `call <peer>`: select then initiate.
    CallPeer(PeerId),
    ShowPeers,
    ShowState,
    Help,
    Quit,
}

/// Renders what the input loop needs to show outside the event stream.
pub trait Presenter: Send + Sync {
    fn show_view(&self, view: &CallView);
    fn show_peers(&self, view: &CallView);
    fn show_help(&self);
    fn show_refusal(&self, err: &CallError);
    fn show_unparsed(&self, line: &str, reason: &str);
}

/// Reads commands until `quit` or end of input and runs them on `engine`.
pub async fn run_input_loop<R>(engine: &CallEngine, presenter: Arc<dyn Presenter>, reader: R)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!(target: "Ui", "Input closed: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let input = match parse_input(&line, presenter.as_ref()) {
            Some(input) => input,
            None => continue,
        };
        let result = match input {
            UserInput::Engine(command) => engine.execute(command).await,
            UserInput::CallPeer(peer) => match engine.select_target(peer).await {
                Ok(()) => engine.initiate_call().await,
                Err(e) => Err(e),
            },
            UserInput::ShowPeers => {
                presenter.show_peers(&engine.view());
                Ok(())
            }
            UserInput::ShowState => {
                presenter.show_view(&engine.view());
                Ok(())
            }
            UserInput::Help => {
                presenter.show_help();
                Ok(())
            }
            UserInput::Quit => break,
        };
        if let Err(e) = result {
            presenter.show_refusal(&e);
        }
    }
}

fn parse_input(line: &str, presenter: &dyn Presenter) -> Option<UserInput> {
    let parsed = if line.trim_start().starts_with('{') {
        json::parse_command(line)
    } else {
        console::parse_command(line)
    };
    match parsed {
        Ok(input) => Some(input),
        Err(reason) => {
            presenter.show_unparsed(line, &reason);
            None
        }
    }
}
