use anyhow::Context;
use chrono::Local;
use clap::Parser;
use log::{error, info};
use peercall::callcore::{CallEvent, CallView, CoreEventBus, EventHandler, Phase};
use peercall::config::{Cli, ClientConfig, UiMode};
use peercall::platform::{LoopbackPlatform, Platform};
use peercall::transport::MemoryRelay;
use peercall::ui::{self, ConsolePresenter, JsonPresenter, Presenter};
use peercall::{CallEngine, Client};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// Usage:
//   cargo run                                   # console client on the default relay
//   cargo run -- --relay wss://relay.example    # another relay
//   cargo run -- --ui json --id alice           # JSON lines on stdin/stdout
//   cargo run -- --demo                         # scripted call between two local clients

fn main() {
    let cli = Cli::parse();
    let config = match cli.to_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_filter))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    let result = rt.block_on(async {
        if cli.demo {
            run_demo().await
        } else {
            run(config).await
        }
    });
    // A pending stdin read would otherwise hold the runtime open.
    rt.shutdown_timeout(Duration::from_millis(500));

    if let Err(e) = result {
        error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(config: ClientConfig) -> anyhow::Result<()> {
    let bus = CoreEventBus::new();
    let presenter: Arc<dyn Presenter> = match config.ui {
        UiMode::Console => {
            let console = Arc::new(ConsolePresenter::stdout());
            bus.add_handler(console.clone());
            console
        }
        UiMode::Json => {
            let json = Arc::new(JsonPresenter::stdout());
            bus.add_handler(json.clone());
            json
        }
    };

    let client = Client::from_config(&config, bus);
    client.connect().await?;
    info!("Registered as {} on {}", client.local_id(), config.relay_url);
    if config.ui == UiMode::Console {
        presenter.show_help();
    }

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    tokio::select! {
        _ = ui::run_input_loop(client.engine(), presenter, stdin) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }

    client.shutdown().await;
    Ok(())
}

/// Prints one line per phase change, tagged with the client name.
struct DemoPrinter {
    name: String,
    last: Mutex<Option<Phase>>,
}

impl EventHandler for DemoPrinter {
    fn handle_event(&self, event: &CallEvent) {
        match event {
            CallEvent::StateChanged(view) => {
                let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
                if *last != Some(view.phase) {
                    *last = Some(view.phase);
                    println!("[{}] {}", self.name, view.phase);
                }
            }
            CallEvent::Notice(notice) => println!("[{}] * {notice}", self.name),
            CallEvent::Error(err) => println!("[{}] ! {err}", self.name),
        }
    }
}

fn demo_client(relay: &Arc<MemoryRelay>, name: &str) -> Arc<Client> {
    let bus = CoreEventBus::new();
    bus.add_handler(Arc::new(DemoPrinter {
        name: name.to_string(),
        last: Mutex::new(None),
    }));
    Client::new(
        name.into(),
        Arc::new(relay.factory()),
        Platform::new(LoopbackPlatform::new(name)),
        bus,
    )
}

async fn wait_for(
    engine: &CallEngine,
    what: &str,
    condition: impl FnMut(&CallView) -> bool,
) -> anyhow::Result<()> {
    let mut views = engine.subscribe();
    tokio::time::timeout(Duration::from_secs(5), views.wait_for(condition))
        .await
        .with_context(|| format!("timed out waiting for {what}"))?
        .map(|_| ())
        .context("engine stopped")
}

async fn run_demo() -> anyhow::Result<()> {
    let relay = MemoryRelay::new();
    let alice = demo_client(&relay, "alice");
    let bob = demo_client(&relay, "bob");
    alice.connect().await?;
    bob.connect().await?;

    wait_for(alice.engine(), "bob to come online", |v| {
        v.peers.iter().any(|p| p == "bob") && v.local_media_ready
    })
    .await?;
    wait_for(bob.engine(), "bob's microphone", |v| v.local_media_ready).await?;

    alice.engine().select_target("bob").await?;
    alice.engine().initiate_call().await?;
    wait_for(bob.engine(), "the incoming call", |v| v.phase == Phase::RingingIncoming).await?;

    bob.engine().accept_call().await?;
    wait_for(alice.engine(), "alice to connect", |v| v.phase == Phase::Connected).await?;
    wait_for(bob.engine(), "bob to connect", |v| v.phase == Phase::Connected).await?;

    tokio::time::sleep(Duration::from_secs(1)).await;
    alice.engine().end_call().await?;
    wait_for(bob.engine(), "bob to hang up", |v| v.phase == Phase::Idle).await?;

    alice.shutdown().await;
    bob.shutdown().await;
    Ok(())
}
