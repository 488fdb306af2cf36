//! Interactive tic-tac-toe client.
//!
//! Run with: `cargo run -p ttt-client -- --host 127.0.0.1 --search`

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use ttt_client::commands::{self, Command, CommandError};
use ttt_client::platform::PlatformDirs;
use ttt_client::render;
use ttt_config::{CliArgs, Config, LAST_HOST_KEY, Prefs};
use ttt_net::{ClientShell, DispatchQueue, EventSink, TcpBackend};

/// Logic tick: how often socket events queued by I/O tasks are applied.
const TICK: Duration = Duration::from_millis(50);

#[tokio::main]
async fn main() {
    let args = CliArgs::parse();

    let dirs = match PlatformDirs::resolve_and_create() {
        Ok(dirs) => dirs,
        Err(e) => {
            eprintln!("Failed to initialize platform directories: {e}");
            std::process::exit(1);
        }
    };

    let config_dir = args.config.clone().unwrap_or_else(|| dirs.config_dir.clone());
    let mut config = match Config::load_or_create(&config_dir) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config, using defaults: {e}");
            Config::default()
        }
    };
    config.apply_cli_overrides(&args);

    ttt_log::init_logging(Some(&dirs.log_dir), cfg!(debug_assertions), Some(&config));

    let prefs = match Prefs::load(&dirs.data_dir) {
        Ok(prefs) => Arc::new(prefs),
        Err(e) => {
            eprintln!("Failed to load preferences: {e}");
            std::process::exit(1);
        }
    };

    let host = args
        .host
        .clone()
        .or_else(|| prefs.get(LAST_HOST_KEY))
        .unwrap_or_else(|| config.server.default_host.clone());
    info!("Server: {host}:{} | rejoin: {}", config.server.port, config.rejoin.enabled);

    let mut queue = DispatchQueue::new();
    let (sink, mut events) = EventSink::channel();
    let backend = Arc::new(TcpBackend::new(config.server.clone()));
    let shell = ClientShell::new(backend, prefs, &config, queue.handle(), sink);

    {
        let shell = shell.clone();
        let host = host.clone();
        let search = args.search;
        tokio::spawn(async move {
            if shell.connect(&host).await.is_ok() && search {
                let _ = shell.start_search().await;
            }
        });
    }

    println!("{}", commands::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(TICK);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                queue.drain();
            }
            Some(event) = events.recv() => {
                println!("{}", render::describe(&event));
                let shell = shell.clone();
                tokio::spawn(async move { shell.react(&event).await });
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => match commands::parse(&line) {
                    Ok(Command::Quit) => break,
                    Ok(Command::Help) => println!("{}", commands::HELP),
                    Ok(command) => {
                        tokio::spawn(execute(shell.clone(), command, host.clone()));
                    }
                    Err(CommandError::Empty) => {}
                    Err(e) => println!("{e}"),
                },
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("stdin closed: {e}");
                    break;
                }
            },
            _ = &mut ctrl_c => break,
        }
    }

    info!("Shutting down");
    shell.disconnect().await;
}

/// Run a command. Failures surface as events, so results are dropped here.
async fn execute(shell: ClientShell, command: Command, default_host: String) {
    match command {
        Command::Connect(host) => {
            let _ = shell.connect(host.as_deref().unwrap_or(&default_host)).await;
        }
        Command::Play => {
            let _ = shell.start_search().await;
        }
        Command::Cancel => shell.cancel_search().await,
        Command::Move(index) => {
            let _ = shell.send_action(index).await;
        }
        Command::Leave => shell.leave().await,
        Command::Rejoin => {
            shell.try_rejoin().await;
        }
        Command::Disconnect => shell.disconnect().await,
        Command::Help | Command::Quit => {}
    }
}
