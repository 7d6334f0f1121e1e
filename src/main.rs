//! boxctl CLI - talks to a running networking engine over its local socket.
//!
//! This is the main binary entry point. See the `boxctl` library for the
//! core functionality.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use boxctl::command::ClientState;
use boxctl::profile::{
    DirectoryProfileSource, PickById, ProfileContent, ProfileImporter, ProfileServer,
};
use boxctl::{fetch_profile, Config, Session, SessionPhase, UnixConnector};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

// CLI
#[derive(Parser)]
#[command(name = "boxctl")]
#[command(version)]
#[command(about = "Control client for a local networking engine")]
struct Cli {
    /// Override the control socket path
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and print state changes until interrupted
    Watch,
    /// Select a member of an outbound group
    Select {
        /// Group tag
        group: String,
        /// Member tag
        member: String,
    },
    /// Switch the engine mode
    Mode {
        /// Mode name, as listed by the engine
        name: String,
    },
    /// Latency-test a group or outbound
    UrlTest {
        /// Group or outbound tag
        tag: String,
    },
    /// Close every tracked connection
    CloseConnections,
    /// Print the effective configuration
    Config,
    /// Profile transfer
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Fetch one profile from a profile server
    Fetch {
        /// Profile id; defaults to the first listed
        #[arg(long)]
        id: Option<i64>,
        /// Write the profile here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Serve every *.json file in a directory
    Serve {
        /// Directory holding profile documents
        dir: PathBuf,
    },
}

/// Writes a received profile's document to a file or stdout.
struct WriteProfile {
    output: Option<PathBuf>,
}

#[async_trait]
impl ProfileImporter for WriteProfile {
    async fn import(&mut self, content: &ProfileContent) -> Result<()> {
        match &self.output {
            Some(path) => tokio::fs::write(path, &content.config)
                .await
                .with_context(|| format!("Failed to write profile to {}", path.display())),
            None => {
                println!("{}", content.config);
                Ok(())
            }
        }
    }
}

/// Start connecting and wait until the session is up or gives up.
async fn connect(session: &Session, config: &Config) -> Result<()> {
    let mut state = session.subscribe_state();
    session.connect();
    loop {
        if state.borrow_and_update().is_connected {
            return Ok(());
        }
        if session.phase() == SessionPhase::Disconnected {
            anyhow::bail!(
                "Could not connect to engine at {}",
                config.socket_path.display()
            );
        }
        // The retry loop settles silently, so poll the phase as well.
        let _ = tokio::time::timeout(Duration::from_millis(200), state.changed()).await;
    }
}

/// Run one request on a fresh session, then close it cleanly.
async fn run_once(
    config: &Config,
    request: impl FnOnce(&Session) -> std::result::Result<(), boxctl::SessionError>,
) -> Result<()> {
    let session = Session::new(
        config.session.clone(),
        UnixConnector::new(&config.socket_path),
    );
    connect(&session, config).await?;
    request(&session)?;
    session.shutdown().await;
    Ok(())
}

fn summarize(state: &ClientState) -> String {
    let (memory, up, down) = state
        .status
        .as_ref()
        .map(|s| (s.memory, s.uplink, s.downlink))
        .unwrap_or_default();
    format!(
        "connected={} mode={} mem={}B up={}B/s down={}B/s groups={} connections={}",
        state.is_connected,
        state.clash_mode,
        memory,
        up,
        down,
        state.groups.len(),
        state.connections.len()
    )
}

async fn watch(config: &Config) -> Result<()> {
    let session = Session::new(
        config.session.clone(),
        UnixConnector::new(&config.socket_path),
    );
    connect(&session, config).await?;

    let mut state = session.subscribe_state();
    let mut last_log = None;
    loop {
        tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = state.borrow_and_update().clone();
                println!("{}", summarize(&snapshot));
                if let Some(alert) = &snapshot.alert {
                    eprintln!("alert: {alert}");
                    session.dismiss_alert();
                }
                let newest = snapshot.log_lines.back().cloned();
                if newest.is_some() && newest != last_log {
                    if let Some(line) = &newest {
                        println!("[{:?}] {}", line.level, line.message);
                    }
                    last_log = newest;
                }
                if !snapshot.is_connected {
                    log::warn!("Engine closed the session");
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted, disconnecting");
                break;
            }
        }
    }
    session.disconnect();
    Ok(())
}

async fn serve_profiles(config: &Config, dir: PathBuf) -> Result<()> {
    let source = Arc::new(DirectoryProfileSource::new(dir));
    let server = ProfileServer::start(config.profile_socket_path.clone(), source)?;
    println!("Serving profiles on {}", server.socket_path().display());
    tokio::signal::ctrl_c().await?;
    server.shutdown();
    Ok(())
}

async fn fetch(config: &Config, id: Option<i64>, output: Option<PathBuf>) -> Result<()> {
    let connector = UnixConnector::new(&config.profile_socket_path);
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let content = fetch_profile(
        &connector,
        &mut PickById(id),
        &mut WriteProfile { output },
        &cancel,
    )
    .await?;
    log::info!("Fetched profile {:?}", content.name);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    let mut config = Config::load()?;
    if let Some(socket) = cli.socket {
        config.socket_path = socket;
    }

    match cli.command {
        Commands::Watch => watch(&config).await?,
        Commands::Select { group, member } => {
            run_once(&config, |s| s.select_outbound(&group, &member)).await?;
        }
        Commands::Mode { name } => {
            run_once(&config, |s| s.set_clash_mode(&name)).await?;
        }
        Commands::UrlTest { tag } => {
            run_once(&config, |s| s.url_test(&tag)).await?;
        }
        Commands::CloseConnections => {
            run_once(&config, Session::close_all_connections).await?;
        }
        Commands::Config => println!("{}", serde_json::to_string_pretty(&config)?),
        Commands::Profile { command } => match command {
            ProfileCommands::Fetch { id, output } => fetch(&config, id, output).await?,
            ProfileCommands::Serve { dir } => serve_profiles(&config, dir).await?,
        },
    }

    Ok(())
}
