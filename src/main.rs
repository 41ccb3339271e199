use color_eyre::{eyre::eyre, Result};
use controlmapper::config::{AppConfig, ConfigOrigin};
use controlmapper::controller::ControlInput;
use controlmapper::events::{EngineEvent, Notifier};
use controlmapper::mapping::{CommandRegistry, InMemoryTargets, MappingEngineHandle};
use controlmapper::persistence::TomlSessionStore;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = AppConfig::default_path();
    let (config, origin) = AppConfig::load_or_create(&config_path).await?;
    setup(config.level())?;
    match origin {
        ConfigOrigin::Created => info!("Created default configuration at {}", config_path.display()),
        ConfigOrigin::Loaded => debug!("Loaded configuration from {}", config_path.display()),
        ConfigOrigin::Fallback(e) => warn!(
            "Invalid config file {}, using defaults: {}",
            config_path.display(),
            e
        ),
    }

    info!(
        "Starting controlmapper (session {}, config {})",
        config.session,
        config_path.display()
    );

    let store = TomlSessionStore::new(config.sessions_root(), config.session.clone())?;
    match store.list_sessions().await {
        Ok(sessions) => debug!("Available sessions: {:?}", sessions),
        Err(e) => warn!("Unable to list sessions: {}", e),
    }

    let notifier = Notifier::new(config.event_capacity);
    let events = notifier.subscribe();

    let mut handle = MappingEngineHandle::spawn(
        Box::new(InMemoryTargets::permissive()),
        Box::new(setup_commands()),
        Arc::new(store),
        notifier,
        config.engine_options(),
    )
    .await
    .map_err(|e| eyre!("Failed to spawn mapping engine: {}", e))?;

    let _event_log = tokio::spawn(log_events(events));

    // Zeilen von stdin: "<type> <device> <control> <raw> <min> <max>"
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() || line.starts_with('#') {
                        continue;
                    }
                    match line.parse::<ControlInput>() {
                        Ok(input) => {
                            if let Err(e) = handle.send_input(input).await {
                                error!("{}", e);
                                break;
                            }
                        }
                        Err(e) => warn!("Ignoring line '{}': {}", line, e),
                    }
                }
                Ok(None) => {
                    info!("Input closed");
                    break;
                }
                Err(e) => {
                    error!("Failed to read input: {}", e);
                    break;
                }
            }
        }
    }

    handle
        .shutdown()
        .await
        .map_err(|e| eyre!("Engine shutdown failed: {}", e))?;
    info!("Bye");
    Ok(())
}

fn setup(level: Level) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    setup_logging_env(level);
    Ok(())
}

fn setup_logging_env(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .pretty()
        .init();
}

/// Host commands available to command mappings. Without a host attached
/// they only log.
fn setup_commands() -> CommandRegistry {
    let mut registry = CommandRegistry::new();
    for command in ["queue_prompt", "undo", "redo", "save"] {
        registry.register(command, move || {
            info!("Command: {}", command);
            Ok(())
        });
    }
    debug!("Registered commands: {:?}", registry.command_ids());
    registry
}

async fn log_events(mut events: broadcast::Receiver<EngineEvent>) {
    loop {
        match events.recv().await {
            // every input ends with this one, too noisy for info
            Ok(EngineEvent::ControlInputUnhandled { input }) => {
                debug!("Input done: {} {}", input.control_id, input.raw_value)
            }
            Ok(event) => info!("{}", event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Event log lagged, {} events skipped", skipped)
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
