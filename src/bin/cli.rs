//! k17-cli
//!
//! Command-line control of a FiiO K17 over its TCP protocol.

use std::time::Duration;

use clap::Parser;
use k17link::{Config, DeviceEvent, ReconnectSupervisor, Session, SessionState};
use tracing_subscriber::{fmt, EnvFilter};

/// k17-cli
#[derive(Parser, Debug)]
#[command(name = "k17-cli")]
#[command(about = "Control a FiiO K17 DAC/amplifier")]
#[command(version)]
struct Args {
    /// IP address or host name of the K17
    host: String,

    /// Device TCP port
    #[arg(short, long, default_value_t = k17link::config::DEFAULT_PORT)]
    port: u16,

    /// Show all device settings
    #[arg(long)]
    info: bool,

    /// Print the current volume
    #[arg(long)]
    get_volume: bool,

    /// Set the volume (0-100)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(0..=100))]
    set_volume: Option<u16>,

    /// Raise the volume one step
    #[arg(long)]
    up: bool,

    /// Lower the volume one step
    #[arg(long)]
    down: bool,

    /// Set the volume to 0
    #[arg(long)]
    mute: bool,

    /// Print volume knob changes and connection changes until interrupted
    #[arg(long)]
    monitor: bool,

    /// Keep reconnecting when the device drops the connection (with --monitor)
    #[arg(long)]
    persistent: bool,

    /// Request timeout in milliseconds
    #[arg(long, default_value = "5000")]
    timeout_ms: u64,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    // Initialize tracing/logging
    let default_filter = if args.verbose { "info,k17link=debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .init();

    if let Err(e) = run(&args) {
        tracing::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> k17link::Result<()> {
    let config = Config::builder()
        .host(&args.host)
        .port(args.port)
        .request_timeout(Duration::from_millis(args.timeout_ms))
        .build();
    let session = Session::new(config)?;

    println!("Connecting to {}:{}...", args.host, args.port);
    let settings = session.connect()?;
    println!("Connected! Current volume: {}", settings.current_volume);

    if args.info {
        println!("\nDevice settings:");
        for (key, value) in settings.to_map() {
            println!("  {}: {}", key, value);
        }
    }

    if args.get_volume {
        let settings = session.get_settings()?;
        println!("Volume: {}", settings.current_volume);
    }

    if let Some(level) = args.set_volume {
        println!("Setting volume to {}...", level);
        let echoed = session.set_volume(level)?;
        if echoed == level {
            println!("OK");
        } else {
            println!("Device reports volume {}", echoed);
        }
    }

    if args.up {
        println!("Volume: {}", session.volume_up()?);
    }
    if args.down {
        println!("Volume: {}", session.volume_down()?);
    }
    if args.mute {
        session.mute()?;
        println!("Muted");
    }

    if args.monitor {
        monitor(&session, args.persistent)?;
    }

    session.disconnect();
    Ok(())
}

fn monitor(session: &Session, persistent: bool) -> k17link::Result<()> {
    let (_id, events) = session.subscribe();
    let _supervisor = if persistent {
        Some(ReconnectSupervisor::start(session.clone())?)
    } else {
        None
    };

    println!("\nMonitoring volume changes (Ctrl+C to stop)...");
    for event in events.iter() {
        match event {
            DeviceEvent::VolumeChanged(volume) => println!("Volume: {}", volume),
            DeviceEvent::Push(push) => {
                tracing::debug!("Push 0x{:02x}: {:02x?}", push.command, &push.payload[..]);
            }
            DeviceEvent::StateChanged(state) => {
                println!("Connection: {}", state);
                if state == SessionState::Disconnected && !persistent {
                    break;
                }
            }
            DeviceEvent::FrameError(reason) => tracing::debug!("Frame error: {}", reason),
        }
    }
    Ok(())
}
