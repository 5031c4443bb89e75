use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tilt_bridge::{
    list_ports, BridgeConfig, LineChannel, OrientationSinks, SerialLineChannel, Session,
    SessionEvent, SimulatedDevice,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML file with bridge settings. Flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the available serial ports and exit.
    #[arg(long)]
    list_ports: bool,

    #[arg(long)]
    port: Option<String>,

    #[arg(long)]
    baud: Option<u32>,

    /// Run against a simulated board instead of a serial port.
    #[arg(long)]
    simulate: bool,

    /// Seconds to wait for ACKNOWLEDGE.
    #[arg(long)]
    discovery_window: Option<f32>,

    /// Discovery attempts before giving up.
    #[arg(long)]
    attempts: Option<u32>,

    #[arg(long)]
    tick_hz: Option<f32>,

    #[arg(long)]
    host: Option<String>,

    #[arg(long)]
    blender: bool,

    #[arg(long)]
    visualizer: bool,

    #[arg(long)]
    stdout: bool,

    #[arg(long)]
    blender_port: Option<u16>,

    #[arg(long)]
    viz_port: Option<u16>,
}

fn build_config(args: &Args) -> Result<BridgeConfig> {
    let mut config = match &args.config {
        Some(path) => BridgeConfig::load(path)?,
        None => BridgeConfig::default(),
    };

    if let Some(port) = &args.port {
        config.serial.port = port.clone();
    }
    if let Some(baud) = args.baud {
        config.serial.baud = baud;
    }
    if let Some(window) = args.discovery_window {
        config.discovery_window_secs = window;
    }
    if let Some(attempts) = args.attempts {
        config.discovery_attempts = attempts;
    }
    if let Some(tick_hz) = args.tick_hz {
        config.tick_hz = tick_hz;
    }
    if let Some(host) = &args.host {
        config.sinks.host = host.clone();
    }
    if let Some(port) = args.blender_port {
        config.sinks.blender_port = port;
    }
    if let Some(port) = args.viz_port {
        config.sinks.viz_port = port;
    }
    config.simulate |= args.simulate;
    config.sinks.blender |= args.blender;
    config.sinks.visualizer |= args.visualizer;
    config.sinks.stdout |= args.stdout;

    Ok(config)
}

fn validated_config(args: &Args) -> Result<BridgeConfig> {
    let config = build_config(args)?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn print_ports() -> Result<()> {
    let ports = list_ports().context("Failed to enumerate serial ports")?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in ports {
        println!("{}", port);
    }
    Ok(())
}

/// Fixed-rate scheduler: one session tick per frame until Ctrl+C or the
/// handshake runs out of attempts.
fn run_session<C: LineChannel>(
    mut session: Session<C>,
    config: &BridgeConfig,
    mut sinks: OrientationSinks,
    running: &AtomicBool,
) -> Result<()> {
    session
        .begin_discovery(&config.serial)
        .with_context(|| format!("Failed to open {}", config.serial.port))?;

    let interval = config.tick_interval();
    let mut attempt = 1;
    let mut last_tick = Instant::now();

    println!("Starting data forwarding...");
    println!("Press Ctrl+C to exit");

    let result: Result<()> = loop {
        if !running.load(Ordering::SeqCst) {
            break Ok(());
        }

        let now = Instant::now();
        let dt = now - last_tick;
        last_tick = now;

        match session.tick(dt) {
            Some(SessionEvent::Orientation(orientation)) => {
                if let Err(e) = sinks.forward(&orientation) {
                    tracing::error!(%e, "Render consumer went away");
                    break Err(e.into());
                }
            }
            Some(SessionEvent::Connected) => {
                tracing::info!(status = %session.status().message, "Handshake complete");
            }
            Some(SessionEvent::ButtonDown) => {
                tracing::warn!("STOP requested from board");
            }
            Some(SessionEvent::HandshakeFailed(failure)) => {
                if attempt >= config.discovery_attempts {
                    break Err(anyhow::anyhow!(
                        "Device did not acknowledge after {} attempt(s): {}",
                        attempt,
                        failure
                    ));
                }
                attempt += 1;
                tracing::info!(attempt, "Retrying discovery");
                if let Err(e) = session.begin_discovery(&config.serial) {
                    break Err(e.into());
                }
            }
            None => {}
        }

        let spent = last_tick.elapsed();
        if spent < interval {
            std::thread::sleep(interval - spent);
        }
    };

    session.shutdown();
    result
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if args.list_ports {
        return print_ports();
    }

    let config = validated_config(&args)?;

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = running.clone();
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("Failed to install Ctrl+C handler")?;
    }

    let Some(sinks) = OrientationSinks::connect(&config.sinks, &running)? else {
        return Ok(());
    };

    if config.simulate {
        let session =
            Session::with_discovery_window(SimulatedDevice::new(), config.discovery_window());
        run_session(session, &config, sinks, &running)
    } else {
        if config.serial.port.is_empty() {
            bail!("No serial port configured; try --list-ports");
        }
        let session =
            Session::with_discovery_window(SerialLineChannel::new(), config.discovery_window());
        run_session(session, &config, sinks, &running)
    }
}
