use crate::config::SinkConfig;
use crate::pipeline::Orientation;
use std::io::{self, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// TCP render consumers that receive every orientation as a JSON line.
pub struct OrientationSinks<W: Write = TcpStream> {
    blender: Option<W>,
    visualizer: Option<W>,
    echo: bool,
}

impl OrientationSinks<TcpStream> {
    /// Connect to every enabled consumer, waiting for each to come up.
    ///
    /// Returns `Ok(None)` if `running` is cleared while still waiting.
    pub fn connect(config: &SinkConfig, running: &AtomicBool) -> io::Result<Option<Self>> {
        let blender = if config.blender {
            match connect_to_service(&config.host, config.blender_port, "Blender", running)? {
                Some(stream) => Some(stream),
                None => return Ok(None),
            }
        } else {
            None
        };

        let visualizer = if config.visualizer {
            match connect_to_service(&config.host, config.viz_port, "Visualizer", running)? {
                Some(stream) => Some(stream),
                None => return Ok(None),
            }
        } else {
            None
        };

        Ok(Some(Self {
            blender,
            visualizer,
            echo: config.stdout,
        }))
    }
}

impl<W: Write> OrientationSinks<W> {
    pub fn from_writers(blender: Option<W>, visualizer: Option<W>, echo: bool) -> Self {
        Self {
            blender,
            visualizer,
            echo,
        }
    }

    pub fn forward(&mut self, orientation: &Orientation) -> io::Result<()> {
        let mut line = serde_json::to_vec(orientation)?;
        line.push(b'\n');

        if let Some(stream) = &mut self.blender {
            stream.write_all(&line)?;
        }
        if let Some(stream) = &mut self.visualizer {
            stream.write_all(&line)?;
        }
        if self.echo {
            let mut stdout = io::stdout().lock();
            write!(stdout, "Forwarded: {}\r", String::from_utf8_lossy(&line[..line.len() - 1]))?;
            stdout.flush()?;
        }
        Ok(())
    }

    pub fn into_writers(self) -> (Option<W>, Option<W>) {
        (self.blender, self.visualizer)
    }
}

fn connect_to_service(
    host: &str,
    port: u16,
    service_name: &str,
    running: &AtomicBool,
) -> io::Result<Option<TcpStream>> {
    let addr = format!("{}:{}", host, port);
    tracing::info!(service = service_name, %addr, "Connecting to render consumer");

    while running.load(Ordering::SeqCst) {
        match TcpStream::connect(&addr) {
            Ok(stream) => {
                stream.set_nodelay(true)?;
                tracing::info!(service = service_name, %addr, "Connected");
                return Ok(Some(stream));
            }
            Err(e) => {
                tracing::info!(service = service_name, %e, "Waiting for consumer");
                std::thread::sleep(RECONNECT_DELAY);
            }
        }
    }
    Ok(None)
}
