//! Host side of the micro:bit tilt controller.
//!
//! Discovers the board over a serial line, calibrates against the first
//! accelerometer sample and turns every later sample into a tilt
//! [`Orientation`] for a render consumer.

pub mod calibration;
pub mod channel;
pub mod config;
pub mod pipeline;
pub mod protocol;
pub mod session;
pub mod sim;
pub mod sink;

pub use calibration::{CalibrationError, CalibrationTransform};
pub use channel::{list_ports, ChannelConfig, ChannelError, LineChannel, SerialLineChannel};
pub use config::{BridgeConfig, ConfigError, SinkConfig};
pub use pipeline::Orientation;
pub use protocol::{parse, parse_line, Command, ParsedEvent, ProtocolError};
pub use session::{
    ConnectionState, HandshakeFailure, Session, SessionError, SessionEvent, Severity, Status,
};
pub use sim::SimulatedDevice;
pub use sink::OrientationSinks;
