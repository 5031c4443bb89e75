//! A stand-in for the micro:bit, for running the bridge without hardware.
//!
//! It answers `DISCOVER`, then rocks back and forth about the x axis and
//! streams one `XYZ:` line per read until it receives `TERMINATE`.

use crate::channel::{ChannelConfig, ChannelError, LineChannel};
use crate::protocol::Command;
use std::collections::VecDeque;

/// Magnitude of 1 g in accelerometer units (milli-g).
const GRAVITY: f32 = 1000.0;

pub struct SimulatedDevice {
    open: bool,
    streaming: bool,
    outbox: VecDeque<String>,
    step: u32,
    amplitude_deg: f32,
    /// Radians advanced per streamed sample.
    rate: f32,
    button_every: Option<u32>,
    responsive: bool,
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self {
            open: false,
            streaming: false,
            outbox: VecDeque::new(),
            step: 0,
            amplitude_deg: 30.0,
            rate: 0.05,
            button_every: None,
            responsive: true,
        }
    }
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// A device that never answers the handshake.
    pub fn unresponsive() -> Self {
        Self {
            responsive: false,
            ..Self::default()
        }
    }

    pub fn with_amplitude(mut self, degrees: f32) -> Self {
        self.amplitude_deg = degrees;
        self
    }

    /// Press the button after every `samples` streamed samples.
    pub fn with_button_every(mut self, samples: u32) -> Self {
        self.button_every = Some(samples.max(1));
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    fn next_sample(&mut self) -> String {
        let phase = self.step as f32 * self.rate;
        let tilt = self.amplitude_deg.to_radians() * phase.sin();
        self.step += 1;

        let y = (GRAVITY * tilt.sin()).round() as i32;
        let z = (-GRAVITY * tilt.cos()).round() as i32;
        format!("XYZ:0:{}:{}", y, z)
    }
}

impl LineChannel for SimulatedDevice {
    fn open(&mut self, config: &ChannelConfig) -> Result<(), ChannelError> {
        tracing::info!(port = %config.port, "Opened simulated device");
        self.open = true;
        self.streaming = false;
        self.outbox.clear();
        self.step = 0;
        Ok(())
    }

    fn close(&mut self) {
        self.open = false;
        self.streaming = false;
        self.outbox.clear();
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write_line(&mut self, line: &str) -> Result<(), ChannelError> {
        if !self.open {
            return Err(ChannelError::WriteOnClosedChannel);
        }
        let line = line.to_uppercase();
        if line == Command::Discover.as_line() && self.responsive {
            self.outbox.push_back("ACKNOWLEDGE".to_string());
            self.streaming = true;
        } else if line == Command::Terminate.as_line() {
            self.streaming = false;
            self.outbox.clear();
        }
        Ok(())
    }

    fn read_line(&mut self) -> Result<Option<String>, ChannelError> {
        if !self.open {
            return Ok(None);
        }
        if let Some(line) = self.outbox.pop_front() {
            return Ok(Some(line));
        }
        if !self.streaming {
            return Ok(None);
        }

        let sample = self.next_sample();
        if let Some(every) = self.button_every {
            if self.step % every == 0 {
                self.outbox.push_back("BUTTON_DOWN".to_string());
            }
        }
        Ok(Some(sample))
    }
}
