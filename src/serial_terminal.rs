use serialport::SerialPort;
use std::io::{Read, Write};
use std::time::{Duration, Instant};

use crate::units::MAX_COUNTS;

/// Line terminator the Arduino firmware appends to every response.
const RESPONSE_TERMINATOR: &[u8] = b"\r\n";

/// Deadline for a single query/response round trip.
const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, thiserror::Error)]
pub enum SolTerminalError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout error: no response terminator received for command '{command}'")]
    Timeout { command: String },

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Malformed response to '{command}': '{response}' is not a digital count")]
    MalformedResponse { command: String, response: String },

    #[error("Value {value} is out of range for output channel {channel} (max {max})", max = MAX_COUNTS)]
    ValueOutOfRange { value: u32, channel: u8 },
}

/// Blocking round-trip interface to the instrument.
///
/// The measurement core drives outputs and reads inputs exclusively through
/// this seam, so experiments run unchanged against the serial device or a
/// deterministic stub.
pub trait Transport {
    /// Drive an output channel to a raw digital count.
    fn set_output(&mut self, value: u32, channel: u8) -> Result<(), SolTerminalError>;

    /// Read a raw digital count from a channel.
    fn get_input(&mut self, channel: u8) -> Result<u32, SolTerminalError>;
}

/// Query/response terminal for the Arduino firmware.
#[derive(Debug)]
pub struct SolTerminal {
    serial: Box<dyn SerialPort>,
}

impl SolTerminal {
    /// Open the given serial port and flush any stale bytes.
    pub fn new(port: &str) -> Result<Self, SolTerminalError> {
        let serial = serialport::new(port, 9600)
            .timeout(Duration::from_millis(10))
            .open()?;

        let mut terminal = Self { serial };
        terminal.flush()?;
        Ok(terminal)
    }

    /// Drop whatever is sitting in the OS buffers.
    fn flush(&mut self) -> Result<(), SolTerminalError> {
        self.serial.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }

    /// Send a command and read the response up to the `\r\n` terminator.
    fn query(&mut self, command: &str) -> Result<String, SolTerminalError> {
        let command_with_newline = format!("{}\n", command);
        self.serial.write_all(command_with_newline.as_bytes())?;

        let mut response = Vec::new();
        let mut window = Vec::new();
        let started = Instant::now();

        loop {
            let mut byte = [0u8; 1];
            match self.serial.read_exact(&mut byte) {
                Ok(_) => {
                    response.push(byte[0]);
                    window.push(byte[0]);

                    // Keep window size equal to terminator length
                    if window.len() > RESPONSE_TERMINATOR.len() {
                        window.remove(0);
                    }

                    if window == RESPONSE_TERMINATOR {
                        break;
                    }
                }
                Err(_e) => {
                    if started.elapsed() >= QUERY_TIMEOUT {
                        return Err(SolTerminalError::Timeout {
                            command: command.to_string(),
                        });
                    }
                }
            }
        }

        let without_terminator = &response[..response.len() - RESPONSE_TERMINATOR.len()];
        let response_str = String::from_utf8(without_terminator.to_vec())?;
        Ok(response_str.trim().to_string())
    }

    /// Send a command and parse the decimal count it answers with.
    fn query_count(&mut self, command: &str) -> Result<u32, SolTerminalError> {
        let response = self.query(command)?;
        response
            .parse()
            .map_err(|_| SolTerminalError::MalformedResponse {
                command: command.to_string(),
                response,
            })
    }
}

impl Transport for SolTerminal {
    fn set_output(&mut self, value: u32, channel: u8) -> Result<(), SolTerminalError> {
        if value > MAX_COUNTS {
            return Err(SolTerminalError::ValueOutOfRange { value, channel });
        }
        log::debug!("OUT:CH{} <- {}", channel, value);
        self.query(&format!("OUT:CH{} {}", channel, value))?;
        Ok(())
    }

    fn get_input(&mut self, channel: u8) -> Result<u32, SolTerminalError> {
        // Channel 0 reads back the driven output, every other channel is a
        // measurement input.
        let command = if channel == 0 {
            "OUT:CH0?".to_string()
        } else {
            format!("MEAS:CH{}?", channel)
        };
        self.query_count(&command)
    }
}
