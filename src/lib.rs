//! # SOLRead RS
//!
//! A Rust library for measuring current-voltage characteristics of a solar
//! cell through an Arduino-based measurement rig.
//!
//! The rig exposes a simple query/response protocol over a serial port: one
//! DAC output drives the cell, a second output holds a bias level, and two
//! ADC inputs read back the voltage over the cell and over a shunt resistor.
//! This library sweeps the drive output across a range, converts the raw
//! 10-bit counts into physical volts and amps, repeats the sweep to average
//! out noise, and reports the resulting IV curve with standard errors.
//!
//! ## Features
//!
//! - **Device discovery**: Uses `serialport` for finding attached rigs
//! - **Unit conversion**: Explicit, caller-declared conversion between raw
//!   counts and physical volts
//! - **Repeated experiments**: N sweeps averaged point-wise with standard
//!   errors on both channels
//! - **DataFrame output**: Uses `polars` for result export
//! - **Safe shutdown**: Driven outputs are reset to zero on every exit path,
//!   including mid-sweep transport failures
//!
//! ## Examples
//!
//! ### Running an experiment
//!
//! ```rust,no_run
//! use solread_rs::SolarCell;
//!
//! // Connect to the first rig found
//! let mut cell = SolarCell::connect(None)?;
//!
//! // Five sweeps from 0 V to 3.3 V with a 1.65 V bias
//! let result = cell.exec_experiment(5, 0.0, 3.3, 1.65)?;
//! println!("{}", result.to_dataframe()?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ### Unit conversion
//!
//! ```rust
//! use solread_rs::{convert, ConversionMode, NumericValue};
//!
//! // A raw count becomes volts under Auto
//! let volts = convert(NumericValue::Counts(512), ConversionMode::Auto);
//!
//! // A voltage becomes the nearest count
//! let counts = convert(NumericValue::Volts(1.65), ConversionMode::Auto);
//! assert_eq!(counts, NumericValue::Counts(512));
//! ```
//!
//! ### Device discovery
//!
//! ```rust,no_run
//! use solread_rs::SolConnector;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // List available rigs, optionally filtered by a search string
//! let devices = SolConnector::get_available_devices(Some("ttyACM"))?;
//! for device in devices {
//!     println!("Found rig: {} at {}", device.name, device.port);
//! }
//! # Ok(())
//! # }
//! ```

pub mod serial_terminal;
pub mod sol_connector;
pub mod solar_cell;
pub mod units;

// Re-export the main types for convenience
pub use units::{
    convert, counts_to_volts, volts_to_counts, ConversionError, ConversionMode, NumericValue,
    FULL_SCALE_VOLTS, MAX_COUNTS, VOLTS_PER_COUNT,
};

pub use serial_terminal::{SolTerminal, SolTerminalError, Transport};

pub use sol_connector::{SolConnector, SolConnectorError, SolDevice};

pub use solar_cell::{
    CircuitModel, ExperimentError, ExperimentResult, ScanError, ScanResult, SolarCell,
};
