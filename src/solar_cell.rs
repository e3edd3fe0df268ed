use polars::prelude::*;

use crate::serial_terminal::{SolTerminal, SolTerminalError, Transport};
use crate::sol_connector::{SolConnector, SolConnectorError};
use crate::units::{counts_to_volts, volts_to_counts, MAX_COUNTS};

/// How the cell is wired to the instrument.
///
/// The current derivation is a property of the breadboard, not of this
/// library, so resistances and channel assignments live here instead of in
/// the sweep loop. The defaults match the reference rig: channel 0 drives
/// the cell, channel 3 biases the MOSFET gate, channels 1 and 2 measure the
/// voltage over the cell and over the shunt resistor.
#[derive(Debug, Clone)]
pub struct CircuitModel {
    /// Output channel swept across the range.
    pub drive_channel: u8,
    /// Output channel holding the grounding/bias level for the whole sweep.
    pub bias_channel: u8,
    /// Input channel measuring the voltage over the cell.
    pub cell_channel: u8,
    /// Input channel measuring the voltage over the shunt resistor.
    pub shunt_channel: u8,
    /// Shunt resistance in ohms.
    pub shunt_ohms: f64,
    /// Load resistance in ohms.
    pub load_ohms: f64,
}

impl Default for CircuitModel {
    fn default() -> Self {
        Self {
            drive_channel: 0,
            bias_channel: 3,
            cell_channel: 1,
            shunt_channel: 2,
            shunt_ohms: 4.7,
            load_ohms: 1000.0,
        }
    }
}

impl CircuitModel {
    /// Cell current from the two channel voltages.
    fn derived_current(&self, v_cell: f64, v_shunt: f64) -> f64 {
        v_shunt / self.shunt_ohms + v_cell / self.load_ohms
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Degenerate sweep range: start and end are both {0}")]
    DegenerateRange(u32),

    #[error("Sweep range ends at {end}, past the device maximum of {max}", max = MAX_COUNTS)]
    RangeOverflow { end: u32 },

    #[error("Grounding level {0} is invalid, must round to a count in 1..={max}", max = MAX_COUNTS)]
    InvalidGrounding(f64),

    #[error("Transport failure during sweep: {0}")]
    Transport(#[from] SolTerminalError),
}

#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    #[error("At least 2 repeats are needed to compute a standard error, got {0}")]
    InsufficientRepeats(usize),

    #[error("Scan {scan_index} returned {found} samples where {expected} were expected")]
    ScanLengthMismatch {
        scan_index: usize,
        expected: usize,
        found: usize,
    },

    #[error(transparent)]
    Scan(#[from] ScanError),
}

/// Paired voltage/current samples from a single sweep, in ascending digital
/// step order.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub voltage: Vec<f64>,
    pub current: Vec<f64>,
}

impl ScanResult {
    pub fn len(&self) -> usize {
        self.voltage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voltage.is_empty()
    }
}

/// Column-wise aggregate of repeated sweeps: per-step means and standard
/// errors for both channels.
#[derive(Debug, Clone, Default)]
pub struct ExperimentResult {
    pub voltage: Vec<f64>,
    pub current: Vec<f64>,
    pub voltage_err: Vec<f64>,
    pub current_err: Vec<f64>,
}

impl ExperimentResult {
    pub fn len(&self) -> usize {
        self.voltage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voltage.is_empty()
    }

    /// The experiment as a DataFrame, columns matching the CSV schema the
    /// downstream writers expect.
    pub fn to_dataframe(&self) -> Result<DataFrame, PolarsError> {
        df!(
            "voltage [V]" => &self.voltage,
            "error on voltage [V]" => &self.voltage_err,
            "current [A]" => &self.current,
            "error on current [A]" => &self.current_err,
        )
    }
}

/// Outputs that have been driven and must be returned to zero.
///
/// Arming sets the bias level; disarming resets both outputs. Dropping an
/// armed guard resets them best-effort, so a sweep that fails mid-flight
/// still leaves the rig in a safe state.
struct ArmedOutputs<'a, T: Transport> {
    transport: &'a mut T,
    drive_channel: u8,
    bias_channel: u8,
    disarmed: bool,
}

impl<'a, T: Transport> ArmedOutputs<'a, T> {
    fn arm(
        transport: &'a mut T,
        drive_channel: u8,
        bias_channel: u8,
        grounding: u32,
    ) -> Result<Self, SolTerminalError> {
        transport.set_output(grounding, bias_channel)?;
        Ok(Self {
            transport,
            drive_channel,
            bias_channel,
            disarmed: false,
        })
    }

    fn set_drive(&mut self, value: u32) -> Result<(), SolTerminalError> {
        self.transport.set_output(value, self.drive_channel)
    }

    fn read(&mut self, channel: u8) -> Result<u32, SolTerminalError> {
        self.transport.get_input(channel)
    }

    /// Reset both outputs, reporting the first failure. Both resets are
    /// attempted regardless.
    fn disarm(mut self) -> Result<(), SolTerminalError> {
        self.disarmed = true;
        let drive = self.transport.set_output(0, self.drive_channel);
        let bias = self.transport.set_output(0, self.bias_channel);
        drive.and(bias)
    }
}

impl<T: Transport> Drop for ArmedOutputs<'_, T> {
    fn drop(&mut self) {
        if !self.disarmed {
            let _ = self.transport.set_output(0, self.drive_channel);
            let _ = self.transport.set_output(0, self.bias_channel);
        }
    }
}

/// A solar cell attached to the instrument.
///
/// Owns the transport handle for its whole lifetime; one cell, one
/// connection, no sharing.
pub struct SolarCell<T: Transport = SolTerminal> {
    transport: T,
    circuit: CircuitModel,
}

impl SolarCell<SolTerminal> {
    /// Connect to a rig on the given port, or the first one discovered.
    pub fn connect(port: Option<&str>) -> Result<Self, SolConnectorError> {
        Ok(Self::new(SolConnector::connect(port)?))
    }
}

impl<T: Transport> SolarCell<T> {
    /// Wrap an existing transport with the default circuit wiring.
    pub fn new(transport: T) -> Self {
        Self::with_circuit(transport, CircuitModel::default())
    }

    /// Wrap an existing transport with explicit wiring.
    pub fn with_circuit(transport: T, circuit: CircuitModel) -> Self {
        Self { transport, circuit }
    }

    /// Give the transport back, closing out the cell.
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Sweep the drive output from `start` to `end` (digital counts) and
    /// record the voltage and current response at every step.
    ///
    /// A reversed range is swapped before sweeping; digital sweeps always
    /// run low to high. `grounding` is rounded to the nearest count and held
    /// on the bias channel for the duration of the sweep. Outputs are reset
    /// to zero on every exit path.
    pub fn scan(&mut self, start: u32, end: u32, grounding: f64) -> Result<ScanResult, ScanError> {
        if start == end {
            return Err(ScanError::DegenerateRange(start));
        }
        let (low, high) = if start <= end { (start, end) } else { (end, start) };
        if high > MAX_COUNTS {
            return Err(ScanError::RangeOverflow { end: high });
        }

        let rounded = grounding.round();
        if !(rounded >= 1.0 && rounded <= f64::from(MAX_COUNTS)) {
            return Err(ScanError::InvalidGrounding(grounding));
        }
        let grounding_counts = rounded as u32;

        log::debug!(
            "Sweeping counts {}..={} with grounding {}",
            low,
            high,
            grounding_counts
        );

        let mut outputs = ArmedOutputs::arm(
            &mut self.transport,
            self.circuit.drive_channel,
            self.circuit.bias_channel,
            grounding_counts,
        )?;

        let steps = (high - low + 1) as usize;
        let mut result = ScanResult {
            voltage: Vec::with_capacity(steps),
            current: Vec::with_capacity(steps),
        };

        for step in low..=high {
            outputs.set_drive(step)?;
            let v_cell = counts_to_volts(outputs.read(self.circuit.cell_channel)?);
            let v_shunt = counts_to_volts(outputs.read(self.circuit.shunt_channel)?);
            result.voltage.push(v_cell);
            result.current.push(self.circuit.derived_current(v_cell, v_shunt));
        }

        outputs.disarm()?;
        Ok(result)
    }

    /// Run `repeats` identical sweeps and aggregate them point-wise.
    ///
    /// `start`, `end` and `resvalue` are physical volts; they are converted
    /// to digital counts once, so every sweep runs over exactly the same
    /// steps. Standard errors are the sample standard deviation over the
    /// repeats divided by sqrt(repeats).
    pub fn exec_experiment(
        &mut self,
        repeats: usize,
        start: f64,
        end: f64,
        resvalue: f64,
    ) -> Result<ExperimentResult, ExperimentError> {
        if repeats < 2 {
            return Err(ExperimentError::InsufficientRepeats(repeats));
        }

        let start_counts = volts_to_counts(start);
        let end_counts = volts_to_counts(end);
        let grounding = f64::from(volts_to_counts(resvalue));

        let mut scans = Vec::with_capacity(repeats);
        for repeat in 0..repeats {
            log::debug!("Starting sweep {}/{}", repeat + 1, repeats);
            scans.push(self.scan(start_counts, end_counts, grounding)?);
        }

        aggregate_scans(&scans)
    }
}

/// Column-wise mean and standard error over a set of equal-length scans.
fn aggregate_scans(scans: &[ScanResult]) -> Result<ExperimentResult, ExperimentError> {
    let expected = scans.first().map_or(0, ScanResult::len);
    for (scan_index, scan) in scans.iter().enumerate() {
        if scan.len() != expected {
            return Err(ExperimentError::ScanLengthMismatch {
                scan_index,
                expected,
                found: scan.len(),
            });
        }
    }

    let mut result = ExperimentResult {
        voltage: Vec::with_capacity(expected),
        current: Vec::with_capacity(expected),
        voltage_err: Vec::with_capacity(expected),
        current_err: Vec::with_capacity(expected),
    };

    for n in 0..expected {
        let (v_mean, v_err) = mean_and_standard_error(scans.iter().map(|s| s.voltage[n]));
        let (c_mean, c_err) = mean_and_standard_error(scans.iter().map(|s| s.current[n]));
        result.voltage.push(v_mean);
        result.voltage_err.push(v_err);
        result.current.push(c_mean);
        result.current_err.push(c_err);
    }

    Ok(result)
}

/// Mean and standard error of the mean (sample stddev / sqrt(n)).
fn mean_and_standard_error(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let values: Vec<f64> = values.collect();
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance.sqrt() / n.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::VOLTS_PER_COUNT;

    /// Deterministic rig: the cell channel echoes the driven value plus a
    /// per-sweep offset, the shunt channel reads a constant. Every
    /// `set_output` is recorded so tests can check the reset discipline.
    struct StubTransport {
        driven: u32,
        sweep_offsets: Vec<u32>,
        sweeps_started: usize,
        output_log: Vec<(u32, u8)>,
        fail_reads_after: Option<usize>,
        reads: usize,
    }

    impl StubTransport {
        fn new() -> Self {
            Self::with_offsets(vec![0])
        }

        fn with_offsets(sweep_offsets: Vec<u32>) -> Self {
            Self {
                driven: 0,
                sweep_offsets,
                sweeps_started: 0,
                output_log: Vec::new(),
                fail_reads_after: None,
                reads: 0,
            }
        }

        fn failing_after(reads: usize) -> Self {
            let mut stub = Self::new();
            stub.fail_reads_after = Some(reads);
            stub
        }

        fn offset(&self) -> u32 {
            let index = (self.sweeps_started.max(1) - 1) % self.sweep_offsets.len();
            self.sweep_offsets[index]
        }
    }

    impl Transport for StubTransport {
        fn set_output(&mut self, value: u32, channel: u8) -> Result<(), SolTerminalError> {
            self.output_log.push((value, channel));
            match channel {
                0 => self.driven = value,
                3 if value > 0 => self.sweeps_started += 1,
                _ => {}
            }
            Ok(())
        }

        fn get_input(&mut self, channel: u8) -> Result<u32, SolTerminalError> {
            self.reads += 1;
            if let Some(limit) = self.fail_reads_after {
                if self.reads > limit {
                    return Err(SolTerminalError::Timeout {
                        command: format!("MEAS:CH{}?", channel),
                    });
                }
            }
            match channel {
                1 => Ok(self.driven + self.offset()),
                2 => Ok(100),
                other => Ok(u32::from(other)),
            }
        }
    }

    fn cell(stub: StubTransport) -> SolarCell<StubTransport> {
        SolarCell::new(stub)
    }

    #[test]
    fn test_scan_length_and_monotonic_voltage() {
        let mut cell = cell(StubTransport::new());
        let result = cell.scan(10, 20, 511.0).unwrap();

        assert_eq!(result.len(), 11);
        assert_eq!(result.current.len(), 11);
        for pair in result.voltage.windows(2) {
            assert!(pair[1] >= pair[0], "voltage must follow the drive");
        }
        assert!((result.voltage[0] - 10.0 * VOLTS_PER_COUNT).abs() < 1e-12);
    }

    #[test]
    fn test_scan_swaps_reversed_range() {
        let mut cell = cell(StubTransport::new());
        let forward = cell.scan(10, 20, 511.0).unwrap();
        let reversed = cell.scan(20, 10, 511.0).unwrap();
        assert_eq!(forward.voltage, reversed.voltage);
    }

    #[test]
    fn test_scan_rejects_degenerate_range() {
        let mut cell = cell(StubTransport::new());
        assert!(matches!(
            cell.scan(100, 100, 511.0),
            Err(ScanError::DegenerateRange(100))
        ));
    }

    #[test]
    fn test_scan_rejects_range_past_full_scale() {
        let mut cell = cell(StubTransport::new());
        assert!(matches!(
            cell.scan(0, 1024, 511.0),
            Err(ScanError::RangeOverflow { end: 1024 })
        ));
        // Reversed ranges are normalized before the check.
        assert!(matches!(
            cell.scan(2000, 0, 511.0),
            Err(ScanError::RangeOverflow { end: 2000 })
        ));
    }

    #[test]
    fn test_scan_rejects_bad_grounding() {
        let mut cell = cell(StubTransport::new());
        assert!(matches!(
            cell.scan(0, 10, 0.0),
            Err(ScanError::InvalidGrounding(_))
        ));
        assert!(matches!(
            cell.scan(0, 10, 2000.0),
            Err(ScanError::InvalidGrounding(_))
        ));
        // A fractional level is rounded, not rejected.
        assert!(cell.scan(0, 10, 511.4).is_ok());
    }

    #[test]
    fn test_grounding_is_rounded_before_driving() {
        let mut cell = cell(StubTransport::new());
        cell.scan(0, 3, 511.6).unwrap();
        let stub = cell.into_transport();
        assert_eq!(stub.output_log[0], (512, 3));
    }

    #[test]
    fn test_outputs_reset_after_successful_scan() {
        let mut cell = cell(StubTransport::new());
        cell.scan(0, 5, 511.0).unwrap();
        let stub = cell.into_transport();
        let tail = &stub.output_log[stub.output_log.len() - 2..];
        assert_eq!(tail, &[(0, 0), (0, 3)]);
    }

    #[test]
    fn test_outputs_reset_after_mid_sweep_failure() {
        let mut cell = cell(StubTransport::failing_after(4));
        let err = cell.scan(0, 5, 511.0).unwrap_err();
        assert!(matches!(err, ScanError::Transport(_)));

        let stub = cell.into_transport();
        let tail = &stub.output_log[stub.output_log.len() - 2..];
        assert_eq!(tail, &[(0, 0), (0, 3)]);
    }

    #[test]
    fn test_experiment_requires_two_repeats() {
        let mut cell = cell(StubTransport::new());
        assert!(matches!(
            cell.exec_experiment(1, 0.0, 3.3, 1.65),
            Err(ExperimentError::InsufficientRepeats(1))
        ));
        assert!(matches!(
            cell.exec_experiment(0, 0.0, 3.3, 1.65),
            Err(ExperimentError::InsufficientRepeats(0))
        ));
    }

    #[test]
    fn test_experiment_averages_all_repeats() {
        // Four sweeps whose cell readings at each point are d, d+2, d+4, d+6
        // counts for driven value d.
        let mut cell = cell(StubTransport::with_offsets(vec![0, 2, 4, 6]));
        let result = cell
            .exec_experiment(4, 0.0, 10.0 * VOLTS_PER_COUNT, 1.65)
            .unwrap();

        assert_eq!(result.len(), 11);

        // Point n sees counts {n, n+2, n+4, n+6}: mean n+3, sample stddev
        // sqrt((9+1+1+9)/3) = sqrt(20/3), standard error stddev/2.
        let expected_err = (20.0_f64 / 3.0).sqrt() / 2.0 * VOLTS_PER_COUNT;
        for n in 0..result.len() {
            let expected_mean = (n as f64 + 3.0) * VOLTS_PER_COUNT;
            assert!((result.voltage[n] - expected_mean).abs() < 1e-12);
            assert!((result.voltage_err[n] - expected_err).abs() < 1e-12);
        }

        // Shunt reading is constant, so the current error is only the cell
        // term through the load resistor.
        let expected_current_err = expected_err / 1000.0;
        assert!((result.current_err[0] - expected_current_err).abs() < 1e-15);
    }

    #[test]
    fn test_experiment_converts_physical_bounds_once() {
        let mut cell = cell(StubTransport::with_offsets(vec![0, 1]));
        // 0 V to 3.3 V covers the full digital scale.
        let result = cell.exec_experiment(2, 0.0, 3.3, 1.65).unwrap();
        assert_eq!(result.len(), 1024);
    }

    #[test]
    fn test_aggregate_rejects_mismatched_scan_lengths() {
        let scans = vec![
            ScanResult {
                voltage: vec![1.0, 2.0],
                current: vec![0.1, 0.2],
            },
            ScanResult {
                voltage: vec![1.0],
                current: vec![0.1],
            },
        ];
        assert!(matches!(
            aggregate_scans(&scans),
            Err(ExperimentError::ScanLengthMismatch {
                scan_index: 1,
                expected: 2,
                found: 1,
            })
        ));
    }

    #[test]
    fn test_mean_and_standard_error() {
        let (mean, err) = mean_and_standard_error([1.0, 2.0, 3.0, 4.0].into_iter());
        assert!((mean - 2.5).abs() < 1e-12);
        // Sample stddev of 1..4 is sqrt(5/3); error is that over sqrt(4).
        assert!((err - (5.0_f64 / 3.0).sqrt() / 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_dataframe_columns_match_csv_schema() {
        let result = ExperimentResult {
            voltage: vec![1.0, 2.0],
            current: vec![0.1, 0.2],
            voltage_err: vec![0.01, 0.01],
            current_err: vec![0.001, 0.001],
        };
        let df = result.to_dataframe().unwrap();
        assert_eq!(df.height(), 2);
        assert_eq!(
            df.get_column_names_str(),
            vec![
                "voltage [V]",
                "error on voltage [V]",
                "current [A]",
                "error on current [A]",
            ]
        );
    }
}
