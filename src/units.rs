//! Conversion between raw ADC/DAC counts and physical volts.
//!
//! The rig exposes a 10-bit converter referenced to 3.3 V, so one count is
//! 3.3/1023 V. Everything here is pure arithmetic; the fallible parts are
//! the boundary parsers that turn CLI input into [`ConversionMode`] and
//! [`NumericValue`].

/// Full-scale voltage of the ADC/DAC reference.
pub const FULL_SCALE_VOLTS: f64 = 3.3;

/// Highest representable count of the 10-bit converter.
pub const MAX_COUNTS: u32 = 1023;

/// Volts per single count.
pub const VOLTS_PER_COUNT: f64 = FULL_SCALE_VOLTS / MAX_COUNTS as f64;

#[derive(Debug, thiserror::Error)]
pub enum ConversionError {
    #[error("conversion mode code {0} is out of range, must be 0, 1 or 2")]
    ModeCodeOutOfRange(i64),

    #[error("conversion mode '{0}' is undefined")]
    UnknownMode(String),

    #[error("automatic conversion cannot resolve '{0}', expected an integer count or a voltage")]
    InvalidAutomaticConversion(String),
}

/// Direction of a unit conversion.
///
/// `Auto` picks the direction from the [`NumericValue`] variant: raw counts
/// become volts and volts become counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionMode {
    ToAnalog,
    ToDigital,
    Auto,
}

impl ConversionMode {
    /// Parse the original numeric mode codes (0 = analog, 1 = digital, 2 = auto).
    pub fn from_code(code: i64) -> Result<Self, ConversionError> {
        match code {
            0 => Ok(Self::ToAnalog),
            1 => Ok(Self::ToDigital),
            2 => Ok(Self::Auto),
            other => Err(ConversionError::ModeCodeOutOfRange(other)),
        }
    }

    /// Parse a mode name as accepted on the command line.
    pub fn from_name(name: &str) -> Result<Self, ConversionError> {
        match name {
            "analog" => Ok(Self::ToAnalog),
            "digital" => Ok(Self::ToDigital),
            "auto" => Ok(Self::Auto),
            other => Err(ConversionError::UnknownMode(other.to_string())),
        }
    }
}

/// A value with its representation stated by the caller.
///
/// Callers declare whether a number is a raw count or a physical voltage
/// instead of having the converter guess from the runtime type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericValue {
    /// Raw ADC/DAC counts.
    Counts(u32),
    /// Physical volts.
    Volts(f64),
}

impl NumericValue {
    /// Parse user input, trying an integer count first, then a voltage.
    pub fn parse(input: &str) -> Result<Self, ConversionError> {
        if let Ok(counts) = input.parse::<u32>() {
            return Ok(Self::Counts(counts));
        }
        input
            .parse::<f64>()
            .map(Self::Volts)
            .map_err(|_| ConversionError::InvalidAutomaticConversion(input.to_string()))
    }

    fn magnitude(self) -> f64 {
        match self {
            Self::Counts(c) => f64::from(c),
            Self::Volts(v) => v,
        }
    }
}

/// Convert counts to volts.
pub fn counts_to_volts(counts: u32) -> f64 {
    f64::from(counts) * VOLTS_PER_COUNT
}

/// Convert volts to the nearest count. Rounded, never truncated, so repeated
/// conversions do not drift low.
pub fn volts_to_counts(volts: f64) -> u32 {
    (volts / VOLTS_PER_COUNT).round() as u32
}

/// Convert a value between digital counts and analog volts.
pub fn convert(value: NumericValue, mode: ConversionMode) -> NumericValue {
    match mode {
        ConversionMode::ToAnalog => NumericValue::Volts(value.magnitude() * VOLTS_PER_COUNT),
        ConversionMode::ToDigital => {
            NumericValue::Counts((value.magnitude() / VOLTS_PER_COUNT).round() as u32)
        }
        ConversionMode::Auto => match value {
            NumericValue::Counts(c) => NumericValue::Volts(counts_to_volts(c)),
            NumericValue::Volts(v) => NumericValue::Counts(volts_to_counts(v)),
        },
    }
}
