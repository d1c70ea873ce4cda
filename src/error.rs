//! Crate-wide error type.

use std::io;
use std::path::PathBuf;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors raised while bringing up or driving the fixture hardware.
///
/// Everything except [`Error::PwmWrite`] happens during initialization and is fatal.
#[derive(Debug, derive_more::Display, derive_more::Error)]
pub enum Error {
    /// `/dev/mem` could not be opened or mapped.
    #[display("unable to map hardware registers: {source}")]
    RegisterMap {
        /// Underlying OS error.
        source: io::Error,
    },

    /// A register access fell outside the mapped window.
    #[display("register offset {offset:#x} is outside the mapped window")]
    RegisterOutOfRange {
        /// Offending offset from the map base.
        offset: usize,
    },

    /// The ADC module clock never reported enabled.
    #[display("ADC clock did not enable within {timeout_ms} ms")]
    ClockEnableTimeout {
        /// How long we waited.
        timeout_ms: u64,
    },

    /// `read_channels` was asked for nothing.
    #[display("must read at least one analog input")]
    NoInputs,

    /// Clock divider outside `1..=65534`.
    #[display("illegal ADC clock divider {divider}: must be 1 to 65534")]
    ClockDividerOutOfRange {
        /// Requested divider.
        divider: u32,
    },

    /// Sample averaging not one of 1, 2, 4, 8, 16.
    #[display("illegal ADC sample averaging {samples}: must be 1, 2, 4, 8, or 16")]
    InvalidSampleAverage {
        /// Requested sample count.
        samples: u32,
    },

    /// Median window size outside the supported range.
    #[display("illegal median window size {size}: must be 1 to {max}")]
    InvalidWindowSize {
        /// Requested size.
        size: usize,
        /// Largest supported window.
        max: usize,
    },

    /// Sleep interval text could not be parsed.
    #[display("could not interpret sleep duration '{text}'")]
    InvalidDuration {
        /// Text as given on the command line.
        text: String,
    },

    /// PWM location not in `CHIP:CHANNEL` form.
    #[display("could not interpret PWM location '{text}': expected CHIP:CHANNEL")]
    InvalidPwmLocation {
        /// Text as given on the command line.
        text: String,
    },

    /// A PWM line could not be exported or configured.
    #[display("unable to acquire PWM line {}: {source}", path.display())]
    PwmAcquire {
        /// Sysfs path being configured.
        path: PathBuf,
        /// Underlying OS error.
        source: io::Error,
    },

    /// Writing a new period or duty to a PWM line failed.
    #[display("unable to write PWM line {}: {source}", path.display())]
    PwmWrite {
        /// Sysfs attribute being written.
        path: PathBuf,
        /// Underlying OS error.
        source: io::Error,
    },
}
