//! Command-line configuration.
//!
//! [`Args`] is what clap parses; [`Args::validate`] turns it into a [`Config`]
//! of checked domain types before any hardware is touched.

use core::time::Duration;
use std::path::PathBuf;

use clap::Parser;

use crate::adc::{ClockDivider, SampleAverage};
use crate::channel::{CHANNEL_COUNT, Channel};
use crate::median::DEFAULT_WINDOW;
use crate::pwm::{DEFAULT_PWM_ROOT, PwmLocation};
use crate::{Error, Result};

/// Potentiometer-driven four-channel LED fixture controller.
#[derive(Clone, Debug, Parser)]
#[command(version, about)]
pub struct Args {
    /// Log one diagnostic line per iteration.
    #[arg(long)]
    pub debug: bool,

    /// Sleep between iterations, e.g. `0ms`, `250us`, `1.5s`, `2m`.
    #[arg(long, default_value = "0ms")]
    pub sleep: String,

    /// Median filter window, in samples.
    #[arg(long, default_value_t = DEFAULT_WINDOW)]
    pub window: usize,

    /// ADC clock divider (1 to 65534).
    #[arg(long, default_value_t = 1)]
    pub divider: u32,

    /// ADC hardware averaging (1, 2, 4, 8, or 16 samples).
    #[arg(long, default_value_t = 1)]
    pub average: u32,

    /// Sysfs PWM class directory.
    #[arg(long, default_value = DEFAULT_PWM_ROOT)]
    pub pwm_root: PathBuf,

    /// PWM `CHIP:CHANNEL` driving the white LEDs (P9_16).
    #[arg(long, default_value_t = Channel::White.default_pwm())]
    pub pwm_white: PwmLocation,

    /// PWM `CHIP:CHANNEL` driving the green LEDs (P9_14).
    #[arg(long, default_value_t = Channel::Green.default_pwm())]
    pub pwm_green: PwmLocation,

    /// PWM `CHIP:CHANNEL` driving the blue LEDs (P9_22).
    #[arg(long, default_value_t = Channel::Blue.default_pwm())]
    pub pwm_blue: PwmLocation,

    /// PWM `CHIP:CHANNEL` driving the red LEDs (P9_21).
    #[arg(long, default_value_t = Channel::Red.default_pwm())]
    pub pwm_red: PwmLocation,
}

/// Validated settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Per-iteration diagnostics.
    pub debug: bool,
    /// Sleep between iterations.
    pub sleep: embassy_time::Duration,
    /// Median window size.
    pub window: usize,
    /// ADC clock divider.
    pub divider: ClockDivider,
    /// ADC hardware averaging.
    pub average: SampleAverage,
    /// Sysfs PWM class directory.
    pub pwm_root: PathBuf,
    /// PWM line per channel, in [`Channel::ALL`] order.
    pub pwm: [PwmLocation; CHANNEL_COUNT],
}

impl Args {
    /// Check every value and convert to domain types.
    ///
    /// # Errors
    ///
    /// The first invalid setting: [`Error::InvalidDuration`],
    /// [`Error::InvalidWindowSize`], [`Error::ClockDividerOutOfRange`], or
    /// [`Error::InvalidSampleAverage`].
    pub fn validate(&self) -> Result<Config> {
        let sleep = parse_duration(&self.sleep)?;
        let sleep = embassy_time::Duration::try_from(sleep).map_err(|_| Error::InvalidDuration {
            text: self.sleep.clone(),
        })?;
        // Same bounds the median window enforces.
        crate::median::MedianWindow::new(self.window)?;
        Ok(Config {
            debug: self.debug,
            sleep,
            window: self.window,
            divider: ClockDivider::new(self.divider)?,
            average: SampleAverage::try_from(self.average)?,
            pwm_root: self.pwm_root.clone(),
            pwm: [self.pwm_white, self.pwm_green, self.pwm_blue, self.pwm_red],
        })
    }
}

/// Parse a duration such as `300ms`, `1.5s`, `2h45m`, or a bare `0`.
///
/// Units are `ns`, `us` (or `µs`), `ms`, `s`, `m`, and `h`; each number may
/// carry a decimal fraction.
///
/// # Errors
///
/// [`Error::InvalidDuration`] for anything else, including negative values.
///
/// # Example
///
/// ```rust
/// use core::time::Duration;
/// use led_fixture::config::parse_duration;
///
/// assert_eq!(parse_duration("1.5s")?, Duration::from_millis(1500));
/// assert_eq!(parse_duration("1m30s")?, Duration::from_secs(90));
/// # Ok::<(), led_fixture::Error>(())
/// ```
pub fn parse_duration(text: &str) -> Result<Duration> {
    let invalid = || Error::InvalidDuration {
        text: text.to_owned(),
    };
    let mut rest = text.trim();
    if rest == "0" {
        return Ok(Duration::ZERO);
    }
    if rest.is_empty() {
        return Err(invalid());
    }

    let mut total = 0f64;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, after) = rest.split_at(number_len);
        if number.is_empty() || number == "." {
            return Err(invalid());
        }
        let value: f64 = number.parse().map_err(|_| invalid())?;

        let unit_len = after
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(after.len());
        let (unit, after) = after.split_at(unit_len);
        let scale = unit_nanos(unit).ok_or_else(invalid)?;

        total = value.mul_add(scale, total);
        rest = after;
    }

    if !total.is_finite() || total > u64::MAX as f64 {
        return Err(invalid());
    }
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "range checked above; fractions of a nanosecond are dropped"
    )]
    let nanos = total as u64;
    Ok(Duration::from_nanos(nanos))
}

fn unit_nanos(unit: &str) -> Option<f64> {
    Some(match unit {
        "ns" => 1.0,
        "us" | "µs" | "μs" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60e9,
        "h" => 3600e9,
        _ => return None,
    })
}
