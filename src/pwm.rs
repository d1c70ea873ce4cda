//! A device abstraction for Linux sysfs PWM lines.
//!
//! See [`SysfsPwm`] for usage.

use core::fmt;
use core::str::FromStr;
use core::time::Duration;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use embassy_time::{Duration as TimerDuration, Timer};
use log::info;

use crate::{Error, Result};

/// Default sysfs PWM class directory.
pub const DEFAULT_PWM_ROOT: &str = "/sys/class/pwm";

/// Poll interval while waiting for udev to create a freshly exported channel.
const EXPORT_POLL: TimerDuration = TimerDuration::from_millis(10);

/// Give up on an export after this many polls.
const EXPORT_POLLS: u32 = 50;

/// Anything that takes a period and a duty cycle.
///
/// The controller only ever writes through this trait, so host tests can swap
/// in [`RecordingPwm`](crate::sim::RecordingPwm).
pub trait PwmOutput {
    /// Drive the line with `duty` high time out of every `period`.
    ///
    /// # Errors
    ///
    /// [`Error::PwmWrite`] if the hardware rejects the setting.
    fn set_pwm(&mut self, period: Duration, duty: Duration) -> Result<()>;
}

// ============================================================================
// PwmLocation
// ============================================================================

/// A `pwmchipN` and channel number under the sysfs PWM class.
///
/// Parses from `CHIP:CHANNEL`, e.g. `"4:1"`.
///
/// # Example
///
/// ```rust
/// use led_fixture::pwm::PwmLocation;
///
/// let location: PwmLocation = "4:1".parse()?;
/// assert_eq!(location, PwmLocation::new(4, 1));
/// assert_eq!(location.to_string(), "4:1");
/// # Ok::<(), led_fixture::Error>(())
/// ```
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PwmLocation {
    chip: u32,
    channel: u32,
}

impl PwmLocation {
    /// Channel `channel` of `pwmchip{chip}`.
    #[must_use]
    pub const fn new(chip: u32, channel: u32) -> Self {
        Self { chip, channel }
    }

    /// Chip number.
    #[must_use]
    pub const fn chip(self) -> u32 {
        self.chip
    }

    /// Channel number within the chip.
    #[must_use]
    pub const fn channel(self) -> u32 {
        self.channel
    }

    fn chip_dir(self, root: &Path) -> PathBuf {
        root.join(format!("pwmchip{}", self.chip))
    }

    /// Directory names a kernel may use for an exported channel, newest style last.
    fn channel_dirs(self, root: &Path) -> [PathBuf; 2] {
        let chip_dir = self.chip_dir(root);
        [
            chip_dir.join(format!("pwm{}", self.channel)),
            chip_dir.join(format!("pwm-{}:{}", self.chip, self.channel)),
        ]
    }
}

impl FromStr for PwmLocation {
    type Err = Error;

    fn from_str(text: &str) -> Result<Self> {
        let invalid = || Error::InvalidPwmLocation {
            text: text.to_owned(),
        };
        let (chip, channel) = text.trim().split_once(':').ok_or_else(invalid)?;
        Ok(Self {
            chip: chip.parse().map_err(|_| invalid())?,
            channel: channel.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for PwmLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.chip, self.channel)
    }
}

// ============================================================================
// SysfsPwm
// ============================================================================

/// One exported and enabled sysfs PWM channel.
///
/// Opening a line exports it if needed (reusing an existing export), sets
/// normal polarity, the given period and a zero duty, and enables it. Period
/// writes are skipped while the period is unchanged.
///
/// # Example
///
/// ```rust,no_run
/// use core::time::Duration;
/// use led_fixture::pwm::{PwmLocation, PwmOutput, SysfsPwm};
///
/// async fn example() -> led_fixture::Result<()> {
///     let period = Duration::from_micros(500);
///     let mut line = SysfsPwm::open("/sys/class/pwm", PwmLocation::new(4, 1), period).await?;
///     line.set_pwm(period, Duration::from_micros(120))?;
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct SysfsPwm {
    dir: PathBuf,
    period: Duration,
    duty: Duration,
}

impl SysfsPwm {
    /// Export (if needed), configure and enable `location` under `root`.
    ///
    /// # Errors
    ///
    /// [`Error::PwmAcquire`] if the chip is missing, the export never appears,
    /// or any attribute write is rejected.
    pub async fn open(
        root: impl AsRef<Path>,
        location: PwmLocation,
        period: Duration,
    ) -> Result<Self> {
        let root = root.as_ref();
        let dir = match find_channel_dir(root, location) {
            Some(dir) => {
                info!("PWM {location}: reusing export at {}", dir.display());
                dir
            }
            None => export(root, location).await?,
        };

        let acquire = |attribute: &str, value: &str| {
            let path = dir.join(attribute);
            write_attribute(&path, value).map_err(|source| Error::PwmAcquire { path, source })
        };
        // Polarity and period can only change while disabled, and the period
        // cannot drop below the current duty.
        acquire("enable", "0")?;
        acquire("duty_cycle", "0")?;
        acquire("period", &period.as_nanos().to_string())?;
        acquire("polarity", "normal")?;
        acquire("enable", "1")?;

        info!(
            "PWM {location} enabled at {} period {}ns",
            dir.display(),
            period.as_nanos()
        );
        Ok(Self {
            dir,
            period,
            duty: Duration::ZERO,
        })
    }

    /// Sysfs directory of this channel.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Last duty written.
    #[must_use]
    pub const fn duty(&self) -> Duration {
        self.duty
    }

    fn write(&self, attribute: &str, value: Duration) -> Result<()> {
        let path = self.dir.join(attribute);
        write_attribute(&path, &value.as_nanos().to_string())
            .map_err(|source| Error::PwmWrite { path, source })
    }
}

impl PwmOutput for SysfsPwm {
    fn set_pwm(&mut self, period: Duration, duty: Duration) -> Result<()> {
        if period != self.period {
            // Shrinking the period under the live duty is rejected by the driver.
            if period < self.duty {
                self.write("duty_cycle", Duration::ZERO)?;
                self.duty = Duration::ZERO;
            }
            self.write("period", period)?;
            self.period = period;
        }
        self.write("duty_cycle", duty)?;
        self.duty = duty;
        Ok(())
    }
}

fn find_channel_dir(root: &Path, location: PwmLocation) -> Option<PathBuf> {
    location
        .channel_dirs(root)
        .into_iter()
        .find(|dir| dir.is_dir())
}

async fn export(root: &Path, location: PwmLocation) -> Result<PathBuf> {
    let path = location.chip_dir(root).join("export");
    write_attribute(&path, &location.channel().to_string())
        .map_err(|source| Error::PwmAcquire {
            path: path.clone(),
            source,
        })?;

    // The attribute files show up asynchronously once udev has run.
    for _ in 0..EXPORT_POLLS {
        if let Some(dir) = find_channel_dir(root, location) {
            info!("PWM {location}: exported at {}", dir.display());
            return Ok(dir);
        }
        Timer::after(EXPORT_POLL).await;
    }
    Err(Error::PwmAcquire {
        path,
        source: io::Error::new(io::ErrorKind::NotFound, "exported channel never appeared"),
    })
}

/// Write a sysfs attribute in one `write` call, without creating it.
fn write_attribute(path: &Path, value: &str) -> io::Result<()> {
    OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path)?
        .write_all(value.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::PwmTree;
    use embassy_futures::block_on;

    const PERIOD: Duration = Duration::from_nanos(500_000);

    #[test]
    fn parses_locations() {
        assert_eq!("1:0".parse::<PwmLocation>().ok(), Some(PwmLocation::new(1, 0)));
        assert_eq!(" 4:1 ".parse::<PwmLocation>().ok(), Some(PwmLocation::new(4, 1)));
        for bad in ["", "4", "4:", ":1", "a:b", "4:1:2", "-1:0"] {
            assert!(bad.parse::<PwmLocation>().is_err(), "{bad}");
        }
    }

    #[test]
    fn open_configures_an_exported_channel() {
        let tree = PwmTree::new().expect("tree");
        tree.add_channel(4, 1).expect("channel");

        let line = block_on(SysfsPwm::open(tree.root(), PwmLocation::new(4, 1), PERIOD)).expect("open");
        assert_eq!(line.dir(), tree.channel_dir(4, 1));
        assert_eq!(tree.attribute(4, 1, "period").as_deref(), Some("500000"));
        assert_eq!(tree.attribute(4, 1, "duty_cycle").as_deref(), Some("0"));
        assert_eq!(tree.attribute(4, 1, "polarity").as_deref(), Some("normal"));
        assert_eq!(tree.attribute(4, 1, "enable").as_deref(), Some("1"));
    }

    #[test]
    fn open_finds_dashed_channel_dirs() {
        let tree = PwmTree::new().expect("tree");
        let dir = tree.add_dashed_channel(1, 0).expect("channel");
        let line = block_on(SysfsPwm::open(tree.root(), PwmLocation::new(1, 0), PERIOD)).expect("open");
        assert_eq!(line.dir(), dir);
    }

    #[test]
    fn open_fails_without_chip() {
        let tree = PwmTree::new().expect("tree");
        let result = block_on(SysfsPwm::open(tree.root(), PwmLocation::new(7, 0), PERIOD));
        assert!(matches!(result, Err(Error::PwmAcquire { .. })));
    }

    #[test]
    fn open_fails_when_export_never_appears() {
        let tree = PwmTree::new().expect("tree");
        tree.add_chip(4).expect("chip");
        let result = block_on(SysfsPwm::open(tree.root(), PwmLocation::new(4, 0), PERIOD));
        assert!(matches!(result, Err(Error::PwmAcquire { .. })));
        assert_eq!(tree.exported(4).as_deref(), Some("0"));
    }

    #[test]
    fn set_pwm_writes_duty_and_skips_same_period() {
        let tree = PwmTree::new().expect("tree");
        tree.add_channel(4, 0).expect("channel");
        let mut line =
            block_on(SysfsPwm::open(tree.root(), PwmLocation::new(4, 0), PERIOD)).expect("open");

        tree.set_attribute(4, 0, "period", "untouched");
        line.set_pwm(PERIOD, Duration::from_nanos(120_025)).expect("set");
        assert_eq!(tree.attribute(4, 0, "duty_cycle").as_deref(), Some("120025"));
        assert_eq!(tree.attribute(4, 0, "period").as_deref(), Some("untouched"));
        assert_eq!(line.duty(), Duration::from_nanos(120_025));

        line.set_pwm(Duration::from_nanos(100_000), Duration::from_nanos(50_000))
            .expect("set");
        assert_eq!(tree.attribute(4, 0, "period").as_deref(), Some("100000"));
        assert_eq!(tree.attribute(4, 0, "duty_cycle").as_deref(), Some("50000"));
    }

    #[test]
    fn write_failure_is_reported() {
        let tree = PwmTree::new().expect("tree");
        tree.add_channel(4, 0).expect("channel");
        let mut line =
            block_on(SysfsPwm::open(tree.root(), PwmLocation::new(4, 0), PERIOD)).expect("open");
        tree.remove_attribute(4, 0, "duty_cycle");
        let result = line.set_pwm(PERIOD, Duration::from_nanos(1_000));
        assert!(matches!(result, Err(Error::PwmWrite { .. })));
    }
}
