//! Host-side stand-ins for the fixture hardware.
//!
//! [`SimulatedAdc`] is a sparse register file that behaves like the AM335x ADC
//! closely enough to exercise [`Adc`](crate::adc::Adc): the module clock latches
//! when enabled, enabling the converter queues one FIFO entry per enabled step,
//! and reading FIFO0DATA pops. [`RecordingPwm`] remembers every write.
//! [`PwmTree`] lays out a throwaway sysfs PWM class directory for
//! [`SysfsPwm`](crate::pwm::SysfsPwm).
//!
//! The first two are cheap handles over shared state, so a test can keep a
//! clone for inspection after handing the other to the code under test.

use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;

use tempfile::TempDir;

use crate::Result;
use crate::adc::{ADC_MAX, AnalogInput};
use crate::pwm::PwmOutput;
use crate::registers::{
    ADC_CTRL, ADC_FIFO_COUNT_MASK, ADC_FIFO0COUNT, ADC_STEPENABLE, CM_WKUP_ADC_TSC_CLKCTRL,
    CM_WKUP_MODULEMODE_ENABLE, CTRL_ENABLE, RegisterBus,
};

// ============================================================================
// SimulatedAdc
// ============================================================================

#[derive(Default)]
struct AdcState {
    bytes: BTreeMap<usize, u8>,
    fifo: VecDeque<u32>,
    levels: [u16; 7],
    clock_held: bool,
    fifo_reads: usize,
}

impl AdcState {
    fn byte(&self, offset: usize) -> u8 {
        self.bytes.get(&offset).copied().unwrap_or_default()
    }

    fn convert(&mut self) {
        let enabled = self.byte(ADC_STEPENABLE);
        // Newest step first, so callers cannot rely on FIFO order.
        for input in AnalogInput::ALL.iter().rev() {
            if enabled & (1 << input.step()) != 0 {
                let level = self
                    .levels
                    .get(usize::from(input.index()))
                    .copied()
                    .unwrap_or_default();
                self.fifo.push_back(fifo_word(*input, level));
            }
        }
    }
}

fn fifo_word(input: AnalogInput, level: u16) -> u32 {
    (u32::from(input.index()) << 16) | u32::from(level.min(ADC_MAX))
}

/// Simulated ADC register file.
#[derive(Clone, Default)]
pub struct SimulatedAdc {
    state: Rc<RefCell<AdcState>>,
}

impl SimulatedAdc {
    /// Fresh register file with every input at 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Level produced by the next conversions of `input`.
    pub fn set_level(&self, input: AnalogInput, level: u16) {
        if let Some(slot) = self
            .state
            .borrow_mut()
            .levels
            .get_mut(usize::from(input.index()))
        {
            *slot = level;
        }
    }

    /// Leave an entry in the FIFO as if an earlier cycle had not drained it.
    pub fn push_stale(&self, input: AnalogInput, level: u16) {
        self.state
            .borrow_mut()
            .fifo
            .push_back(fifo_word(input, level));
    }

    /// Never let the module clock report enabled.
    pub fn hold_clock_disabled(&self) {
        self.state.borrow_mut().clock_held = true;
    }

    /// Current value of a register byte.
    #[must_use]
    pub fn byte(&self, offset: usize) -> u8 {
        self.state.borrow().byte(offset)
    }

    /// Entries waiting in the FIFO.
    #[must_use]
    pub fn fifo_len(&self) -> usize {
        self.state.borrow().fifo.len()
    }

    /// Number of 32-bit FIFO reads so far.
    #[must_use]
    pub fn fifo_reads(&self) -> usize {
        self.state.borrow().fifo_reads
    }
}

impl RegisterBus for SimulatedAdc {
    fn read_byte(&self, offset: usize) -> Result<u8> {
        let state = self.state.borrow();
        if offset == ADC_FIFO0COUNT {
            let count = u8::try_from(state.fifo.len()).unwrap_or(u8::MAX);
            return Ok(count & ADC_FIFO_COUNT_MASK);
        }
        Ok(state.byte(offset))
    }

    fn write_byte(&mut self, offset: usize, value: u8) -> Result<()> {
        let mut state = self.state.borrow_mut();
        let value = if offset == CM_WKUP_ADC_TSC_CLKCTRL && state.clock_held {
            value & !CM_WKUP_MODULEMODE_ENABLE
        } else {
            value
        };
        let was_enabled = state.byte(ADC_CTRL) & CTRL_ENABLE != 0;
        state.bytes.insert(offset, value);
        if offset == ADC_CTRL && !was_enabled && value & CTRL_ENABLE != 0 {
            state.convert();
        }
        Ok(())
    }

    fn read_fifo_word(&mut self) -> Result<u32> {
        let mut state = self.state.borrow_mut();
        state.fifo_reads += 1;
        Ok(state.fifo.pop_front().unwrap_or_default())
    }
}

// ============================================================================
// RecordingPwm
// ============================================================================

/// PWM line that records each `(period, duty)` it is given.
#[derive(Clone, Default)]
pub struct RecordingPwm {
    writes: Rc<RefCell<Vec<(Duration, Duration)>>>,
}

impl RecordingPwm {
    /// Line with no writes yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write so far, oldest first.
    #[must_use]
    pub fn writes(&self) -> Vec<(Duration, Duration)> {
        self.writes.borrow().clone()
    }

    /// Most recent duty, if any.
    #[must_use]
    pub fn last_duty(&self) -> Option<Duration> {
        self.writes.borrow().last().map(|(_, duty)| *duty)
    }
}

impl PwmOutput for RecordingPwm {
    fn set_pwm(&mut self, period: Duration, duty: Duration) -> Result<()> {
        self.writes.borrow_mut().push((period, duty));
        Ok(())
    }
}

// ============================================================================
// PwmTree
// ============================================================================

const CHANNEL_ATTRIBUTES: [&str; 4] = ["enable", "duty_cycle", "period", "polarity"];

/// Temporary directory shaped like `/sys/class/pwm`.
///
/// Attribute files are plain files, so nothing appears on export; tests add
/// already-exported channels explicitly.
#[derive(Debug)]
pub struct PwmTree {
    dir: TempDir,
}

impl PwmTree {
    /// Empty class directory.
    ///
    /// # Errors
    ///
    /// Any I/O error creating the temporary directory.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    /// Root to hand to [`SysfsPwm::open`](crate::pwm::SysfsPwm::open).
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Create `pwmchip{chip}` with an empty `export` attribute.
    ///
    /// # Errors
    ///
    /// Any I/O error creating the files.
    pub fn add_chip(&self, chip: u32) -> io::Result<PathBuf> {
        let chip_dir = self.root().join(format!("pwmchip{chip}"));
        fs::create_dir_all(&chip_dir)?;
        let export = chip_dir.join("export");
        if !export.exists() {
            fs::write(export, "")?;
        }
        Ok(chip_dir)
    }

    /// Create an exported `pwm{channel}` directory with its attributes.
    ///
    /// # Errors
    ///
    /// Any I/O error creating the files.
    pub fn add_channel(&self, chip: u32, channel: u32) -> io::Result<PathBuf> {
        self.add_chip(chip)?;
        populate(self.channel_dir(chip, channel))
    }

    /// Create an exported channel using the older `pwm-{chip}:{channel}` naming.
    ///
    /// # Errors
    ///
    /// Any I/O error creating the files.
    pub fn add_dashed_channel(&self, chip: u32, channel: u32) -> io::Result<PathBuf> {
        let chip_dir = self.add_chip(chip)?;
        populate(chip_dir.join(format!("pwm-{chip}:{channel}")))
    }

    /// Path of `pwm{channel}` under `pwmchip{chip}`.
    #[must_use]
    pub fn channel_dir(&self, chip: u32, channel: u32) -> PathBuf {
        self.root()
            .join(format!("pwmchip{chip}"))
            .join(format!("pwm{channel}"))
    }

    /// Contents of an attribute, if it exists.
    #[must_use]
    pub fn attribute(&self, chip: u32, channel: u32, name: &str) -> Option<String> {
        fs::read_to_string(self.channel_dir(chip, channel).join(name)).ok()
    }

    /// Overwrite an attribute.
    pub fn set_attribute(&self, chip: u32, channel: u32, name: &str, value: &str) {
        let _ = fs::write(self.channel_dir(chip, channel).join(name), value);
    }

    /// Delete an attribute so later writes to it fail.
    pub fn remove_attribute(&self, chip: u32, channel: u32, name: &str) {
        let _ = fs::remove_file(self.channel_dir(chip, channel).join(name));
    }

    /// What was last written to `pwmchip{chip}/export`.
    #[must_use]
    pub fn exported(&self, chip: u32) -> Option<String> {
        fs::read_to_string(self.root().join(format!("pwmchip{chip}")).join("export")).ok()
    }
}

fn populate(dir: PathBuf) -> io::Result<PathBuf> {
    fs::create_dir_all(&dir)?;
    for attribute in CHANNEL_ATTRIBUTES {
        fs::write(dir.join(attribute), "")?;
    }
    Ok(dir)
}
