//! A device abstraction for the AM335x touchscreen/ADC subsystem in one-shot mode.
//!
//! See [`Adc`] for usage.

use core::fmt;

use embassy_time::{Duration, Instant, Timer};
use log::{info, warn};

use crate::registers::{
    ADC_CLKDIV, ADC_CTRL, ADC_FIFO_COUNT_MASK, ADC_FIFO_DATA_MASK, ADC_FIFO_STEP_MASK,
    ADC_FIFO0COUNT, ADC_STEPENABLE, CM_WKUP_ADC_TSC_CLKCTRL, CM_WKUP_MODULEMODE_ENABLE,
    CTRL_DISABLE, CTRL_ENABLE, CTRL_STEP_ID_TAG, CTRL_STEPCONFIG_WRITE_PROTECT_OFF,
    RegisterBus, adc_stepconfig, adc_stepdelay,
};
use crate::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Largest raw sample the converter produces.
pub const ADC_MAX: u16 = 0xFFF;

/// How long to wait for the module clock to report enabled.
const CLOCK_ENABLE_TIMEOUT: Duration = Duration::from_millis(100);

/// Wait between passes when draining leftovers from an earlier cycle.
const FIFO_DRAIN_DELAY: Duration = Duration::from_micros(850);

/// Settle time between triggering the steps and reading the FIFO.
const CONVERSION_SETTLE_DELAY: Duration = Duration::from_micros(500);

/// STEPDELAY sample delay, in ADC clocks.
const SAMPLE_DELAY: u8 = 0x01;

/// FIFO0 holds at most this many entries.
const FIFO_DEPTH: usize = 128;

// ============================================================================
// AnalogInput
// ============================================================================

/// One of the seven analog inputs on the BeagleBone Black P9 header.
///
/// Input `AINk` is sampled by step `k + 1`, which tags its FIFO entries with step id `k`.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum AnalogInput {
    /// AIN0, header pin P9_39.
    Ain0,
    /// AIN1, header pin P9_40.
    Ain1,
    /// AIN2, header pin P9_37.
    Ain2,
    /// AIN3, header pin P9_38.
    Ain3,
    /// AIN4, header pin P9_33.
    Ain4,
    /// AIN5, header pin P9_36.
    Ain5,
    /// AIN6, header pin P9_35.
    Ain6,
}

/// Number of analog inputs.
pub const AIN_COUNT: usize = 7;

impl AnalogInput {
    /// All inputs in bank order.
    pub const ALL: [Self; AIN_COUNT] = [
        Self::Ain0,
        Self::Ain1,
        Self::Ain2,
        Self::Ain3,
        Self::Ain4,
        Self::Ain5,
        Self::Ain6,
    ];

    /// Position within the analog bank, `0..=6`.
    #[must_use]
    pub const fn index(self) -> u8 {
        self as u8
    }

    /// The (1-based) sequencer step assigned to this input.
    #[must_use]
    pub const fn step(self) -> u8 {
        self.index() + 1
    }

    /// Input whose step tags FIFO entries with `step_id`.
    #[must_use]
    pub fn from_step_id(step_id: u8) -> Option<Self> {
        Self::ALL.get(usize::from(step_id)).copied()
    }

    /// Header pin name.
    #[must_use]
    pub const fn header_pin(self) -> &'static str {
        match self {
            Self::Ain0 => "P9_39",
            Self::Ain1 => "P9_40",
            Self::Ain2 => "P9_37",
            Self::Ain3 => "P9_38",
            Self::Ain4 => "P9_33",
            Self::Ain5 => "P9_36",
            Self::Ain6 => "P9_35",
        }
    }

    const fn step_enable_bit(self) -> u8 {
        1 << self.step()
    }
}

impl fmt::Display for AnalogInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AIN{} ({})", self.index(), self.header_pin())
    }
}

// ============================================================================
// Configuration values
// ============================================================================

/// Hardware sample averaging per conversion.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SampleAverage {
    /// No averaging.
    #[default]
    One,
    /// Average 2 samples.
    Two,
    /// Average 4 samples.
    Four,
    /// Average 8 samples.
    Eight,
    /// Average 16 samples.
    Sixteen,
}

impl SampleAverage {
    /// STEPCONFIG `AVERAGING` field value.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::One => 0x00,
            Self::Two => 0x01,
            Self::Four => 0x02,
            Self::Eight => 0x03,
            Self::Sixteen => 0x04,
        }
    }
}

impl TryFrom<u32> for SampleAverage {
    type Error = Error;

    fn try_from(samples: u32) -> Result<Self> {
        match samples {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            4 => Ok(Self::Four),
            8 => Ok(Self::Eight),
            16 => Ok(Self::Sixteen),
            _ => Err(Error::InvalidSampleAverage { samples }),
        }
    }
}

/// ADC clock divider in `1..=65534`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ClockDivider(u16);

impl ClockDivider {
    /// Smallest divider (full 24 MHz ADC clock).
    pub const MIN: u32 = 1;
    /// Largest divider the register accepts.
    pub const MAX: u32 = 65_534;

    /// Validate a divider.
    ///
    /// # Errors
    ///
    /// [`Error::ClockDividerOutOfRange`] outside `1..=65534`.
    pub fn new(divider: u32) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&divider) {
            u16::try_from(divider)
                .map(Self)
                .map_err(|_| Error::ClockDividerOutOfRange { divider })
        } else {
            Err(Error::ClockDividerOutOfRange { divider })
        }
    }

    /// The divider as given.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Value programmed into CLKDIV (the hardware divides by `value + 1`).
    #[must_use]
    pub const fn register_value(self) -> u16 {
        self.0 - 1
    }
}

impl Default for ClockDivider {
    fn default() -> Self {
        Self(1)
    }
}

// ============================================================================
// AdcReadings
// ============================================================================

/// Raw samples from one conversion batch, indexed by input.
///
/// The FIFO gives no ordering guarantee across steps, so results are always
/// looked up by input rather than by position.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AdcReadings {
    values: [Option<u16>; AIN_COUNT],
}

impl AdcReadings {
    /// Sample for `input`, if one arrived.
    #[must_use]
    pub fn get(&self, input: AnalogInput) -> Option<u16> {
        self.values.get(usize::from(input.index())).copied().flatten()
    }

    /// Record a sample for `input` (later samples win).
    pub fn insert(&mut self, input: AnalogInput, value: u16) {
        if let Some(slot) = self.values.get_mut(usize::from(input.index())) {
            *slot = Some(value);
        }
    }

    /// Inputs that produced a sample, with their values.
    pub fn iter(&self) -> impl Iterator<Item = (AnalogInput, u16)> + '_ {
        AnalogInput::ALL
            .iter()
            .zip(self.values.iter())
            .filter_map(|(input, value)| value.map(|value| (*input, value)))
    }

    /// Number of inputs that produced a sample.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.iter().flatten().count()
    }

    /// True when nothing was read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<(AnalogInput, u16)> for AdcReadings {
    fn from_iter<I: IntoIterator<Item = (AnalogInput, u16)>>(iter: I) -> Self {
        let mut readings = Self::default();
        for (input, value) in iter {
            readings.insert(input, value);
        }
        readings
    }
}

// ============================================================================
// Adc
// ============================================================================

/// A device abstraction for the on-chip ADC, driven by direct register access.
///
/// Each read triggers one software one-shot conversion of the requested inputs
/// and harvests the results from FIFO0.
///
/// # Example
///
/// ```rust,no_run
/// use led_fixture::adc::{Adc, AnalogInput, ClockDivider, SampleAverage};
/// use led_fixture::registers::MappedRegion;
///
/// async fn example() -> led_fixture::Result<()> {
///     let inputs = [AnalogInput::Ain0, AnalogInput::Ain1];
///     let mut adc = Adc::initialize(
///         MappedRegion::open()?,
///         ClockDivider::new(160)?,
///         SampleAverage::Four,
///         &inputs,
///     )?;
///
///     let readings = adc.read_channels(&inputs).await?;
///     for (input, value) in readings.iter() {
///         log::info!("{input}: {value}");
///     }
///
///     adc.shutdown()
/// }
/// ```
pub struct Adc<R: RegisterBus> {
    bus: R,
}

impl<R: RegisterBus> Adc<R> {
    /// Enable the module clock and configure one step per input.
    ///
    /// # Errors
    ///
    /// [`Error::ClockEnableTimeout`] if the clock never latches, or any register
    /// access error. Both are fatal.
    pub fn initialize(
        mut bus: R,
        clock_divider: ClockDivider,
        sample_average: SampleAverage,
        inputs: &[AnalogInput],
    ) -> Result<Self> {
        enable_module_clock(&mut bus)?;

        // Disabled, tag FIFO entries with their step, step config writable.
        bus.write_byte(
            ADC_CTRL,
            CTRL_DISABLE | CTRL_STEP_ID_TAG | CTRL_STEPCONFIG_WRITE_PROTECT_OFF,
        )?;

        let [divider_low, divider_high] = clock_divider.register_value().to_le_bytes();
        bus.write_byte(ADC_CLKDIV, divider_low)?;
        bus.write_byte(ADC_CLKDIV + 1, divider_high)?;

        for &input in inputs {
            configure_step(&mut bus, input, sample_average)?;
        }

        bus.clear_bits(ADC_CTRL, CTRL_STEPCONFIG_WRITE_PROTECT_OFF)?;

        info!(
            "ADC ready: divider {} averaging {:?} inputs {}",
            clock_divider.get(),
            sample_average,
            inputs.len()
        );
        Ok(Self { bus })
    }

    /// Convert `inputs` once and return their raw 12-bit values.
    ///
    /// Leftover FIFO entries from an earlier cycle are logged and discarded first.
    ///
    /// # Errors
    ///
    /// [`Error::NoInputs`] for an empty input set, or any register access error.
    pub async fn read_channels(&mut self, inputs: &[AnalogInput]) -> Result<AdcReadings> {
        if inputs.is_empty() {
            return Err(Error::NoInputs);
        }

        loop {
            let stale = self.fifo_count()?;
            if stale == 0 {
                break;
            }
            warn!("initial FIFO count should be zero: found {stale}");
            self.harvest()?;
            Timer::after(FIFO_DRAIN_DELAY).await;
        }

        let step_bits = inputs
            .iter()
            .fold(0u8, |bits, input| bits | input.step_enable_bit());

        self.bus.set_bits(ADC_STEPENABLE, step_bits)?;
        self.bus.set_bits(ADC_CTRL, CTRL_ENABLE)?;
        Timer::after(CONVERSION_SETTLE_DELAY).await;

        let readings = self.harvest();

        // Leave the sequencer off so nothing lands in the FIFO between cycles.
        self.bus.clear_bits(ADC_STEPENABLE, step_bits)?;
        self.bus.clear_bits(ADC_CTRL, CTRL_ENABLE)?;
        readings
    }

    /// Disable the converter and release the register window.
    ///
    /// # Errors
    ///
    /// Register access errors.
    pub fn shutdown(mut self) -> Result<()> {
        self.bus.write_byte(ADC_CTRL, CTRL_DISABLE)?;
        info!("ADC disabled");
        Ok(())
    }

    fn fifo_count(&self) -> Result<u8> {
        Ok(self.bus.read_byte(ADC_FIFO0COUNT)? & ADC_FIFO_COUNT_MASK)
    }

    fn harvest(&mut self) -> Result<AdcReadings> {
        let mut readings = AdcReadings::default();
        for _ in 0..FIFO_DEPTH {
            if self.fifo_count()? == 0 {
                break;
            }
            let (step_id, value) = decode_fifo_word(self.bus.read_fifo_word()?);
            match AnalogInput::from_step_id(step_id) {
                Some(input) => readings.insert(input, value),
                None => warn!("FIFO entry from unexpected step id {step_id}"),
            }
        }
        Ok(readings)
    }
}

fn enable_module_clock<R: RegisterBus>(bus: &mut R) -> Result<()> {
    bus.set_bits(CM_WKUP_ADC_TSC_CLKCTRL, CM_WKUP_MODULEMODE_ENABLE)?;
    let deadline = Instant::now() + CLOCK_ENABLE_TIMEOUT;
    while bus.read_byte(CM_WKUP_ADC_TSC_CLKCTRL)? & CM_WKUP_MODULEMODE_ENABLE == 0 {
        if Instant::now() > deadline {
            return Err(Error::ClockEnableTimeout {
                timeout_ms: CLOCK_ENABLE_TIMEOUT.as_millis(),
            });
        }
        core::hint::spin_loop();
    }
    Ok(())
}

/// Software-enabled one-shot step sampling `input` against itself, so
/// `SEL_INP = SEL_INM = k` for `AINk`. `SEL_INM` straddles bytes 1 and 2.
fn configure_step<R: RegisterBus>(
    bus: &mut R,
    input: AnalogInput,
    sample_average: SampleAverage,
) -> Result<()> {
    let config = adc_stepconfig(input.step());
    let channel = input.index();
    bus.write_byte(config, sample_average.code() << 2)?;
    bus.write_byte(config + 1, (channel & 0x01) << 7)?;
    bus.write_byte(config + 2, (channel >> 1) | (channel << 3))?;
    bus.write_byte(adc_stepdelay(input.step()) + 3, SAMPLE_DELAY)
}

/// Split a FIFO word into `(step id, 12-bit sample)`.
#[must_use]
pub fn decode_fifo_word(word: u32) -> (u8, u16) {
    let step_id = ((word & ADC_FIFO_STEP_MASK) >> 16) as u8;
    let value = (word & ADC_FIFO_DATA_MASK) as u16;
    (step_id, value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedAdc;
    use embassy_futures::block_on;

    const FOUR: [AnalogInput; 4] = [
        AnalogInput::Ain0,
        AnalogInput::Ain1,
        AnalogInput::Ain2,
        AnalogInput::Ain3,
    ];

    #[test]
    fn decode_splits_step_and_value() {
        assert_eq!(decode_fifo_word(0x0003_0ABC), (3, 0xABC));
        assert_eq!(decode_fifo_word(0xFFF0_1FFF), (1, 0xFFF));
    }

    #[test]
    fn clock_divider_bounds() {
        assert!(ClockDivider::new(0).is_err());
        assert!(ClockDivider::new(65_535).is_err());
        assert_eq!(ClockDivider::new(1).map(ClockDivider::register_value).ok(), Some(0));
        assert_eq!(
            ClockDivider::new(65_534).map(ClockDivider::register_value).ok(),
            Some(65_533)
        );
    }

    #[test]
    fn sample_average_rejects_non_powers() {
        assert_eq!(SampleAverage::try_from(8).ok(), Some(SampleAverage::Eight));
        assert!(matches!(
            SampleAverage::try_from(3),
            Err(Error::InvalidSampleAverage { samples: 3 })
        ));
    }

    #[test]
    fn initialize_programs_steps_and_restores_write_protect() {
        let sim = SimulatedAdc::new();
        let adc = Adc::initialize(
            sim.clone(),
            ClockDivider::new(0x1234 + 1).expect("valid divider"),
            SampleAverage::Sixteen,
            &FOUR,
        );
        assert!(adc.is_ok());

        assert_eq!(sim.byte(ADC_CLKDIV), 0x34);
        assert_eq!(sim.byte(ADC_CLKDIV + 1), 0x12);
        assert_eq!(sim.byte(ADC_CTRL), CTRL_STEP_ID_TAG);

        // AIN3 -> step 4: SEL_INM = 3 (bit 15 set, bits 16-18 = 1), SEL_INP = 3.
        let config = adc_stepconfig(4);
        assert_eq!(sim.byte(config), 0x04 << 2);
        assert_eq!(sim.byte(config + 1), 0x80);
        assert_eq!(sim.byte(config + 2), 0x01 | (0x03 << 3));
        assert_eq!(sim.byte(adc_stepdelay(4) + 3), SAMPLE_DELAY);
    }

    #[test]
    fn initialize_times_out_when_clock_never_latches() {
        let sim = SimulatedAdc::new();
        sim.hold_clock_disabled();
        let result = Adc::initialize(sim, ClockDivider::default(), SampleAverage::One, &FOUR);
        assert!(matches!(result, Err(Error::ClockEnableTimeout { .. })));
    }

    #[test]
    fn read_channels_indexes_by_step_not_order() {
        let sim = SimulatedAdc::new();
        for (input, level) in FOUR.iter().zip([100, 200, 300, 400]) {
            sim.set_level(*input, level);
        }
        let mut adc = Adc::initialize(sim.clone(), ClockDivider::default(), SampleAverage::One, &FOUR)
            .expect("init");

        let readings = block_on(adc.read_channels(&FOUR)).expect("read");
        assert_eq!(readings.len(), 4);
        assert_eq!(readings.get(AnalogInput::Ain0), Some(100));
        assert_eq!(readings.get(AnalogInput::Ain3), Some(400));
        assert_eq!(readings.get(AnalogInput::Ain4), None);

        // Sequencer left off afterwards.
        assert_eq!(sim.byte(ADC_STEPENABLE), 0);
        assert_eq!(sim.byte(ADC_CTRL) & CTRL_ENABLE, 0);
    }

    #[test]
    fn stale_fifo_entries_are_drained_first() {
        let sim = SimulatedAdc::new();
        sim.set_level(AnalogInput::Ain1, 1234);
        let mut adc = Adc::initialize(sim.clone(), ClockDivider::default(), SampleAverage::One, &FOUR)
            .expect("init");
        sim.push_stale(AnalogInput::Ain1, 4000);
        sim.push_stale(AnalogInput::Ain2, 4000);

        let readings = block_on(adc.read_channels(&[AnalogInput::Ain1])).expect("read");
        assert_eq!(readings.get(AnalogInput::Ain1), Some(1234));
        assert_eq!(readings.get(AnalogInput::Ain2), None);
        assert_eq!(sim.fifo_len(), 0);
    }

    #[test]
    fn empty_input_set_is_rejected() {
        let sim = SimulatedAdc::new();
        let mut adc =
            Adc::initialize(sim, ClockDivider::default(), SampleAverage::One, &FOUR).expect("init");
        assert!(matches!(block_on(adc.read_channels(&[])), Err(Error::NoInputs)));
    }

    #[test]
    fn shutdown_disables_converter() {
        let sim = SimulatedAdc::new();
        let adc = Adc::initialize(sim.clone(), ClockDivider::default(), SampleAverage::One, &FOUR)
            .expect("init");
        assert!(adc.shutdown().is_ok());
        assert_eq!(sim.byte(ADC_CTRL), CTRL_DISABLE);
    }
}
