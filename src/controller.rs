//! The fixture control loop.
//!
//! Each iteration reads the four pots, runs every reading through its channel's
//! median window, updates the auto-mode state, turns intensities into duties,
//! scales them into the shared current budget, and writes whatever changed.
//!
//! See [`Controller`] for usage.

use core::convert::Infallible;
use core::fmt;
use core::time::Duration;

use embassy_time::{Instant, Timer};
use itertools::Itertools;
use log::{debug, info};

use crate::adc::{Adc, AdcReadings};
use crate::auto_mode::{AUTO_OFF_THRESHOLD, AutoState, Mode, RateControl};
use crate::channel::{CHANNEL_COUNT, Channel};
use crate::duty::{PWM_PERIOD, intensity_to_duty, normalize};
use crate::median::MedianWindow;
use crate::pwm::PwmOutput;
use crate::random::RandomSource;
use crate::registers::RegisterBus;
use crate::Result;

// ============================================================================
// ChannelState
// ============================================================================

/// Everything the loop keeps for one channel.
#[derive(Debug)]
pub struct ChannelState<P> {
    channel: Channel,
    window: MedianWindow,
    median: u16,
    auto: AutoState,
    pwm: P,
    proposed: Duration,
    applied: Option<Duration>,
}

impl<P: PwmOutput> ChannelState<P> {
    fn new(channel: Channel, pwm: P, window: MedianWindow, rng: &mut impl RandomSource) -> Self {
        Self {
            channel,
            window,
            median: 0,
            auto: AutoState::new(rng),
            pwm,
            proposed: Duration::ZERO,
            applied: None,
        }
    }

    /// Write `duty` unless it is already what the line is driving.
    fn apply(&mut self, duty: Duration) -> Result<bool> {
        if self.applied == Some(duty) {
            return Ok(false);
        }
        self.pwm.set_pwm(PWM_PERIOD, duty)?;
        self.applied = Some(duty);
        Ok(true)
    }
}

impl<P> ChannelState<P> {
    /// Which channel this is.
    #[must_use]
    pub const fn channel(&self) -> Channel {
        self.channel
    }

    /// Median of the current window.
    #[must_use]
    pub const fn median(&self) -> u16 {
        self.median
    }

    /// Auto-mode drift state.
    #[must_use]
    pub const fn auto(&self) -> &AutoState {
        &self.auto
    }

    /// Duty proposed before budget normalization.
    #[must_use]
    pub const fn proposed(&self) -> Duration {
        self.proposed
    }

    /// Duty last written to the line, if any.
    #[must_use]
    pub const fn applied(&self) -> Option<Duration> {
        self.applied
    }

    /// The channel's PWM line.
    #[must_use]
    pub const fn pwm(&self) -> &P {
        &self.pwm
    }
}

// ============================================================================
// Reports
// ============================================================================

/// What a channel did in one iteration.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    /// Following its pot directly.
    Manual,
    /// Drifting around its pot setting.
    Drift,
    /// Setting the drift speed.
    Rate,
}

impl Role {
    const fn symbol(self) -> char {
        match self {
            Self::Manual => '-',
            Self::Drift => '+',
            Self::Rate => 'R',
        }
    }
}

/// One channel's line of an [`IterationReport`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChannelReport {
    /// Which channel.
    pub channel: Channel,
    /// Raw sample this iteration, if the ADC produced one.
    pub raw: Option<u16>,
    /// Median after the update.
    pub median: u16,
    /// Role this iteration.
    pub role: Role,
    /// Intensity handed to the duty curve (equals `median` outside drift).
    pub intensity: u16,
    /// Current auto loop limit.
    pub loop_limit: u32,
    /// Current auto offset.
    pub offset: i32,
    /// Current auto offset limit.
    pub offset_limit: i32,
    /// Duty driving the line after normalization.
    pub duty: Duration,
}

impl fmt::Display for ChannelReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<5} raw ", self.channel)?;
        match self.raw {
            Some(raw) => write!(f, "{raw:>4}")?,
            None => f.write_str("   -")?,
        }
        write!(
            f,
            " med {:>4} auto {} int {:>4} loop {} off {:+}/{} duty {}ns",
            self.median,
            self.role.symbol(),
            self.intensity,
            self.loop_limit,
            self.offset,
            self.offset_limit,
            self.duty.as_nanos()
        )
    }
}

/// Snapshot of one loop iteration, printed as the debug line.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IterationReport {
    /// Auto mode flag after this iteration's readings.
    pub auto: bool,
    /// Per-channel detail in [`Channel::ALL`] order.
    pub channels: [ChannelReport; CHANNEL_COUNT],
}

impl IterationReport {
    /// The line for `channel`.
    #[must_use]
    pub const fn channel(&self, channel: Channel) -> &ChannelReport {
        &self.channels[channel.index()]
    }
}

impl fmt::Display for IterationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.channels.iter().join("   "))
    }
}

// ============================================================================
// Controller
// ============================================================================

/// The fixture: one ADC, four PWM lines, and the state tying them together.
///
/// # Example
///
/// ```rust,no_run
/// use embassy_time::Duration;
/// use led_fixture::adc::{Adc, ClockDivider, SampleAverage};
/// use led_fixture::channel::Channel;
/// use led_fixture::controller::Controller;
/// use led_fixture::duty::PWM_PERIOD;
/// use led_fixture::pwm::{DEFAULT_PWM_ROOT, SysfsPwm};
/// use led_fixture::random::XorShift32;
/// use led_fixture::registers::MappedRegion;
///
/// async fn example() -> led_fixture::Result<()> {
///     let open = |channel: Channel| SysfsPwm::open(DEFAULT_PWM_ROOT, channel.default_pwm(), PWM_PERIOD);
///     let pwms = [
///         open(Channel::White).await?,
///         open(Channel::Green).await?,
///         open(Channel::Blue).await?,
///         open(Channel::Red).await?,
///     ];
///     let adc = Adc::initialize(
///         MappedRegion::open()?,
///         ClockDivider::default(),
///         SampleAverage::One,
///         &Channel::INPUTS,
///     )?;
///
///     let mut controller = Controller::new(adc, pwms, 100, XorShift32::from_time())?;
///     let never = controller.run(Duration::from_millis(1)).await?;
///     match never {}
/// }
/// ```
pub struct Controller<R: RegisterBus, P: PwmOutput, G: RandomSource> {
    adc: Adc<R>,
    channels: [ChannelState<P>; CHANNEL_COUNT],
    mode: Mode,
    rate: RateControl,
    rng: G,
}

impl<R: RegisterBus, P: PwmOutput, G: RandomSource> Controller<R, P, G> {
    /// Assemble a controller; `pwms` are in [`Channel::ALL`] order.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidWindowSize`](crate::Error::InvalidWindowSize) for a bad
    /// `window_size`.
    pub fn new(adc: Adc<R>, pwms: [P; CHANNEL_COUNT], window_size: usize, mut rng: G) -> Result<Self> {
        let window = MedianWindow::new(window_size)?;
        let [white, green, blue, red] = pwms;
        let channels = [
            ChannelState::new(Channel::White, white, window.clone(), &mut rng),
            ChannelState::new(Channel::Green, green, window.clone(), &mut rng),
            ChannelState::new(Channel::Blue, blue, window.clone(), &mut rng),
            ChannelState::new(Channel::Red, red, window, &mut rng),
        ];
        info!("controller ready: median window {window_size}");
        Ok(Self {
            adc,
            channels,
            mode: Mode::default(),
            rate: RateControl::default(),
            rng,
        })
    }

    /// Current mode.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// State of `channel`.
    #[must_use]
    pub const fn channel(&self, channel: Channel) -> &ChannelState<P> {
        &self.channels[channel.index()]
    }

    /// Run forever, sleeping `sleep` between iterations.
    ///
    /// Every iteration's [`IterationReport`] is logged at debug level.
    ///
    /// # Errors
    ///
    /// The first ADC or PWM error; the hardware is then in an unknown state.
    pub async fn run(&mut self, sleep: embassy_time::Duration) -> Result<Infallible> {
        loop {
            let report = self.step().await?;
            debug!("{report}");
            if sleep > embassy_time::Duration::from_ticks(0) {
                Timer::after(sleep).await;
            }
        }
    }

    /// Read the pots once and process the readings.
    ///
    /// # Errors
    ///
    /// ADC register errors and PWM write errors.
    pub async fn step(&mut self) -> Result<IterationReport> {
        let readings = self.adc.read_channels(&Channel::INPUTS).await?;
        self.process(&readings, Instant::now())
    }

    /// One iteration over already-read samples, as of `now`.
    ///
    /// A channel missing from `readings` keeps its previous median and duty.
    ///
    /// # Errors
    ///
    /// PWM write errors.
    pub fn process(&mut self, readings: &AdcReadings, now: Instant) -> Result<IterationReport> {
        let raw = Channel::ALL.map(|channel| readings.get(channel.input()));

        let previous = self.mode;
        self.mode.update(
            Channel::ALL
                .into_iter()
                .zip(raw)
                .filter_map(|(channel, value)| value.map(|value| (channel, value))),
        );
        if self.mode != previous {
            if self.mode.is_auto() {
                info!("auto mode on, {} sets the rate", self.mode.rate_channel());
            } else {
                info!("auto mode off");
            }
        }

        for (state, raw) in self.channels.iter_mut().zip(raw) {
            if let Some(raw) = raw {
                state.median = state.window.update(raw);
            }
        }

        // Rate control first so a speed change reaches every channel this iteration.
        let mode = self.mode;
        if mode.is_auto() {
            let rate_median = self.channel(mode.rate_channel()).median;
            if self.rate.update(rate_median) {
                debug!("auto loop max now {}", self.rate.loop_max());
                // The rate channel too: it picks the new limit up once it drifts again.
                for state in &mut self.channels {
                    state.auto.request_rate_change();
                }
            }
        }

        let loop_max = self.rate.loop_max();
        let mut roles = [Role::Manual; CHANNEL_COUNT];
        let mut intensities = [0; CHANNEL_COUNT];
        for ((state, role), intensity) in self
            .channels
            .iter_mut()
            .zip(&mut roles)
            .zip(&mut intensities)
        {
            *role = role_of(mode, state.channel);
            *intensity = match *role {
                Role::Manual | Role::Rate => state.median,
                Role::Drift if state.median > AUTO_OFF_THRESHOLD => {
                    state.auto.advance(state.median, loop_max, now, &mut self.rng);
                    state.auto.biased(state.median)
                }
                Role::Drift => 0,
            };
            // The rate channel keeps whatever duty it had when auto mode began.
            if *role != Role::Rate {
                state.proposed = intensity_to_duty(*intensity);
            }
        }

        let normalized = normalize(self.channels.each_ref().map(|state| state.proposed));
        for (state, duty) in self.channels.iter_mut().zip(normalized) {
            state.apply(duty)?;
        }

        let channels = core::array::from_fn(|index| {
            let state = &self.channels[index];
            ChannelReport {
                channel: state.channel,
                raw: raw[index],
                median: state.median,
                role: roles[index],
                intensity: intensities[index],
                loop_limit: state.auto.loop_limit(),
                offset: state.auto.offset(),
                offset_limit: state.auto.offset_limit(),
                duty: state.applied.unwrap_or_default(),
            }
        });
        Ok(IterationReport {
            auto: mode.is_auto(),
            channels,
        })
    }

    /// Disable the ADC and release the register window.
    ///
    /// # Errors
    ///
    /// Register access errors.
    pub fn shutdown(self) -> Result<()> {
        self.adc.shutdown()
    }
}

fn role_of(mode: Mode, channel: Channel) -> Role {
    if !mode.is_auto() {
        Role::Manual
    } else if channel == mode.rate_channel() {
        Role::Rate
    } else {
        Role::Drift
    }
}
