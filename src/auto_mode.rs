//! Auto mode: slow, independent drifting of the channel intensities.
//!
//! Auto mode switches on when exactly one pot is turned all the way down and the
//! other three all the way up. The low pot then sets the drift speed (see
//! [`loop_limit_for_rate`]) and the other three channels wander around their pot
//! settings. Turning all four pots down switches it off again.
//!
//! Each drifting channel owns an [`AutoState`]. Every `loop_limit` iterations its
//! offset moves by [`OFFSET_STEP`], bouncing between `±offset_limit` and away
//! from the on/off thresholds so a channel never parks at either extreme. Now and
//! then, on a bounce, the limit and the loop length are re-drawn so the channels
//! do not move in lockstep.

use embassy_time::{Duration, Instant};

use crate::channel::{CHANNEL_COUNT, Channel};
use crate::random::RandomSource;

// ============================================================================
// Constants
// ============================================================================

/// Raw or median readings below this count as "off".
pub const AUTO_OFF_THRESHOLD: u16 = 10;

/// Raw or median readings above this count as "fully on".
pub const AUTO_ON_THRESHOLD: u16 = 4000;

/// Initial upper bound for the loop limit.
pub const AUTO_LOOP_MAX: u32 = 400;

/// Minimum time between loop-limit re-draws for one channel.
pub const LOOP_ADJUST_COOLDOWN: Duration = Duration::from_secs(5);

/// Magnitude of each offset move.
pub const OFFSET_STEP: i32 = 2;

/// Outer bound for the offset limit.
pub const OFFSET_MAX: i32 = 500;

/// Minimum time between offset-limit re-draws for one channel.
pub const OFFSET_ADJUST_COOLDOWN: Duration = Duration::from_secs(5);

/// The offset limit may be at most this multiple of the channel's intensity.
pub const OFFSET_MAX_RATIO: i32 = 2;

// ============================================================================
// Mode detection
// ============================================================================

/// Global auto-mode flag and the channel whose pot sets the drift speed.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Mode {
    auto: bool,
    rate_channel: Channel,
}

impl Mode {
    /// True while auto mode is on.
    #[must_use]
    pub const fn is_auto(&self) -> bool {
        self.auto
    }

    /// The rate-control channel (meaningful while auto mode is on).
    #[must_use]
    pub const fn rate_channel(&self) -> Channel {
        self.rate_channel
    }

    /// Re-evaluate from this iteration's raw readings.
    ///
    /// All four off turns auto mode off. Exactly one off with the other three on
    /// turns it on, with the off channel as rate control. Anything else leaves
    /// the mode alone, so pots resting mid-range do not flap it.
    pub fn update(&mut self, raw: impl IntoIterator<Item = (Channel, u16)>) {
        let mut off_count = 0;
        let mut on_count = 0;
        let mut low_channel = self.rate_channel;
        for (channel, value) in raw {
            if value < AUTO_OFF_THRESHOLD {
                off_count += 1;
                low_channel = channel;
            } else if value > AUTO_ON_THRESHOLD {
                on_count += 1;
            }
        }

        if off_count == CHANNEL_COUNT {
            self.auto = false;
        } else if off_count == 1 && on_count == CHANNEL_COUNT - 1 {
            self.auto = true;
            self.rate_channel = low_channel;
        }
    }
}

// ============================================================================
// Rate control
// ============================================================================

/// Map the rate-control pot to a loop limit: lower setting, longer loops, slower drift.
#[must_use]
pub const fn loop_limit_for_rate(median: u16) -> u32 {
    match median {
        0..20 => 1024,
        20..60 => 512,
        60..130 => 256,
        130..200 => 128,
        200..400 => 64,
        400..800 => 32,
        800..1200 => 16,
        1200..2000 => 8,
        2000..3500 => 4,
        3500..4090 => 2,
        _ => 1,
    }
}

/// Tracks the speed table value so changes can be pushed to every drifting channel.
#[derive(Clone, Copy, Debug)]
pub struct RateControl {
    loop_max: u32,
    previous: Option<u32>,
}

impl Default for RateControl {
    fn default() -> Self {
        Self {
            loop_max: AUTO_LOOP_MAX,
            previous: None,
        }
    }
}

impl RateControl {
    /// Current upper bound for loop limits.
    #[must_use]
    pub const fn loop_max(&self) -> u32 {
        self.loop_max
    }

    /// Feed the rate pot's median; true when the table value changed.
    pub fn update(&mut self, median: u16) -> bool {
        self.loop_max = loop_limit_for_rate(median);
        let changed = self.previous != Some(self.loop_max);
        self.previous = Some(self.loop_max);
        changed
    }
}

// ============================================================================
// AutoState
// ============================================================================

/// Drift state of one channel.
#[derive(Clone, Debug)]
pub struct AutoState {
    loop_counter: u32,
    loop_limit: u32,
    offset: i32,
    offset_delta: i32,
    offset_limit: i32,
    last_loop_adjust: Option<Instant>,
    last_offset_adjust: Option<Instant>,
    rate_changed: bool,
}

impl AutoState {
    /// Fresh state with a random loop limit, direction, and offset limit.
    pub fn new(rng: &mut impl RandomSource) -> Self {
        let loop_limit = random_loop_limit(AUTO_LOOP_MAX, rng);
        let offset_delta = if rng.one_in(2) {
            OFFSET_STEP
        } else {
            -OFFSET_STEP
        };
        let offset_limit = random_offset_limit(OFFSET_MAX, rng);
        Self {
            loop_counter: 0,
            loop_limit,
            offset: 0,
            offset_delta,
            offset_limit,
            last_loop_adjust: None,
            last_offset_adjust: None,
            rate_changed: false,
        }
    }

    /// Iterations between offset moves.
    #[must_use]
    pub const fn loop_limit(&self) -> u32 {
        self.loop_limit
    }

    /// Current offset, always within `±offset_limit`.
    #[must_use]
    pub const fn offset(&self) -> i32 {
        self.offset
    }

    /// Direction and size of the next move.
    #[must_use]
    pub const fn offset_delta(&self) -> i32 {
        self.offset_delta
    }

    /// Current bound on the offset magnitude.
    #[must_use]
    pub const fn offset_limit(&self) -> i32 {
        self.offset_limit
    }

    /// The rate pot moved: re-draw the loop limit and move on the next advance.
    pub fn request_rate_change(&mut self) {
        self.rate_changed = true;
    }

    /// Intensity after applying the offset, floored at zero.
    #[must_use]
    pub fn biased(&self, median: u16) -> u16 {
        let biased = (i32::from(median) + self.offset).max(0);
        u16::try_from(biased).unwrap_or(u16::MAX)
    }

    /// Advance one iteration for a channel whose median is `median`.
    ///
    /// `loop_max` is the current rate-control bound for loop limits.
    pub fn advance(
        &mut self,
        median: u16,
        loop_max: u32,
        now: Instant,
        rng: &mut impl RandomSource,
    ) {
        self.loop_counter = self.loop_counter.saturating_add(1);

        // A rate change takes effect at once instead of after the current loop.
        let forced = self.rate_changed;
        if forced {
            self.loop_limit = random_loop_limit(loop_max, rng);
            self.rate_changed = false;
        }
        if !forced && self.loop_counter < self.loop_limit {
            return;
        }

        self.loop_counter = 0;
        self.step_offset(median, now, rng);

        if cooldown_elapsed(self.last_loop_adjust, now, LOOP_ADJUST_COOLDOWN) {
            self.last_loop_adjust = Some(now);
            if rng.one_in(3) {
                self.loop_limit = random_loop_limit(loop_max, rng);
            }
        }
    }

    fn step_offset(&mut self, median: u16, now: Instant, rng: &mut impl RandomSource) {
        let candidate = self.offset + self.offset_delta;
        let biased = i32::from(median) + candidate;

        // Thresholds only stop moves toward them, so a channel whose pot dropped
        // under its offset can still climb back.
        let reflect = (candidate > self.offset_limit && self.offset_delta > 0)
            || (candidate < -self.offset_limit && self.offset_delta < 0)
            || (biased <= i32::from(AUTO_OFF_THRESHOLD) && self.offset_delta < 0)
            || (biased >= i32::from(AUTO_ON_THRESHOLD) && self.offset_delta > 0);

        if !reflect {
            self.offset = candidate;
            return;
        }

        self.offset_delta = -self.offset_delta;

        if cooldown_elapsed(self.last_offset_adjust, now, OFFSET_ADJUST_COOLDOWN) {
            self.last_offset_adjust = Some(now);
            if rng.one_in(2) {
                // Dim channels get a proportionally smaller swing.
                let cap = (i32::from(median) * OFFSET_MAX_RATIO).min(OFFSET_MAX);
                self.set_offset_limit(random_offset_limit(cap, rng));
            }
        }
    }

    fn set_offset_limit(&mut self, limit: i32) {
        self.offset_limit = limit;
        self.offset = self.offset.clamp(-limit, limit);
        if self.offset >= limit {
            self.offset_delta = -OFFSET_STEP;
        } else if self.offset <= -limit {
            self.offset_delta = OFFSET_STEP;
        }
    }
}

fn cooldown_elapsed(last: Option<Instant>, now: Instant, cooldown: Duration) -> bool {
    last.is_none_or(|last| now.saturating_duration_since(last) > cooldown)
}

/// Uniform in `[max / 2, max)`, at least 1.
fn spread(max: u32, rng: &mut impl RandomSource) -> u32 {
    let max = max.max(1);
    let floor = max / 2;
    (floor + rng.below(max - floor)).max(1)
}

/// Random loop limit no larger than `loop_max`.
pub fn random_loop_limit(loop_max: u32, rng: &mut impl RandomSource) -> u32 {
    spread(loop_max, rng)
}

/// Random offset limit no larger than `offset_max`.
pub fn random_offset_limit(offset_max: i32, rng: &mut impl RandomSource) -> i32 {
    let max = u32::try_from(offset_max).unwrap_or(1);
    i32::try_from(spread(max, rng)).unwrap_or(OFFSET_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::XorShift32;

    fn readings(values: [u16; CHANNEL_COUNT]) -> impl Iterator<Item = (Channel, u16)> {
        Channel::ALL.into_iter().zip(values)
    }

    #[test]
    fn all_pots_down_turns_auto_off() {
        let mut mode = Mode::default();
        mode.update(readings([5, 4090, 4090, 4090]));
        assert!(mode.is_auto());
        mode.update(readings([5, 5, 5, 5]));
        assert!(!mode.is_auto());
    }

    #[test]
    fn one_down_three_up_turns_auto_on() {
        let mut mode = Mode::default();
        mode.update(readings([5, 4090, 4090, 4090]));
        assert!(mode.is_auto());
        assert_eq!(mode.rate_channel(), Channel::White);

        mode.update(readings([4090, 4090, 4090, 3]));
        assert!(mode.is_auto());
        assert_eq!(mode.rate_channel(), Channel::Red);
    }

    #[test]
    fn mid_range_pots_leave_mode_unchanged() {
        let mut mode = Mode::default();
        mode.update(readings([5, 4090, 4090, 4090]));
        mode.update(readings([5, 2000, 4090, 4090]));
        assert!(mode.is_auto());
        assert_eq!(mode.rate_channel(), Channel::White);

        let mut off = Mode::default();
        off.update(readings([5, 5, 5, 4090]));
        assert!(!off.is_auto());
    }

    #[test]
    fn thresholds_are_strict() {
        let mut mode = Mode::default();
        mode.update(readings([10, 4090, 4090, 4090]));
        assert!(!mode.is_auto());
        mode.update(readings([9, 4001, 4001, 4000]));
        assert!(!mode.is_auto());
    }

    #[test]
    fn speed_table_is_monotone() {
        assert_eq!(loop_limit_for_rate(0), 1024);
        assert_eq!(loop_limit_for_rate(19), 1024);
        assert_eq!(loop_limit_for_rate(20), 512);
        assert_eq!(loop_limit_for_rate(4089), 2);
        assert_eq!(loop_limit_for_rate(4095), 1);
        let mut last = u32::MAX;
        for median in 0..=4095 {
            let limit = loop_limit_for_rate(median);
            assert!(limit <= last);
            last = limit;
        }
    }

    #[test]
    fn rate_control_reports_changes_only() {
        let mut rate = RateControl::default();
        assert!(rate.update(100));
        assert_eq!(rate.loop_max(), 256);
        assert!(!rate.update(120));
        assert!(rate.update(5));
        assert_eq!(rate.loop_max(), 1024);
    }

    #[test]
    fn random_limits_stay_in_band() {
        let mut rng = XorShift32::new(3);
        for _ in 0..1000 {
            let limit = random_loop_limit(400, &mut rng);
            assert!((200..400).contains(&limit));
            let offset = random_offset_limit(500, &mut rng);
            assert!((250..500).contains(&offset));
        }
        assert_eq!(random_loop_limit(0, &mut rng), 1);
        assert_eq!(random_loop_limit(1, &mut rng), 1);
        assert_eq!(random_offset_limit(0, &mut rng), 1);
    }

    #[test]
    fn offset_stays_within_limit_forever() {
        let mut rng = XorShift32::new(11);
        let mut states: Vec<AutoState> = (0..3).map(|_| AutoState::new(&mut rng)).collect();
        let medians = [30u16, 2000, 3990];
        let mut now = Instant::from_secs(0);
        for iteration in 0..200_000u32 {
            now += Duration::from_millis(1);
            let loop_max = if iteration % 50_000 < 25_000 { 1 } else { 64 };
            for (state, median) in states.iter_mut().zip(medians) {
                if iteration % 10_000 == 0 {
                    state.request_rate_change();
                }
                state.advance(median, loop_max, now, &mut rng);
                assert!(state.offset().abs() <= state.offset_limit());
                assert!(state.offset_limit() >= 1);
            }
        }
    }

    #[test]
    fn reflects_at_the_limit() {
        let mut rng = XorShift32::new(5);
        let mut state = AutoState::new(&mut rng);
        state.loop_limit = 1;
        state.offset_limit = 6;
        state.offset_delta = OFFSET_STEP;
        // Keep re-randomization out of the way.
        let now = Instant::from_secs(1);
        state.last_offset_adjust = Some(now);
        state.last_loop_adjust = Some(now);

        let mut offsets = Vec::new();
        for _ in 0..8 {
            state.advance(2000, 1, now, &mut rng);
            offsets.push(state.offset());
        }
        assert_eq!(offsets, [2, 4, 6, 6, 4, 2, 0, -2]);

        // At +limit moving up, the next move goes down.
        state.offset = 6;
        state.offset_delta = OFFSET_STEP;
        state.advance(2000, 1, now, &mut rng);
        assert!(state.offset_delta() < 0);
        assert_eq!(state.offset(), 6);
    }

    #[test]
    fn reflects_off_the_thresholds() {
        let mut rng = XorShift32::new(9);
        let mut state = AutoState::new(&mut rng);
        state.loop_limit = 1;
        state.offset_limit = 500;
        state.offset = 0;
        state.offset_delta = OFFSET_STEP;
        let now = Instant::from_secs(1);
        state.last_offset_adjust = Some(now);
        state.last_loop_adjust = Some(now);

        // 3997 + 2 = 3999 is fine, 3997 + 4 = 4001 would cross the on threshold.
        state.advance(3997, 1, now, &mut rng);
        assert_eq!(state.offset(), 2);
        state.advance(3997, 1, now, &mut rng);
        assert_eq!(state.offset(), 2);
        assert_eq!(state.offset_delta(), -OFFSET_STEP);

        // 13 - 2 = 11 is fine, 13 - 4 = 9 would cross the off threshold.
        state.offset = 0;
        state.offset_delta = -OFFSET_STEP;
        state.advance(13, 1, now, &mut rng);
        assert_eq!(state.offset(), -2);
        state.advance(13, 1, now, &mut rng);
        assert_eq!(state.offset_delta(), OFFSET_STEP);
        assert_eq!(state.biased(13), 11);
    }

    #[test]
    fn recovers_when_pot_drops_under_the_offset() {
        let mut rng = XorShift32::new(7);
        let mut state = AutoState::new(&mut rng);
        state.loop_limit = 1;
        state.offset_limit = 176;
        state.offset = -152;
        state.offset_delta = -OFFSET_STEP;
        let now = Instant::from_secs(1);
        state.last_offset_adjust = Some(now);
        state.last_loop_adjust = Some(now);
        assert_eq!(state.biased(100), 0);

        let mut seen = Vec::new();
        for _ in 0..400 {
            state.advance(100, 1, now, &mut rng);
            seen.push(state.biased(100));
        }
        // First move reflects off the floor, then the offset climbs back.
        assert_eq!(seen[0], 0);
        assert_eq!(state.offset_limit(), 176);
        assert!(seen.iter().any(|intensity| *intensity > 200));
        // Once recovered it bounces between the off threshold and +limit.
        assert!(seen[300..].iter().all(|intensity| *intensity > AUTO_OFF_THRESHOLD));
        assert!(seen[300..].iter().all(|intensity| *intensity <= 100 + 176));
    }

    #[test]
    fn waits_loop_limit_iterations_between_moves() {
        let mut rng = XorShift32::new(1);
        let mut state = AutoState::new(&mut rng);
        state.loop_limit = 3;
        state.offset_limit = 100;
        state.offset_delta = OFFSET_STEP;
        let now = Instant::from_secs(1);
        state.last_offset_adjust = Some(now);
        state.last_loop_adjust = Some(now);

        state.advance(2000, 3, now, &mut rng);
        state.advance(2000, 3, now, &mut rng);
        assert_eq!(state.offset(), 0);
        state.advance(2000, 3, now, &mut rng);
        assert_eq!(state.offset(), 2);
    }

    #[test]
    fn rate_change_moves_immediately_with_new_limit() {
        let mut rng = XorShift32::new(2);
        let mut state = AutoState::new(&mut rng);
        state.loop_limit = 1000;
        state.offset_limit = 100;
        state.offset_delta = OFFSET_STEP;
        let now = Instant::from_secs(1);
        state.last_offset_adjust = Some(now);
        state.last_loop_adjust = Some(now);

        state.request_rate_change();
        state.advance(2000, 8, now, &mut rng);
        assert_eq!(state.offset(), 2);
        assert!((4..8).contains(&state.loop_limit()));
    }

    #[test]
    fn shrinking_limit_pulls_offset_back_inside() {
        let mut rng = XorShift32::new(4);
        let mut state = AutoState::new(&mut rng);
        state.offset = 300;
        state.offset_delta = OFFSET_STEP;
        state.set_offset_limit(40);
        assert_eq!(state.offset(), 40);
        assert_eq!(state.offset_delta(), -OFFSET_STEP);

        state.offset = -300;
        state.set_offset_limit(40);
        assert_eq!(state.offset(), -40);
        assert_eq!(state.offset_delta(), OFFSET_STEP);
    }

    #[test]
    fn biased_is_floored_at_zero() {
        let mut rng = XorShift32::new(6);
        let mut state = AutoState::new(&mut rng);
        state.offset = -50;
        assert_eq!(state.biased(20), 0);
        assert_eq!(state.biased(2000), 1950);
    }
}
