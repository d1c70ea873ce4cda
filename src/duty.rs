//! Intensity to PWM duty mapping and the shared current budget.
//!
//! Durations here are [`core::time::Duration`] because duty cycles are set with
//! nanosecond resolution.

use core::time::Duration;

/// PWM period for every channel (2 kHz).
pub const PWM_PERIOD: Duration = Duration::from_nanos(500_000);

/// Duty produced by intensity 0. Keeps the drivers just alive.
pub const DUTY_FLOOR: Duration = Duration::from_nanos(25);

/// Largest duty ever requested, just short of the period.
pub const DUTY_CEILING: Duration = Duration::from_nanos(499_990);

/// Rated current of one LED string, in milliamps.
pub const LED_CURRENT_MA: u64 = 700;

/// Current the supply can deliver to all strings together, in milliamps.
pub const SUPPLY_CURRENT_MA: u64 = 1400;

/// Sum of duties the supply can sustain: one period per LED string's worth of current.
pub const DUTY_BUDGET: Duration =
    Duration::from_nanos(PWM_PERIOD.as_nanos() as u64 * SUPPLY_CURRENT_MA / LED_CURRENT_MA);

const DUTY_QUADRATIC: f64 = 0.03;

/// Map a 12-bit intensity to a duty.
///
/// The curve is quadratic so the low end of the pot gets fine control, where the
/// eye is most sensitive.
///
/// # Example
///
/// ```rust
/// use core::time::Duration;
/// use led_fixture::duty::intensity_to_duty;
///
/// assert_eq!(intensity_to_duty(0), Duration::from_nanos(25));
/// assert_eq!(intensity_to_duty(2000), Duration::from_nanos(120_025));
/// assert_eq!(intensity_to_duty(4095), Duration::from_nanos(499_990));
/// ```
#[must_use]
pub fn intensity_to_duty(intensity: u16) -> Duration {
    let level = f64::from(intensity);
    let floor = DUTY_FLOOR.as_nanos() as f64;
    let ceiling = DUTY_CEILING.as_nanos() as f64;
    let nanos = DUTY_QUADRATIC.mul_add(level * level, floor).min(ceiling);
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "value is clamped to [DUTY_FLOOR, DUTY_CEILING]"
    )]
    let nanos = nanos as u64;
    Duration::from_nanos(nanos)
}

/// Scale `duties` down proportionally when their sum exceeds [`DUTY_BUDGET`].
#[must_use]
pub fn normalize<const N: usize>(duties: [Duration; N]) -> [Duration; N] {
    normalize_to(duties, DUTY_BUDGET)
}

/// Scale `duties` down proportionally when their sum exceeds `budget`.
///
/// Integer arithmetic rounds each share down, so the result never overshoots.
#[must_use]
pub fn normalize_to<const N: usize>(duties: [Duration; N], budget: Duration) -> [Duration; N] {
    let total: u128 = duties.iter().map(Duration::as_nanos).sum();
    let budget_nanos = budget.as_nanos();
    if total <= budget_nanos {
        return duties;
    }
    duties.map(|duty| {
        let scaled = duty.as_nanos() * budget_nanos / total;
        Duration::from_nanos(u64::try_from(scaled).unwrap_or(u64::MAX))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total(duties: &[Duration]) -> Duration {
        duties.iter().sum()
    }

    #[test]
    fn budget_is_two_periods() {
        assert_eq!(DUTY_BUDGET, Duration::from_nanos(1_000_000));
    }

    #[test]
    fn curve_endpoints() {
        assert_eq!(intensity_to_duty(0), DUTY_FLOOR);
        assert_eq!(intensity_to_duty(1), Duration::from_nanos(25));
        assert_eq!(intensity_to_duty(100), Duration::from_nanos(325));
        assert_eq!(intensity_to_duty(4082), Duration::from_nanos(499_906));
        assert_eq!(intensity_to_duty(4083), DUTY_CEILING);
        assert_eq!(intensity_to_duty(u16::MAX), DUTY_CEILING);
    }

    #[test]
    fn curve_is_monotone() {
        let mut last = Duration::ZERO;
        for intensity in 0..=4095 {
            let duty = intensity_to_duty(intensity);
            assert!(duty >= last);
            assert!(duty <= DUTY_CEILING);
            last = duty;
        }
    }

    #[test]
    fn under_budget_is_untouched() {
        let duties = [
            Duration::from_nanos(400_000),
            Duration::from_nanos(300_000),
            Duration::from_nanos(200_000),
            Duration::from_nanos(100_000),
        ];
        assert_eq!(normalize(duties), duties);
    }

    #[test]
    fn over_budget_scales_proportionally() {
        let full = [DUTY_CEILING; 4];
        let scaled = normalize(full);
        assert!(total(&scaled) <= DUTY_BUDGET);
        assert!(scaled.iter().all(|duty| *duty == Duration::from_nanos(250_000)));

        let uneven = [
            Duration::from_nanos(480_000),
            Duration::from_nanos(480_000),
            Duration::from_nanos(240_000),
            Duration::from_nanos(0),
        ];
        let scaled = normalize(uneven);
        assert_eq!(scaled[0], Duration::from_nanos(400_000));
        assert_eq!(scaled[2], Duration::from_nanos(200_000));
        assert_eq!(scaled[3], Duration::ZERO);
    }

    #[test]
    fn never_exceeds_budget() {
        for step in 0..=40u16 {
            let a = intensity_to_duty(step * 100);
            let b = intensity_to_duty(4095 - step * 100);
            let duties = [a, b, intensity_to_duty(4095), intensity_to_duty(step * 50)];
            assert!(total(&normalize(duties)) <= DUTY_BUDGET);
        }
        let odd = [Duration::from_nanos(333_333); 7];
        assert!(total(&normalize_to(odd, Duration::from_nanos(1_000))) <= Duration::from_nanos(1_000));
    }
}
