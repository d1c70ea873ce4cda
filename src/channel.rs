//! The four color channels of the fixture and their wiring.

use core::fmt;

use crate::adc::AnalogInput;
use crate::pwm::PwmLocation;

/// Number of color channels.
pub const CHANNEL_COUNT: usize = 4;

/// One pot-and-LED pair.
///
/// | Channel | ADC input | Pot pin | PWM pin |
/// |---------|-----------|---------|---------|
/// | White   | AIN0      | P9_39   | P9_16   |
/// | Green   | AIN1      | P9_40   | P9_14   |
/// | Blue    | AIN2      | P9_37   | P9_22   |
/// | Red     | AIN3      | P9_38   | P9_21   |
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Channel {
    /// White LEDs.
    #[default]
    White,
    /// Green LEDs.
    Green,
    /// Blue LEDs.
    Blue,
    /// Red LEDs.
    Red,
}

impl Channel {
    /// All channels in ADC input order.
    pub const ALL: [Self; CHANNEL_COUNT] = [Self::White, Self::Green, Self::Blue, Self::Red];

    /// The ADC inputs of [`ALL`](Self::ALL), in the same order.
    pub const INPUTS: [AnalogInput; CHANNEL_COUNT] = [
        AnalogInput::Ain0,
        AnalogInput::Ain1,
        AnalogInput::Ain2,
        AnalogInput::Ain3,
    ];

    /// Position in [`ALL`](Self::ALL).
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// ADC input wired to this channel's pot.
    #[must_use]
    pub const fn input(self) -> AnalogInput {
        match self {
            Self::White => AnalogInput::Ain0,
            Self::Green => AnalogInput::Ain1,
            Self::Blue => AnalogInput::Ain2,
            Self::Red => AnalogInput::Ain3,
        }
    }

    /// Header pin driving this channel's LEDs.
    #[must_use]
    pub const fn pwm_pin(self) -> &'static str {
        match self {
            Self::White => "P9_16",
            Self::Green => "P9_14",
            Self::Blue => "P9_22",
            Self::Red => "P9_21",
        }
    }

    /// Sysfs PWM chip and channel behind [`pwm_pin`](Self::pwm_pin) on a stock
    /// BeagleBone Black image (EHRPWM0 is `pwmchip1`, EHRPWM1 is `pwmchip4`).
    #[must_use]
    pub const fn default_pwm(self) -> PwmLocation {
        match self {
            Self::White => PwmLocation::new(4, 1),
            Self::Green => PwmLocation::new(4, 0),
            Self::Blue => PwmLocation::new(1, 0),
            Self::Red => PwmLocation::new(1, 1),
        }
    }

    const fn name(self) -> &'static str {
        match self {
            Self::White => "WHITE",
            Self::Green => "GREEN",
            Self::Blue => "BLUE",
            Self::Red => "RED",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inputs_match_channel_order() {
        for (channel, input) in Channel::ALL.iter().zip(Channel::INPUTS) {
            assert_eq!(channel.input(), input);
            assert_eq!(Channel::ALL[channel.index()], *channel);
        }
    }

    #[test]
    fn display_pads() {
        assert_eq!(format!("{:<5}|", Channel::Red), "RED  |");
    }
}
