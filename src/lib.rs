//! Potentiometer-driven four-channel LED fixture controller for the BeagleBone Black.
//!
//! Four pots on the analog header set the brightness of four LED strings
//! (white, green, blue, red) driven by the hardware PWM lines. Samples are
//! read straight from the ADC registers through `/dev/mem`, smoothed with a
//! rolling median, optionally set drifting by [auto mode](auto_mode), mapped
//! to duty cycles, and held within the supply's current budget.
//!
//! See [`controller::Controller`] for the loop that ties it together.
//!
//! # Glossary
//!
//! - **ADC_TSC:** the AM335x touchscreen/ADC subsystem. Seven 12-bit analog
//!   inputs (AIN0–AIN6) sampled by a 16-step sequencer into two FIFOs.
//! - **Step:** one sequencer slot. This crate samples `AINk` with step `k + 1`
//!   in software one-shot mode, and the FIFO tags each result with its step id.
//! - **Duty:** high time of a PWM period, in nanoseconds. The period is fixed
//!   at 500 µs.
//! - **Budget:** the largest total duty the supply can carry (two strings at
//!   full current); duties are scaled down together when their sum exceeds it.
//! - **Rate control:** in auto mode, the channel whose pot sets the drift speed
//!   instead of its own brightness.

pub mod adc;
pub mod auto_mode;
pub mod channel;
pub mod config;
pub mod controller;
pub mod duty;
mod error;
pub mod median;
pub mod pwm;
pub mod random;
pub mod registers;
#[cfg(any(test, feature = "host"))]
pub mod sim;

// Re-export error types and result (used throughout)
pub use crate::error::{Error, Result};
