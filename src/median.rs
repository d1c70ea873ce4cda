//! Rolling median filter for potentiometer samples.
//!
//! A median tracks a pot that is being turned without the lag of a mean, and
//! ignores the occasional wild sample entirely.

use heapless::Vec;

use crate::{Error, Result};

/// Largest supported window.
pub const MAX_WINDOW: usize = 1024;

/// Window used when none is configured.
pub const DEFAULT_WINDOW: usize = 100;

/// Fixed-capacity circular history of raw samples.
///
/// The window starts full of zeros, so a freshly started fixture fades up to the
/// pot settings over the first `size` iterations.
///
/// # Example
///
/// ```rust
/// use led_fixture::median::MedianWindow;
///
/// let mut window = MedianWindow::new(3)?;
/// assert_eq!(window.update(900), 0);
/// assert_eq!(window.update(10), 10);
/// assert_eq!(window.update(4000), 900);
/// # Ok::<(), led_fixture::Error>(())
/// ```
#[derive(Clone, Debug)]
pub struct MedianWindow {
    samples: Vec<u16, MAX_WINDOW>,
    sorted: Vec<u16, MAX_WINDOW>,
    oldest: usize,
}

impl MedianWindow {
    /// Window of `size` zero samples.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidWindowSize`] unless `1 <= size <= MAX_WINDOW`.
    pub fn new(size: usize) -> Result<Self> {
        let invalid = Error::InvalidWindowSize {
            size,
            max: MAX_WINDOW,
        };
        if size == 0 {
            return Err(invalid);
        }
        let mut samples = Vec::new();
        samples.resize(size, 0).map_err(|()| invalid)?;
        Ok(Self {
            sorted: samples.clone(),
            samples,
            oldest: 0,
        })
    }

    /// Number of samples in the window.
    #[must_use]
    pub fn size(&self) -> usize {
        self.samples.len()
    }

    /// Replace the oldest sample with `sample` and return the new median.
    ///
    /// For an even window this is the lower of the two middle values.
    pub fn update(&mut self, sample: u16) -> u16 {
        if let Some(slot) = self.samples.get_mut(self.oldest) {
            *slot = sample;
        }
        self.oldest = (self.oldest + 1) % self.samples.len();
        median_of(&self.samples, &mut self.sorted)
    }

    /// Median of the current contents.
    #[must_use]
    pub fn median(&self) -> u16 {
        median_of(&self.samples, &mut Vec::new())
    }
}

fn median_of(samples: &[u16], scratch: &mut Vec<u16, MAX_WINDOW>) -> u16 {
    scratch.clear();
    // Cannot fail: both vectors share the same capacity.
    let _ = scratch.extend_from_slice(samples);
    scratch.sort_unstable();
    scratch
        .get(scratch.len().saturating_sub(1) / 2)
        .copied()
        .unwrap_or_default()
}
