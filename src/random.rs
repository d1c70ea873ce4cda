//! Pseudo-random numbers for the auto-mode drift.
//!
//! The drift only needs to look unpredictable to someone watching the lights,
//! so a 32-bit xorshift generator is plenty. It is injected wherever randomness
//! is used so tests can replay a fixed seed.

/// Source of uniformly distributed `u32`s.
pub trait RandomSource {
    /// Next raw value.
    fn next_u32(&mut self) -> u32;

    /// Uniform-ish value in `0..bound`; `0` when `bound` is `0`.
    fn below(&mut self, bound: u32) -> u32 {
        if bound == 0 {
            0
        } else {
            self.next_u32() % bound
        }
    }

    /// True one time in `n` on average.
    fn one_in(&mut self, n: u32) -> bool {
        self.below(n) == 0
    }
}

/// Marsaglia xorshift32.
#[derive(Clone, Debug)]
pub struct XorShift32 {
    state: u32,
}

impl XorShift32 {
    /// Generator seeded with `seed` (a zero seed is remapped, since zero is a fixed point).
    #[must_use]
    pub const fn new(seed: u32) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9 } else { seed },
        }
    }

    /// Generator seeded from the wall clock.
    #[must_use]
    pub fn from_time() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.subsec_nanos() ^ (elapsed.as_secs() as u32));
        Self::new(nanos)
    }
}

impl RandomSource for XorShift32 {
    fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }
}
