//! Memory-mapped access to the AM335x peripheral registers.
//!
//! The fixture talks to the ADC by poking registers directly through `/dev/mem`.
//! [`MappedRegion`] owns that mapping; everything above it goes through the
//! [`RegisterBus`] trait so the ADC driver can also run against a simulated
//! register file on the host.
//!
//! Accesses are single bytes, with one exception: the ADC FIFO data register
//! advances on every read, so it must be read as a single aligned 32-bit word
//! through [`RegisterBus::read_fifo_word`]. Splitting it into byte reads would
//! pop several FIFO entries.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::ptr::{self, NonNull};

use log::{debug, info};

use crate::{Error, Result};

// ============================================================================
// Register map
// ============================================================================

/// Physical address where the mapped window starts.
pub const MAP_BASE: usize = 0x44C0_0000;

/// Size of the mapped window in bytes.
pub const MAP_SIZE: usize = 0x481A_EFFF - MAP_BASE;

const MAP_BASE_OFFSET: libc::off_t = 0x44C0_0000;

const DEV_MEM: &str = "/dev/mem";

const fn window_offset(physical: usize) -> usize {
    physical - MAP_BASE
}

const CM_WKUP: usize = 0x44E0_0400;
const ADC_TSC: usize = 0x44E0_D000;

/// Clock module control for the ADC/touchscreen subsystem.
pub const CM_WKUP_ADC_TSC_CLKCTRL: usize = window_offset(CM_WKUP + 0xBC);
/// `MODULEMODE` = enabled.
pub const CM_WKUP_MODULEMODE_ENABLE: u8 = 0x02;

/// ADC control register.
pub const ADC_CTRL: usize = window_offset(ADC_TSC + 0x40);
/// CTRL: module enable.
pub const CTRL_ENABLE: u8 = 0x01;
/// CTRL: everything off.
pub const CTRL_DISABLE: u8 = 0x00;
/// CTRL: store the step id alongside each FIFO sample.
pub const CTRL_STEP_ID_TAG: u8 = 0x01 << 1;
/// CTRL: step configuration registers are writable.
pub const CTRL_STEPCONFIG_WRITE_PROTECT_OFF: u8 = 0x01 << 2;

/// 16-bit clock divider, programmed as `divider - 1`.
pub const ADC_CLKDIV: usize = window_offset(ADC_TSC + 0x4C);
/// Step enable bits; bit `n` enables step `n` (bit 0 is the touchscreen charge step).
pub const ADC_STEPENABLE: usize = window_offset(ADC_TSC + 0x54);

const ADC_STEPCONFIG1: usize = window_offset(ADC_TSC + 0x64);
const ADC_STEPDELAY1: usize = window_offset(ADC_TSC + 0x68);
const ADC_STEP_STRIDE: usize = 8;

/// Number of samples waiting in FIFO0 (low 7 bits).
pub const ADC_FIFO0COUNT: usize = window_offset(ADC_TSC + 0xE4);
/// Mask for [`ADC_FIFO0COUNT`].
pub const ADC_FIFO_COUNT_MASK: u8 = 0x7F;
/// FIFO0 data; reading it pops one entry.
pub const ADC_FIFO0DATA: usize = window_offset(ADC_TSC + 0x100);
/// Step id field of a FIFO word.
pub const ADC_FIFO_STEP_MASK: u32 = 0xF_0000;
/// Sample field of a FIFO word.
pub const ADC_FIFO_DATA_MASK: u32 = 0xFFF;

/// `STEPCONFIGn` for step `n` (1-based).
#[must_use]
pub const fn adc_stepconfig(step: u8) -> usize {
    ADC_STEPCONFIG1 + (step as usize - 1) * ADC_STEP_STRIDE
}

/// `STEPDELAYn` for step `n` (1-based).
#[must_use]
pub const fn adc_stepdelay(step: u8) -> usize {
    ADC_STEPDELAY1 + (step as usize - 1) * ADC_STEP_STRIDE
}

// ============================================================================
// RegisterBus
// ============================================================================

/// Byte-level register access plus the one atomic FIFO read.
///
/// Offsets are relative to [`MAP_BASE`]. Implementations are used from a single
/// thread only.
pub trait RegisterBus {
    /// Read one byte.
    ///
    /// # Errors
    ///
    /// [`Error::RegisterOutOfRange`] if `offset` is outside the window.
    fn read_byte(&self, offset: usize) -> Result<u8>;

    /// Write one byte.
    ///
    /// # Errors
    ///
    /// [`Error::RegisterOutOfRange`] if `offset` is outside the window.
    fn write_byte(&mut self, offset: usize, value: u8) -> Result<()>;

    /// Read the FIFO0 data register as one 32-bit access, popping one entry.
    ///
    /// # Errors
    ///
    /// [`Error::RegisterOutOfRange`] if the FIFO register is not mapped.
    fn read_fifo_word(&mut self) -> Result<u32>;

    /// Read-modify-write: set `mask` bits.
    ///
    /// # Errors
    ///
    /// As [`read_byte`](Self::read_byte) and [`write_byte`](Self::write_byte).
    fn set_bits(&mut self, offset: usize, mask: u8) -> Result<()> {
        let value = self.read_byte(offset)?;
        self.write_byte(offset, value | mask)
    }

    /// Read-modify-write: clear `mask` bits.
    ///
    /// # Errors
    ///
    /// As [`read_byte`](Self::read_byte) and [`write_byte`](Self::write_byte).
    fn clear_bits(&mut self, offset: usize, mask: u8) -> Result<()> {
        let value = self.read_byte(offset)?;
        self.write_byte(offset, value & !mask)
    }
}

// ============================================================================
// MappedRegion
// ============================================================================

/// The peripheral window of `/dev/mem`, mapped once for the life of the process.
///
/// Requires root (or `CAP_SYS_RAWIO`) on a BeagleBone Black. The mapping is
/// released by [`close`](Self::close) or on drop; since `close` consumes the
/// region it cannot run twice.
///
/// # Example
///
/// ```rust,no_run
/// use led_fixture::registers::{MappedRegion, RegisterBus, ADC_FIFO0COUNT};
///
/// # fn main() -> led_fixture::Result<()> {
/// let region = MappedRegion::open()?;
/// let pending = region.read_byte(ADC_FIFO0COUNT)?;
/// println!("{pending} samples waiting");
/// region.close();
/// # Ok(())
/// # }
/// ```
pub struct MappedRegion {
    base: NonNull<u8>,
    len: usize,
    _file: File,
}

impl MappedRegion {
    /// Map the peripheral window.
    ///
    /// # Errors
    ///
    /// [`Error::RegisterMap`] if `/dev/mem` cannot be opened or mapped. This is
    /// not retried.
    #[expect(unsafe_code, reason = "mmap of /dev/mem has no safe wrapper")]
    pub fn open() -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_SYNC)
            .open(DEV_MEM)
            .map_err(|source| Error::RegisterMap { source })?;

        // SAFETY: a fresh shared mapping of a device file; we never hand out
        // references into it, only volatile accesses through raw pointers.
        let mapped = unsafe {
            libc::mmap(
                ptr::null_mut(),
                MAP_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                MAP_BASE_OFFSET,
            )
        };
        if mapped == libc::MAP_FAILED {
            return Err(Error::RegisterMap {
                source: io::Error::last_os_error(),
            });
        }
        let base = NonNull::new(mapped.cast::<u8>()).ok_or_else(|| Error::RegisterMap {
            source: io::Error::other("mmap returned null"),
        })?;

        info!("mapped {MAP_SIZE:#x} bytes of {DEV_MEM} at {MAP_BASE:#x}");
        Ok(Self {
            base,
            len: MAP_SIZE,
            _file: file,
        })
    }

    /// Release the mapping.
    pub fn close(self) {
        drop(self);
    }

    fn checked(&self, offset: usize, width: usize) -> Result<*mut u8> {
        match offset.checked_add(width) {
            Some(end) if end <= self.len => Ok(self.base.as_ptr().wrapping_add(offset)),
            _ => Err(Error::RegisterOutOfRange { offset }),
        }
    }
}

impl RegisterBus for MappedRegion {
    #[expect(unsafe_code, reason = "volatile access to a hardware register")]
    fn read_byte(&self, offset: usize) -> Result<u8> {
        let register = self.checked(offset, 1)?;
        // SAFETY: bounds checked against the live mapping.
        Ok(unsafe { register.read_volatile() })
    }

    #[expect(unsafe_code, reason = "volatile access to a hardware register")]
    fn write_byte(&mut self, offset: usize, value: u8) -> Result<()> {
        let register = self.checked(offset, 1)?;
        // SAFETY: bounds checked against the live mapping.
        unsafe { register.write_volatile(value) };
        Ok(())
    }

    #[expect(unsafe_code, reason = "volatile access to a hardware register")]
    fn read_fifo_word(&mut self) -> Result<u32> {
        let register = self.checked(ADC_FIFO0DATA, 4)?.cast::<u32>();
        // SAFETY: in bounds, and 4-byte aligned because the map base is page
        // aligned and the register offset is a multiple of 4.
        Ok(unsafe { register.read_volatile() })
    }
}

impl Drop for MappedRegion {
    #[expect(unsafe_code, reason = "munmap of the region mapped in open()")]
    fn drop(&mut self) {
        // SAFETY: base/len are exactly what mmap returned and nothing borrows
        // from the mapping past this point.
        let status = unsafe { libc::munmap(self.base.as_ptr().cast(), self.len) };
        if status != 0 {
            debug!("munmap failed: {}", io::Error::last_os_error());
        } else {
            debug!("unmapped {DEV_MEM}");
        }
    }
}
