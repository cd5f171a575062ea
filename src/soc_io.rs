// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Memory-mapped access to the host SoC's GPIO and system-timer register
//! blocks. Every access here is a volatile 32-bit load or store against a
//! page mapped from `/dev/mem`; nothing in this module may be reordered or
//! cached.

use std::fs;
use std::os::unix::io::RawFd;

use crate::error::ProgError;

const GPIO_OFFSET: usize = 0x200000;
const TIMER_OFFSET: usize = 0x3000;

const GPFSEL0: usize = 0x00 / 4;
const GPSET0: usize = 0x1c / 4;
const GPCLR0: usize = 0x28 / 4;
const GPLEV0: usize = 0x34 / 4;

const ST_CLO: usize = 0x04 / 4;
const ST_CHI: usize = 0x08 / 4;

const GPIO_FSEL_INPUT: u32 = 0;
const GPIO_FSEL_OUTPUT: u32 = 1;
const GPIO_FSEL_MASK: u32 = 0x7;

const DEVICE_TREE_RANGES: &str = "/proc/device-tree/soc/ranges";

/// Abstracts the two GPIO lines the PDI link drives, so the bit-banging state
/// machine in [`crate::pdi`] can be exercised against a software loopback in
/// tests without touching `/dev/mem`.
pub trait Pins {
    fn set_dir(&mut self, pin: u8, input: bool);
    fn set(&mut self, pin: u8);
    fn clear(&mut self, pin: u8);
    fn get(&mut self, pin: u8) -> bool;
    fn sleep_us(&mut self, us: u64);
}

/// Reads the first 16 bytes of a device-tree `ranges` property and returns
/// the (physical base, length) of the SoC peripheral window.
///
/// Some SoC revisions place the mapping in the second range record instead
/// of the first; when the parent-address field of the first record is zero,
/// we re-parse starting four bytes later, matching the device's own ranges
/// parser.
fn discover_peripheral_window() -> Result<(u64, u64), ProgError> {
    let bytes = fs::read(DEVICE_TREE_RANGES).map_err(|e| {
        ProgError::HardwareDiscovery(format!(
            "unable to read device tree at {DEVICE_TREE_RANGES}: {e}"
        ))
    })?;

    if bytes.len() < 16 {
        return Err(ProgError::HardwareDiscovery(
            "device tree ranges record too short".into(),
        ));
    }

    let word = |off: usize| -> u64 {
        u32::from_be_bytes(bytes[off..off + 4].try_into().unwrap()) as u64
    };

    let mut base = word(4);
    let mut size = word(8);

    if base == 0 {
        base = word(8);
        size = word(12);
    }

    Ok((base, size))
}

/// Owns the `/dev/mem` mapping for the lifetime of a PDI session. Construct
/// once with [`SocIo::open`]; the mapping is released on drop.
pub struct SocIo {
    fd: RawFd,
    map: *mut u8,
    map_len: usize,
    gpio: *mut u32,
    timer: *mut u32,
}

impl SocIo {
    pub fn open() -> Result<Self, ProgError> {
        let (base, size) = discover_peripheral_window()?;

        let fd = unsafe {
            libc::open(
                b"/dev/mem\0".as_ptr() as *const libc::c_char,
                libc::O_RDWR | libc::O_SYNC,
            )
        };
        if fd < 0 {
            return Err(ProgError::HardwareDiscovery(format!(
                "unable to open /dev/mem: {}",
                std::io::Error::last_os_error()
            )));
        }

        let map = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size as usize,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                base as libc::off_t,
            )
        };
        if map == libc::MAP_FAILED {
            let err = std::io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(ProgError::HardwareDiscovery(format!(
                "failed to map peripheral memory: {err}"
            )));
        }

        let map = map as *mut u8;
        let gpio = unsafe { map.add(GPIO_OFFSET) as *mut u32 };
        let timer = unsafe { map.add(TIMER_OFFSET) as *mut u32 };

        Ok(SocIo {
            fd,
            map,
            map_len: size as usize,
            gpio,
            timer,
        })
    }

    #[inline]
    unsafe fn read_word(ptr: *mut u32, idx: usize) -> u32 {
        std::ptr::read_volatile(ptr.add(idx))
    }

    #[inline]
    unsafe fn write_word(ptr: *mut u32, idx: usize, value: u32) {
        std::ptr::write_volatile(ptr.add(idx), value);
    }
}

impl Pins for SocIo {
    fn set_dir(&mut self, pin: u8, input: bool) {
        let pin = pin as usize;
        let idx = GPFSEL0 + pin / 10;
        let shift = (pin % 10) * 3;
        let mask = GPIO_FSEL_MASK << shift;
        let mode = if input {
            GPIO_FSEL_INPUT
        } else {
            GPIO_FSEL_OUTPUT
        };

        unsafe {
            let cur = Self::read_word(self.gpio, idx);
            let next = (cur & !mask) | ((mode << shift) & mask);
            Self::write_word(self.gpio, idx, next);
        }
    }

    fn set(&mut self, pin: u8) {
        let pin = pin as usize;
        unsafe {
            Self::write_word(self.gpio, GPSET0 + pin / 32, 1 << (pin % 32));
        }
    }

    fn clear(&mut self, pin: u8) {
        let pin = pin as usize;
        unsafe {
            Self::write_word(self.gpio, GPCLR0 + pin / 32, 1 << (pin % 32));
        }
    }

    fn get(&mut self, pin: u8) -> bool {
        let pin = pin as usize;
        unsafe {
            Self::read_word(self.gpio, GPLEV0 + pin / 32) & (1 << (pin % 32))
                != 0
        }
    }

    fn sleep_us(&mut self, us: u64) {
        let start = self.read_system_timer();
        while self.read_system_timer() < start + us {}
    }
}

impl SocIo {
    fn read_system_timer(&mut self) -> u64 {
        unsafe {
            let hi = Self::read_word(self.timer, ST_CHI);
            let lo = Self::read_word(self.timer, ST_CLO);
            let hi2 = Self::read_word(self.timer, ST_CHI);

            if hi2 != hi {
                ((hi2 as u64) << 32) | Self::read_word(self.timer, ST_CLO) as u64
            } else {
                ((hi as u64) << 32) | lo as u64
            }
        }
    }
}

impl Drop for SocIo {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.map as *mut libc::c_void, self.map_len);
            libc::close(self.fd);
        }
    }
}
