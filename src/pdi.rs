// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bit-banged PDI wire framing: one byte is exactly 12 clock edges (start,
//! 8 data bits LSB-first, even parity, two stop bits). This module owns the
//! transfer loop; it never prints and reports failures through [`PdiError`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::PdiError;
use crate::soc_io::Pins;

/// PDI clock idle ticks allowed before a receive is declared timed out.
const PDI_TIMEOUT: u32 = 200_000;

// PDI command byte encoding (§6 of the design). Shared with the NVM layer,
// which composes these into full command words.
pub const LDS: u8 = 0x00;
pub const STS: u8 = 0x40;
pub const LD: u8 = 0x20;
pub const ST: u8 = 0x60;
pub const LDCS: u8 = 0x80;
pub const STCS: u8 = 0xc0;
pub const KEY: u8 = 0xe0;
pub const REPEAT: u8 = 0xa0;

pub const PTR_X: u8 = 0 << 2; // *ptr
pub const PTR_XPP: u8 = 1 << 2; // *ptr++
pub const PTR: u8 = 2 << 2; // ptr
pub const PTR_PP: u8 = 3 << 2; // ptr++

pub const SZ_1: u8 = 0;
pub const SZ_2: u8 = 1;
pub const SZ_3: u8 = 2;
pub const SZ_4: u8 = 3;

pub const PDI_REG_STATUS: u8 = 0;
pub const PDI_REG_RESET: u8 = 1;
pub const PDI_REG_CONTROL: u8 = 2;
pub const PDI_NVMEN_BIT: u8 = 0x02;

const NVM_UNLOCK_KEY: [u8; 8] =
    [0xff, 0x88, 0xd8, 0xcd, 0x45, 0xab, 0x89, 0x12];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dir {
    Out,
    In,
}

/// Position within the 12-edge frame for the byte currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramePos {
    Start,
    Data(u8), // 0..=7
    Parity,
    Stop0,
    Stop1,
}

impl FramePos {
    fn next(self) -> Option<FramePos> {
        match self {
            FramePos::Start => Some(FramePos::Data(0)),
            FramePos::Data(7) => Some(FramePos::Parity),
            FramePos::Data(n) => Some(FramePos::Data(n + 1)),
            FramePos::Parity => Some(FramePos::Stop0),
            FramePos::Stop0 => Some(FramePos::Stop1),
            FramePos::Stop1 => None,
        }
    }
}

fn even_parity(byte: u8) -> bool {
    byte.count_ones() % 2 != 0
}

/// Owned handle to the two PDI GPIO lines. Construct with [`PdiLink::open`];
/// dropping the handle runs the close sequence.
pub struct PdiLink<P: Pins> {
    pins: P,
    clk: u8,
    data: u8,
    dir: Dir,
    stop: Arc<AtomicBool>,
    rt_provisioned: bool,
}

impl<P: Pins> PdiLink<P> {
    /// Brings up the two GPIO lines, requests the real-time scheduling
    /// provisions the bit-bang loop needs (fixed-priority scheduling, CPU 0
    /// affinity, locked memory), and runs the PDI open handshake.
    pub fn open(
        pins: P,
        clk: u8,
        data: u8,
        stop: Arc<AtomicBool>,
    ) -> Result<Self, PdiError> {
        let mut link = Self::new(pins, clk, data, stop);
        link.handshake()?;
        Ok(link)
    }

    fn new(mut pins: P, clk: u8, data: u8, stop: Arc<AtomicBool>) -> Self {
        request_realtime_scheduling();

        pins.clear(data);
        pins.clear(clk);
        pins.set_dir(clk, false);
        pins.set_dir(data, false);

        PdiLink {
            pins,
            clk,
            data,
            dir: Dir::In,
            stop,
            rt_provisioned: true,
        }
    }

    fn clock_falling(&mut self) {
        self.pins.clear(self.clk);
    }

    fn clock_rising(&mut self) {
        self.pins.set(self.clk);
    }

    fn blind_clock(&mut self, n: u32) {
        for _ in 0..n {
            self.clock_falling();
            self.clock_rising();
        }
    }

    /// Sends a double break: 24 clocks with the data line released.
    pub fn send_break(&mut self) {
        self.pins.set_dir(self.data, true);
        self.blind_clock(12);
        self.blind_clock(12);
        self.dir = Dir::In;
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn ensure_dir(&mut self, dir: Dir) {
        if dir == self.dir {
            return;
        }

        match dir {
            Dir::Out => {
                self.pins.set(self.data);
                self.pins.set_dir(self.data, false);
                self.blind_clock(2);
            }
            Dir::In => {
                self.pins.set_dir(self.data, true);
            }
        }

        self.dir = dir;
    }

    fn clock_out(&mut self, byte: u8, pos: FramePos, idle: bool) -> FramePos {
        self.clock_falling();

        if idle {
            self.pins.set(self.data);
        } else {
            let bit = match pos {
                FramePos::Start => false,
                FramePos::Data(n) => (byte >> n) & 1 != 0,
                FramePos::Parity => even_parity(byte),
                FramePos::Stop0 | FramePos::Stop1 => true,
            };

            if bit {
                self.pins.set(self.data);
            } else {
                self.pins.clear(self.data);
            }
        }

        self.clock_rising();
        pos
    }

    fn run_send(&mut self, buf: &[u8]) -> Result<(), PdiError> {
        self.ensure_dir(Dir::Out);

        for &byte in buf {
            if self.stop.load(Ordering::SeqCst) {
                return Err(PdiError::Cancelled);
            }

            let mut pos = FramePos::Start;
            loop {
                self.clock_out(byte, pos, false);
                match pos.next() {
                    Some(next) => pos = next,
                    None => break,
                }
            }
        }

        Ok(())
    }

    /// Sends `buf.len()` bytes over the wire. Fails only on cancellation.
    pub fn send(&mut self, buf: &[u8]) -> Result<(), PdiError> {
        self.run_send(buf)
    }

    /// Receives `buf.len()` bytes. Fails on cancellation, a parity/stop-bit
    /// violation, or receive timeout.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<(), PdiError> {
        self.ensure_dir(Dir::In);
        recv_bytes(
            &mut self.pins,
            self.clk,
            self.data,
            &self.stop,
            buf,
        )
    }

    /// Runs the PDI open handshake: break, reset-pulse delay, 16 blind
    /// clocks, then the STCS/KEY bytes that put the target into programming
    /// mode with the NVM controller unlocked. Safe to re-run on an already
    /// open link, which is how [`crate::nvm`]'s retry wrapper recovers from
    /// a failed transfer.
    pub fn handshake(&mut self) -> Result<(), PdiError> {
        self.send_break();

        self.pins.set(self.data);
        self.pins.set_dir(self.data, false);
        self.dir = Dir::Out;
        self.pins.sleep_us(1);
        self.blind_clock(16);

        let mut buf = Vec::with_capacity(13);
        buf.push(STCS | PDI_REG_CONTROL);
        buf.push(0x07);
        buf.push(STCS | PDI_REG_RESET);
        buf.push(0x59);
        buf.push(KEY);
        buf.extend_from_slice(&NVM_UNLOCK_KEY);

        self.send(&buf)
    }

    fn clear_reset(&mut self) -> Result<(), PdiError> {
        loop {
            let buf = [STCS | PDI_REG_RESET, 0, LDCS | PDI_REG_RESET];
            self.send(&buf)?;
            let mut status = [0u8; 1];
            self.recv(&mut status)?;
            if status[0] == 0 {
                return Ok(());
            }
        }
    }

    /// Runs the PDI close sequence: re-open, clear reset and poll for
    /// release, break, then release both pins to input.
    pub fn close(&mut self) {
        if self.handshake().is_ok() {
            let _ = self.clear_reset();
        }
        self.send_break();

        self.pins.set_dir(self.clk, true);
        self.pins.set_dir(self.data, true);

        if self.rt_provisioned {
            restore_default_scheduling();
            self.rt_provisioned = false;
        }
    }
}

impl<P: Pins> Drop for PdiLink<P> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Stateful byte receiver, factored out of [`PdiLink::recv`] so it can be
/// driven directly from tests against a scripted [`Pins`] implementation.
fn recv_bytes<P: Pins>(
    pins: &mut P,
    clk: u8,
    data: u8,
    stop: &AtomicBool,
    buf: &mut [u8],
) -> Result<(), PdiError> {
    let mut offs = 0;
    let mut pos = FramePos::Start;
    let mut byte = 0u8;
    let mut ticks: u32 = 0;

    while offs < buf.len() {
        if stop.load(Ordering::SeqCst) {
            return Err(PdiError::Cancelled);
        }
        if ticks >= PDI_TIMEOUT {
            return Err(PdiError::Timeout);
        }

        pins.clear(clk);
        pins.set(clk);
        let bit = pins.get(data);

        match pos {
            FramePos::Start => {
                if bit {
                    ticks += 1;
                } else {
                    pos = FramePos::Data(0);
                    byte = 0;
                }
            }
            FramePos::Data(n) => {
                if bit {
                    byte |= 1 << n;
                }
                pos = pos.next().unwrap();
            }
            FramePos::Parity => {
                if bit != even_parity(byte) {
                    return Err(PdiError::Framing);
                }
                pos = pos.next().unwrap();
            }
            FramePos::Stop0 => {
                if !bit {
                    return Err(PdiError::Framing);
                }
                pos = pos.next().unwrap();
            }
            FramePos::Stop1 => {
                if !bit {
                    return Err(PdiError::Framing);
                }
                buf[offs] = byte;
                offs += 1;
                ticks = 0;
                pos = FramePos::Start;
            }
        }
    }

    Ok(())
}

fn request_realtime_scheduling() {
    unsafe {
        let mut sp: libc::sched_param = std::mem::zeroed();
        sp.sched_priority = libc::sched_get_priority_max(libc::SCHED_FIFO);
        libc::sched_setscheduler(0, libc::SCHED_FIFO, &sp);

        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(0, &mut set);
        libc::sched_setaffinity(
            0,
            std::mem::size_of::<libc::cpu_set_t>(),
            &set,
        );

        libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE);
    }
}

fn restore_default_scheduling() {
    unsafe {
        let sp: libc::sched_param = std::mem::zeroed();
        libc::sched_setscheduler(0, libc::SCHED_OTHER, &sp);
        libc::munlockall();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records every bit driven on the data line at each clock's rising
    /// edge while the link is in the output direction, and replays a
    /// scripted bit sequence while the link is in the input direction.
    #[derive(Default)]
    struct LoopbackPins {
        dir_input: bool,
        data_level: bool,
        captured: Vec<bool>,
        script: std::collections::VecDeque<bool>,
        capturing: bool,
    }

    impl Pins for Rc<RefCell<LoopbackPins>> {
        fn set_dir(&mut self, pin: u8, input: bool) {
            if pin == 1 {
                self.borrow_mut().dir_input = input;
            }
        }

        fn set(&mut self, pin: u8) {
            if pin == 0 {
                // clock rising edge: sample/capture on the data line.
                let mut s = self.borrow_mut();
                if s.capturing && !s.dir_input {
                    let level = s.data_level;
                    s.captured.push(level);
                }
            } else if pin == 1 {
                self.borrow_mut().data_level = true;
            }
        }

        fn clear(&mut self, pin: u8) {
            if pin == 1 {
                self.borrow_mut().data_level = false;
            }
        }

        fn get(&mut self, pin: u8) -> bool {
            if pin != 1 {
                return false;
            }
            let mut s = self.borrow_mut();
            s.script.pop_front().unwrap_or(true)
        }

        fn sleep_us(&mut self, _us: u64) {}
    }

    fn new_link() -> (PdiLink<Rc<RefCell<LoopbackPins>>>, Rc<RefCell<LoopbackPins>>)
    {
        let shared = Rc::new(RefCell::new(LoopbackPins {
            capturing: true,
            ..Default::default()
        }));
        let link = PdiLink {
            pins: shared.clone(),
            clk: 0,
            data: 1,
            dir: Dir::In,
            stop: Arc::new(AtomicBool::new(false)),
            rt_provisioned: false,
        };
        (link, shared)
    }

    #[test]
    fn parity_of_0xa5_is_even_zero() {
        // 0xA5 = 1010_0101, four set bits -> even parity bit is 0.
        assert!(!even_parity(0xA5));
    }

    #[test]
    fn frame_is_twelve_edges_per_byte() {
        let (mut link, shared) = new_link();
        // Start already in the output direction so the one-time turnaround
        // clocks ensure_dir would otherwise emit don't pad the count; this
        // isolates the invariant under test to the byte frame itself.
        link.dir = Dir::Out;
        link.send(&[0xA5]).unwrap();

        let bits = shared.borrow().captured.clone();
        assert_eq!(bits.len(), 12);
        let expected = [
            false, // start
            true, false, true, false, false, true, false, true, // LSB first
            false, // parity
            true, true, // stop bits
        ];
        assert_eq!(bits, expected);
    }

    #[test]
    fn send_then_receive_round_trips_a_byte() {
        let (mut link, shared) = new_link();

        // Build the 12-bit frame for 0x3C by hand and feed it back in as a
        // scripted receive, exercising the decode side of the state
        // machine independent of the encode side above.
        let byte = 0x3Cu8;
        let mut bits = vec![false];
        for n in 0..8 {
            bits.push((byte >> n) & 1 != 0);
        }
        bits.push(even_parity(byte));
        bits.push(true);
        bits.push(true);

        shared.borrow_mut().script = bits.into();

        let mut out = [0u8; 1];
        link.recv(&mut out).unwrap();
        assert_eq!(out[0], byte);
    }

    #[test]
    fn bad_parity_is_rejected() {
        let (mut link, shared) = new_link();

        let byte = 0x01u8;
        let mut bits = vec![false];
        for n in 0..8 {
            bits.push((byte >> n) & 1 != 0);
        }
        bits.push(!even_parity(byte)); // corrupt the parity bit
        bits.push(true);
        bits.push(true);

        shared.borrow_mut().script = bits.into();

        let mut out = [0u8; 1];
        assert_eq!(link.recv(&mut out), Err(PdiError::Framing));
    }

    #[test]
    fn idle_line_times_out() {
        let (mut link, shared) = new_link();
        shared.borrow_mut().script = std::collections::VecDeque::new(); // all highs

        let mut out = [0u8; 1];
        assert_eq!(link.recv(&mut out), Err(PdiError::Timeout));
    }

    #[test]
    fn open_sequence_emits_expected_bytes() {
        let (mut link, shared) = new_link();
        link.handshake().unwrap();

        let bits = shared.borrow().captured.clone();
        // Drop the 16 blind clocks emitted before the real framing starts.
        let framed = &bits[16..];

        let mut decoded = Vec::new();
        for chunk in framed.chunks(12) {
            if chunk.len() < 12 {
                break;
            }
            let mut byte = 0u8;
            for n in 0..8 {
                if chunk[1 + n] {
                    byte |= 1 << n;
                }
            }
            decoded.push(byte);
        }

        assert_eq!(
            decoded,
            vec![
                STCS | PDI_REG_CONTROL,
                0x07,
                STCS | PDI_REG_RESET,
                0x59,
                KEY,
                0xff,
                0x88,
                0xd8,
                0xcd,
                0x45,
                0xab,
                0x89,
                0x12,
            ]
        );
    }
}
