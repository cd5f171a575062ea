// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! NVM controller command protocol, layered on top of the raw PDI byte
//! transfers in [`crate::pdi`]. Every externally visible operation here is
//! wrapped in [`with_retry`], which re-runs the PDI open sequence between
//! attempts the way the controller expects after a dropped transfer.

use crate::error::PdiError;
use crate::pdi::{self, PdiLink, LD, LDCS, PTR, REPEAT, ST, STS, SZ_1, SZ_3,
    SZ_4};
use crate::soc_io::Pins;

const WAIT_ATTEMPTS: u32 = 20_000;
const MAX_RETRY: u32 = 10;

const NVM_REG_BASE: u32 = 0x010001c0;
const NVM_REG_CMD_OFFS: u32 = 0x0a;
const NVM_REG_CTRLA_OFFS: u32 = 0x0b;
const NVM_REG_STATUS_OFFS: u32 = 0x0f;
const NVM_REG_DATA_OFFS: u32 = 0x04;

const NVM_CTRLA_CMDEX_BM: u8 = 1 << 0;
const NVM_STATUS_BUSY_BM: u8 = 1 << 7;

const DEVICE_ID_ADDR: u32 = 0x01000090;
const FUSE_BASE_ADDR: u32 = 0x08f0020;

const NVM_CHIP_ERASE: u8 = 0x40;
const NVM_READ: u8 = 0x43;
const NVM_LOAD_PAGE_BUF: u8 = 0x23;
const NVM_ERASE_PAGE_BUF: u8 = 0x26;
const NVM_FLASH_CRC: u8 = 0x78;
const NVM_WRITE_FUSE: u8 = 0x4c;
const NVM_LOAD_EEPROM_PAGE_BUF: u8 = 0x33;
const NVM_ERASE_EEPROM_PAGE_BUF: u8 = 0x36;
const NVM_ERASE_WRITE_EEPROM_PAGE: u8 = 0x35;
const NVM_WRITE_USERSIG_ROW: u8 = 0x1a;

/// Logical memory family a region belongs to, matching the per-region
/// command table resolved in [`crate::memmap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NvmFamily {
    None,
    Flash,
    Application,
    Boot,
    SignatureRow,
    Fuse,
    Eeprom,
}

impl NvmFamily {
    fn erase_page_opcode(self) -> Option<u8> {
        match self {
            NvmFamily::Flash => Some(0x2b),
            NvmFamily::Application => Some(0x22),
            NvmFamily::Boot => Some(0x2a),
            NvmFamily::Eeprom => Some(0x32),
            NvmFamily::SignatureRow => Some(0x18),
            NvmFamily::Fuse | NvmFamily::None => None,
        }
    }

    fn write_page_opcode(self) -> Option<u8> {
        match self {
            NvmFamily::Flash => Some(0x2f),
            NvmFamily::Application => Some(0x25),
            NvmFamily::Boot => Some(0x2d),
            NvmFamily::SignatureRow => Some(NVM_WRITE_USERSIG_ROW),
            NvmFamily::Eeprom | NvmFamily::Fuse | NvmFamily::None => None,
        }
    }
}

/// Retries `op` up to [`MAX_RETRY`] times, re-running the PDI open sequence
/// between failed attempts. Cancellation aborts the loop immediately.
fn with_retry<P, F>(link: &mut PdiLink<P>, mut op: F) -> Result<(), PdiError>
where
    P: Pins,
    F: FnMut(&mut PdiLink<P>) -> Result<(), PdiError>,
{
    let mut last = PdiError::Framing;
    for _ in 0..MAX_RETRY {
        match op(link) {
            Ok(()) => return Ok(()),
            Err(PdiError::Cancelled) => return Err(PdiError::Cancelled),
            Err(e) => {
                last = e;
                let _ = link.handshake();
            }
        }
    }
    Err(last)
}

fn store_byte<P: Pins>(
    link: &mut PdiLink<P>,
    addr: u32,
    value: u8,
) -> Result<(), PdiError> {
    let a = addr.to_le_bytes();
    link.send(&[
        STS | SZ_4 << 2 | SZ_1,
        a[0],
        a[1],
        a[2],
        a[3],
        value,
    ])
}

fn load_u24<P: Pins>(
    link: &mut PdiLink<P>,
    addr: u32,
) -> Result<[u8; 3], PdiError> {
    let a = addr.to_le_bytes();
    link.send(&[pdi::LDS | SZ_4 << 2 | SZ_3, a[0], a[1], a[2], a[3]])?;
    let mut buf = [0u8; 3];
    link.recv(&mut buf)?;
    Ok(buf)
}

fn ldcs<P: Pins>(link: &mut PdiLink<P>, reg: u8) -> Result<u8, PdiError> {
    link.send(&[LDCS | reg])?;
    let mut buf = [0u8; 1];
    link.recv(&mut buf)?;
    Ok(buf[0])
}

fn store_address<P: Pins>(
    link: &mut PdiLink<P>,
    addr: u32,
) -> Result<(), PdiError> {
    let a = addr.to_le_bytes();
    link.send(&[ST | PTR | SZ_4, a[0], a[1], a[2], a[3]])
}

fn store_repeat<P: Pins>(
    link: &mut PdiLink<P>,
    count: u32,
) -> Result<(), PdiError> {
    let c = count.to_le_bytes();
    link.send(&[REPEAT | SZ_4, c[0], c[1], c[2], c[3]])
}

fn nvm_command<P: Pins>(link: &mut PdiLink<P>, cmd: u8) -> Result<(), PdiError> {
    store_byte(link, NVM_REG_BASE + NVM_REG_CMD_OFFS, cmd)
}

fn nvm_execute<P: Pins>(link: &mut PdiLink<P>) -> Result<(), PdiError> {
    store_byte(link, NVM_REG_BASE + NVM_REG_CTRLA_OFFS, NVM_CTRLA_CMDEX_BM)
}

fn wait_enabled<P: Pins>(link: &mut PdiLink<P>) -> Result<(), PdiError> {
    for _ in 0..WAIT_ATTEMPTS {
        let status = ldcs(link, pdi::PDI_REG_STATUS)?;
        if status & pdi::PDI_NVMEN_BIT != 0 {
            return Ok(());
        }
    }
    Err(PdiError::Timeout)
}

/// Polls NVM status for the BUSY bit to clear. Deliberately does not
/// re-arm the address pointer between polls (`xPTR`, not `xPTR++`) — every
/// poll reads the same status byte, matching the controller's own wait loop.
fn wait_busy<P: Pins>(link: &mut PdiLink<P>) -> Result<(), PdiError> {
    store_address(link, NVM_REG_BASE + NVM_REG_STATUS_OFFS)?;
    let cmd = [LD | pdi::PTR_X | SZ_1];

    for _ in 0..WAIT_ATTEMPTS {
        link.send(&cmd)?;
        let mut status = [0u8; 1];
        link.recv(&mut status)?;
        if status[0] & NVM_STATUS_BUSY_BM == 0 {
            return Ok(());
        }
    }
    Err(PdiError::Timeout)
}

fn exec<P: Pins>(link: &mut PdiLink<P>, cmd: u8) -> Result<(), PdiError> {
    wait_enabled(link)?;
    wait_busy(link)?;
    nvm_command(link, cmd)?;
    nvm_execute(link)?;
    wait_enabled(link)?;
    wait_busy(link)
}

fn read_once<P: Pins>(
    link: &mut PdiLink<P>,
    addr: u32,
    buf: &mut [u8],
) -> Result<(), PdiError> {
    wait_enabled(link)?;
    wait_busy(link)?;
    nvm_command(link, NVM_READ)?;
    store_address(link, addr)?;
    store_repeat(link, buf.len() as u32 - 1)?;
    link.send(&[LD | pdi::PTR_XPP | SZ_1])?;
    link.recv(buf)
}

/// Reads `buf.len()` bytes starting at `addr`, retrying on transfer failure.
pub fn read<P: Pins>(
    link: &mut PdiLink<P>,
    addr: u32,
    buf: &mut [u8],
) -> Result<(), PdiError> {
    with_retry(link, |link| {
        let mut tmp = vec![0u8; buf.len()];
        read_once(link, addr, &mut tmp)?;
        buf.copy_from_slice(&tmp);
        Ok(())
    })
}

/// Opens PDI and reads the 24-bit device signature. Returns `None` rather
/// than a sentinel value if the target does not respond.
pub fn read_device_id<P: Pins>(link: &mut PdiLink<P>) -> Option<u32> {
    if link.handshake().is_err() {
        return None;
    }

    let mut buf = [0u8; 3];
    if read(link, DEVICE_ID_ADDR, &mut buf).is_err() {
        return None;
    }

    Some((buf[0] as u32) << 16 | (buf[1] as u32) << 8 | buf[2] as u32)
}

fn write_page_generic<P: Pins>(
    link: &mut PdiLink<P>,
    erase_page_buf_cmd: u8,
    load_page_buf_cmd: u8,
    write_erase_cmd: u8,
    addr: u32,
    buf: &[u8],
) -> Result<(), PdiError> {
    exec(link, erase_page_buf_cmd)?;
    nvm_command(link, load_page_buf_cmd)?;
    store_address(link, addr)?;
    store_repeat(link, buf.len() as u32 - 1)?;
    link.send(&[ST | pdi::PTR_XPP | SZ_1])?;
    link.send(buf)?;
    nvm_command(link, write_erase_cmd)?;
    store_address(link, addr)?;
    link.send(&[ST | pdi::PTR_XPP | SZ_1, 0])?; // triggers erase+program
    wait_busy(link)
}

fn write_flash_page_once<P: Pins>(
    link: &mut PdiLink<P>,
    write_erase_cmd: u8,
    addr: u32,
    buf: &[u8],
) -> Result<(), PdiError> {
    write_page_generic(
        link,
        NVM_ERASE_PAGE_BUF,
        NVM_LOAD_PAGE_BUF,
        write_erase_cmd,
        addr,
        buf,
    )
}

fn write_eeprom_page_once<P: Pins>(
    link: &mut PdiLink<P>,
    addr: u32,
    buf: &[u8],
) -> Result<(), PdiError> {
    write_page_generic(
        link,
        NVM_ERASE_EEPROM_PAGE_BUF,
        NVM_LOAD_EEPROM_PAGE_BUF,
        NVM_ERASE_WRITE_EEPROM_PAGE,
        addr,
        buf,
    )
}

/// Programs one page of `family` memory at `addr`. EEPROM uses its own
/// page-buffer command pair rather than falling into the flash-style path;
/// the user signature row is erased explicitly before the flash-style
/// program runs. Fuse and unmapped regions are rejected by the caller via
/// [`crate::memmap`] before this is ever reached.
pub fn write_page<P: Pins>(
    link: &mut PdiLink<P>,
    family: NvmFamily,
    addr: u32,
    buf: &[u8],
) -> Result<(), PdiError> {
    if family == NvmFamily::Eeprom {
        return with_retry(link, |link| write_eeprom_page_once(link, addr, buf));
    }

    if family == NvmFamily::SignatureRow {
        erase_page(link, family, addr)?;
    }

    let cmd = family.write_page_opcode().expect("unmapped write family");
    with_retry(link, |link| write_flash_page_once(link, cmd, addr, buf))
}

fn erase_page_once<P: Pins>(
    link: &mut PdiLink<P>,
    cmd: u8,
    addr: u32,
) -> Result<(), PdiError> {
    wait_enabled(link)?;
    wait_busy(link)?;
    nvm_command(link, cmd)?;
    store_address(link, addr)?;
    link.send(&[ST | pdi::PTR_XPP | SZ_1, 0])?;
    wait_busy(link)
}

/// Erases one page of `family` memory at `addr`.
pub fn erase_page<P: Pins>(
    link: &mut PdiLink<P>,
    family: NvmFamily,
    addr: u32,
) -> Result<(), PdiError> {
    let cmd = family.erase_page_opcode().expect("unmapped erase family");
    with_retry(link, |link| erase_page_once(link, cmd, addr))
}

/// Erases the entire chip (flash, EEPROM, fuses preserved per the NVM
/// controller's own chip-erase semantics).
pub fn chip_erase<P: Pins>(link: &mut PdiLink<P>) -> Result<(), PdiError> {
    with_retry(link, |link| exec(link, NVM_CHIP_ERASE))
}

fn write_fuse_once<P: Pins>(
    link: &mut PdiLink<P>,
    num: u8,
    value: u8,
) -> Result<(), PdiError> {
    wait_enabled(link)?;
    wait_busy(link)?;
    nvm_command(link, NVM_WRITE_FUSE)?;
    store_byte(link, FUSE_BASE_ADDR + num as u32, value)?;
    wait_busy(link)
}

/// Writes fuse byte `num`.
pub fn write_fuse<P: Pins>(
    link: &mut PdiLink<P>,
    num: u8,
    value: u8,
) -> Result<(), PdiError> {
    with_retry(link, |link| write_fuse_once(link, num, value))
}

fn flash_crc_once<P: Pins>(link: &mut PdiLink<P>) -> Result<[u8; 3], PdiError> {
    wait_enabled(link)?;
    wait_busy(link)?;
    nvm_command(link, NVM_FLASH_CRC)?;
    nvm_execute(link)?;
    wait_enabled(link)?;
    wait_busy(link)?;
    load_u24(link, NVM_REG_BASE + NVM_REG_DATA_OFFS)
}

/// Runs the whole-flash CRC command and returns the 24-bit result. Only the
/// whole-flash opcode is used; the section-range variants are documented by
/// the vendor to return inconsistent values on some family members.
pub fn flash_crc<P: Pins>(link: &mut PdiLink<P>) -> Result<u32, PdiError> {
    let mut result = [0u8; 3];
    with_retry(link, |link| {
        result = flash_crc_once(link)?;
        Ok(())
    })?;
    Ok((result[2] as u32) << 16 | (result[1] as u32) << 8 | result[0] as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn erase_and_write_opcodes_match_region_table() {
        assert_eq!(NvmFamily::Flash.erase_page_opcode(), Some(0x2b));
        assert_eq!(NvmFamily::Flash.write_page_opcode(), Some(0x2f));
        assert_eq!(NvmFamily::Application.erase_page_opcode(), Some(0x22));
        assert_eq!(NvmFamily::Application.write_page_opcode(), Some(0x25));
        assert_eq!(NvmFamily::Boot.erase_page_opcode(), Some(0x2a));
        assert_eq!(NvmFamily::Boot.write_page_opcode(), Some(0x2d));
        assert_eq!(NvmFamily::Eeprom.erase_page_opcode(), Some(0x32));
        assert_eq!(NvmFamily::SignatureRow.erase_page_opcode(), Some(0x18));
        assert_eq!(
            NvmFamily::SignatureRow.write_page_opcode(),
            Some(0x1a)
        );
        assert_eq!(NvmFamily::Fuse.erase_page_opcode(), None);
        assert_eq!(NvmFamily::None.write_page_opcode(), None);
    }
}
