// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Top-level session orchestration: the sequence of steps one invocation of
//! the tool runs, from PDI bring-up to the final CRC check. This is the
//! only layer that prints to stdout or emits `log` diagnostics.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::Context;
use log::{debug, trace};

use crate::cli::{parse_fuse, Cli};
use crate::crc::crc24_block;
use crate::device::{self, Device};
use crate::dump;
use crate::error::ProgError;
use crate::ihex;
use crate::memmap::{self, Region};
use crate::nvm;
use crate::pdi::PdiLink;
use crate::soc_io::{Pins, SocIo};

const BUF_SIZE: usize = 512 * 1024;

/// Runs one invocation of the tool against live hardware.
pub fn run(cli: &Cli, stop: Arc<AtomicBool>) -> Result<(), ProgError> {
    if cli.clk_pin == cli.data_pin {
        return Err(ProgError::Config(
            "set clock and data pins to the correct GPIO lines using \
             '-c PIN' and '-d PIN'"
                .into(),
        ));
    }

    let socio = SocIo::open()?;

    run_with_pins(cli, stop, socio)
}

/// Runs the session against any [`Pins`] implementation; split out from
/// [`run`] so the orchestration logic can be exercised against a scripted
/// target in tests, independent of `/dev/mem`.
pub fn run_with_pins<P: Pins>(
    cli: &Cli,
    stop: Arc<AtomicBool>,
    pins: P,
) -> Result<(), ProgError> {
    let fuses = cli
        .fuses
        .iter()
        .map(|s| parse_fuse(s))
        .collect::<Result<Vec<_>, _>>()?;

    if BUF_SIZE < cli.size.unwrap_or(0) as usize {
        return Err(ProgError::Config("size too large".into()));
    }

    let mut link = PdiLink::open(pins, cli.clk_pin, cli.data_pin, stop)
        .map_err(|e| ProgError::protocol("open", 0, e))?;

    let dev_id = nvm::read_device_id(&mut link);

    let device: &Device = match &cli.device {
        Some(name) => device::find_by_name(name)
            .ok_or_else(|| ProgError::Config(format!("unrecognized device {name}")))?,
        None => {
            let id = dev_id.ok_or_else(|| {
                ProgError::Config(
                    "device not detected, please specify a device with -i"
                        .into(),
                )
            })?;
            device::find_by_signature(id).ok_or_else(|| {
                ProgError::Config(format!("unsupported device ID {id:#08x}"))
            })?
        }
    };

    if !cli.quiet {
        println!("{device}\n");
    }

    if let Some(id) = dev_id {
        if id != device.signature {
            println!(
                "WARNING detected device ID {id:#08x} does not match \
                 specified device {} with ID {:#08x}",
                device.name, device.signature
            );
        }
    }

    let region: &Region = memmap::find(cli.region.as_deref().unwrap_or("flash"))
        .ok_or_else(|| {
            ProgError::Config(format!(
                "unsupported memory name {}",
                cli.region.as_deref().unwrap_or("flash")
            ))
        })?;

    let address = cli.address.unwrap_or_else(|| region.resolve_address(device));
    let size = cli.size.unwrap_or_else(|| region.resolve_size(device)) as usize;

    let mut buf = vec![0xffu8; size.max(1)];
    buf.resize(size, 0xff);

    if cli.dump || cli.read_file.is_some() {
        trace!("reading {size} bytes from {address:#010x}");
        nvm::read(&mut link, address, &mut buf)
            .map_err(|e| ProgError::protocol("read", address, e))?;
    }

    if cli.dump {
        print!("{}", dump::format(address, &buf));
    }

    let mut chip_crc: Option<u32> = None;
    if cli.crc_check {
        chip_crc = Some(chip_or_software_crc(
            &mut link, region, address, &mut buf, cli.dump || cli.read_file.is_some(),
        )?);
        if !cli.quiet {
            println!("CRC {:#08x} for {}", chip_crc.unwrap(), region.name);
        }
    }

    if let Some(path) = &cli.read_file {
        let f = File::create(path)
            .with_context(|| format!("failed to open file {path}"))?;
        let mut w = BufWriter::new(f);
        ihex::write(&mut w, &buf)?;
        if !cli.quiet {
            println!("Wrote {size} bytes to {path} from {}", region.name);
        }
    }

    let page_size = region.resolve_page_size(device) as usize;
    if page_size == 0 {
        if cli.write_file.is_some() {
            return Err(ProgError::Config(format!(
                "cannot write to {}",
                region.name
            )));
        }
        if cli.erase {
            return Err(ProgError::Config(format!(
                "cannot erase {}",
                region.name
            )));
        }
    }

    let pages = if page_size != 0 {
        size.div_ceil(page_size)
    } else {
        0
    };

    let mut computed_crc = 0u32;
    let mut page_fill = vec![0usize; pages];

    if let Some(path) = &cli.write_file {
        buf.iter_mut().for_each(|b| *b = 0xff);

        let f = File::open(path)
            .with_context(|| format!("failed to open file {path}"))?;
        let mut r = BufReader::new(f);
        let max_addr = ihex::read(&mut r, &mut buf)?;
        if max_addr == 0 {
            return Err(ProgError::Config(format!(
                "failed to read HEX file {path}"
            )));
        }

        for (i, fill) in page_fill.iter_mut().enumerate() {
            let offset = i * page_size;
            let page = &buf[offset..(offset + page_size).min(buf.len())];
            let mut f = page.len();
            while f > 0 && page[f - 1] == 0xff {
                f -= 1;
            }
            *fill = f.min(size.saturating_sub(offset));
        }

        computed_crc = crc24_block(&buf[..size], 0);

        if let Some(chip) = chip_crc {
            if computed_crc == chip {
                if !cli.quiet {
                    println!("CRCs match, nothing to do");
                }
                return Ok(());
            }
            if !cli.quiet {
                println!("CRCs do not match, proceeding");
            }
        }
    }

    if cli.chip_erase {
        nvm::chip_erase(&mut link)
            .map_err(|e| ProgError::protocol("chip erase", 0, e))?;
        if !cli.quiet {
            println!("Chip erased");
        }
    }

    if cli.erase {
        for i in 0..pages {
            let addr = address + (i * page_size) as u32;
            debug!("erasing page at {addr:#010x}");
            nvm::erase_page(&mut link, region.family, addr)
                .map_err(|e| ProgError::protocol("erase page", addr, e))?;
        }
        if !cli.quiet {
            println!("Erased {pages} {} pages", region.name);
        }
    }

    for fuse in &fuses {
        if device.fuse_size + device.lock_size <= fuse.num as u32 {
            return Err(ProgError::Config(format!(
                "invalid fuse {} for device {}",
                fuse.num, device.name
            )));
        }
        nvm::write_fuse(&mut link, fuse.num, fuse.value)
            .map_err(|e| ProgError::protocol("write fuse", fuse.num as u32, e))?;
        if !cli.quiet {
            println!("Wrote {:#04x} to fuse {}", fuse.value, fuse.num);
        }
    }

    if cli.write_file.is_some() {
        let mut empty = 0;

        for i in 0..pages {
            let offset = i * page_size;
            let addr = address + offset as u32;
            let fill = page_fill[i];

            if fill == 0 {
                nvm::erase_page(&mut link, region.family, addr)
                    .map_err(|e| ProgError::protocol("erase page", addr, e))?;
                empty += 1;
            } else {
                nvm::write_page(
                    &mut link,
                    region.family,
                    addr,
                    &buf[offset..offset + fill],
                )
                .map_err(|e| ProgError::protocol("write page", addr, e))?;
            }
        }

        if !cli.quiet {
            println!("Wrote {} pages to {}", pages - empty, region.name);
        }

        if cli.crc_check {
            let chip = chip_or_software_crc(&mut link, region, address, &mut buf, false)?;
            if computed_crc != chip {
                return Err(ProgError::Verification {
                    region: region.name.to_string(),
                    computed: computed_crc,
                    chip,
                });
            } else if !cli.quiet {
                println!("CRC correct");
            }
        }
    }

    Ok(())
}

/// On-chip flash CRC when the region is the flash family; otherwise (or if
/// the on-chip command is unavailable) re-reads and computes the software
/// CRC. `already_read` skips the re-read when the caller's buffer is known
/// fresh.
fn chip_or_software_crc<P: Pins>(
    link: &mut PdiLink<P>,
    region: &Region,
    address: u32,
    buf: &mut [u8],
    already_read: bool,
) -> Result<u32, ProgError> {
    if region.family == nvm::NvmFamily::Flash {
        if let Ok(crc) = nvm::flash_crc(link) {
            return Ok(crc);
        }
    }

    if !already_read {
        nvm::read(link, address, buf)
            .map_err(|e| ProgError::protocol("read", address, e))?;
    }

    Ok(crc24_block(buf, 0))
}
