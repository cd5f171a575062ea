// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command-line surface, built with `clap`'s derive API. The short-flag set
//! matches the original tool's `getopt` surface exactly; `-v`/`--verbose` is
//! the only addition, layered on for log verbosity.

use clap::Parser;

use crate::error::ProgError;

/// Bit-banged PDI programmer for Atmel/Microchip XMEGA parts.
#[derive(Debug, Parser)]
#[command(name = "xmega-pdi", version, about)]
pub struct Cli {
    /// Manually set base address
    #[arg(short = 'a', value_parser = parse_u32)]
    pub address: Option<u32>,

    /// Manually set memory size
    #[arg(short = 's', value_parser = parse_u32)]
    pub size: Option<u32>,

    /// Set memory region by name
    #[arg(short = 'm')]
    pub region: Option<String>,

    /// Manually select device by name
    #[arg(short = 'i')]
    pub device: Option<String>,

    /// GPIO pin to use as PDI clock
    #[arg(short = 'c', default_value_t = 0)]
    pub clk_pin: u8,

    /// GPIO pin to use as PDI data
    #[arg(short = 'd', default_value_t = 0)]
    pub data_pin: u8,

    /// Dump memory to stdout
    #[arg(short = 'D')]
    pub dump: bool,

    /// Erase the selected memory one page at a time
    #[arg(short = 'e')]
    pub erase: bool,

    /// Erase entire chip, except for the user signature row
    #[arg(short = 'E')]
    pub chip_erase: bool,

    /// Write Intel HEX file to memory
    #[arg(short = 'w', value_name = "FILE")]
    pub write_file: Option<String>,

    /// Read Intel HEX file from memory
    #[arg(short = 'r', value_name = "FILE")]
    pub read_file: Option<String>,

    /// Write a fuse or lock bit, given as NUM=VALUE
    #[arg(short = 'f', value_name = "FUSE=VALUE")]
    pub fuses: Vec<String>,

    /// Make no changes if chip and HEX file CRCs match
    #[arg(short = 'x')]
    pub crc_check: bool,

    /// Print less information
    #[arg(short = 'q')]
    pub quiet: bool,

    /// Raise diagnostic log verbosity; repeatable
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// One parsed `-f NUM=VALUE` fuse assignment.
#[derive(Debug, Clone, Copy)]
pub struct FuseAssignment {
    pub num: u8,
    pub value: u8,
}

fn parse_u32(s: &str) -> Result<u32, String> {
    let v = parse_signed(s).map_err(|_| format!("invalid number: {s}"))?;
    u32::try_from(v).map_err(|_| format!("value out of range: {s}"))
}

/// Parses a `strtol`-style integer: optional sign, `0x`/`0X` hex prefix.
fn parse_signed(s: &str) -> Result<i64, ()> {
    let s = s.trim();
    let (sign, rest) = match s.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, s.strip_prefix('+').unwrap_or(s)),
    };
    let (digits, radix) = match rest.strip_prefix("0x").or(rest.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (rest, 10),
    };
    i64::from_str_radix(digits, radix).map(|v| sign * v).map_err(|_| ())
}

/// Parses the `NUM=VALUE` fuse syntax, rejecting anything outside `0..=255`.
pub fn parse_fuse(s: &str) -> Result<FuseAssignment, ProgError> {
    let (num_str, value_str) = s.split_once('=').ok_or_else(|| {
        ProgError::Config(format!("invalid fuse format: {s}"))
    })?;

    let num = parse_signed(num_str)
        .map_err(|_| ProgError::Config(format!("invalid fuse format: {s}")))?;
    let value = parse_signed(value_str)
        .map_err(|_| ProgError::Config(format!("invalid fuse format: {s}")))?;

    if !(0..=255).contains(&num) || !(0..=255).contains(&value) {
        return Err(ProgError::Config(format!(
            "invalid fuse setting: {s}"
        )));
    }

    Ok(FuseAssignment {
        num: num as u8,
        value: value as u8,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_and_hex_addresses() {
        assert_eq!(parse_u32("16").unwrap(), 16);
        assert_eq!(parse_u32("0x10").unwrap(), 16);
    }

    #[test]
    fn parses_a_valid_fuse_assignment() {
        let f = parse_fuse("2=0xff").unwrap();
        assert_eq!(f.num, 2);
        assert_eq!(f.value, 255);
    }

    #[test]
    fn rejects_fuse_assignment_missing_equals() {
        assert!(parse_fuse("2").is_err());
    }

    #[test]
    fn rejects_out_of_range_fuse_values() {
        assert!(parse_fuse("2=256").is_err());
        assert!(parse_fuse("-1=5").is_err());
    }
}
