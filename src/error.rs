// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Failure classification produced by the PDI link and the NVM protocol
/// layer. Neither layer prints anything; the driver is responsible for
/// turning one of these into a message on stdout.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PdiError {
    #[error("transfer cancelled")]
    Cancelled,
    #[error("parity or stop bit mismatch")]
    Framing,
    #[error("no response from target (receive timeout)")]
    Timeout,
}

/// Failure classification produced by the Intel HEX codec.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IhexError {
    #[error("I/O error reading HEX file")]
    Io,
    #[error("address in record exceeds buffer size")]
    Size,
    #[error("malformed HEX record")]
    Format,
    /// Reserved for a verified record checksum. The reader deliberately does
    /// not compute or check this field today; see `ihex::read`.
    #[error("HEX record checksum mismatch")]
    Crc,
}

/// Top-level error surfaced to `main`, which prints `ERROR: {err}` and exits
/// with status 1. Usage errors are handled separately by `clap` itself.
#[derive(Debug, Error)]
pub enum ProgError {
    #[error("{0}")]
    Config(String),

    #[error("failed to discover SoC peripheral mapping: {0}")]
    HardwareDiscovery(String),

    #[error("{op} at address {addr:#010x} failed: {source}")]
    Protocol {
        op: &'static str,
        addr: u32,
        #[source]
        source: PdiError,
    },

    #[error(
        "computed image CRC {computed:#08x} does not match chip CRC \
         {chip:#08x} for {region}"
    )]
    Verification {
        region: String,
        computed: u32,
        chip: u32,
    },

    #[error("HEX file error: {0}")]
    Hex(#[from] IhexError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProgError {
    pub fn protocol(op: &'static str, addr: u32, source: PdiError) -> Self {
        ProgError::Protocol { op, addr, source }
    }
}
