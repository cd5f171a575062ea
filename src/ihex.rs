// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Intel HEX reader/writer. The writer skips runs of `0xff` and re-anchors
//! with an extended-segment-address record; the reader accepts the record
//! types the programmer actually emits and reads back.

use std::io::{BufRead, Write};

use crate::error::IhexError;

const LINE_LENGTH: usize = 16;
const MIN_STRING: usize = 11;

const OFFS_LEN: usize = 1;
const OFFS_ADDR: usize = 3;
const OFFS_TYPE: usize = 7;
const OFFS_DATA: usize = 9;

const DATA_RECORD: u8 = 0;
const END_OF_FILE_RECORD: u8 = 1;
const EXTENDED_SEGMENT_ADDRESS_RECORD: u8 = 2;
const START_SEGMENT_ADDRESS_RECORD: u8 = 3;
const START_LINEAR_ADDRESS_RECORD: u8 = 5;

/// Writes `data[..len]` as Intel HEX records to `out`. All-`0xff` 16-byte
/// runs are skipped rather than emitted, and an extended-segment-address
/// record is re-emitted the next time real data follows a skip or a 64 KiB
/// segment boundary is crossed.
pub fn write<W: Write>(out: &mut W, data: &[u8]) -> Result<(), IhexError> {
    let mut write_addr = false;
    let len = data.len() as u32;

    let mut i = 0u32;
    while i < len {
        let bytes = LINE_LENGTH.min((len - i) as usize);
        let chunk = &data[i as usize..i as usize + bytes];

        if i != 0 && i & 0xffff == 0 {
            write_addr = true;
        }

        if chunk.iter().all(|&b| b == 0xff) {
            write_addr = true;
            i += bytes as u32;
            continue;
        }

        if write_addr {
            let addr = (i >> 4) as u16;
            let crc = 0x100u32
                .wrapping_sub(4 + (addr >> 8) as u32 + (addr & 0xff) as u32);
            writeln!(out, ":02000002{addr:04x}{:02x}", crc as u8)
                .map_err(|_| IhexError::Io)?;
            write_addr = false;
        }

        let mut crc = bytes as u32 + ((i >> 8) & 0xff) + (i & 0xff);
        let line_addr = (i & 0xffff) as u16;
        write!(out, ":{bytes:02x}{line_addr:04x}00")
            .map_err(|_| IhexError::Io)?;
        for &b in chunk {
            crc += b as u32;
            write!(out, "{b:02x}").map_err(|_| IhexError::Io)?;
        }
        let crc = 0x100u32.wrapping_sub(crc);
        writeln!(out, "{:02x}", crc as u8).map_err(|_| IhexError::Io)?;

        i += bytes as u32;
    }

    writeln!(out, ":00000001FF").map_err(|_| IhexError::Io)
}

fn get_byte(s: &[u8]) -> u8 {
    u8::from_str_radix(std::str::from_utf8(&s[..2]).unwrap_or("00"), 16)
        .unwrap_or(0)
}

fn get_word(s: &[u8]) -> u16 {
    (get_byte(s) as u16) << 8 | get_byte(&s[2..]) as u16
}

/// Reads Intel HEX records from `input` into `data`, returning the address
/// one past the last non-`0xff` byte actually written.
///
/// Reaching physical end-of-file without having read an end-of-file record
/// means the stream was truncated mid-transfer; that is reported as
/// [`IhexError::Io`] rather than treated as a short but complete file.
///
/// The record's own checksum field is parsed out of the line length check
/// but its value is never verified against the data that precedes it; a
/// corrupted checksum byte in an otherwise well-formed record is silently
/// accepted. This matches the original tool's reader and is preserved
/// rather than tightened, so callers should not rely on this function to
/// catch bit-rot in a HEX file — pair it with the on-chip CRC check.
pub fn read<R: BufRead>(
    input: &mut R,
    data: &mut [u8],
) -> Result<u32, IhexError> {
    let mut segment: u32 = 0;
    let mut max_addr: u32 = 0;
    let mut line = String::new();

    loop {
        line.clear();
        let n = input.read_line(&mut line).map_err(|_| IhexError::Io)?;
        if n == 0 {
            // Physical EOF without ever seeing an end-of-file record means
            // the file was truncated; a partial image must not be accepted.
            return Err(IhexError::Io);
        }

        let trimmed = line.trim_end();
        if trimmed.len() < MIN_STRING {
            return Err(IhexError::Format);
        }
        let bytes = trimmed.as_bytes();

        let rec_len = get_byte(&bytes[OFFS_LEN..]) as usize;
        let addr = get_word(&bytes[OFFS_ADDR..]) as u32;

        if data.len() as u32 <= addr + segment {
            return Err(IhexError::Size);
        }

        let rec_type = get_byte(&bytes[OFFS_TYPE..]);
        if rec_len * 2 + MIN_STRING != trimmed.len() {
            return Err(IhexError::Format);
        }

        match rec_type {
            DATA_RECORD => {
                for i in 0..rec_len {
                    let byte = get_byte(&bytes[OFFS_DATA + i * 2..]);
                    let pos = (addr + segment) as usize + i;
                    if data.len() <= pos {
                        return Err(IhexError::Size);
                    }
                    if byte != 0xff {
                        max_addr = addr + segment + i as u32 + 1;
                    }
                    data[pos] = byte;
                }
            }
            END_OF_FILE_RECORD => return Ok(max_addr),
            EXTENDED_SEGMENT_ADDRESS_RECORD => {
                segment = (get_word(&bytes[OFFS_DATA..]) as u32) << 4;
            }
            START_SEGMENT_ADDRESS_RECORD | START_LINEAR_ADDRESS_RECORD => {}
            _ => return Err(IhexError::Format),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_a_short_buffer() {
        let mut data = vec![0xffu8; 64];
        data[4] = 0xde;
        data[5] = 0xad;
        data[6] = 0xbe;
        data[7] = 0xef;

        let mut out = Vec::new();
        write(&mut out, &data).unwrap();

        let mut reread = vec![0xffu8; 64];
        let max_addr =
            read(&mut Cursor::new(out), &mut reread).unwrap();

        assert_eq!(reread, data);
        assert_eq!(max_addr, 8);
    }

    #[test]
    fn all_ff_page_emits_only_the_terminator() {
        let data = vec![0xffu8; 32];
        let mut out = Vec::new();
        write(&mut out, &data).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, ":00000001FF\n");
    }

    #[test]
    fn segment_rollover_reanchors_with_extended_segment_record() {
        let mut data = vec![0xffu8; 0x10010];
        data[0] = 0x01;
        data[0x10000] = 0x02;

        let mut out = Vec::new();
        write(&mut out, &data).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains(":02000002"));
    }

    #[test]
    fn short_line_is_a_format_error() {
        let mut reread = vec![0u8; 16];
        let mut input = Cursor::new(b":0000\n".to_vec());
        assert_eq!(read(&mut input, &mut reread), Err(IhexError::Format));
    }

    #[test]
    fn missing_end_of_file_record_is_an_io_error() {
        let mut reread = vec![0xffu8; 16];
        // a single well-formed data record, no terminator record follows
        let mut input = Cursor::new(b":04000000deadbeef00\n".to_vec());
        assert_eq!(read(&mut input, &mut reread), Err(IhexError::Io));
    }

    #[test]
    fn address_past_buffer_is_a_size_error() {
        let mut reread = vec![0u8; 4];
        let mut input = Cursor::new(b":01001000ff0e\n".to_vec());
        assert_eq!(read(&mut input, &mut reread), Err(IhexError::Size));
    }

    #[test]
    fn unknown_record_type_is_a_format_error() {
        let mut reread = vec![0u8; 16];
        // type byte 0x04 (extended linear address) is not one we accept
        let mut input = Cursor::new(b":00000004fc\n".to_vec());
        assert_eq!(read(&mut input, &mut reread), Err(IhexError::Format));
    }
}
