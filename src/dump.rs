// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Hex-dump formatting for the `-D` flag: 16 bytes per line, address
//! prefix, ASCII gutter, with runs of `0xff` collapsed to a skip count.

use std::fmt::Write;

/// Renders `data` (read from `address`) the way the driver prints it to
/// stdout: 16-byte lines with a hex and ASCII column, all-`0xff` 16-byte
/// runs collapsed into a single "skipped NNNN bytes" line.
pub fn format(address: u32, data: &[u8]) -> String {
    let mut out = String::new();
    let mut skipped = 0u32;

    let mut i = 0usize;
    while i < data.len() {
        let end = (i + 16).min(data.len());
        let chunk = &data[i..end];

        if chunk.iter().all(|&b| b == 0xff) && chunk.len() == 16 {
            skipped += 16;
            i = end;
            continue;
        }

        flush_skipped(&mut out, &mut skipped);

        let _ = write!(out, "{:08x}  ", address as usize + i);
        for (j, &b) in chunk.iter().enumerate() {
            if j == 8 {
                out.push(' ');
            }
            let _ = write!(out, " {b:02x}");
        }

        out.push_str("  |");
        for &b in chunk {
            let c = b as char;
            if c.is_ascii_graphic() || c == ' ' {
                out.push(c);
            } else {
                out.push('.');
            }
        }
        out.push_str("|\n");

        i = end;
    }

    flush_skipped(&mut out, &mut skipped);
    out
}

fn flush_skipped(out: &mut String, skipped: &mut u32) {
    if *skipped != 0 {
        let _ = writeln!(out, "* skipped {:08x} bytes of 'ff'", *skipped);
        *skipped = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_line_shows_address_and_ascii_gutter() {
        let data = b"Hi!".to_vec();
        let rendered = format(0x100, &data);
        assert!(rendered.starts_with("00000100  "));
        assert!(rendered.contains("|Hi!|"));
    }

    #[test]
    fn full_ff_page_is_collapsed_to_a_skip_line() {
        let data = vec![0xffu8; 32];
        let rendered = format(0, &data);
        assert_eq!(rendered, "* skipped 00000020 bytes of 'ff'\n");
    }

    #[test]
    fn non_printable_bytes_render_as_dots() {
        let data = [0x00u8, 0x01, 0xfe];
        let rendered = format(0, &data);
        assert!(rendered.contains("|..."));
    }
}
