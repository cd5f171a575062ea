// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The static device catalog. Entries are compiled in from
//! `data/devices.tsv` by `build.rs`; there is no runtime parsing.

use std::fmt;

/// One catalog entry: the immutable geometry of a single XMEGA part.
#[derive(Debug, Clone, Copy)]
pub struct Device {
    pub name: &'static str,
    pub signature: u32,
    pub flash_page_size: u32,
    pub sram_size: u32,
    pub eeprom_size: u32,
    pub eeprom_page_size: u32,
    pub app_size: u32,
    pub boot_size: u32,
    pub fuse_size: u32,
    pub lock_size: u32,
    pub user_sig_size: u32,
    pub prod_sig_size: u32,
}

include!(concat!(env!("OUT_DIR"), "/devices_table.rs"));

/// Looks up a device by name, case-insensitively.
pub fn find_by_name(name: &str) -> Option<&'static Device> {
    DEVICES.iter().find(|d| d.name.eq_ignore_ascii_case(name))
}

/// Looks up a device by its exact 24-bit signature.
pub fn find_by_signature(sig: u32) -> Option<&'static Device> {
    DEVICES.iter().find(|d| d.signature == sig)
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Device:      {:>12}", self.name)?;
        writeln!(f, "Chip ID:         {:#08x}", self.signature)?;
        writeln!(f, "Page size:      {:9}", self.flash_page_size)?;
        writeln!(f, "Application:    {:8}K", self.app_size >> 10)?;
        writeln!(f, "Boot:           {:8}K", self.boot_size >> 10)?;
        writeln!(f, "SRAM:           {:8}K", self.sram_size >> 10)?;
        writeln!(f, "EEPROM:         {:8}K", self.eeprom_size >> 10)?;
        writeln!(f, "EEPROM page:    {:9}", self.eeprom_page_size)?;
        writeln!(f, "Fuses:          {:9}", self.fuse_size)?;
        writeln!(f, "Lock bytes:     {:9}", self.lock_size)?;
        writeln!(f, "User row:       {:9}", self.user_sig_size)?;
        write!(f, "Production row: {:9}", self.prod_sig_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_has_the_documented_part_count() {
        assert_eq!(DEVICES.len(), 14);
    }

    #[test]
    fn lookup_by_name_is_case_insensitive() {
        let a = find_by_name("xmega128a3u").unwrap();
        let b = find_by_name("XMega128A3U").unwrap();
        assert_eq!(a.signature, b.signature);
    }

    #[test]
    fn lookup_by_signature_is_exact() {
        let d = find_by_name("xmega256a3u").unwrap();
        let found = find_by_signature(d.signature).unwrap();
        assert_eq!(found.name, "xmega256a3u");
        assert!(find_by_signature(0xdead_00).is_none());
    }

    #[test]
    fn all_signatures_are_distinct() {
        let mut sigs: Vec<u32> = DEVICES.iter().map(|d| d.signature).collect();
        sigs.sort_unstable();
        sigs.dedup();
        assert_eq!(sigs.len(), DEVICES.len());
    }
}
