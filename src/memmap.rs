// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Named memory regions and how they resolve to a concrete address, size,
//! and page size against a selected [`Device`].

use crate::device::Device;
use crate::nvm::NvmFamily;

pub const FLASH_BASE_ADDR: u32 = 0x0800000;
pub const EEPROM_BASE_ADDR: u32 = 0x08c0000;
pub const PROD_SIG_BASE_ADDR: u32 = 0x08e0200;
pub const USER_SIG_BASE_ADDR: u32 = 0x08e0400;
pub const FUSE_BASE_ADDR: u32 = 0x08f0020;
pub const LOCK_BASE_ADDR: u32 = 0x08f0027;
pub const IO_BASE_ADDR: u32 = 0x1000000;
const IO_SIZE: u32 = 0x1000;

/// A named memory region. Base address, size, and page size are resolved
/// against a device record; `boot`'s base depends on the device's
/// application-section size, so it cannot be a plain constant.
#[derive(Debug, Clone, Copy)]
pub struct Region {
    pub name: &'static str,
    pub family: NvmFamily,
    default_address: u32,
    pub description: &'static str,
}

pub static REGIONS: &[Region] = &[
    Region {
        name: "flash",
        family: NvmFamily::Flash,
        default_address: FLASH_BASE_ADDR,
        description: "App & boot sections",
    },
    Region {
        name: "app",
        family: NvmFamily::Application,
        default_address: FLASH_BASE_ADDR,
        description: "App section of FLASH",
    },
    Region {
        name: "boot",
        family: NvmFamily::Boot,
        default_address: 0,
        description: "Boot section of FLASH",
    },
    Region {
        name: "eeprom",
        family: NvmFamily::Eeprom,
        default_address: EEPROM_BASE_ADDR,
        description: "EEPROM base address",
    },
    Region {
        name: "prod",
        family: NvmFamily::None,
        default_address: PROD_SIG_BASE_ADDR,
        description: "Production signature row",
    },
    Region {
        name: "user",
        family: NvmFamily::SignatureRow,
        default_address: USER_SIG_BASE_ADDR,
        description: "User signature row",
    },
    Region {
        name: "fuse",
        family: NvmFamily::Fuse,
        default_address: FUSE_BASE_ADDR,
        description: "Fuse base address",
    },
    Region {
        name: "lock",
        family: NvmFamily::Fuse,
        default_address: LOCK_BASE_ADDR,
        description: "Lock bits base address",
    },
    Region {
        name: "io",
        family: NvmFamily::None,
        default_address: IO_BASE_ADDR,
        description: "Mapped I/O base address",
    },
];

pub fn find(name: &str) -> Option<&'static Region> {
    REGIONS.iter().find(|r| r.name.eq_ignore_ascii_case(name))
}

impl Region {
    /// The region's base address. `boot` depends on the device's
    /// application-section size; every other region has a fixed base.
    pub fn resolve_address(&self, device: &Device) -> u32 {
        if self.name.eq_ignore_ascii_case("boot") {
            FLASH_BASE_ADDR + device.app_size
        } else {
            self.default_address
        }
    }

    /// The region's natural size for `device`.
    pub fn resolve_size(&self, device: &Device) -> u32 {
        match self.name {
            "flash" => device.app_size + device.boot_size,
            "app" => device.app_size,
            "boot" => device.boot_size,
            "eeprom" => device.eeprom_size,
            "prod" => device.prod_sig_size,
            "user" => device.user_sig_size,
            "fuse" => device.fuse_size,
            "lock" => device.lock_size,
            "io" => IO_SIZE,
            _ => 0,
        }
    }

    /// The region's page size, or 0 if it is not page-programmable (the
    /// caller must reject erase/write against a zero page size).
    pub fn resolve_page_size(&self, device: &Device) -> u32 {
        match self.name {
            "eeprom" => device.eeprom_page_size,
            "flash" | "app" | "boot" | "user" => device.flash_page_size,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_device() -> Device {
        Device {
            name: "test",
            signature: 0x1e9441,
            flash_page_size: 256,
            sram_size: 2048,
            eeprom_size: 1024,
            eeprom_page_size: 32,
            app_size: 0x4000,
            boot_size: 0x1000,
            fuse_size: 6,
            lock_size: 1,
            user_sig_size: 32,
            prod_sig_size: 64,
        }
    }

    #[test]
    fn boot_address_follows_app_size() {
        let d = sample_device();
        let boot = find("boot").unwrap();
        assert_eq!(boot.resolve_address(&d), FLASH_BASE_ADDR + d.app_size);
    }

    #[test]
    fn flash_size_is_app_plus_boot() {
        let d = sample_device();
        let flash = find("flash").unwrap();
        assert_eq!(flash.resolve_size(&d), d.app_size + d.boot_size);
    }

    #[test]
    fn fuse_and_lock_have_no_page_size() {
        let d = sample_device();
        assert_eq!(find("fuse").unwrap().resolve_page_size(&d), 0);
        assert_eq!(find("lock").unwrap().resolve_page_size(&d), 0);
        assert_eq!(find("io").unwrap().resolve_page_size(&d), 0);
    }

    #[test]
    fn eeprom_page_size_comes_from_device() {
        let d = sample_device();
        assert_eq!(find("eeprom").unwrap().resolve_page_size(&d), 32);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(find("FLASH").is_some());
        assert!(find("bogus").is_none());
    }
}
