// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::env;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

const DEVICES_TSV: &str = "data/devices.tsv";

struct Row {
    name: String,
    fields: [u64; 11],
}

fn main() {
    println!("cargo:rerun-if-changed={DEVICES_TSV}");

    let text = fs::read_to_string(DEVICES_TSV)
        .unwrap_or_else(|e| panic!("reading {DEVICES_TSV}: {e}"));

    let rows: Vec<Row> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(parse_row)
        .collect();

    let mut out = String::new();
    writeln!(out, "pub static DEVICES: &[Device] = &[").unwrap();
    for row in &rows {
        writeln!(
            out,
            "    Device {{ name: {name:?}, signature: {sig:#08x}, \
             flash_page_size: {page}, sram_size: {sram}, eeprom_size: \
             {eeprom}, eeprom_page_size: {eeprom_page}, app_size: {app}, \
             boot_size: {boot}, fuse_size: {fuse}, lock_size: {lock}, \
             user_sig_size: {user}, prod_sig_size: {prod} }},",
            name = row.name,
            sig = row.fields[0],
            page = row.fields[1],
            sram = row.fields[2],
            eeprom = row.fields[3],
            eeprom_page = row.fields[4],
            app = row.fields[5],
            boot = row.fields[6],
            fuse = row.fields[7],
            lock = row.fields[8],
            user = row.fields[9],
            prod = row.fields[10],
        )
        .unwrap();
    }
    writeln!(out, "];").unwrap();

    let out_dir = PathBuf::from(env::var_os("OUT_DIR").unwrap());
    fs::write(out_dir.join("devices_table.rs"), out)
        .expect("writing devices_table.rs");
}

fn parse_row(line: &str) -> Row {
    let mut cols = line.split('\t');
    let name = cols.next().unwrap_or_default().trim().to_string();

    let mut fields = [0u64; 11];
    for slot in fields.iter_mut() {
        let col = cols
            .next()
            .unwrap_or_else(|| panic!("short device row: {line:?}"))
            .trim();
        *slot = if let Some(hex) = col.strip_prefix("0x") {
            u64::from_str_radix(hex, 16)
                .unwrap_or_else(|e| panic!("bad hex {col:?} in {line:?}: {e}"))
        } else {
            col.parse()
                .unwrap_or_else(|e| panic!("bad int {col:?} in {line:?}: {e}"))
        };
    }

    Row { name, fields }
}
