// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Entry point: logging setup, signal handling, and the top-level error
//! report. All of the real work happens in [`driver::run`].

mod cli;
mod crc;
mod device;
mod driver;
mod dump;
mod error;
mod ihex;
mod memmap;
mod nvm;
mod pdi;
mod soc_io;

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use clap::error::ErrorKind;
use clap::Parser;

use cli::Cli;

/// The cancellation flag a running session polls. Stashed here so the raw
/// signal handler, which cannot capture state, can reach it.
static STOP_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

extern "C" fn handle_signal(_sig: libc::c_int) {
    if let Some(flag) = STOP_FLAG.get() {
        flag.store(true, Ordering::SeqCst);
    }
}

fn install_signal_handlers(stop: Arc<AtomicBool>) {
    STOP_FLAG.set(stop).ok();
    unsafe {
        for sig in [libc::SIGINT, libc::SIGTERM, libc::SIGQUIT] {
            libc::signal(sig, handle_signal as libc::sighandler_t);
        }
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                    ExitCode::SUCCESS
                }
                _ => ExitCode::FAILURE,
            };
        }
    };

    let level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::new().filter_level(level).init();

    let stop = Arc::new(AtomicBool::new(false));
    install_signal_handlers(stop.clone());

    match driver::run(&cli, stop) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            println!("ERROR: {e}");
            ExitCode::FAILURE
        }
    }
}
