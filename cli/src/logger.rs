/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::fs::File;
use std::io::Write;
use std::sync::{Arc, Mutex};

use colored::Colorize;
use env_logger::fmt::Formatter;
use log::{Level, LevelFilter, Record};

pub const LOG_FILE_PATH: &str = "cbpatch.log";
pub const LOGGER_PREFIX: &str = "cbpatch";
pub const INFO_SYMBOL: &str = "✦";
pub const WARN_SYMBOL: &str = "✧";
pub const ERROR_SYMBOL: &str = "❂";
pub const DEBUG_SYMBOL: &str = "·";

pub fn init_logger(verbose: bool) {
    let mut builder = env_logger::Builder::new();

    let log_file: Option<Arc<Mutex<File>>> = if verbose {
        match File::create(LOG_FILE_PATH) {
            Ok(file) => Some(Arc::new(Mutex::new(file))),
            Err(e) => {
                eprintln!("Failed to create log file: {}", e);
                None
            }
        }
    } else {
        None
    };

    builder.format(move |buf: &mut Formatter, record: &Record| {
        // Everything ends up in the log file, only the console output is decorated
        if let Some(ref log_file) = log_file
            && let Ok(mut file) = log_file.lock()
        {
            writeln!(file, "[{}] {}", record.level(), record.args())?;
        }

        let prefix = LOGGER_PREFIX.bold().yellow();
        let message = match record.level() {
            Level::Info => format!("{}  {}", INFO_SYMBOL.yellow(), record.args()).white(),
            Level::Warn => format!("{}  {}", WARN_SYMBOL.yellow(), record.args()).yellow(),
            Level::Error => format!("{}  {}", ERROR_SYMBOL.red(), record.args()).red().bold(),
            Level::Debug => format!("{}  {}", DEBUG_SYMBOL, record.args()).dimmed(),
            Level::Trace => return Ok(()),
        };

        writeln!(buf, "{} {}", prefix, message)
    });

    builder.filter_level(if verbose { LevelFilter::Debug } else { LevelFilter::Info });

    // Reports go to stdout, logs stay out of the way of --json
    builder.target(env_logger::Target::Stderr);
    builder.init();
}
