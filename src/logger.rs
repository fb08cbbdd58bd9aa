//! Terminal logger.
//!
//! Messages are printed on the standard error as `[level] context : message`, the context
//! being the record's target. Colors are only used when the standard error is a terminal.

use std::io::{self, IsTerminal, Write};

use crossterm::style::{Color, Stylize};
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};

struct TermLogger;

static LOGGER: TermLogger = TermLogger;

impl log::Log for TermLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = format_record(record, io::stderr().is_terminal());
        let _ = writeln!(io::stderr().lock(), "{line}");
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

fn level_color(level: Level) -> Color {
    match level {
        Level::Error => Color::Red,
        Level::Warn => Color::Yellow,
        Level::Info => Color::Green,
        Level::Debug | Level::Trace => Color::DarkGrey,
    }
}

/// Renders `record` as a single line.
pub fn format_record(record: &Record, colored: bool) -> String {
    let level = record.level().as_str().to_ascii_lowercase();
    let context = record.target();

    if colored {
        format!(
            "[{}] {} : {}",
            level.with(level_color(record.level())),
            context.with(Color::Cyan),
            record.args()
        )
    } else {
        format!("[{level}] {context} : {}", record.args())
    }
}

/// Installs the logger. Debug messages are only shown when `verbose` is set.
pub fn init(verbose: bool) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_lines() {
        let line = format_record(
            &Record::builder()
                .level(Level::Info)
                .target("stage1")
                .args(format_args!("installed at sector {}", 0))
                .build(),
            false,
        );

        assert_eq!(line, "[info] stage1 : installed at sector 0");
    }

    #[test]
    fn colored_lines_keep_text() {
        let line = format_record(
            &Record::builder()
                .level(Level::Warn)
                .target("cli")
                .args(format_args!("ignored"))
                .build(),
            true,
        );

        assert!(line.contains("warn"));
        assert!(line.contains("cli"));
        assert!(line.ends_with(" : ignored"));
    }
}
