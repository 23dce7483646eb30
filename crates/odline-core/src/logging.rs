//! `log` backend: env_logger filtering, printed above progress bars on a TTY

use std::io::Write;

use indicatif::MultiProgress;

fn level_label(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    }
}

fn level_color(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[36m",
        log::Level::Trace => "\x1b[35m",
    }
}

fn format_line(record: &log::Record, color: bool) -> String {
    let label = level_label(record.level());
    if color {
        format!("[{}{label}\x1b[0m] {}", level_color(record.level()), record.args())
    } else {
        format!("[{label}] {}", record.args())
    }
}

/// Logger that suspends the progress bars while it prints.
pub struct IndicatifLogger {
    filter: env_logger::Logger,
    multi: MultiProgress,
}

impl log::Log for IndicatifLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.filter.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if self.filter.matches(record) {
            let line = format_line(record, true);
            self.multi.suspend(|| eprintln!("{line}"));
        }
    }

    fn flush(&self) {}
}

fn builder(quiet: bool, debug: bool) -> env_logger::Builder {
    let default_level = match (debug, quiet) {
        (true, _) => "debug",
        (false, true) => "warn",
        (false, false) => "info",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
}

/// Install the global logger. `RUST_LOG` overrides the default level.
///
/// With `multi` (TTY), lines go through the progress bars in color; without
/// it, plain `[LEVEL] message` lines go to stderr for log collectors.
pub fn init_logging(quiet: bool, debug: bool, multi: Option<&MultiProgress>) {
    match multi {
        Some(multi) => {
            let filter = builder(quiet, debug).build();
            let max_level = filter.filter();
            let logger = IndicatifLogger {
                filter,
                multi: multi.clone(),
            };
            if log::set_boxed_logger(Box::new(logger)).is_ok() {
                log::set_max_level(max_level);
            }
        }
        None => {
            let _ = builder(quiet, debug)
                .format(|buf, record| writeln!(buf, "{}", format_line(record, false)))
                .try_init();
        }
    }
}
