//! A colorized `log::Log` implementation for test output.
//!
//! Kept close to the teacher's `test/logger.rs`: a hand-written `Log` impl colored by level,
//! installed once via `std::sync::Once` so every test can call [`init`] unconditionally.

use std::sync::Once;

use colored::{Color, Colorize};
use log::{Level, Log, Metadata, Record};

struct TestLogger;

impl Log for TestLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Trace
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => Color::Red,
            Level::Warn => Color::Yellow,
            Level::Info => Color::Green,
            Level::Debug => Color::Cyan,
            Level::Trace => Color::BrightBlack,
        };
        eprintln!(
            "{:>5} {} {}",
            record.level().to_string().color(color),
            record.target().dimmed(),
            record.args()
        );
    }

    fn flush(&self) {}
}

static INIT: Once = Once::new();

/// Install the colorized logger. Idempotent: safe to call at the top of every test.
pub fn init() {
    INIT.call_once(|| {
        log::set_boxed_logger(Box::new(TestLogger)).expect("logger already installed");
        log::set_max_level(log::LevelFilter::Trace);
    });
}
