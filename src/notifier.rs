//! Unified logging and progress UI.
//!
//! [`Notifier`] wraps `env_logger` (text logs) and `indicatif` (spinner) under a single
//! verbosity switch:
//! - [`VerbosityLevel::Quiet`] → warnings only; `info` messages drive a live spinner.
//! - [`VerbosityLevel::Info`]/[`VerbosityLevel::Debug`]/[`VerbosityLevel::Trace`] → standard logs.
//!
//! The notifier is shared by both resolution threads of a diff, so the spinner sits behind a
//! `Mutex` rather than a `RefCell`.

use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::{Level, LevelFilter, Log, Record};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VerbosityLevel {
    Quiet = 0, // Spinner, warnings only
    Info = 1,
    Debug = 2,
    Trace = 3,
}

impl From<u8> for VerbosityLevel {
    fn from(level: u8) -> Self {
        match level {
            0 => VerbosityLevel::Quiet,
            1 => VerbosityLevel::Info,
            2 => VerbosityLevel::Debug,
            _ => VerbosityLevel::Trace,
        }
    }
}

impl VerbosityLevel {
    fn to_log_level(self) -> LevelFilter {
        match self {
            VerbosityLevel::Quiet => LevelFilter::Warn,
            VerbosityLevel::Info => LevelFilter::Info,
            VerbosityLevel::Debug => LevelFilter::Debug,
            VerbosityLevel::Trace => LevelFilter::Trace,
        }
    }
}

pub struct Notifier {
    verbosity: VerbosityLevel,
    logger: env_logger::Logger,
    spinner_enabled: bool,
    active_spinner: Mutex<Option<ProgressBar>>,
}

impl Notifier {
    pub fn new(verbosity_level: u8) -> Self {
        let verbosity = VerbosityLevel::from(verbosity_level);

        let logger = env_logger::Builder::from_env(Env::default())
            .filter_level(verbosity.to_log_level())
            .build();

        Self {
            verbosity,
            logger,
            spinner_enabled: verbosity == VerbosityLevel::Quiet,
            active_spinner: Mutex::new(None),
        }
    }

    /// A notifier that never draws a spinner, for tests and non-interactive use.
    pub fn silent() -> Self {
        let mut notifier = Self::new(0);
        notifier.spinner_enabled = false;
        notifier
    }

    pub fn info(&self, message: &str) {
        match self.verbosity {
            VerbosityLevel::Quiet => {
                if !self.spinner_enabled {
                    return;
                }
                let Ok(mut active) = self.active_spinner.lock() else {
                    return;
                };
                let spinner = active.get_or_insert_with(|| {
                    let spinner = ProgressBar::new_spinner();
                    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}")
                    {
                        spinner.set_style(style);
                    }
                    spinner.enable_steady_tick(Duration::from_millis(100));
                    spinner
                });
                spinner.set_message(message.to_string());
            }
            _ => self.log(Level::Info, message),
        }
    }

    pub fn debug(&self, message: &str) {
        if self.verbosity != VerbosityLevel::Quiet {
            self.log(Level::Debug, message);
        }
    }

    pub fn warn(&self, message: &str) {
        self.suspend(|| self.log(Level::Warn, message));
    }

    pub fn error(&self, message: &str) {
        self.suspend(|| self.log(Level::Error, message));
    }

    pub fn trace(&self, message: &str) {
        if self.verbosity != VerbosityLevel::Quiet {
            self.log(Level::Trace, message);
        }
    }

    /// Clears the spinner, if any, before output is written to the terminal.
    pub fn finish(&self) {
        if let Ok(mut active) = self.active_spinner.lock() {
            if let Some(spinner) = active.take() {
                spinner.finish_and_clear();
            }
        }
    }

    fn suspend<F: FnOnce()>(&self, f: F) {
        match self.active_spinner.lock() {
            Ok(active) => match active.as_ref() {
                Some(spinner) => spinner.suspend(f),
                None => f(),
            },
            Err(_) => f(),
        }
    }

    fn log(&self, level: Level, message: &str) {
        self.logger.log(
            &Record::builder()
                .args(format_args!("{}", message))
                .level(level)
                .target(module_path!())
                .build(),
        );
    }
}
