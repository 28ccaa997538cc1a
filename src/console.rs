//! Console feedback shared by both proxy engines.
//!
//! A single [`Console`] is built at startup and handed to the HTTP and SOCKS
//! engines. It picks one of three output modes on first use, prints each
//! protocol's "listening on port N" line at most once, and in the default
//! mode draws a spinner glyph for every accepted connection.

use crate::config::Protocol;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

/// Spinner glyphs, cycled on every activity signal.
pub const SPINNER: [&str; 4] = ["|", "/", "-", "\\"];

/// Console output mode. Exactly one is active after initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Spinner feedback, structured logging silenced.
    Default,
    /// Structured logging at debug level, no spinner.
    Verbose,
    /// No console output at all.
    Quiet,
}

impl OutputMode {
    /// Quiet wins over verbose; neither yields the default mode.
    pub fn from_flags(quiet: bool, verbose: bool) -> Self {
        if quiet {
            OutputMode::Quiet
        } else if verbose {
            OutputMode::Verbose
        } else {
            OutputMode::Default
        }
    }
}

/// Hook used to turn structured logging on or off once the mode is known.
pub trait LogSwitch: Send + Sync {
    fn apply(&self, mode: OutputMode);
}

struct State {
    mode: Option<OutputMode>,
    http_announced: bool,
    socks_announced: bool,
    cursor: usize,
    out: Box<dyn Write + Send>,
}

/// Process-wide output coordinator.
pub struct Console {
    quiet: bool,
    verbose: bool,
    log_switch: Option<Box<dyn LogSwitch>>,
    state: Mutex<State>,
}

impl Console {
    /// Creates a console writing to stdout.
    pub fn new(quiet: bool, verbose: bool) -> Self {
        Self::with_writer(quiet, verbose, Box::new(io::stdout()))
    }

    /// Creates a console writing to an arbitrary sink.
    pub fn with_writer(quiet: bool, verbose: bool, out: Box<dyn Write + Send>) -> Self {
        Self {
            quiet,
            verbose,
            log_switch: None,
            state: Mutex::new(State {
                mode: None,
                http_announced: false,
                socks_announced: false,
                cursor: 0,
                out,
            }),
        }
    }

    /// Installs the hook that applies the selected mode to logging.
    pub fn with_log_switch(mut self, switch: Box<dyn LogSwitch>) -> Self {
        self.log_switch = Some(switch);
        self
    }

    /// Selects the output mode on the first call; later calls return it unchanged.
    pub fn init(&self) -> OutputMode {
        let mut state = self.lock();
        self.init_locked(&mut state)
    }

    /// Returns the active mode, if initialized.
    pub fn mode(&self) -> Option<OutputMode> {
        self.lock().mode
    }

    /// Prints the listening line for `protocol` once, in default mode only.
    pub fn announce(&self, protocol: Protocol, port: u16) {
        let mut state = self.lock();
        if self.init_locked(&mut state) != OutputMode::Default {
            return;
        }

        let announced = match protocol {
            Protocol::Http => &mut state.http_announced,
            Protocol::Socks => &mut state.socks_announced,
        };
        if *announced {
            return;
        }
        *announced = true;

        let _ = writeln!(state.out, "{protocol} proxy listening on port {port}");
        if state.http_announced && state.socks_announced {
            let _ = write!(state.out, "{}", SPINNER[0]);
        }
        let _ = state.out.flush();
    }

    /// Advances the spinner by one glyph. No-op outside default mode.
    pub fn activity(&self) {
        let mut state = self.lock();
        if self.init_locked(&mut state) != OutputMode::Default {
            return;
        }

        let glyph = SPINNER[state.cursor];
        state.cursor = (state.cursor + 1) % SPINNER.len();
        let _ = write!(state.out, "\x08{glyph}");
        let _ = state.out.flush();
    }

    fn init_locked(&self, state: &mut State) -> OutputMode {
        if let Some(mode) = state.mode {
            return mode;
        }

        let mode = OutputMode::from_flags(self.quiet, self.verbose);
        state.mode = Some(mode);

        if let Some(switch) = &self.log_switch {
            switch.apply(mode);
        }
        if mode == OutputMode::Verbose {
            let _ = writeln!(state.out, "Starting proxbox in verbose mode...");
            let _ = state.out.flush();
        }

        mode
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
