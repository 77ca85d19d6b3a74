//! Terminal rendering of update notifications.

use std::io::Write;
use std::sync::Mutex;

use hotswap_updater::UpdateObserver;

/// Prints progress on one line and the outcome below it.
pub struct TerminalObserver {
    quiet: bool,
    out: Mutex<Box<dyn Write + Send>>,
}

impl TerminalObserver {
    /// Observer writing to stderr.
    pub fn stderr(quiet: bool) -> Self {
        Self::new(Box::new(std::io::stderr()), quiet)
    }

    /// Observer writing to any sink.
    pub fn new(out: Box<dyn Write + Send>, quiet: bool) -> Self {
        Self {
            quiet,
            out: Mutex::new(out),
        }
    }

    fn write(&self, text: &str) {
        if let Ok(mut out) = self.out.lock() {
            // Nothing useful to do if the terminal is gone.
            let _ = out.write_all(text.as_bytes());
            let _ = out.flush();
        }
    }
}

impl UpdateObserver for TerminalObserver {
    fn on_progress(&self, percent: u8) {
        if !self.quiet {
            self.write(&format!("\rUpdating... {:>3}%", percent));
        }
    }

    fn on_finished(&self) {
        if !self.quiet {
            self.write("\nUpdate script launched; the application will restart.\n");
        }
    }

    fn on_error(&self, message: &str) {
        self.write(&format!("\nUpdate failed: {}\n", message));
    }
}
