//! Sink for non-fatal decoder chatter.
//!
//! Source readers never print or fail on warnings; they hand them to the
//! `Diagnostics` value the caller passed in.

use log::warn;

pub trait Diagnostics {
    fn warning(&self, module: &str, message: &str);
}

/// Forwards every warning to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDiagnostics;

impl Diagnostics for LogDiagnostics {
    fn warning(&self, module: &str, message: &str) {
        warn!("{} reader warning: {}", module, message);
    }
}
