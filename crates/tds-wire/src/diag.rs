//! Server diagnostics.
//!
//! ERROR (0xAA) and INFO (0xAB) tokens share one payload shape; which tag
//! carried the payload decides how the severity is clamped. Diagnostics
//! accumulate in order on a chain that the session drains after each
//! response; severity 20 and above kills the connection.

use std::fmt;

/// A single server message, from an ERROR or INFO token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Server message number.
    pub number: i32,
    /// Server state byte.
    pub state: u8,
    /// Severity after clamping (errors >= 10, informational <= 9).
    pub severity: u8,
    /// Message text.
    pub message: String,
    /// Reporting server name.
    pub server: String,
    /// Reporting procedure name, empty outside procedures.
    pub procedure: String,
    /// Line number within the batch or procedure.
    pub line: u16,
}

impl Diagnostic {
    /// Build a diagnostic from an ERROR token, clamping severity up so the
    /// caller always sees it as an error.
    #[must_use]
    pub fn error(
        number: i32,
        state: u8,
        severity: u8,
        message: String,
        server: String,
        procedure: String,
        line: u16,
    ) -> Self {
        Self {
            number,
            state,
            severity: severity.max(11),
            message,
            server,
            procedure,
            line,
        }
    }

    /// Build a diagnostic from an INFO token, clamping severity down so it
    /// never masquerades as an error.
    #[must_use]
    pub fn info(
        number: i32,
        state: u8,
        severity: u8,
        message: String,
        server: String,
        procedure: String,
        line: u16,
    ) -> Self {
        Self {
            number,
            state,
            severity: severity.min(9),
            message,
            server,
            procedure,
            line,
        }
    }

    /// The synthetic diagnostic raised when a DONE token acknowledges a
    /// cancellation request.
    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            number: 9999,
            state: 0,
            severity: 14,
            message: "Request cancelled".to_owned(),
            server: String::new(),
            procedure: String::new(),
            line: 0,
        }
    }

    /// Whether this diagnostic is an error rather than an informational
    /// message.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity > 9
    }

    /// Whether the server will drop the connection after reporting this.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.severity >= 20
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Msg {}, Level {}, State {}, Line {}: {}",
            self.number, self.severity, self.state, self.line, self.message
        )
    }
}

/// Ordered accumulation of diagnostics for one request/response cycle.
#[derive(Debug, Default)]
pub struct DiagnosticChain {
    entries: Vec<Diagnostic>,
}

impl DiagnosticChain {
    /// Empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a diagnostic, preserving arrival order.
    pub fn push(&mut self, diag: Diagnostic) {
        self.entries.push(diag);
    }

    /// First error on the chain, if any.
    #[must_use]
    pub fn first_error(&self) -> Option<&Diagnostic> {
        self.entries.iter().find(|d| d.is_error())
    }

    /// Whether any entry dooms the connection.
    #[must_use]
    pub fn has_fatal(&self) -> bool {
        self.entries.iter().any(Diagnostic::is_fatal)
    }

    /// All accumulated entries in arrival order.
    #[must_use]
    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    /// Drain the chain, returning the entries and leaving it empty.
    pub fn take(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.entries)
    }

    /// Whether the chain is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag(severity: u8) -> (i32, u8, u8, String, String, String, u16) {
        (
            208,
            1,
            severity,
            "Invalid object name 't'.".to_owned(),
            "srv".to_owned(),
            String::new(),
            1,
        )
    }

    #[test]
    fn error_severity_is_clamped_up() {
        let (n, st, _, m, srv, p, l) = diag(2);
        let d = Diagnostic::error(n, st, 2, m, srv, p, l);
        assert_eq!(d.severity, 11);
        assert!(d.is_error());
    }

    #[test]
    fn info_severity_is_clamped_down() {
        let (n, st, _, m, srv, p, l) = diag(16);
        let d = Diagnostic::info(n, st, 16, m, srv, p, l);
        assert_eq!(d.severity, 9);
        assert!(!d.is_error());
    }

    #[test]
    fn chain_finds_first_error_in_order() {
        let mut chain = DiagnosticChain::new();
        let (n, st, _, m, srv, p, l) = diag(0);
        chain.push(Diagnostic::info(n, st, 0, m, srv, p, l));
        let (n, st, _, m, srv, p, l) = diag(16);
        chain.push(Diagnostic::error(n, st, 16, m, srv, p, l));
        let (n, st, _, m, srv, p, l) = diag(17);
        chain.push(Diagnostic::error(n, st, 17, m, srv, p, l));

        let first = chain.first_error().unwrap();
        assert_eq!(first.severity, 16);
        assert!(!chain.has_fatal());
    }

    #[test]
    fn severity_twenty_is_fatal() {
        let mut chain = DiagnosticChain::new();
        let (n, st, _, m, srv, p, l) = diag(20);
        chain.push(Diagnostic::error(n, st, 20, m, srv, p, l));
        assert!(chain.has_fatal());
    }

    #[test]
    fn cancel_diagnostic_shape() {
        let d = Diagnostic::cancelled();
        assert_eq!(d.number, 9999);
        assert_eq!(d.severity, 14);
        assert!(d.is_error());
        assert!(!d.is_fatal());
    }
}
