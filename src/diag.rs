//! Config-scoped diagnostics queue.
//!
//! The parser, linker, and migration validator push messages here instead of
//! writing to stderr themselves. The queue is drained exactly once, by the
//! driver, after the pipeline finishes or aborts.

use std::fmt;
use std::io::{self, Write};

/// Position of a token or entity in a source configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pos {
    pub fname: String,
    /// 1-indexed line, or 0 when only the file is known.
    pub line: usize,
    pub column: usize,
}

impl Pos {
    pub fn new(fname: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            fname: fname.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "{}:{}:{}", self.fname, self.line, self.column)
        } else {
            write!(f, "{}", self.fname)
        }
    }
}

/// Message severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warn,
    Error,
    Fatal,
}

impl Severity {
    pub fn label(self) -> &'static str {
        match self {
            Severity::Warn => "warning",
            Severity::Error => "error",
            Severity::Fatal => "fatal",
        }
    }
}

/// A single queued diagnostic.
#[derive(Debug, Clone)]
pub struct Msg {
    pub severity: Severity,
    /// Subsystem label, e.g. "parse", "link", "sqldiff".
    pub channel: &'static str,
    pub pos: Option<Pos>,
    pub text: String,
    /// System error text, appended after the message. Fatal only.
    pub os_error: Option<String>,
}

impl fmt::Display for Msg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(pos) = &self.pos {
            write!(f, "{}: ", pos)?;
        }
        write!(
            f,
            "{} {}: {}",
            self.channel,
            self.severity.label(),
            self.text
        )?;
        if let Some(err) = &self.os_error {
            write!(f, ": {}", err)?;
        }
        Ok(())
    }
}

/// Ordered queue of diagnostics owned by a [`crate::Config`].
#[derive(Debug, Default)]
pub struct Diagnostics {
    msgs: Vec<Msg>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        severity: Severity,
        channel: &'static str,
        pos: Option<Pos>,
        text: impl Into<String>,
    ) {
        let text = text.into();
        log::debug!("{} {}: {}", channel, severity.label(), text);
        self.msgs.push(Msg {
            severity,
            channel,
            pos,
            text,
            os_error: None,
        });
    }

    pub fn warn(&mut self, channel: &'static str, pos: Option<Pos>, text: impl Into<String>) {
        self.push(Severity::Warn, channel, pos, text);
    }

    pub fn error(&mut self, channel: &'static str, pos: Option<Pos>, text: impl Into<String>) {
        self.push(Severity::Error, channel, pos, text);
    }

    pub fn fatal(
        &mut self,
        channel: &'static str,
        pos: Option<Pos>,
        text: impl Into<String>,
        err: &io::Error,
    ) {
        self.msgs.push(Msg {
            severity: Severity::Fatal,
            channel,
            pos,
            text: text.into(),
            os_error: Some(err.to_string()),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.msgs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Msg> {
        self.msgs.iter()
    }

    /// Count of messages at error severity or above.
    pub fn error_count(&self) -> usize {
        self.msgs
            .iter()
            .filter(|m| m.severity >= Severity::Error)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Move every message of `other` onto the end of this queue.
    pub fn append(&mut self, mut other: Diagnostics) {
        self.msgs.append(&mut other.msgs);
    }

    /// Write every queued message to `w`, one per line, and clear the queue.
    pub fn drain_to<W: Write>(&mut self, w: &mut W) -> io::Result<()> {
        for msg in self.msgs.drain(..) {
            writeln!(w, "{}", msg)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_layout_with_position() {
        let mut diags = Diagnostics::new();
        diags.error(
            "parse",
            Some(Pos::new("db.ort", 3, 7)),
            "unknown field type",
        );

        let mut out = Vec::new();
        diags.drain_to(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "db.ort:3:7: parse error: unknown field type\n"
        );
        assert!(diags.is_empty());
    }

    #[test]
    fn test_message_layout_without_position() {
        let msg = Msg {
            severity: Severity::Warn,
            channel: "audit",
            pos: None,
            text: "roles not enabled".into(),
            os_error: None,
        };
        assert_eq!(msg.to_string(), "audit warning: roles not enabled");
    }

    #[test]
    fn test_fatal_appends_system_error() {
        let mut diags = Diagnostics::new();
        let err = io::Error::new(io::ErrorKind::NotFound, "no such file");
        diags.fatal("config", None, "db.ort", &err);

        let mut out = Vec::new();
        diags.drain_to(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "config fatal: db.ort: no such file\n"
        );
    }

    #[test]
    fn test_error_count_ignores_warnings() {
        let mut diags = Diagnostics::new();
        diags.warn("sqldiff", None, "deleted enumeration");
        assert_eq!(diags.error_count(), 0);
        diags.error("sqldiff", None, "item has changed value");
        assert_eq!(diags.error_count(), 1);
        assert!(diags.has_errors());
    }

    #[test]
    fn test_file_only_position() {
        let pos = Pos::new("db.ort", 0, 0);
        assert_eq!(pos.to_string(), "db.ort");
    }
}
