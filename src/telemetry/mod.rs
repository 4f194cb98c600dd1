//! Telemetry formatting: turns an `Event` or a `WesleyError` into sink-ready
//! text. Sinks call a `TelemetryFormatter`; formatters do not know about I/O.

use crate::error::WesleyError;
use crate::event_bus::Event;

pub const CONTEXT_COLOR: &str = "\x1b[32m"; // green
pub const LINE_COLOR: &str = "\x1b[35m"; // magenta / dark pink
pub const RESET_COLOR: &str = "\x1b[0m";

/// Rendered output for a telemetry item that can be consumed by sinks.
#[derive(Clone, Debug, Default)]
pub struct EventRender {
    pub context: Option<String>,
    pub lines: Vec<String>,
}

impl EventRender {
    pub fn join_lines(&self) -> String {
        self.lines.join("")
    }
}

pub trait TelemetryFormatter: Send + Sync {
    fn render_event(&self, event: &Event) -> EventRender;
    fn render_error(&self, error: &WesleyError) -> EventRender;
}

pub struct PlainFormatter;

impl PlainFormatter {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PlainFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryFormatter for PlainFormatter {
    fn render_event(&self, event: &Event) -> EventRender {
        let line = format!("{LINE_COLOR}{}{RESET_COLOR}\n", event);
        EventRender {
            context: Some(event.scope_label().to_string()),
            lines: vec![line],
        }
    }

    fn render_error(&self, error: &WesleyError) -> EventRender {
        let mut lines = Vec::new();
        lines.push(format!(
            "{LINE_COLOR}error [exit {}]: {}{RESET_COLOR}\n",
            error.exit_code(),
            error
        ));
        let mut source = std::error::Error::source(error);
        let mut depth = 1;
        while let Some(cause) = source {
            let indent = "  ".repeat(depth);
            lines.push(format!("{LINE_COLOR}{indent}caused by: {cause}{RESET_COLOR}\n"));
            source = cause.source();
            depth += 1;
        }
        EventRender {
            context: Some(format!("{CONTEXT_COLOR}wesley{RESET_COLOR}")),
            lines,
        }
    }
}
