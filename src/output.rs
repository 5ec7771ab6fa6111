//! Deployment output
//!
//! A single sink interface keeps local phase reporting and forwarded remote
//! progress events consistent. The orchestrator and the RPC client both hold
//! the sink by reference; remote `progress` messages are routed through
//! [`OutputSink::forward`] unmodified.

use crossterm::style::Stylize;
use is_terminal::IsTerminal;
use serde_json::{Map, Value};
use unicode_width::UnicodeWidthStr;

/// Rendering flags carried by every output call.
///
/// Matches the style kwargs of the wire protocol (`bold`, `red`, `green`,
/// `debug`). Debug-styled lines are only rendered at verbose level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Style {
    pub bold: bool,
    pub red: bool,
    pub green: bool,
    pub debug: bool,
}

impl Style {
    pub fn bold() -> Self {
        Self {
            bold: true,
            ..Self::default()
        }
    }

    pub fn red() -> Self {
        Self {
            red: true,
            ..Self::default()
        }
    }

    pub fn green() -> Self {
        Self {
            green: true,
            ..Self::default()
        }
    }

    pub fn debug() -> Self {
        Self {
            debug: true,
            ..Self::default()
        }
    }

    /// Decode style flags from wire kwargs. Unknown keys are ignored.
    pub fn from_kwargs(kwargs: &Map<String, Value>) -> Self {
        let flag = |key: &str| kwargs.get(key).and_then(Value::as_bool).unwrap_or(false);
        Self {
            bold: flag("bold"),
            red: flag("red"),
            green: flag("green"),
            debug: flag("debug"),
        }
    }
}

/// Sink for all deployment output, local and forwarded.
pub trait OutputSink: Send + Sync {
    /// Print a plain line.
    fn line(&self, message: &str, style: Style);

    /// Print a section separator with a centered title.
    fn section(&self, title: &str, style: Style);

    /// Print a `context: message` step line.
    fn step(&self, context: &str, message: &str, style: Style);

    /// Print an indented annotation.
    fn annotate(&self, message: &str, style: Style);

    /// Print an error step.
    fn error(&self, message: &str);

    /// Route a remote progress event to the matching sink operation.
    ///
    /// Arguments arrive verbatim from the wire; style flags ride in
    /// `kwargs`. Operations this interface does not know are rendered as
    /// debug annotations rather than failing the call.
    fn forward(&self, op: &str, args: &[Value], kwargs: &Map<String, Value>) {
        let style = Style::from_kwargs(kwargs);
        let text = |index: usize| args.get(index).map(value_text).unwrap_or_default();
        match op {
            "section" => self.section(&text(0), style),
            "step" => self.step(&text(0), &text(1), style),
            "annotate" => self.annotate(&text(0), style),
            "line" => self.line(&text(0), style),
            "error" => self.error(&text(0)),
            other => self.annotate(
                &format!("unhandled progress op '{}'", other),
                Style::debug(),
            ),
        }
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Terminal implementation of [`OutputSink`].
pub struct TerminalOutput {
    debug: bool,
    color: bool,
    width: usize,
}

impl TerminalOutput {
    pub fn new(debug: bool) -> Self {
        let color = std::io::stdout().is_terminal();
        let width = crossterm::terminal::size()
            .map(|(w, _)| w as usize)
            .unwrap_or(79);
        Self {
            debug,
            color,
            width: width.max(20),
        }
    }

    fn render(&self, text: &str, style: Style) -> String {
        if !self.color {
            return text.to_string();
        }
        let mut styled = text.stylize();
        if style.bold {
            styled = styled.bold();
        }
        if style.red {
            styled = styled.red();
        }
        if style.green {
            styled = styled.green();
        }
        styled.to_string()
    }
}

impl OutputSink for TerminalOutput {
    fn line(&self, message: &str, style: Style) {
        if style.debug && !self.debug {
            return;
        }
        println!("{}", self.render(message, style));
    }

    fn section(&self, title: &str, style: Style) {
        self.line(&section_line(title, self.width), style);
    }

    fn step(&self, context: &str, message: &str, style: Style) {
        self.line(&format!("{}: {}", context, message), style);
    }

    fn annotate(&self, message: &str, style: Style) {
        let indented: Vec<String> = message
            .lines()
            .map(|line| format!("     {}", line))
            .collect();
        self.line(&indented.join("\n"), style);
    }

    fn error(&self, message: &str) {
        self.step("ERROR", message, Style::red());
    }
}

/// Build a `=====` separator line with a centered ` title `.
pub fn section_line(title: &str, width: usize) -> String {
    let titled = format!(" {} ", title);
    let fill = width.saturating_sub(UnicodeWidthStr::width(titled.as_str()));
    let left = fill / 2;
    let right = fill - left;
    format!("{}{}{}", "=".repeat(left), titled, "=".repeat(right))
}
