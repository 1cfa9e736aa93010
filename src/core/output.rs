//! Run-scoped status lines and compact rendering helpers.
//!
//! Every status line recorded during a run ends up in the emailed summary.

/// Ordered, append-only accumulator of human-readable status lines.
#[derive(Debug, Default, Clone)]
pub struct StatusLog {
    lines: Vec<String>,
    echo: bool,
}

impl StatusLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// A log that also prints each line to stdout as it is recorded.
    pub fn echoing() -> Self {
        Self {
            lines: Vec::new(),
            echo: true,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        let line = line.into();
        if self.echo {
            println!("{}", line);
        }
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// `"s"` unless `count == 1`.
pub fn plural(count: usize) -> &'static str {
    if count == 1 { "" } else { "s" }
}

/// Collapse newlines/extra whitespace and bound length for log display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_log_keeps_insertion_order() {
        let mut log = StatusLog::new();
        log.push("first");
        log.push(String::from("second"));
        assert_eq!(log.lines(), &["first".to_string(), "second".to_string()]);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn plural_suffix() {
        assert_eq!(plural(0), "s");
        assert_eq!(plural(1), "");
        assert_eq!(plural(7), "s");
    }

    #[test]
    fn compact_line_truncates() {
        assert_eq!(compact_line("a  b\n c", 10), "a b c");
        assert_eq!(compact_line("abcdef", 3), "abc...");
    }
}
