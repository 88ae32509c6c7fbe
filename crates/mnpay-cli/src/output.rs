//! Output formatting and writing utilities
//!
//! Results are written to stdout in the selected format. Status messages
//! (`info`, `success`, `warning`) only appear in human output.

use crate::cli::OutputFormat;
use crate::error::Result;
use crate::logging::redaction;
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use std::io::{self, Write};
use tracing::trace;

/// Formatting of serializable results per output format
pub trait OutputFormatter {
    fn format<T: Serialize>(&self, value: &T) -> Result<String>;
}

impl OutputFormatter for OutputFormat {
    fn format<T: Serialize>(&self, value: &T) -> Result<String> {
        match self {
            OutputFormat::Json => Ok(serde_json::to_string(value)?),
            OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(value)?),
            OutputFormat::Yaml => Ok(serde_yaml::to_string(value)?),
            OutputFormat::Human => Ok(format_human(&serde_json::to_value(value)?)),
        }
    }
}

/// Output writer that handles different output formats and colors
pub struct OutputWriter {
    format: OutputFormat,
    use_color: bool,
    quiet: bool,
    writer: Box<dyn Write>,
}

impl OutputWriter {
    pub fn new(format: OutputFormat, use_color: bool, quiet: bool) -> Self {
        Self::with_writer(format, use_color, quiet, Box::new(io::stdout()))
    }

    pub fn with_writer(
        format: OutputFormat,
        use_color: bool,
        quiet: bool,
        writer: Box<dyn Write>,
    ) -> Self {
        Self {
            format,
            use_color,
            quiet,
            writer,
        }
    }

    /// Write a line of output
    pub fn writeln(&mut self, content: &str) -> Result<()> {
        writeln!(self.writer, "{}", content)?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn info(&mut self, message: &str) -> Result<()> {
        if self.quiet || self.format != OutputFormat::Human {
            return Ok(());
        }
        if self.use_color {
            self.writeln(&format!("{} {}", "ℹ".blue(), message))
        } else {
            self.writeln(&format!("INFO: {}", message))
        }
    }

    pub fn success(&mut self, message: &str) -> Result<()> {
        if self.quiet || self.format != OutputFormat::Human {
            return Ok(());
        }
        if self.use_color {
            self.writeln(&message.green().to_string())
        } else {
            self.writeln(message)
        }
    }

    /// Warnings are shown even in quiet mode
    pub fn warning(&mut self, message: &str) -> Result<()> {
        if self.format != OutputFormat::Human {
            return Ok(());
        }
        if self.use_color {
            self.writeln(&message.yellow().to_string())
        } else {
            self.writeln(&format!("WARNING: {}", message))
        }
    }

    pub fn section(&mut self, title: &str) -> Result<()> {
        if self.quiet || self.format != OutputFormat::Human {
            return Ok(());
        }
        if self.use_color {
            self.writeln(&format!("═══ {} ═══", title).bright_blue().to_string())
        } else {
            self.writeln(&format!("=== {} ===", title))
        }
    }

    /// Write data in the configured format
    pub fn data<T: Serialize>(&mut self, value: &T) -> Result<()> {
        let mut logged = serde_json::to_value(value)?;
        redaction::redact_json_value(&mut logged);
        trace!(data = %logged, "Writing result");

        let formatted = self.format.format(value)?;
        self.writeln(formatted.trim_end_matches('\n'))
    }
}

/// `key: value` lines, nested objects indented
pub fn format_human(value: &Value) -> String {
    let mut out = String::new();
    write_human(value, 0, &mut out);
    out.trim_end_matches('\n').to_string()
}

fn write_human(value: &Value, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth);
    match value {
        Value::Object(map) => {
            let width = map.keys().map(String::len).max().unwrap_or(0);
            for (key, val) in map {
                match val {
                    Value::Object(inner) if !inner.is_empty() => {
                        out.push_str(&format!("{}{}:\n", indent, key));
                        write_human(val, depth + 1, out);
                    }
                    Value::Array(items) if !items.is_empty() => {
                        out.push_str(&format!("{}{}:\n", indent, key));
                        write_human(val, depth + 1, out);
                    }
                    _ => out.push_str(&format!(
                        "{}{:width$}  {}\n",
                        indent,
                        format!("{}:", key),
                        scalar(val),
                        width = width + 1
                    )),
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                match item {
                    Value::Object(_) | Value::Array(_) => {
                        out.push_str(&format!("{}-\n", indent));
                        write_human(item, depth + 1, out);
                    }
                    _ => out.push_str(&format!("{}- {}\n", indent, scalar(item))),
                }
            }
        }
        _ => out.push_str(&format!("{}{}\n", indent, scalar(value))),
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::Null => "-".to_string(),
        Value::String(s) => s.clone(),
        Value::Object(_) => "{}".to_string(),
        Value::Array(_) => "[]".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[test]
    fn test_human_format_aligns_keys() {
        let text = format_human(&json!({"kind": "TIMEOUT", "provider": "qpay", "status": null}));
        assert_eq!(text, "kind:      TIMEOUT\nprovider:  qpay\nstatus:    -");
    }

    #[test]
    fn test_human_format_nests_objects() {
        let text = format_human(&json!({"qpay": {"endpoint": "https://merchant.qpay.mn/v2"}}));
        assert_eq!(text, "qpay:\n  endpoint:  https://merchant.qpay.mn/v2");
    }

    #[test]
    fn test_json_output_is_single_line() {
        let buffer = SharedBuffer::default();
        let mut output =
            OutputWriter::with_writer(OutputFormat::Json, false, false, Box::new(buffer.clone()));

        output.info("not shown in json").unwrap();
        output.data(&json!({"checksum": "ab12"})).unwrap();

        assert_eq!(buffer.contents(), "{\"checksum\":\"ab12\"}\n");
    }

    #[test]
    fn test_quiet_suppresses_status_but_not_data() {
        let buffer = SharedBuffer::default();
        let mut output =
            OutputWriter::with_writer(OutputFormat::Human, false, true, Box::new(buffer.clone()));

        output.success("done").unwrap();
        output.section("Result").unwrap();
        output.data(&json!({"valid": true})).unwrap();

        assert_eq!(buffer.contents(), "valid:  true\n");
    }
}
