use crate::models::Alert;
use std::fs::OpenOptions;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

/// Output handler for alerts
pub struct OutputHandler {
    format: OutputFormat,
    writer: Option<Box<dyn Write + Send>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Jsonl,
    Console,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            "jsonl" => OutputFormat::Jsonl,
            "console" => OutputFormat::Console,
            _ => OutputFormat::Console, // Default
        }
    }
}

impl OutputHandler {
    /// Create a new output handler
    pub fn new(format: OutputFormat, file_path: Option<PathBuf>) -> io::Result<Self> {
        let writer: Option<Box<dyn Write + Send>> = match (&format, file_path) {
            (OutputFormat::Console, _) => None,
            (_, Some(path)) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)?;
                Some(Box::new(BufWriter::new(file)))
            }
            (_, None) => None,
        };

        Ok(OutputHandler { format, writer })
    }

    /// Handler that writes into an arbitrary sink
    pub fn with_writer(format: OutputFormat, writer: Box<dyn Write + Send>) -> Self {
        OutputHandler {
            format,
            writer: Some(writer),
        }
    }

    /// Write an alert
    pub fn write_alert(&mut self, alert: &Alert) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let output = match &self.format {
            OutputFormat::Json => format!("{}\n", serde_json::to_string_pretty(alert)?),
            OutputFormat::Jsonl => format!("{}\n", serde_json::to_string(alert)?),
            OutputFormat::Console => format!(
                "[ALERT] BRUTE FORCE DETECTED - IP: {}, Failures: {}, Detected at: {}\n",
                alert.source_ip,
                alert.triggering_count,
                alert.detection_timestamp.to_rfc3339()
            ),
        };
        self.write_output(&output)?;
        Ok(())
    }

    fn write_output(&mut self, data: &str) -> io::Result<()> {
        match &mut self.writer {
            Some(writer) => {
                writer.write_all(data.as_bytes())?;
                writer.flush()?;
            }
            None => {
                let mut stdout = io::stdout();
                stdout.write_all(data.as_bytes())?;
                stdout.flush()?;
            }
        }
        Ok(())
    }

    /// Flush any buffered output
    pub fn flush(&mut self) -> io::Result<()> {
        if let Some(writer) = &mut self.writer {
            writer.flush()?;
        }
        Ok(())
    }
}
