//! Report rendering.
//!
//! Text mode prints one line per trial as soon as it completes; JSON mode
//! prints a single array once every trial has succeeded.

use directgma::TrialReport;
use std::io::Write;

/// Output format for trial reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Human-readable report lines (default).
    #[default]
    Text,
    /// Machine-readable JSON array.
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown format '{other}'. Expected one of: text, json")),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Writes reports in the selected format.
pub struct ReportWriter<W: Write> {
    format: OutputFormat,
    out: W,
}

impl<W: Write> ReportWriter<W> {
    pub fn new(format: OutputFormat, out: W) -> Self {
        Self { format, out }
    }

    /// Called after each verified trial.
    pub fn trial(&mut self, report: &TrialReport) -> std::io::Result<()> {
        match self.format {
            OutputFormat::Text => writeln!(self.out, "{report}"),
            OutputFormat::Json => Ok(()),
        }
    }

    /// Called once after the whole run succeeded.
    pub fn finish(&mut self, reports: &[TrialReport]) -> anyhow::Result<()> {
        if self.format == OutputFormat::Json {
            let json = serde_json::to_string_pretty(reports)?;
            writeln!(self.out, "{json}")?;
        }
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}
