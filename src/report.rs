//! Plain-text lab reports.
//!
//! A report is a transcript: labeled blocks of raw command output separated
//! by fixed-width rules. Nothing in it is interpreted.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};

pub const RULE_WIDTH: usize = 60;

/// A line of `ch` repeated [`RULE_WIDTH`] times.
pub fn rule(ch: char) -> String {
    std::iter::repeat_n(ch, RULE_WIDTH).collect()
}

/// Sequential report writer.
///
/// Every write is flushed immediately, so whatever was recorded before an
/// error or a long operator wait is already on disk.
pub struct Report<W: Write> {
    out: W,
}

impl Report<File> {
    pub fn create(path: &Path) -> Result<Self> {
        let file =
            File::create(path).with_context(|| format!("create report {}", path.display()))?;
        Ok(Self::new(file))
    }
}

impl<W: Write> Report<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn write(&mut self, text: &str) -> Result<()> {
        self.out.write_all(text.as_bytes()).context("write report")?;
        self.out.flush().context("flush report")?;
        Ok(())
    }

    /// Title line, `=` rule, blank line.
    pub fn header(&mut self, title: &str) -> Result<()> {
        self.write(&format!("{title}\n{}\n\n", rule('=')))
    }

    /// Section title boxed in `=` rules, preceded and followed by a blank
    /// line.
    pub fn banner(&mut self, title: &str) -> Result<()> {
        let eq = rule('=');
        self.write(&format!("\n{eq}\n{title}\n{eq}\n\n"))
    }

    /// Label line, `-` rule, then `body` verbatim plus a newline.
    pub fn block(&mut self, label: &str, body: &str) -> Result<()> {
        self.write(&format!("{label}\n{}\n{body}\n", rule('-')))
    }

    /// Label line followed by `-` rule, for sections whose content follows
    /// as separate writes.
    pub fn section(&mut self, label: &str) -> Result<()> {
        self.write(&format!("{label}\n{}\n", rule('-')))
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Print a finished report to stdout.
pub fn echo(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read back report {}", path.display()))?;
    println!("{text}");
    Ok(())
}
