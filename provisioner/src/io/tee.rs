//! Operator output duplicated to the terminal and the system log.
//!
//! Every line goes through one [`Tee`], which writes it to each sink under a
//! single lock. Sinks therefore see the same lines in the same order, whether
//! the line is a progress marker or output from a child process.

use std::io::{BufWriter, Stdout, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

pub const PROGRESS_PREFIX: &str = "====> ";

/// Destination for operator-visible lines.
pub trait LineSink: Send {
    /// Write one line; `line` never contains a newline.
    fn write_line(&mut self, line: &str) -> Result<()>;

    /// Flush and release the sink. Called once, after the last line.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Invoking terminal (stdout).
pub struct TerminalSink {
    out: BufWriter<Stdout>,
}

impl TerminalSink {
    pub fn stdout() -> Self {
        Self {
            out: BufWriter::new(std::io::stdout()),
        }
    }
}

impl LineSink for TerminalSink {
    fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{line}").context("write terminal")?;
        self.out.flush().context("flush terminal")
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush().context("flush terminal")
    }
}

/// System log, fed through a long-lived `logger -t <tag>` child.
pub struct SyslogSink {
    tag: String,
    child: Child,
    stdin: Option<ChildStdin>,
}

impl SyslogSink {
    pub fn spawn(tag: &str) -> Result<Self> {
        let mut child = Command::new("logger")
            .arg("-t")
            .arg(tag)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .context("spawn logger")?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("logger stdin was not piped"))?;
        debug!(tag, "syslog sink started");
        Ok(Self {
            tag: tag.to_string(),
            child,
            stdin: Some(stdin),
        })
    }
}

impl LineSink for SyslogSink {
    fn write_line(&mut self, line: &str) -> Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| anyhow!("syslog sink already closed"))?;
        // logger drops empty lines; keep blank output visible in both sinks.
        let line = if line.is_empty() { " " } else { line };
        writeln!(stdin, "{line}").context("write to logger")?;
        stdin.flush().context("flush logger")
    }

    fn finish(&mut self) -> Result<()> {
        drop(self.stdin.take());
        let status = self.child.wait().context("wait for logger")?;
        if !status.success() {
            debug!(tag = %self.tag, exit_code = ?status.code(), "logger exited with failure");
            return Err(anyhow!("logger exited with status {:?}", status.code()));
        }
        Ok(())
    }
}

/// Fan-out of lines to every sink.
pub struct Tee {
    sinks: Mutex<Vec<Box<dyn LineSink>>>,
}

impl Tee {
    pub fn new(sinks: Vec<Box<dyn LineSink>>) -> Self {
        Self {
            sinks: Mutex::new(sinks),
        }
    }

    /// Terminal plus syslog under `tag`.
    pub fn terminal_and_syslog(tag: &str) -> Result<Self> {
        let syslog = SyslogSink::spawn(tag)?;
        Ok(Self::new(vec![
            Box::new(TerminalSink::stdout()),
            Box::new(syslog),
        ]))
    }

    /// Write `text` to every sink, one line at a time.
    pub fn line(&self, text: &str) -> Result<()> {
        let mut sinks = self
            .sinks
            .lock()
            .map_err(|_| anyhow!("output tee lock poisoned"))?;
        let text = text.strip_suffix('\n').unwrap_or(text);
        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            for sink in sinks.iter_mut() {
                sink.write_line(line)?;
            }
        }
        Ok(())
    }

    /// `====> <message>` step marker.
    pub fn progress(&self, message: &str) -> Result<()> {
        self.line(&format!("{PROGRESS_PREFIX}{message}"))
    }

    pub fn finish(&self) -> Result<()> {
        let mut sinks = self
            .sinks
            .lock()
            .map_err(|_| anyhow!("output tee lock poisoned"))?;
        for sink in sinks.iter_mut() {
            sink.finish()?;
        }
        Ok(())
    }
}
