use crate::core::export::message_text;
use crate::core::message::Message;
use std::error::Error;
use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends finished turns to a plain-text transcript file.
///
/// Logging can be paused and resumed; a paused log keeps its path.
#[derive(Debug, Default)]
pub struct TranscriptLog {
    file_path: Option<PathBuf>,
    is_active: bool,
}

impl TranscriptLog {
    /// Start logging to `log_file` if one is given.
    pub fn new(log_file: Option<PathBuf>) -> Result<Self, Box<dyn Error>> {
        let mut log = TranscriptLog::default();
        if let Some(path) = log_file {
            log.set_log_file(path)?;
        }
        Ok(log)
    }

    pub fn set_log_file(&mut self, path: impl Into<PathBuf>) -> Result<String, Box<dyn Error>> {
        let path = path.into();
        // Fail now rather than on the first write.
        OpenOptions::new().create(true).append(true).open(&path)?;

        let status = format!("Logging enabled to: {}", path.display());
        self.file_path = Some(path);
        self.is_active = true;
        Ok(status)
    }

    pub fn toggle(&mut self, pause_message: &str) -> Result<String, Box<dyn Error>> {
        let Some(path) = self.file_path.clone() else {
            return Err("No log file specified. Use /log <filename> to enable logging first.".into());
        };
        if self.is_active {
            self.log_text(&format!("## {pause_message}"))?;
            self.is_active = false;
            Ok(format!("Logging paused (file: {})", path.display()))
        } else {
            self.is_active = true;
            Ok(format!("Logging resumed to: {}", path.display()))
        }
    }

    pub fn is_active(&self) -> bool {
        self.is_active
    }

    pub fn status(&self) -> String {
        let file_name = |path: &Path| {
            path.file_name()
                .unwrap_or_default()
                .to_string_lossy()
                .into_owned()
        };
        match (&self.file_path, self.is_active) {
            (None, _) => "disabled".to_string(),
            (Some(path), true) => format!("active ({})", file_name(path)),
            (Some(path), false) => format!("paused ({})", file_name(path)),
        }
    }

    /// Write one message: user text prefixed with `You:`, replies as their
    /// plain-text rendering. Empty replies are skipped.
    pub fn log_message(&self, message: &Message) -> Result<(), Box<dyn Error>> {
        if message.is_user() {
            return self.log_text(&format!("You: {}", message.content));
        }
        let text = message_text(message)?;
        if text.trim().is_empty() {
            return Ok(());
        }
        self.log_text(&text)
    }

    pub fn log_text(&self, content: &str) -> Result<(), Box<dyn Error>> {
        let Some(path) = self.file_path.as_ref().filter(|_| self.is_active) else {
            return Ok(());
        };

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut writer = BufWriter::new(file);
        for line in content.lines() {
            writeln!(writer, "{line}")?;
        }
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }
}
