use std::io::Write;
use std::sync::Mutex;

use accord_auth::{DecisionLogEntry, DecisionLogSink, LogWriteError};

/// Writes one JSON object per line to any `Write` (file, socket, pipe).
#[derive(Debug)]
pub struct JsonLinesDecisionLog<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesDecisionLog<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> Result<W, LogWriteError> {
        self.writer
            .into_inner()
            .map_err(|_| LogWriteError::Storage("lock poisoned".to_string()))
    }
}

impl<W: Write + Send> DecisionLogSink for JsonLinesDecisionLog<W> {
    fn emit(&self, entry: DecisionLogEntry) -> Result<(), LogWriteError> {
        // Serialize before locking so a bad entry never leaves a partial line.
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| LogWriteError::Storage("lock poisoned".to_string()))?;
        writer.write_all(&line)?;
        Ok(())
    }

    fn flush(&self) -> Result<(), LogWriteError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| LogWriteError::Storage("lock poisoned".to_string()))?;
        writer.flush()?;
        Ok(())
    }
}
