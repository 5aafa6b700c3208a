//! Durable single-value slots that hold a serialized ledger.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{Result, VitrineError};

/// A single string-keyed storage slot.
pub trait LedgerSlot: Send + Sync {
    /// Read the stored value, `None` when nothing was ever written.
    fn read(&self) -> Result<Option<String>>;

    /// Replace the stored value.
    fn write(&self, value: &str) -> Result<()>;
}

/// Slot backed by a JSON file on disk.
///
/// Writes go to a sibling temp file and are renamed into place, so a crash
/// mid-write leaves the previous ledger intact.
#[derive(Debug, Clone)]
pub struct FileSlot {
    path: PathBuf,
}

impl FileSlot {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "ledger".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl LedgerSlot for FileSlot {
    fn read(&self) -> Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, value: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp = self.temp_path();
        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

/// In-process slot, used by tests and by callers that don't want persistence.
#[derive(Debug, Default)]
pub struct MemorySlot {
    value: Mutex<Option<String>>,
}

impl MemorySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: Mutex::new(Some(value.into())),
        }
    }
}

impl LedgerSlot for MemorySlot {
    fn read(&self) -> Result<Option<String>> {
        let guard = self.value.lock().map_err(|e| VitrineError::Ledger(e.to_string()))?;
        Ok(guard.clone())
    }

    fn write(&self, value: &str) -> Result<()> {
        let mut guard = self.value.lock().map_err(|e| VitrineError::Ledger(e.to_string()))?;
        *guard = Some(value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_slot_missing_reads_none() {
        let temp = TempDir::new().unwrap();
        let slot = FileSlot::new(temp.path().join("ledger.json"));
        assert_eq!(slot.read().unwrap(), None);
    }

    #[test]
    fn test_file_slot_write_then_read() {
        let temp = TempDir::new().unwrap();
        let slot = FileSlot::new(temp.path().join("nested").join("ledger.json"));
        slot.write("{\"a\":1}").unwrap();
        assert_eq!(slot.read().unwrap().as_deref(), Some("{\"a\":1}"));
        assert!(!temp.path().join("nested").join("ledger.json.tmp").exists());
    }

    #[test]
    fn test_file_slot_overwrites() {
        let temp = TempDir::new().unwrap();
        let slot = FileSlot::new(temp.path().join("ledger.json"));
        slot.write("first").unwrap();
        slot.write("second").unwrap();
        assert_eq!(slot.read().unwrap().as_deref(), Some("second"));
    }

    #[test]
    fn test_memory_slot() {
        let slot = MemorySlot::new();
        assert_eq!(slot.read().unwrap(), None);
        slot.write("x").unwrap();
        assert_eq!(slot.read().unwrap().as_deref(), Some("x"));
    }
}
