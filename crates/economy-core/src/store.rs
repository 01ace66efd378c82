//! Whole-document JSON persistence. Loads are corruption-tolerant; saves
//! replace the entire backing file.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::warn;

#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    Encode(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "store io error: {err}"),
            Self::Encode(err) => write!(f, "store encode error: {err}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Encode(value)
    }
}

/// One serialized tree on disk. There is no partial I/O: `load` reads the
/// whole document and `save` overwrites it, so the last save to complete
/// wins.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    path: PathBuf,
}

impl DocumentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the backing document. A missing, unreadable, or unparsable file
    /// degrades to an empty document; availability is preferred over
    /// durability here, so corruption is treated as "no data yet" and never
    /// surfaced to the caller.
    pub fn load(&self) -> Value {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return empty_document(),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "unreadable document, starting empty");
                return empty_document();
            }
        };

        match serde_json::from_str::<Value>(&raw) {
            Ok(doc @ Value::Object(_)) => doc,
            Ok(_) => {
                warn!(path = %self.path.display(), "document root is not an object, starting empty");
                empty_document()
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "unparsable document, starting empty");
                empty_document()
            }
        }
    }

    /// Serialize and fully overwrite the backing file. An unwritable medium
    /// is fatal to the operation and surfaced to the caller.
    pub fn save(&self, doc: &Value) -> Result<(), StoreError> {
        let mut raw = serde_json::to_string_pretty(doc)?;
        raw.push('\n');
        fs::write(&self.path, raw)?;
        Ok(())
    }
}

fn empty_document() -> Value {
    Value::Object(Map::new())
}
