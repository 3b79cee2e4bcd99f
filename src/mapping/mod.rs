//! Field renaming and record flattening.
//!
//! Vendor records arrive as arbitrarily nested JSON objects. Before they are
//! published every record is flattened into dotted paths
//! (`connection.src_name`) and each path is renamed to its canonical field
//! name (`source.host.name`) through a [`FieldMap`].
//!
//! ```text
//! {"connection":{"src_name":"h1"}}
//!          ↓  RecordFlattener (dotted paths)
//! {"connection.src_name":"h1"}
//!          ↓  FieldMap (canonical names)
//! {"source.host.name":"h1"}
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

mod flatten;

pub use flatten::{FlatRecord, RawRecord, RecordFlattener};

/// Errors raised while loading a field-map table.
#[derive(Error, Debug)]
pub enum FieldMapError {
    #[error("failed to open field map {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed field map: {0}")]
    Csv(#[from] csv::Error),
}

/// Immutable lookup from flattened vendor field names to canonical names.
///
/// Names without an entry pass through unchanged.
#[derive(Clone, Debug, Default)]
pub struct FieldMap {
    fields: HashMap<String, String>,
}

impl FieldMap {
    /// Identity map: every name is already canonical.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Loads a two-column CSV table (`original,canonical`) with a header row.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, FieldMapError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| FieldMapError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let map = Self::from_reader(file)?;
        debug!(path = %path.display(), entries = map.len(), "Loaded field map");
        Ok(map)
    }

    /// Parses a field-map table from any reader.
    ///
    /// Rows whose canonical column is blank carry no mapping and are skipped,
    /// as are rows with fewer than two columns.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, FieldMapError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::None)
            .from_reader(reader);

        let mut fields = HashMap::new();
        for (idx, row) in rdr.records().enumerate() {
            let row = row?;
            let (Some(original), Some(canonical)) = (row.get(0), row.get(1)) else {
                warn!(row = idx + 2, "Skipping field map row with fewer than two columns");
                continue;
            };
            if canonical.trim().is_empty() {
                continue;
            }
            fields.insert(original.to_string(), canonical.to_string());
        }

        Ok(Self { fields })
    }

    /// Returns the canonical name for `name`, or `name` itself when unmapped.
    pub fn canonical<'a>(&'a self, name: &'a str) -> &'a str {
        self.fields.get(name).map(String::as_str).unwrap_or(name)
    }

    /// Number of mapped names.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl<K, V> FromIterator<(K, V)> for FieldMap
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
