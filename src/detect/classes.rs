//! Class-name table.
//!
//! Loaded once at startup from a TOML or JSON file carrying a `names` key,
//! either as an ordered list or as a table keyed by class index:
//!
//! ```toml
//! names = ["person", "bicycle", "car"]
//! ```
//!
//! ```toml
//! [names]
//! 0 = "person"
//! 1 = "bicycle"
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::detect::result::{Detection, RawDetection};
use crate::error::ConfigurationError;

#[derive(Debug, Deserialize)]
struct ClassFile {
    names: Option<NamesField>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum NamesField {
    List(Vec<String>),
    Indexed(BTreeMap<String, String>),
}

/// Ordered class names indexed by detector class index. Read-only.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassNameTable {
    names: Vec<String>,
}

impl ClassNameTable {
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// Load a class table from disk. Absent or malformed files are fatal.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw, path)
    }

    fn parse(raw: &str, path: &Path) -> Result<Self, ConfigurationError> {
        let malformed = |message: String| ConfigurationError::Malformed {
            path: path.to_path_buf(),
            message,
        };
        let file: ClassFile = if is_json(path) {
            serde_json::from_str(raw).map_err(|e| malformed(e.to_string()))?
        } else {
            toml::from_str(raw).map_err(|e| malformed(e.to_string()))?
        };

        let names = match file.names {
            None => {
                return Err(ConfigurationError::MissingNames {
                    path: path.to_path_buf(),
                })
            }
            Some(NamesField::List(names)) => names,
            Some(NamesField::Indexed(map)) => indexed_names(map, path)?,
        };
        if names.is_empty() {
            return Err(ConfigurationError::EmptyClassTable {
                path: path.to_path_buf(),
            });
        }
        Ok(Self { names })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn label(&self, class_index: usize) -> Option<&str> {
        self.names.get(class_index).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Attach a label to a raw detection, or `None` when the class index is
    /// out of range.
    pub fn resolve(&self, raw: RawDetection) -> Option<Detection> {
        let label = self.label(raw.class_index)?;
        Some(Detection {
            bbox: raw.bbox,
            confidence: raw.confidence.clamp(0.0, 1.0),
            class_index: raw.class_index,
            class_label: label.to_string(),
        })
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
}

fn indexed_names(
    map: BTreeMap<String, String>,
    path: &Path,
) -> Result<Vec<String>, ConfigurationError> {
    let mut by_index = BTreeMap::new();
    for (key, name) in map {
        let index: usize = key.trim().parse().map_err(|_| ConfigurationError::Malformed {
            path: PathBuf::from(path),
            message: format!("class key '{}' is not an integer index", key),
        })?;
        by_index.insert(index, name);
    }
    let mut names = Vec::with_capacity(by_index.len());
    for (expected, (index, name)) in by_index.into_iter().enumerate() {
        if index != expected {
            return Err(ConfigurationError::Malformed {
                path: PathBuf::from(path),
                message: format!("class index {} is missing", expected),
            });
        }
        names.push(name);
    }
    Ok(names)
}
