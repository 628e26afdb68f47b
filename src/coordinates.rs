//! Recorded click targets, persisted as `coordinates.json`.
//!
//! The file is a JSON array of single-key objects keyed by step name:
//!
//! ```json
//! [
//!   { "step1": { "x": 812, "y": 96, "template": "templates/step1_template.png" } },
//!   { "step2": { "x": 640, "y": 142, "template": "templates/step2_template.png" } }
//! ]
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoordinateError {
    #[error("coordinate file not found: {0}")]
    Missing(PathBuf),

    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed coordinate file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("entry {index} must hold exactly one step, found {keys}")]
    MalformedEntry { index: usize, keys: usize },

    #[error("not enough recorded steps: need {required}, found {found}")]
    InsufficientSteps { required: usize, found: usize },

    #[error("entry {index} is {found:?}, expected {expected:?}")]
    OutOfOrder {
        index: usize,
        expected: String,
        found: String,
    },
}

/// One recorded click target and the template captured around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinateRecord {
    pub step_name: String,
    pub x: i32,
    pub y: i32,
    pub template_path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawPoint {
    x: i32,
    y: i32,
    template: String,
}

pub fn step_name(index: usize) -> String {
    format!("step{}", index + 1)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoordinateStore {
    records: Vec<CoordinateRecord>,
}

impl CoordinateStore {
    pub fn new(records: Vec<CoordinateRecord>) -> Self {
        CoordinateStore { records }
    }

    pub fn records(&self) -> &[CoordinateRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn push(&mut self, record: CoordinateRecord) {
        self.records.push(record);
    }

    pub fn load(path: &Path) -> Result<Self, CoordinateError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoordinateError::Missing(path.to_path_buf()));
            }
            Err(source) => {
                return Err(CoordinateError::Io {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let store = Self::parse(&contents)?;
        tracing::info!("loaded {} coordinate(s) from {}", store.len(), path.display());
        Ok(store)
    }

    pub fn parse(contents: &str) -> Result<Self, CoordinateError> {
        let entries: Vec<BTreeMap<String, RawPoint>> = serde_json::from_str(contents)?;
        let records = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                if entry.len() != 1 {
                    return Err(CoordinateError::MalformedEntry {
                        index,
                        keys: entry.len(),
                    });
                }
                let (step_name, point) = entry.into_iter().next().ok_or(CoordinateError::MalformedEntry {
                    index,
                    keys: 0,
                })?;
                Ok(CoordinateRecord {
                    step_name,
                    x: point.x,
                    y: point.y,
                    template_path: PathBuf::from(point.template),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(CoordinateStore { records })
    }

    pub fn to_json(&self) -> Result<String, CoordinateError> {
        let entries: Vec<BTreeMap<&str, RawPoint>> = self
            .records
            .iter()
            .map(|r| {
                BTreeMap::from([(
                    r.step_name.as_str(),
                    RawPoint {
                        x: r.x,
                        y: r.y,
                        template: r.template_path.to_string_lossy().into_owned(),
                    },
                )])
            })
            .collect();
        Ok(serde_json::to_string_pretty(&entries)?)
    }

    /// Write the whole file next to `path` and rename it into place.
    pub fn save(&self, path: &Path) -> Result<(), CoordinateError> {
        let json = self.to_json()?;
        let tmp = temp_sibling(path);
        let io_err = |source| CoordinateError::Io {
            path: path.to_path_buf(),
            source,
        };
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;
        tracing::info!("saved {} coordinate(s) to {}", self.len(), path.display());
        Ok(())
    }

    /// The first `count` records, which must be named `step1..=step{count}`
    /// in order.
    pub fn require(&self, count: usize) -> Result<&[CoordinateRecord], CoordinateError> {
        if self.records.len() < count {
            return Err(CoordinateError::InsufficientSteps {
                required: count,
                found: self.records.len(),
            });
        }
        let steps = &self.records[..count];
        for (index, record) in steps.iter().enumerate() {
            let expected = step_name(index);
            if record.step_name != expected {
                return Err(CoordinateError::OutOfOrder {
                    index,
                    expected,
                    found: record.step_name.clone(),
                });
            }
        }
        Ok(steps)
    }
}

/// `foo.json` → `foo.json.tmp`, in the same directory so the rename stays on
/// one filesystem.
pub(crate) fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
