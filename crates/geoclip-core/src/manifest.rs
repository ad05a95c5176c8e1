//! Dataset manifest loading.
//!
//! A manifest is a YAML list of dataset records, either at the top level or under a
//! `datasets` key:
//!
//! ```yaml
//! datasets:
//!   - name: roads
//!     source: https://example.com/roads.zip
//!   - name: population
//!     path: data/ppp_2020.tif
//!     download: false
//!     data_save_filename: population_clip.tif
//! ```
//!
//! Records are validated one by one. A bad record becomes a
//! [`ManifestEntry::Malformed`] and is reported by the pipeline as a failed entry;
//! the other records are unaffected.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use log::{info, warn};
use serde::Deserialize;
use serde_yaml::Value as YamlValue;

use crate::error::{ClipError, Result};
use crate::types::DatasetDescriptor;

#[derive(Debug, Deserialize)]
struct RawRecord {
    name: Option<String>,
    #[serde(alias = "path")]
    source: Option<String>,
    download: Option<bool>,
    #[serde(alias = "data_save_filename")]
    output_filename: Option<String>,
}

/// One manifest record, validated or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestEntry {
    Valid(DatasetDescriptor),
    /// A record that cannot be processed.
    Malformed {
        /// Position in the manifest, from 0
        index: usize,
        /// The record's name, if it had a usable one
        name: Option<String>,
        reason: String,
    },
}

impl ManifestEntry {
    /// Name used in logs and reports: the dataset name or `#<index>`.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            ManifestEntry::Valid(d) => d.name.clone(),
            ManifestEntry::Malformed {
                name: Some(name), ..
            } => name.clone(),
            ManifestEntry::Malformed { index, .. } => format!("#{index}"),
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> Option<&DatasetDescriptor> {
        match self {
            ManifestEntry::Valid(d) => Some(d),
            ManifestEntry::Malformed { .. } => None,
        }
    }
}

/// Parsed manifest: entries in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    /// Read and parse a manifest file.
    ///
    /// # Errors
    ///
    /// Returns [`ClipError::NotFound`] if the file does not exist and
    /// [`ClipError::Invalid`] if it is not a list of records.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ClipError::not_found(path));
        }
        let text = fs::read_to_string(path)
            .map_err(|e| ClipError::invalid("manifest", format!("{}: {e}", path.display())))?;
        let manifest = Self::parse(&text)?;
        info!(
            "Loaded {} manifest entr{} from {}",
            manifest.entries.len(),
            if manifest.entries.len() == 1 { "y" } else { "ies" },
            path.display()
        );
        Ok(manifest)
    }

    /// Parse manifest YAML.
    ///
    /// # Errors
    ///
    /// Returns [`ClipError::Invalid`] for unparsable YAML or a document that is
    /// neither a sequence nor a mapping with a `datasets` sequence.
    pub fn parse(text: &str) -> Result<Self> {
        let document: YamlValue =
            serde_yaml::from_str(text).map_err(|e| ClipError::invalid("manifest", e.to_string()))?;

        let records = match document {
            YamlValue::Sequence(records) => records,
            YamlValue::Mapping(mut map) => match map.remove("datasets") {
                Some(YamlValue::Sequence(records)) => records,
                Some(YamlValue::Null) => Vec::new(),
                _ => {
                    return Err(ClipError::invalid(
                        "manifest",
                        "expected a 'datasets' list",
                    ));
                },
            },
            _ => {
                return Err(ClipError::invalid(
                    "manifest",
                    "expected a list of datasets",
                ));
            },
        };

        let entries = records
            .into_iter()
            .enumerate()
            .map(|(index, record)| decode_record(index, record))
            .collect();
        Ok(Self::from_entries(entries))
    }

    /// Build a manifest from descriptors, applying the same uniqueness checks.
    #[must_use]
    pub fn from_descriptors(descriptors: Vec<DatasetDescriptor>) -> Self {
        Self::from_entries(descriptors.into_iter().map(ManifestEntry::Valid).collect())
    }

    fn from_entries(mut entries: Vec<ManifestEntry>) -> Self {
        mark_duplicates(&mut entries);
        for entry in &entries {
            if let ManifestEntry::Malformed { reason, .. } = entry {
                warn!("Manifest entry {}: {reason}", entry.label());
            }
        }
        Self { entries }
    }

    /// Valid descriptors only.
    pub fn descriptors(&self) -> impl Iterator<Item = &DatasetDescriptor> {
        self.entries.iter().filter_map(ManifestEntry::descriptor)
    }
}

fn decode_record(index: usize, record: YamlValue) -> ManifestEntry {
    let malformed = |name: Option<String>, reason: String| ManifestEntry::Malformed {
        index,
        name,
        reason,
    };

    let raw: RawRecord = match serde_yaml::from_value(record) {
        Ok(raw) => raw,
        Err(e) => return malformed(None, format!("undecodable record: {e}")),
    };

    let name = raw.name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());
    let Some(name) = name else {
        return malformed(None, "missing 'name'".to_string());
    };
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return malformed(Some(name), "name must not contain path separators".to_string());
    }

    let source = raw.source.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let Some(source) = source else {
        return malformed(Some(name), "missing 'source'".to_string());
    };

    let output_filename = raw
        .output_filename
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty());
    if let Some(filename) = &output_filename
        && Path::new(filename)
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)))
    {
        return malformed(
            Some(name),
            format!("output filename '{filename}' must be a relative path"),
        );
    }

    ManifestEntry::Valid(DatasetDescriptor {
        name,
        source,
        download: raw.download,
        output_filename,
    })
}

/// Later duplicates of a name or explicit output filename become malformed.
fn mark_duplicates(entries: &mut [ManifestEntry]) {
    let mut names = HashSet::new();
    let mut outputs = HashSet::new();
    for (index, entry) in entries.iter_mut().enumerate() {
        let ManifestEntry::Valid(descriptor) = entry else {
            continue;
        };
        let reason = if !names.insert(descriptor.name.clone()) {
            Some(format!("duplicate name '{}'", descriptor.name))
        } else if let Some(filename) = &descriptor.output_filename
            && !outputs.insert(filename.clone())
        {
            Some(format!("duplicate output filename '{filename}'"))
        } else {
            None
        };
        if let Some(reason) = reason {
            let name = Some(descriptor.name.clone());
            *entry = ManifestEntry::Malformed {
                index,
                name,
                reason,
            };
        }
    }
}
