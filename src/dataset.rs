//! Dataset pre-flight validation.
//!
//! Layout: `<root>/<split>/images/**` and `<root>/<split>/labels/**`. Every
//! image needs a label at the same relative path with a `.txt` extension, and
//! that label must contain at least one byte that is not ASCII whitespace.
//! Labels are checked as raw bytes, so the encoding does not matter.
//!
//! Stale `*.cache` files anywhere under the root are deleted before scanning.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigurationError;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp", "tif", "tiff"];
const LABEL_EXTENSION: &str = "txt";
const CACHE_EXTENSION: &str = "cache";

/// Counts for one split.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SplitReport {
    pub images: usize,
    pub missing_labels: usize,
    pub empty_labels: usize,
}

impl SplitReport {
    pub fn is_clean(&self) -> bool {
        self.missing_labels == 0 && self.empty_labels == 0
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DatasetReport {
    pub ok: bool,
    pub per_split: BTreeMap<String, SplitReport>,
    /// Cache files removed before the scan.
    pub caches_removed: usize,
}

impl std::fmt::Display for DatasetReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (split, report) in &self.per_split {
            writeln!(
                f,
                "{:<8} images={:<6} missing_labels={:<6} empty_labels={}",
                split, report.images, report.missing_labels, report.empty_labels
            )?;
        }
        write!(
            f,
            "{} ({} cache file(s) removed)",
            if self.ok { "OK" } else { "FAILED" },
            self.caches_removed
        )
    }
}

/// Validate `splits` under `root`.
///
/// A split without `images/` or `labels/` is a configuration error, distinct
/// from a report with `ok = false`.
pub fn validate<S: AsRef<str>>(
    root: impl AsRef<Path>,
    splits: &[S],
) -> Result<DatasetReport, ConfigurationError> {
    let root = root.as_ref();
    if !root.is_dir() {
        return Err(ConfigurationError::MissingDatasetRoot(root.to_path_buf()));
    }

    let caches_removed = remove_caches(root)?;
    if caches_removed > 0 {
        log::info!(
            "dataset: removed {} stale cache file(s) under {}",
            caches_removed,
            root.display()
        );
    }

    let mut per_split = BTreeMap::new();
    for split in splits {
        let split = split.as_ref();
        let report = validate_split(root, split)?;
        if !report.is_clean() {
            log::warn!(
                "dataset: split '{}' has {} missing and {} empty label(s) out of {} image(s)",
                split,
                report.missing_labels,
                report.empty_labels,
                report.images
            );
        }
        per_split.insert(split.to_string(), report);
    }

    let ok = per_split.values().all(SplitReport::is_clean);
    Ok(DatasetReport {
        ok,
        per_split,
        caches_removed,
    })
}

fn validate_split(root: &Path, split: &str) -> Result<SplitReport, ConfigurationError> {
    let images_dir = root.join(split).join("images");
    let labels_dir = root.join(split).join("labels");
    for dir in [&images_dir, &labels_dir] {
        if !dir.is_dir() {
            return Err(ConfigurationError::MissingSplit {
                split: split.to_string(),
                missing: dir.clone(),
            });
        }
    }

    let mut images = Vec::new();
    collect_files(&images_dir, &mut images)?;

    let mut report = SplitReport::default();
    for image in images.iter().filter(|path| is_image(path)) {
        report.images += 1;
        let relative = image.strip_prefix(&images_dir).unwrap_or(image);
        let label = labels_dir.join(relative).with_extension(LABEL_EXTENSION);
        match fs::read(&label) {
            Ok(contents) if contents.iter().all(u8::is_ascii_whitespace) => {
                log::debug!("dataset: empty label {}", label.display());
                report.empty_labels += 1;
            }
            Ok(_) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("dataset: missing label for {}", image.display());
                report.missing_labels += 1;
            }
            Err(source) => {
                return Err(ConfigurationError::DatasetIo {
                    path: label,
                    source,
                })
            }
        }
    }
    Ok(report)
}

fn remove_caches(root: &Path) -> Result<usize, ConfigurationError> {
    let mut files = Vec::new();
    collect_files(root, &mut files)?;
    let mut removed = 0;
    for path in files.iter().filter(|p| has_extension(p, &[CACHE_EXTENSION])) {
        fs::remove_file(path).map_err(|source| ConfigurationError::DatasetIo {
            path: path.clone(),
            source,
        })?;
        removed += 1;
    }
    Ok(removed)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<(), ConfigurationError> {
    let io_err = |source| ConfigurationError::DatasetIo {
        path: dir.to_path_buf(),
        source,
    };
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

fn is_image(path: &Path) -> bool {
    has_extension(path, IMAGE_EXTENSIONS)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
}
