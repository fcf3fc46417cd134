//! Classification of processed documents into a `seller/buyer/` tree.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tracing::{debug, info, warn};

use crate::error::ClassifyError;
use crate::models::config::ClassifyMode;
use crate::models::invoice::InvoiceRecord;

const MAX_SEGMENT_CHARS: usize = 50;
const UNKNOWN_SELLER: &str = "unknown-seller";
const UNKNOWN_BUYER: &str = "unknown-buyer";

/// Shortest invoice number accepted for filing.
pub const MIN_INVOICE_NUMBER_CHARS: usize = 6;

/// Where a processed document ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Placement {
    /// Copied or moved to `path`.
    Placed { path: PathBuf },
    /// Placement failed; the document stays at its original location.
    Unplaced { reason: String },
    /// Deliberately not filed: no usable invoice number, or the invoice is
    /// already in the tree.
    Skipped { reason: String },
    /// Classification was disabled or not attempted.
    NotClassified,
}

impl Placement {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Placement::Placed { path } => Some(path),
            _ => None,
        }
    }
}

/// Turn a party name into a safe directory name.
pub fn sanitize_segment(name: Option<&str>, fallback: &str) -> String {
    let Some(name) = name else {
        return fallback.to_string();
    };

    let cleaned: String = name
        .chars()
        .filter(|c| !c.is_control() && !matches!(c, '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*'))
        .collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let capped: String = collapsed.chars().take(MAX_SEGMENT_CHARS).collect();
    let segment = capped.trim().trim_end_matches('.').trim();

    if segment.is_empty() || segment.chars().all(|c| c == '.') {
        fallback.to_string()
    } else {
        segment.to_string()
    }
}

/// Target directory for `record` under `root`.
pub fn destination(record: &InvoiceRecord, root: &Path) -> PathBuf {
    root.join(sanitize_segment(
        record.fields.seller_name.as_deref(),
        UNKNOWN_SELLER,
    ))
    .join(sanitize_segment(
        record.fields.buyer_name.as_deref(),
        UNKNOWN_BUYER,
    ))
}

/// Candidate file name for the `n`-th collision: `stem_n.ext`.
fn numbered(file_name: &OsStr, n: usize) -> PathBuf {
    if n == 0 {
        return PathBuf::from(file_name);
    }
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match path.extension() {
        Some(ext) => PathBuf::from(format!("{}_{}.{}", stem, n, ext.to_string_lossy())),
        None => PathBuf::from(format!("{}_{}", stem, n)),
    }
}

/// Invoice number a record is filed under, or why it cannot be filed.
pub fn filing_number(record: &InvoiceRecord) -> Result<&str, String> {
    let number = record
        .fields
        .invoice_number
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .ok_or_else(|| "no invoice number".to_string())?;
    if number.chars().count() < MIN_INVOICE_NUMBER_CHARS {
        return Err(format!("invoice number '{}' is too short to file", number));
    }
    Ok(number)
}

/// Files records into the `seller/buyer/` tree, once per invoice number.
///
/// The same invoice often arrives in several formats (PDF and XML); only the
/// first document seen for a number is placed.
#[derive(Debug)]
pub struct Classifier {
    root: PathBuf,
    mode: ClassifyMode,
    filed: Mutex<HashMap<String, PathBuf>>,
}

impl Classifier {
    pub fn new(root: impl Into<PathBuf>, mode: ClassifyMode) -> Self {
        Self {
            root: root.into(),
            mode,
            filed: Mutex::new(HashMap::new()),
        }
    }

    pub fn mode(&self) -> ClassifyMode {
        self.mode
    }

    /// Record an invoice filed by an earlier run.
    pub fn mark_filed(&self, record: &InvoiceRecord) {
        if let Ok(number) = filing_number(record) {
            self.lock_filed()
                .entry(number.to_string())
                .or_insert_with(|| record.source.path.clone());
        }
    }

    /// File `record`'s source with `mode`, unless it is not a distinct invoice.
    pub async fn classify(&self, record: &InvoiceRecord, mode: ClassifyMode) -> Placement {
        let source = &record.source.path;
        let number = match filing_number(record) {
            Ok(number) => number,
            Err(reason) => {
                info!("Not filing {}: {}", source.display(), reason);
                return Placement::Skipped { reason };
            }
        };

        if let Some(first) = self.claim(number, source) {
            info!(
                "Not filing {}: invoice {} already filed from {}",
                source.display(),
                number,
                first.display()
            );
            return Placement::Skipped {
                reason: format!("invoice {} already filed from {}", number, first.display()),
            };
        }

        let placement = place(record, &self.root, mode).await;
        if matches!(placement, Placement::Unplaced { .. }) {
            self.lock_filed().remove(number);
        }
        placement
    }

    /// Claim `number` for `source`. Returns the earlier claimant, if any.
    fn claim(&self, number: &str, source: &Path) -> Option<PathBuf> {
        let mut filed = self.lock_filed();
        match filed.get(number) {
            Some(first) => Some(first.clone()),
            None => {
                filed.insert(number.to_string(), source.to_path_buf());
                None
            }
        }
    }

    fn lock_filed(&self) -> std::sync::MutexGuard<'_, HashMap<String, PathBuf>> {
        self.filed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Copy or move the record's source file into its destination directory.
///
/// Existing files are never overwritten. A failed attempt is retried once;
/// after that the record is reported as unplaced.
pub async fn place(record: &InvoiceRecord, root: &Path, mode: ClassifyMode) -> Placement {
    let source = &record.source.path;
    let dir = destination(record, root);

    let mut last_error = None;
    for attempt in 1..=2 {
        match try_place(source, &dir, mode).await {
            Ok(path) => {
                info!(
                    "Placed {} -> {}",
                    source.display(),
                    path.display()
                );
                return Placement::Placed { path };
            }
            Err(e) => {
                warn!(
                    "Placing {} failed (attempt {}): {}",
                    source.display(),
                    attempt,
                    e
                );
                last_error = Some(e);
            }
        }
    }

    Placement::Unplaced {
        reason: last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown error".to_string()),
    }
}

async fn try_place(source: &Path, dir: &Path, mode: ClassifyMode) -> Result<PathBuf, ClassifyError> {
    match fs::metadata(source).await {
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ClassifyError::MissingSource(source.to_path_buf()));
        }
        Err(source_err) => {
            return Err(ClassifyError::Filesystem {
                from: source.to_path_buf(),
                to: dir.to_path_buf(),
                source: source_err,
            });
        }
    }

    let fs_err = |to: &Path, e: std::io::Error| ClassifyError::Filesystem {
        from: source.to_path_buf(),
        to: to.to_path_buf(),
        source: e,
    };

    fs::create_dir_all(dir).await.map_err(|e| fs_err(dir, e))?;

    let file_name = source
        .file_name()
        .ok_or_else(|| ClassifyError::MissingSource(source.to_path_buf()))?;
    let target = reserve(dir, file_name).await.map_err(|e| fs_err(dir, e))?;

    let result = match mode {
        ClassifyMode::Copy => fs::copy(source, &target).await.map(|_| ()),
        ClassifyMode::Move => move_file(source, &target).await,
    };
    if let Err(e) = result {
        let _ = fs::remove_file(&target).await;
        return Err(fs_err(&target, e));
    }
    Ok(target)
}

/// Atomically claim the first free `stem_N.ext` name in `dir`.
async fn reserve(dir: &Path, file_name: &OsStr) -> std::io::Result<PathBuf> {
    let mut n = 0;
    loop {
        let candidate = dir.join(numbered(file_name, n));
        match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!("{} exists, trying next name", candidate.display());
                n += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn move_file(source: &Path, target: &Path) -> std::io::Result<()> {
    if fs::rename(source, target).await.is_ok() {
        return Ok(());
    }
    // rename fails across filesystems
    fs::copy(source, target).await?;
    fs::remove_file(source).await
}
