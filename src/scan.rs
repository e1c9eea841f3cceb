use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;

use crate::error::SyncError;
use crate::ini::IniDocument;
use crate::logging::TaskLog;
use crate::task::{BackgroundJob, CancelToken, Outcome};

pub const SCAN_TASK: &str = "update-datasets";

pub const DATALAD_CONFIG: &str = ".datalad/config";
pub const GIT_CONFIG: &str = ".git/config";
pub const DATASET_SECTION: &str = "datalad \"dataset\"";
pub const DATASET_KEY: &str = "id";
pub const ANNEX_SECTION: &str = "annex";
pub const ANNEX_KEY: &str = "uuid";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectRecord {
    pub path: Utf8PathBuf,
    pub dataset_id: Option<String>,
    pub annex_uuid: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractedField {
    DatasetId,
    AnnexUuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractionFailure {
    pub project: Utf8PathBuf,
    pub field: ExtractedField,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub projects: Vec<ProjectRecord>,
    pub skipped: Vec<Utf8PathBuf>,
    pub failures: Vec<ExtractionFailure>,
}

pub struct DatasetScanner {
    root: Utf8PathBuf,
    log: TaskLog,
}

impl DatasetScanner {
    pub fn new(root: impl Into<Utf8PathBuf>, log: TaskLog) -> Self {
        Self {
            root: root.into(),
            log,
        }
    }

    pub fn run(&self, cancel: &CancelToken) -> Outcome<ScanReport> {
        self.log.in_scope(|| match self.scan(cancel) {
            Ok(None) => {
                tracing::warn!("Dataset scan cancelled.");
                Outcome::Cancelled
            }
            Ok(Some(report)) if report.failures.is_empty() => Outcome::Succeeded(report),
            Ok(Some(report)) => {
                let failures = report
                    .failures
                    .iter()
                    .map(|failure| format!("{}: {}", failure.project, failure.reason))
                    .collect();
                Outcome::Partial {
                    value: report,
                    failures,
                }
            }
            Err(err) => {
                tracing::error!("Dataset scan failed: {}", err.chain());
                Outcome::Failed(err)
            }
        })
    }

    fn scan(&self, cancel: &CancelToken) -> Result<Option<ScanReport>, SyncError> {
        let mut report = ScanReport::default();
        let listing = list_children(&self.root)?;
        for unreadable in listing.unreadable {
            match unreadable.path {
                Some(path) => {
                    tracing::warn!(
                        "Unreadable entry in dataset folder: {path}. Reason - {}. Ignoring.",
                        unreadable.reason
                    );
                    report.skipped.push(path);
                }
                None => tracing::warn!(
                    "Unreadable entry in dataset folder: {}. Reason - {}. Ignoring.",
                    self.root,
                    unreadable.reason
                ),
            }
        }
        for entry in listing.visible {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if !entry.as_std_path().is_dir() {
                tracing::info!("Non-dataset found in dataset folder: {entry}. Ignoring.");
                report.skipped.push(entry);
                continue;
            }

            let dataset_id = match read_dataset_id(&entry.join(DATALAD_CONFIG)) {
                Ok(id) => Some(id),
                Err(err) => {
                    tracing::error!("Failed to read dataset ID. Reason - {err}");
                    report.failures.push(ExtractionFailure {
                        project: entry.clone(),
                        field: ExtractedField::DatasetId,
                        reason: err.to_string(),
                    });
                    None
                }
            };

            let annex_uuid = match read_annex_uuid(&entry.join(GIT_CONFIG)) {
                Ok(uuid) => Some(uuid),
                Err(err) => {
                    tracing::error!("Failed to read annex UUID. Reason - {err}");
                    report.failures.push(ExtractionFailure {
                        project: entry.clone(),
                        field: ExtractedField::AnnexUuid,
                        reason: err.to_string(),
                    });
                    None
                }
            };

            report.projects.push(ProjectRecord {
                path: entry,
                dataset_id,
                annex_uuid,
            });
        }
        Ok(Some(report))
    }
}

impl BackgroundJob for DatasetScanner {
    type Output = ScanReport;

    fn name(&self) -> &str {
        SCAN_TASK
    }

    fn log(&self) -> &TaskLog {
        &self.log
    }

    fn run(&self, cancel: &CancelToken) -> Outcome<ScanReport> {
        DatasetScanner::run(self, cancel)
    }
}

pub fn read_dataset_id(datalad_config: &Utf8Path) -> Result<String, SyncError> {
    read_value(datalad_config, DATASET_SECTION, DATASET_KEY)
}

pub fn read_annex_uuid(git_config: &Utf8Path) -> Result<String, SyncError> {
    read_value(git_config, ANNEX_SECTION, ANNEX_KEY)
}

fn read_value(path: &Utf8Path, section: &str, key: &str) -> Result<String, SyncError> {
    let document = IniDocument::read(path)?;
    Ok(document.get(section, key)?.to_string())
}

struct ChildListing {
    visible: Vec<Utf8PathBuf>,
    unreadable: Vec<UnreadableEntry>,
}

struct UnreadableEntry {
    path: Option<Utf8PathBuf>,
    reason: String,
}

// Only a failure to open the root is fatal.
fn list_children(root: &Utf8Path) -> Result<ChildListing, SyncError> {
    let entries = fs::read_dir(root.as_std_path())
        .map_err(|err| SyncError::Filesystem(format!("read {root}: {err}")))?;
    let mut visible = Vec::new();
    let mut unreadable = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                unreadable.push(UnreadableEntry {
                    path: None,
                    reason: err.to_string(),
                });
                continue;
            }
        };
        let (path, utf8) = match Utf8PathBuf::from_path_buf(entry.path()) {
            Ok(path) => (path, true),
            Err(path) => (Utf8PathBuf::from(path.display().to_string()), false),
        };
        let hidden = path
            .file_name()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false);
        if hidden {
            continue;
        }
        if utf8 {
            visible.push(path);
        } else {
            unreadable.push(UnreadableEntry {
                path: Some(path),
                reason: "file name is not valid UTF-8".to_string(),
            });
        }
    }
    visible.sort();
    unreadable.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(ChildListing {
        visible,
        unreadable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hidden_entries_are_not_listed() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        fs::create_dir(root.join(".cache").as_std_path()).unwrap();
        fs::create_dir(root.join("b").as_std_path()).unwrap();
        fs::write(root.join("a.txt").as_std_path(), b"x").unwrap();

        let listing = list_children(&root).unwrap();
        assert!(listing.unreadable.is_empty());
        let names = listing
            .visible
            .iter()
            .filter_map(|path| path.file_name())
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a.txt", "b"]);
    }
}
