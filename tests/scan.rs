use std::fs;

use assert_matches::assert_matches;
use camino::{Utf8Path, Utf8PathBuf};

use portal_sync::error::SyncError;
use portal_sync::logging::{LogBuffer, TaskLog};
use portal_sync::scan::{
    DatasetScanner, ExtractedField, read_annex_uuid, read_dataset_id,
};
use portal_sync::task::{self, CancelToken, Outcome, TaskStatus};

const DATASET_ID: &str = "9850e7f8-5c1f-11ea-8f0a-0242ac120002";
const ANNEX_UUID: &str = "0c1cf4a4-3d4e-4a8b-a3f6-7d8e2c1b9a55";

fn root(temp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap()
}

fn write(path: &Utf8Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap().as_std_path()).unwrap();
    fs::write(path.as_std_path(), content).unwrap();
}

fn make_project(root: &Utf8Path, name: &str, datalad: Option<&str>, git: Option<&str>) -> Utf8PathBuf {
    let project = root.join(name);
    fs::create_dir_all(project.as_std_path()).unwrap();
    if let Some(content) = datalad {
        write(&project.join(".datalad/config"), content);
    }
    if let Some(content) = git {
        write(&project.join(".git/config"), content);
    }
    project
}

fn datalad_config(id: &str) -> String {
    format!("[datalad \"dataset\"]\n\tid = {id}\n")
}

fn git_config(uuid: &str) -> String {
    format!(
        "[core]\n\trepositoryformatversion = 0\n\tfilemode = true\n[annex]\n\tuuid = {uuid}\n\tversion = 8\n[remote \"origin\"]\n\turl = https://github.com/conpdatasets/example.git\n"
    )
}

fn strip_timestamps(log: &str) -> Vec<String> {
    log.lines()
        .map(|line| line.split_once(" [").map(|(_, rest)| rest.to_string()).unwrap_or_default())
        .collect()
}

#[test]
fn skips_files_and_extracts_valid_project() {
    let temp = tempfile::tempdir().unwrap();
    let root = root(&temp);
    let project = make_project(
        &root,
        "preventad",
        Some(&datalad_config(DATASET_ID)),
        Some(&git_config(ANNEX_UUID)),
    );
    write(&root.join("README.md"), "not a dataset");

    let buffer = LogBuffer::new();
    let scanner = DatasetScanner::new(root.clone(), TaskLog::with_writer(buffer.clone()));
    let outcome = scanner.run(&CancelToken::new());

    let report = match outcome {
        Outcome::Succeeded(report) => report,
        other => panic!("unexpected outcome: {:?}", other.status()),
    };
    assert_eq!(report.projects.len(), 1);
    assert_eq!(report.projects[0].path, project);
    assert_eq!(report.projects[0].dataset_id.as_deref(), Some(DATASET_ID));
    assert_eq!(report.projects[0].annex_uuid.as_deref(), Some(ANNEX_UUID));
    assert_eq!(report.skipped, vec![root.join("README.md")]);

    let log = buffer.contents();
    assert_eq!(log.matches("Non-dataset found in dataset folder").count(), 1);
    assert!(log.contains(&format!(
        "[INFO] Non-dataset found in dataset folder: {}. Ignoring.",
        root.join("README.md")
    )));
    assert!(!log.contains("[ERROR]"));
}

#[test]
fn missing_annex_section_does_not_stop_the_scan() {
    let temp = tempfile::tempdir().unwrap();
    let root = root(&temp);
    make_project(
        &root,
        "a-broken",
        Some(&datalad_config(DATASET_ID)),
        Some("[core]\n\tbare = false\n"),
    );
    make_project(
        &root,
        "b-healthy",
        Some(&datalad_config("second-id")),
        Some(&git_config(ANNEX_UUID)),
    );

    let buffer = LogBuffer::new();
    let scanner = DatasetScanner::new(root.clone(), TaskLog::with_writer(buffer.clone()));
    let outcome = scanner.run(&CancelToken::new());

    assert_eq!(outcome.status(), TaskStatus::Partial);
    let report = outcome.value().unwrap();
    assert_eq!(report.projects.len(), 2);
    assert_eq!(report.projects[0].dataset_id.as_deref(), Some(DATASET_ID));
    assert_eq!(report.projects[0].annex_uuid, None);
    assert_eq!(report.projects[1].dataset_id.as_deref(), Some("second-id"));
    assert_eq!(report.projects[1].annex_uuid.as_deref(), Some(ANNEX_UUID));
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].field, ExtractedField::AnnexUuid);

    let log = buffer.contents();
    assert!(log.contains("[ERROR] Failed to read annex UUID. Reason - missing section 'annex'"));
    assert_eq!(log.matches("[ERROR]").count(), 1);
}

#[test]
fn missing_config_files_resolve_to_none() {
    let temp = tempfile::tempdir().unwrap();
    let root = root(&temp);
    make_project(&root, "bare", None, None);

    let buffer = LogBuffer::new();
    let scanner = DatasetScanner::new(root.clone(), TaskLog::with_writer(buffer.clone()));
    let outcome = scanner.run(&CancelToken::new());

    let report = outcome.value().unwrap();
    assert_eq!(report.projects[0].dataset_id, None);
    assert_eq!(report.projects[0].annex_uuid, None);
    let log = buffer.contents();
    assert!(log.contains("Failed to read dataset ID. Reason - config file not found"));
    assert!(log.contains("Failed to read annex UUID. Reason - config file not found"));
}

#[test]
fn repeated_scans_log_identically() {
    let temp = tempfile::tempdir().unwrap();
    let root = root(&temp);
    make_project(&root, "one", Some(&datalad_config("id-1")), Some(&git_config("u-1")));
    make_project(&root, "two", Some("[datalad \"dataset\"]\n"), None);
    write(&root.join("notes.txt"), "x");
    write(&root.join("archive.tar"), "x");

    let first = LogBuffer::new();
    let second = LogBuffer::new();
    DatasetScanner::new(root.clone(), TaskLog::with_writer(first.clone())).run(&CancelToken::new());
    DatasetScanner::new(root.clone(), TaskLog::with_writer(second.clone())).run(&CancelToken::new());

    let first = strip_timestamps(&first.contents());
    assert_eq!(first.len(), 4);
    assert_eq!(first, strip_timestamps(&second.contents()));
}

#[test]
fn unreadable_root_fails_the_task() {
    let temp = tempfile::tempdir().unwrap();
    let missing = root(&temp).join("does-not-exist");
    let buffer = LogBuffer::new();

    let handle = task::spawn(DatasetScanner::new(missing, TaskLog::with_writer(buffer.clone()))).unwrap();
    let outcome = handle.join();

    assert_matches!(outcome, Outcome::Failed(SyncError::Filesystem(_)));
    assert!(buffer.contents().contains("[ERROR] Dataset scan failed"));
}

#[cfg(unix)]
#[test]
fn non_utf8_entry_is_skipped_and_scan_continues() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let temp = tempfile::tempdir().unwrap();
    let root = root(&temp);
    let project = make_project(&root, "good", Some(&datalad_config(DATASET_ID)), Some(&git_config(ANNEX_UUID)));
    fs::write(temp.path().join(OsStr::from_bytes(b"bad\xff")), b"x").unwrap();

    let buffer = LogBuffer::new();
    let outcome = DatasetScanner::new(root.clone(), TaskLog::with_writer(buffer.clone()))
        .run(&CancelToken::new());

    let report = match outcome {
        Outcome::Succeeded(report) => report,
        other => panic!("unexpected outcome: {:?}", other.status()),
    };
    assert_eq!(report.projects.len(), 1);
    assert_eq!(report.projects[0].path, project);
    assert_eq!(report.projects[0].annex_uuid.as_deref(), Some(ANNEX_UUID));
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].as_str().starts_with(root.join("bad").as_str()));

    let log = buffer.contents();
    assert_eq!(log.matches("[WARN] Unreadable entry in dataset folder").count(), 1);
    assert!(!log.contains("[ERROR]"));
}

#[test]
fn cancelled_scan_stops_before_projects() {
    let temp = tempfile::tempdir().unwrap();
    let root = root(&temp);
    make_project(&root, "one", Some(&datalad_config("id-1")), Some(&git_config("u-1")));
    let cancel = CancelToken::new();
    cancel.cancel();

    let outcome = DatasetScanner::new(root, TaskLog::disabled()).run(&cancel);

    assert_matches!(outcome, Outcome::Cancelled);
}

#[test]
fn readers_report_specific_reasons() {
    let temp = tempfile::tempdir().unwrap();
    let root = root(&temp);
    let project = make_project(
        &root,
        "p",
        Some("[datalad \"dataset\"]\n\tname = nothing\n"),
        Some("uuid = orphan\n"),
    );

    assert_matches!(
        read_dataset_id(&project.join(".datalad/config")),
        Err(SyncError::MissingKey { .. })
    );
    assert_matches!(
        read_annex_uuid(&project.join(".git/config")),
        Err(SyncError::IniSyntax { line: 1, .. })
    );
    assert_matches!(
        read_annex_uuid(&project.join("nope/config")),
        Err(SyncError::ConfigFileMissing(_))
    );
}
