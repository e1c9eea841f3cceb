use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use serde_json::Value;

use crate::domain::DescriptorId;
use crate::error::SyncError;

pub const SUMMARY_FILE: &str = "all_descriptors.json";
pub const DETAILED_FILE: &str = "detailed_all_descriptors.json";

#[derive(Debug, Clone)]
pub struct DescriptorCache {
    root: Utf8PathBuf,
}

impl DescriptorCache {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn descriptor_path(&self, id: &DescriptorId) -> Utf8PathBuf {
        self.root.join(id.file_name())
    }

    pub fn summary_path(&self) -> Utf8PathBuf {
        self.root.join(SUMMARY_FILE)
    }

    pub fn detailed_path(&self) -> Utf8PathBuf {
        self.root.join(DETAILED_FILE)
    }

    pub fn ensure_root(&self) -> Result<(), SyncError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| SyncError::Filesystem(format!("create {}: {err}", self.root)))
    }

    pub fn read_descriptor(&self, id: &DescriptorId) -> Result<Value, SyncError> {
        let path = self.descriptor_path(id);
        let content = fs::read_to_string(path.as_std_path()).map_err(|err| {
            SyncError::DescriptorRead {
                path: path.clone(),
                reason: err.to_string(),
            }
        })?;
        serde_json::from_str(&content).map_err(|err| SyncError::DescriptorRead {
            path,
            reason: err.to_string(),
        })
    }

    pub fn write_json<T: Serialize + ?Sized>(path: &Utf8Path, value: &T) -> Result<(), SyncError> {
        let content = to_pretty_json(value)?;
        write_bytes_atomic(path, &content)
    }
}

pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, SyncError> {
    let mut content = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut content, formatter);
    value
        .serialize(&mut serializer)
        .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    Ok(content)
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), SyncError> {
    let parent = path
        .parent()
        .ok_or_else(|| SyncError::Filesystem(format!("invalid destination path {path}")))?;
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".portal-sync")
        .suffix(".tmp")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    temp.write_all(content)
        .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    temp.persist(path.as_std_path())
        .map_err(|err| SyncError::Filesystem(err.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_paths() {
        let cache = DescriptorCache::new("/tmp/descriptors");
        let id: DescriptorId = "zenodo.1482743".parse().unwrap();

        assert!(cache.descriptor_path(&id).ends_with("zenodo-1482743.json"));
        assert!(cache.summary_path().ends_with(SUMMARY_FILE));
        assert!(cache.detailed_path().ends_with(DETAILED_FILE));
    }

    #[test]
    fn pretty_json_uses_four_spaces() {
        let content = to_pretty_json(&serde_json::json!({ "a": 1 })).unwrap();
        assert_eq!(String::from_utf8(content).unwrap(), "{\n    \"a\": 1\n}");
    }
}
