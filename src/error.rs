use std::path::PathBuf;

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum SyncError {
    #[error("invalid descriptor id: {0}")]
    InvalidDescriptorId(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("registry request failed: {0}")]
    RegistryHttp(String),

    #[error("registry returned status {status}: {message}")]
    RegistryStatus { status: u16, message: String },

    #[error("unexpected registry response: {0}")]
    RegistryResponse(String),

    #[error("registry record for {0} has no JSON descriptor file")]
    MissingDescriptorFile(String),

    #[error("failed to read pulled descriptor {path}: {reason}")]
    DescriptorRead { path: Utf8PathBuf, reason: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("config file not found: {0}")]
    ConfigFileMissing(Utf8PathBuf),

    #[error("failed to read {path}: {reason}")]
    ConfigFileRead { path: Utf8PathBuf, reason: String },

    #[error("malformed config at line {line}: {message}")]
    IniSyntax { line: usize, message: String },

    #[error("missing section '{0}'")]
    MissingSection(String),

    #[error("missing key '{key}' in section '{section}'")]
    MissingKey { section: String, key: String },

    #[error("failed to start background task: {0}")]
    TaskSpawn(String),

    #[error("background task '{0}' panicked")]
    TaskPanicked(String),
}

impl SyncError {
    pub fn chain(&self) -> String {
        let mut rendered = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            rendered.push_str(&format!("\n  caused by: {err}"));
            source = err.source();
        }
        rendered
    }

    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            SyncError::RegistryHttp(_)
                | SyncError::RegistryStatus { .. }
                | SyncError::RegistryResponse(_)
                | SyncError::MissingDescriptorFile(_)
        )
    }
}
