use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DescriptorId(String);

impl DescriptorId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn file_stem(&self) -> String {
        sanitize(&self.0)
    }

    pub fn file_name(&self) -> String {
        format!("{}.json", self.file_stem())
    }

    pub fn zenodo_record(&self) -> Option<u64> {
        zenodo_regex()
            .captures(&self.0)
            .and_then(|caps| caps.get(1))
            .and_then(|number| number.as_str().parse().ok())
    }
}

pub fn sanitize(id: &str) -> String {
    id.replace('.', "-")
}

fn zenodo_regex() -> &'static Regex {
    static ZENODO: OnceLock<Regex> = OnceLock::new();
    ZENODO.get_or_init(|| Regex::new(r"^zenodo\.(\d+)$").expect("valid zenodo id regex"))
}

impl fmt::Display for DescriptorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DescriptorId {
    type Err = SyncError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        let is_valid = !trimmed.is_empty()
            && !trimmed.contains(['/', '\\'])
            && trimmed != "."
            && trimmed != "..";
        if !is_valid {
            return Err(SyncError::InvalidDescriptorId(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl TryFrom<String> for DescriptorId {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DescriptorId> for String {
    fn from(value: DescriptorId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptorRecord {
    #[serde(rename = "ID")]
    pub id: DescriptorId,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl DescriptorRecord {
    pub fn new(id: DescriptorId) -> Self {
        Self {
            id,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn title(&self) -> Option<&str> {
        self.fields.get("TITLE").and_then(Value::as_str)
    }
}
