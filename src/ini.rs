use std::collections::HashMap;
use std::fs;
use std::io;

use camino::Utf8Path;

use crate::error::SyncError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    sections: HashMap<String, HashMap<String, String>>,
}

impl IniDocument {
    pub fn parse(content: &str) -> Result<Self, SyncError> {
        let mut document = Self::default();
        let mut section: Option<String> = None;
        // Key of the last option and the indentation it was written at.
        let mut current: Option<(String, usize)> = None;

        for (index, raw) in content.lines().enumerate() {
            let line_number = index + 1;
            let trimmed = raw.trim();
            if trimmed.starts_with('#') || trimmed.starts_with(';') {
                continue;
            }
            if trimmed.is_empty() {
                if let Some(value) = document.value_mut(&section, &current) {
                    value.push('\n');
                }
                continue;
            }

            let indent = raw.len() - raw.trim_start().len();
            if let Some((_, key_indent)) = &current {
                if indent > *key_indent {
                    if let Some(value) = document.value_mut(&section, &current) {
                        value.push('\n');
                        value.push_str(trimmed);
                    }
                    continue;
                }
            }

            if let Some(name) = section_header(trimmed) {
                document.sections.entry(name.to_string()).or_default();
                section = Some(name.to_string());
                current = None;
                continue;
            }

            let Some(name) = &section else {
                return Err(SyncError::IniSyntax {
                    line: line_number,
                    message: "option outside of any section".to_string(),
                });
            };

            let Some(pos) = trimmed.find(['=', ':']) else {
                return Err(SyncError::IniSyntax {
                    line: line_number,
                    message: format!("option without a separator: {trimmed}"),
                });
            };
            let key = trimmed[..pos].trim().to_lowercase();
            if key.is_empty() {
                return Err(SyncError::IniSyntax {
                    line: line_number,
                    message: format!("option without a name: {trimmed}"),
                });
            }
            document
                .sections
                .entry(name.clone())
                .or_default()
                .insert(key.clone(), trimmed[pos + 1..].trim().to_string());
            current = Some((key, indent));
        }

        for entries in document.sections.values_mut() {
            for value in entries.values_mut() {
                value.truncate(value.trim_end().len());
            }
        }
        Ok(document)
    }

    fn value_mut(
        &mut self,
        section: &Option<String>,
        current: &Option<(String, usize)>,
    ) -> Option<&mut String> {
        let (Some(name), Some((key, _))) = (section, current) else {
            return None;
        };
        self.sections
            .get_mut(name)
            .and_then(|entries| entries.get_mut(key))
    }

    pub fn read(path: &Utf8Path) -> Result<Self, SyncError> {
        let content = fs::read_to_string(path.as_std_path()).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => SyncError::ConfigFileMissing(path.to_path_buf()),
            _ => SyncError::ConfigFileRead {
                path: path.to_path_buf(),
                reason: err.to_string(),
            },
        })?;
        Self::parse(&content)
    }

    pub fn get(&self, section: &str, key: &str) -> Result<&str, SyncError> {
        let entries = self
            .sections
            .get(section)
            .ok_or_else(|| SyncError::MissingSection(section.to_string()))?;
        entries
            .get(&key.to_lowercase())
            .map(String::as_str)
            .ok_or_else(|| SyncError::MissingKey {
                section: section.to_string(),
                key: key.to_string(),
            })
    }
}

// `[name]` with anything after the last bracket ignored; `[]` is not a header.
fn section_header(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('[')?;
    let end = rest.rfind(']')?;
    (end > 0).then(|| &rest[..end])
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    const GIT_CONFIG: &str = "[core]\n\trepositoryformatversion = 0\n\tbare = false\n[annex]\n\tuuid = 5c4a2c1e-8a4f-4e0b-9d3f-0f6c2f3d1a11\n\tversion = 8\n";

    #[test]
    fn reads_tab_indented_git_config() {
        let doc = IniDocument::parse(GIT_CONFIG).unwrap();
        assert_eq!(
            doc.get("annex", "uuid").unwrap(),
            "5c4a2c1e-8a4f-4e0b-9d3f-0f6c2f3d1a11"
        );
        assert_eq!(doc.get("annex", "version").unwrap(), "8");
        assert_eq!(doc.get("core", "bare").unwrap(), "false");
    }

    #[test]
    fn quoted_subsection_names_are_verbatim() {
        let doc = IniDocument::parse("[datalad \"dataset\"]\n\tid = abc\n").unwrap();
        assert_eq!(doc.get("datalad \"dataset\"", "id").unwrap(), "abc");
        assert_matches!(doc.get("datalad", "id"), Err(SyncError::MissingSection(_)));
    }

    #[test]
    fn duplicates_are_tolerated() {
        let doc = IniDocument::parse("[a]\nk = 1\n[b]\nx = y\n[a]\nk = 2\nK = 3\n").unwrap();
        assert_eq!(doc.get("a", "k").unwrap(), "3");
        assert_eq!(doc.get("b", "x").unwrap(), "y");
    }

    #[test]
    fn deeper_indent_continues_value() {
        let doc = IniDocument::parse("[s]\nkey = first\n    second\nnext = 1\n").unwrap();
        assert_eq!(doc.get("s", "key").unwrap(), "first\nsecond");
        assert_eq!(doc.get("s", "next").unwrap(), "1");
    }

    #[test]
    fn comments_are_skipped() {
        let doc = IniDocument::parse("# top\n[s]\n; note\nk: v\n").unwrap();
        assert_eq!(doc.get("s", "k").unwrap(), "v");
    }

    #[test]
    fn key_without_separator_is_malformed() {
        let err = IniDocument::parse("[annex]\n\tuuid = u1\n[core]\n\tbare\n").unwrap_err();
        assert_matches!(err, SyncError::IniSyntax { line: 4, .. });
    }

    #[test]
    fn header_ignores_trailing_text() {
        let doc = IniDocument::parse("[annex]\n\tuuid = u1\n[x] trailing\nk = v\n").unwrap();
        assert_eq!(doc.get("annex", "uuid").unwrap(), "u1");
        assert_eq!(doc.get("x", "k").unwrap(), "v");
    }

    #[test]
    fn blank_lines_stay_inside_continued_values() {
        let doc = IniDocument::parse("[s]\nkey = first\n\n    second\n\n").unwrap();
        assert_eq!(doc.get("s", "key").unwrap(), "first\n\nsecond");
    }

    #[test]
    fn comment_lines_do_not_end_continuation() {
        let doc = IniDocument::parse("[s]\nkey = first\n# note\n    second\n").unwrap();
        assert_eq!(doc.get("s", "key").unwrap(), "first\nsecond");
    }

    #[test]
    fn empty_value_continues_on_next_line() {
        let doc = IniDocument::parse("[s]\nkey =\n    second\n").unwrap();
        assert_eq!(doc.get("s", "key").unwrap(), "\nsecond");
    }

    #[test]
    fn malformed_input_reports_line() {
        let err = IniDocument::parse("key = value\n").unwrap_err();
        assert_matches!(err, SyncError::IniSyntax { line: 1, .. });
        let err = IniDocument::parse("[ok]\n[broken\n").unwrap_err();
        assert_matches!(err, SyncError::IniSyntax { line: 2, .. });
    }

    #[test]
    fn missing_key_is_reported() {
        let doc = IniDocument::parse(GIT_CONFIG).unwrap();
        assert_matches!(
            doc.get("annex", "description"),
            Err(SyncError::MissingKey { .. })
        );
    }
}
