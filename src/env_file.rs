use std::path::Path;

use indexmap::IndexMap;

use crate::error::ProvisionResult;

/// A `.env` document: header comments followed by ordered
/// `KEY=VALUE` entries.
///
/// # Example
///
/// ```
/// use stackwright::env_file::EnvFile;
///
/// let env = EnvFile::new()
///     .comment("generated")
///     .set("DOMAIN", "example.com")
///     .set("GREETING", "hello world");
///
/// let text = env.render();
/// assert!(text.contains("DOMAIN=example.com\n"));
/// assert!(text.contains("GREETING=\"hello world\"\n"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    pub comments: Vec<String>,
    pub entries: IndexMap<String, String>,
}

impl EnvFile {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn comment(mut self, line: &str) -> Self {
        self.comments.push(line.to_string());
        self
    }

    /// Set `key`. Setting an existing key replaces its value in place.
    #[must_use]
    pub fn set(mut self, key: &str, value: impl ToString) -> Self {
        debug_assert!(
            key.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_'),
            "env keys are upper snake case"
        );
        self.entries.insert(key.to_string(), value.to_string());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.comments {
            out.push_str("# ");
            out.push_str(line);
            out.push('\n');
        }
        if !self.comments.is_empty() {
            out.push('\n');
        }
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(&quote(value));
            out.push('\n');
        }
        out
    }
}

/// Read an existing `.env` file. Returns `None` when it does not exist.
pub fn load(path: &Path) -> ProvisionResult<Option<IndexMap<String, String>>> {
    if !path.exists() {
        return Ok(None);
    }
    let mut entries = IndexMap::new();
    for item in dotenvy::from_path_iter(path)? {
        let (key, value) = item?;
        entries.insert(key, value);
    }
    Ok(Some(entries))
}

fn quote(value: &str) -> String {
    let bare = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_.-@:/+,".contains(c));
    if bare {
        return value.to_string();
    }

    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '$' => out.push_str("\\$"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}
