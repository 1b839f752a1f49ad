/// One `[section]` of an INI document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IniSection {
    pub name: String,
    pub entries: Vec<(String, String)>,
}

/// An INI-style document as read by MySQL, PHP and PHP-FPM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniDocument {
    pub comments: Vec<String>,
    pub sections: Vec<IniSection>,
}

impl IniDocument {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn comment(mut self, line: &str) -> Self {
        self.comments.push(line.to_string());
        self
    }

    /// Start a new section; later [`entry`](Self::entry) calls add to it.
    #[must_use]
    pub fn section(mut self, name: &str) -> Self {
        self.sections.push(IniSection {
            name: name.to_string(),
            entries: Vec::new(),
        });
        self
    }

    /// Add `key = value` to the most recently started section.
    ///
    /// # Panics
    ///
    /// Panics if no section has been started.
    #[must_use]
    pub fn entry(mut self, key: &str, value: impl ToString) -> Self {
        let section = self
            .sections
            .last_mut()
            .expect("entry() called before section()");
        section.entries.push((key.to_string(), value.to_string()));
        self
    }

    /// Look up `key` in `section`.
    #[must_use]
    pub fn value(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .iter()
            .filter(|s| s.name == section)
            .flat_map(|s| s.entries.iter())
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for line in &self.comments {
            out.push_str("; ");
            out.push_str(line);
            out.push('\n');
        }
        for (i, section) in self.sections.iter().enumerate() {
            if i > 0 || !self.comments.is_empty() {
                out.push('\n');
            }
            out.push('[');
            out.push_str(&section.name);
            out.push_str("]\n");
            for (key, value) in &section.entries {
                out.push_str(key);
                out.push_str(" = ");
                out.push_str(value);
                out.push('\n');
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_sections_in_order() {
        let doc = IniDocument::new()
            .comment("tuning")
            .section("mysqld")
            .entry("max_connections", 50)
            .section("client")
            .entry("default-character-set", "utf8mb4");

        assert_eq!(
            doc.render(),
            "\
; tuning

[mysqld]
max_connections = 50

[client]
default-character-set = utf8mb4
"
        );
    }

    #[test]
    fn value_lookup() {
        let doc = IniDocument::new().section("www").entry("pm", "dynamic");

        assert_eq!(doc.value("www", "pm"), Some("dynamic"));
        assert_eq!(doc.value("www", "missing"), None);
        assert_eq!(doc.value("other", "pm"), None);
    }

    #[test]
    #[should_panic(expected = "entry() called before section()")]
    fn entry_without_section_panics() {
        let _ = IniDocument::new().entry("a", 1);
    }
}
