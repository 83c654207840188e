//! Writing JSON back in the layout it was read in.

use serde::Serialize;

/// Layout of a JSON document on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonLayout {
    pub indent: String,
    pub trailing_newline: bool,
}

impl Default for JsonLayout {
    fn default() -> Self {
        Self {
            indent: "  ".to_string(),
            trailing_newline: true,
        }
    }
}

impl JsonLayout {
    /// Indentation of the first indented line, else two spaces.
    pub fn detect(text: &str) -> Self {
        let indent = text
            .lines()
            .skip(1)
            .find_map(|line| {
                let trimmed = line.trim_start_matches([' ', '\t']);
                let width = line.len() - trimmed.len();
                (width > 0 && !trimmed.is_empty()).then(|| line[..width].to_string())
            })
            .unwrap_or_else(|| "  ".to_string());
        Self {
            indent,
            trailing_newline: text.ends_with('\n'),
        }
    }

    pub fn render<T: Serialize>(&self, value: &T) -> serde_json::Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(self.indent.as_bytes());
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        value.serialize(&mut ser)?;
        // serde_json only emits valid UTF-8
        let mut out = String::from_utf8_lossy(&buf).into_owned();
        if self.trailing_newline {
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_tabs_and_missing_newline() {
        let layout = JsonLayout::detect("{\n\t\"a\": 1\n}");
        assert_eq!(layout.indent, "\t");
        assert!(!layout.trailing_newline);
    }

    #[test]
    fn round_trips_four_space_layout() {
        let text = "{\n    \"name\": \"app\",\n    \"version\": \"1.0.0\"\n}\n";
        let layout = JsonLayout::detect(text);
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(layout.render(&value).unwrap(), text);
    }

    #[test]
    fn single_line_document_defaults_to_two_spaces() {
        assert_eq!(JsonLayout::detect("{}").indent, "  ");
    }
}
