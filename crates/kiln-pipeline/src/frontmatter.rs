//! Page front matter extraction.

use std::collections::BTreeMap;

use serde_json::Value;

/// Variables declared at the top of a page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frontmatter {
    pub values: BTreeMap<String, Value>,
}

impl Frontmatter {
    /// Layout requested by the page, if any.
    pub fn layout(&self) -> Option<&str> {
        self.values.get("layout").and_then(Value::as_str)
    }
}

/// Split YAML front matter from a page.
///
/// Returns the parsed front matter and the remaining body after the block.
pub fn extract_frontmatter(source: &str) -> Result<(Frontmatter, &str), FrontmatterError> {
    let trimmed = source.trim_start();

    if !trimmed.starts_with("---") {
        return Ok((Frontmatter::default(), source));
    }

    let after_open = &trimmed[3..];
    let Some(close_pos) = after_open.find("\n---") else {
        return Err(FrontmatterError::Unclosed);
    };

    let yaml_content = after_open[..close_pos].trim();
    let remaining = &after_open[close_pos + 4..];
    let remaining = remaining.strip_prefix('\n').unwrap_or(remaining);

    if yaml_content.is_empty() {
        return Ok((Frontmatter::default(), remaining));
    }

    let values: BTreeMap<String, Value> = serde_yaml::from_str(yaml_content)
        .map_err(|e| FrontmatterError::InvalidYaml(e.to_string()))?;

    Ok((Frontmatter { values }, remaining))
}

/// Errors that can occur when parsing front matter.
#[derive(Debug, thiserror::Error)]
pub enum FrontmatterError {
    #[error("Unclosed front matter block - missing closing ---")]
    Unclosed,

    #[error("Invalid YAML in front matter: {0}")]
    InvalidYaml(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn extracts_valid_frontmatter() {
        let source = r#"---
layout: post
title: Release notes
tags: [a, b]
---
<h1>{{ title }}</h1>
"#;

        let (fm, body) = extract_frontmatter(source).unwrap();

        assert_eq!(fm.layout(), Some("post"));
        assert_eq!(fm.values["title"], Value::from("Release notes"));
        assert_eq!(body, "<h1>{{ title }}</h1>\n");
    }

    #[test]
    fn handles_no_frontmatter() {
        let source = "<p>No front matter here.</p>";

        let (fm, body) = extract_frontmatter(source).unwrap();

        assert!(fm.values.is_empty());
        assert_eq!(body, source);
    }

    #[test]
    fn rejects_unclosed_block() {
        let result = extract_frontmatter("---\ntitle: x\n<p>body</p>");
        assert!(matches!(result, Err(FrontmatterError::Unclosed)));
    }

    #[test]
    fn empty_block_is_allowed() {
        let (fm, body) = extract_frontmatter("---\n---\n<p>x</p>").unwrap();
        assert!(fm.layout().is_none());
        assert_eq!(body, "<p>x</p>");
    }
}
