use anyhow::{Context, Result};
use std::path::Path;

const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentStyle {
    Python,
    Shell,
    Markdown,
    Xml,
}

impl CommentStyle {
    /// Style from the extension, or from the shebang for extension-less files.
    pub fn detect(path: &Path, content: &str) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("py") => Some(Self::Python),
            Some("sh") => Some(Self::Shell),
            Some("md") => Some(Self::Markdown),
            Some("xml") => Some(Self::Xml),
            Some(_) => None,
            None => {
                let first = content.lines().next().unwrap_or_default();
                if !first.starts_with("#!") {
                    None
                } else if first.contains("sh") {
                    Some(Self::Shell)
                } else if first.contains("python") {
                    Some(Self::Python)
                } else {
                    None
                }
            }
        }
    }

    fn insert_at(self, lines: &[&str]) -> usize {
        match self {
            Self::Markdown => 0,
            Self::Python => {
                let mut at = 0;
                for (index, line) in lines.iter().enumerate() {
                    if line.starts_with("#!") {
                        at = index + 1;
                    }
                    if line.contains("coding:") {
                        at = index + 1;
                        break;
                    }
                }
                at
            }
            Self::Shell => last_line_index(lines, |line| line.starts_with("#!")),
            Self::Xml => last_line_index(lines, |line| line.starts_with(XML_DECLARATION)),
        }
    }

    fn render(self, comment: &str) -> String {
        match self {
            Self::Python | Self::Shell => {
                let mut block = comment
                    .lines()
                    .map(|line| format!("# {line}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                block.push('\n');
                block
            }
            Self::Markdown | Self::Xml => format!("<!--\n{comment}-->\n"),
        }
    }
}

/// Position after the last line matching `pred`, or 0.
fn last_line_index(lines: &[&str], pred: impl Fn(&str) -> bool) -> usize {
    lines
        .iter()
        .rposition(|line| pred(line))
        .map_or(0, |index| index + 1)
}

pub fn insert_comment(content: &str, style: CommentStyle, comment: &str) -> String {
    let lines: Vec<&str> = content.split_inclusive('\n').collect();
    let at = style.insert_at(&lines);
    let mut out = String::with_capacity(content.len() + comment.len() + 16);
    for line in &lines[..at] {
        out.push_str(line);
    }
    out.push_str(&style.render(comment));
    for line in &lines[at..] {
        out.push_str(line);
    }
    out
}

/// Prepend the synced-file comment. Returns `false` for unsupported file types.
pub fn add_comment(path: &Path, comment: &str) -> Result<bool> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let Some(style) = CommentStyle::detect(path, &content) else {
        return Ok(false);
    };
    if comment.is_empty() {
        return Ok(true);
    }
    std::fs::write(path, insert_comment(&content, style, comment))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COMMENT: &str = "Generated from odoo-template\nDo not edit\n";

    #[test]
    fn python_comment_goes_after_coding_line() {
        let content = "#!/usr/bin/env python\n# -*- coding: utf-8 -*-\nimport os\n";
        assert_eq!(
            insert_comment(content, CommentStyle::Python, COMMENT),
            "#!/usr/bin/env python\n# -*- coding: utf-8 -*-\n# Generated from odoo-template\n# Do not edit\nimport os\n"
        );
    }

    #[test]
    fn python_comment_at_top_without_header() {
        assert_eq!(
            insert_comment("import os\n", CommentStyle::Python, "Synced"),
            "# Synced\nimport os\n"
        );
    }

    #[test]
    fn shell_comment_after_shebang() {
        assert_eq!(
            insert_comment("#!/bin/bash\nset -e\n", CommentStyle::Shell, "Synced"),
            "#!/bin/bash\n# Synced\nset -e\n"
        );
    }

    #[test]
    fn markdown_comment_on_top() {
        assert_eq!(
            insert_comment("# Title\n", CommentStyle::Markdown, COMMENT),
            "<!--\nGenerated from odoo-template\nDo not edit\n-->\n# Title\n"
        );
    }

    #[test]
    fn xml_comment_after_declaration() {
        let content = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<odoo/>\n";
        assert_eq!(
            insert_comment(content, CommentStyle::Xml, "Synced\n"),
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<!--\nSynced\n-->\n<odoo/>\n"
        );
    }

    #[test]
    fn detects_style() {
        assert_eq!(CommentStyle::detect(Path::new("a/b.py"), ""), Some(CommentStyle::Python));
        assert_eq!(CommentStyle::detect(Path::new("README.md"), ""), Some(CommentStyle::Markdown));
        assert_eq!(CommentStyle::detect(Path::new("Dockerfile.j2"), ""), None);
        assert_eq!(
            CommentStyle::detect(Path::new("bin/run"), "#!/usr/bin/env python3\n"),
            Some(CommentStyle::Python)
        );
        assert_eq!(
            CommentStyle::detect(Path::new("bin/entrypoint"), "#!/bin/bash\n"),
            Some(CommentStyle::Shell)
        );
        assert_eq!(CommentStyle::detect(Path::new("Dockerfile"), "FROM odoo\n"), None);
    }

    #[test]
    fn unknown_types_are_left_untouched() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("Dockerfile");
        std::fs::write(&path, "FROM odoo\n").unwrap();
        assert!(!add_comment(&path, "Synced").unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "FROM odoo\n");
    }
}
