//! Injection of generated CSS/JS references into compiled pages.

use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::config::{slash_path, Layout};
use crate::sources;
use crate::tasks::PipelineError;

static INJECT_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)(<!--\s*inject:(css|js)\s*-->)(.*?)(<!--\s*endinject\s*-->)")
        .expect("valid inject regex")
});

/// URLs of the generated assets a page should reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InjectedAssets {
    pub css: Vec<String>,
    pub js: Vec<String>,
}

impl InjectedAssets {
    /// Collect the stylesheets and minified scripts currently in the output tree.
    ///
    /// Only files that already exist are found; nothing waits for running tasks.
    pub fn scan(layout: &Layout, base_url: &str) -> Result<Self, PipelineError> {
        let to_url = |path: &Path| {
            let relative = sources::relative(path, &layout.output);
            format!("{}/{}", base_url.trim_end_matches('/'), slash_path(&relative))
        };

        let css = sources::collect(&layout.css_out(), "*.css")?;
        let js = sources::collect(&layout.js_out(), "*-min.js")?;

        Ok(Self {
            css: css.iter().map(|p| to_url(p)).collect(),
            js: js.iter().map(|p| to_url(p)).collect(),
        })
    }

    fn tags(&self, kind: &str) -> Vec<String> {
        match kind {
            "css" => self
                .css
                .iter()
                .map(|url| format!(r#"<link rel="stylesheet" href="{}">"#, url))
                .collect(),
            _ => self
                .js
                .iter()
                .map(|url| format!(r#"<script src="{}"></script>"#, url))
                .collect(),
        }
    }

    /// Place references into `html`.
    ///
    /// `<!-- inject:css -->`/`<!-- inject:js -->` blocks are replaced with the
    /// current references. Without a marker, CSS goes before `</head>` and JS
    /// before `</body>`.
    pub fn inject(&self, html: &str) -> String {
        let mut has_css_marker = false;
        let mut has_js_marker = false;

        let mut output = INJECT_BLOCK
            .replace_all(html, |caps: &Captures| {
                let kind = &caps[2];
                if kind == "css" {
                    has_css_marker = true;
                } else {
                    has_js_marker = true;
                }
                let tags = self.tags(kind);
                if tags.is_empty() {
                    format!("{}{}", &caps[1], &caps[4])
                } else {
                    format!("{}\n{}\n{}", &caps[1], tags.join("\n"), &caps[4])
                }
            })
            .into_owned();

        if !has_css_marker && !self.css.is_empty() {
            if let Some(pos) = output.find("</head>") {
                output.insert_str(pos, &format!("{}\n", self.tags("css").join("\n")));
            }
        }

        if !has_js_marker && !self.js.is_empty() {
            if let Some(pos) = output.rfind("</body>") {
                output.insert_str(pos, &format!("{}\n", self.tags("js").join("\n")));
            }
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    fn assets() -> InjectedAssets {
        InjectedAssets {
            css: vec!["/assets/css/main.css".to_string()],
            js: vec!["/assets/js/app-min.js".to_string()],
        }
    }

    #[test]
    fn fills_marker_blocks() {
        let html = "<head><!-- inject:css --><!-- endinject --></head>\
                    <body><!-- inject:js -->stale<!-- endinject --></body>";

        let out = assets().inject(html);

        assert_eq!(
            out,
            "<head><!-- inject:css -->\n<link rel=\"stylesheet\" href=\"/assets/css/main.css\">\n<!-- endinject --></head>\
             <body><!-- inject:js -->\n<script src=\"/assets/js/app-min.js\"></script>\n<!-- endinject --></body>"
        );
    }

    #[test]
    fn injection_is_idempotent() {
        let html = "<head><!-- inject:css --><!-- endinject --></head><body></body>";
        let once = assets().inject(html);
        let twice = assets().inject(&once);

        assert_eq!(once, twice);
        assert_eq!(twice.matches("main.css").count(), 1);
        assert_eq!(twice.matches("app-min.js").count(), 1);
    }

    #[test]
    fn falls_back_to_head_and_body() {
        let out = assets().inject("<html><head></head><body><p>x</p></body></html>");

        assert!(out.contains("<link rel=\"stylesheet\" href=\"/assets/css/main.css\">\n</head>"));
        assert!(out.contains("<script src=\"/assets/js/app-min.js\"></script>\n</body>"));
    }

    #[test]
    fn fragment_without_anchors_is_untouched() {
        assert_eq!(assets().inject("<p>fragment</p>"), "<p>fragment</p>");
    }

    #[test]
    fn scans_output_tree() {
        let temp = tempdir().unwrap();
        let layout = Layout::new(temp.path(), &PathsConfig::default());
        fs::create_dir_all(layout.css_out()).unwrap();
        fs::create_dir_all(layout.js_out()).unwrap();
        fs::write(layout.css_out().join("main.css"), "").unwrap();
        fs::write(layout.css_out().join("main.css.map"), "").unwrap();
        fs::write(layout.js_out().join("app.js"), "").unwrap();
        fs::write(layout.js_out().join("app-min.js"), "").unwrap();

        let found = InjectedAssets::scan(&layout, "/").unwrap();

        assert_eq!(found, assets());
    }
}
