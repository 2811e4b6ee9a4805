//! Sass compilation, vendor prefixing and CSS minification.

use std::fs;
use std::path::{Path, PathBuf};

use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use parcel_sourcemap::SourceMap;

use crate::config::Layout;
use crate::sources;
use crate::tasks::PipelineError;

/// Failure compiling a single stylesheet. Never fatal to the task.
#[derive(Debug, thiserror::Error)]
pub enum StyleError {
    #[error("Sass error: {0}")]
    Sass(String),

    #[error("CSS error: {0}")]
    Css(String),
}

/// Minified CSS plus its source map JSON.
#[derive(Debug, Clone)]
pub struct CompiledStyle {
    pub code: String,
    pub map: String,
}

/// Outcome of one run of the style task.
#[derive(Debug, Default)]
pub struct StyleReport {
    /// CSS files written
    pub written: Vec<PathBuf>,
    /// Entries that failed to compile
    pub failed: Vec<PathBuf>,
}

/// Compiles Sass entries down to prefixed, minified CSS.
pub struct StyleCompiler {
    targets: Targets,
}

impl StyleCompiler {
    /// Create a compiler targeting a browserslist query such as `last 2 versions`.
    pub fn new(browsers: &str) -> Result<Self, PipelineError> {
        let queries: Vec<&str> = browsers
            .split(',')
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .collect();

        let browsers = Browsers::from_browserslist(queries)
            .map_err(|e| PipelineError::ConfigError(format!("browsers: {}", e)))?;

        Ok(Self {
            targets: Targets {
                browsers,
                ..Targets::default()
            },
        })
    }

    /// Compile one Sass entry file.
    pub fn compile_file(&self, entry: &Path, load_path: &Path) -> Result<CompiledStyle, StyleError> {
        let options = grass::Options::default()
            .style(grass::OutputStyle::Expanded)
            .load_path(load_path);

        let css = grass::from_path(entry, &options).map_err(|e| StyleError::Sass(e.to_string()))?;

        let filename = entry
            .file_name()
            .and_then(|f| f.to_str())
            .unwrap_or("style.scss");

        self.process_css(&css, filename)
    }

    /// Prefix and minify already-compiled CSS, mapping back to `filename`.
    pub fn process_css(&self, css: &str, filename: &str) -> Result<CompiledStyle, StyleError> {
        let mut stylesheet = StyleSheet::parse(
            css,
            ParserOptions {
                filename: filename.to_string(),
                ..ParserOptions::default()
            },
        )
        .map_err(|e| StyleError::Css(e.to_string()))?;

        stylesheet
            .minify(MinifyOptions {
                targets: self.targets,
                ..MinifyOptions::default()
            })
            .map_err(|e| StyleError::Css(e.to_string()))?;

        let mut source_map = SourceMap::new("/");
        let source_index = source_map.add_source(filename);
        source_map
            .set_source_content(source_index as usize, css)
            .map_err(|e| StyleError::Css(e.to_string()))?;

        let output = stylesheet
            .to_css(PrinterOptions {
                minify: true,
                source_map: Some(&mut source_map),
                targets: self.targets,
                ..PrinterOptions::default()
            })
            .map_err(|e| StyleError::Css(e.to_string()))?;

        let map = source_map
            .to_json(None)
            .map_err(|e| StyleError::Css(e.to_string()))?;

        Ok(CompiledStyle {
            code: output.code,
            map,
        })
    }
}

/// Sass partials (`_name.scss`) are imported, never compiled on their own.
fn is_entry(path: &Path) -> bool {
    path.file_name()
        .and_then(|f| f.to_str())
        .is_some_and(|name| !name.starts_with('_'))
}

/// Compile every top-level stylesheet into `assets/css`.
///
/// A broken stylesheet is logged and skipped; the others still compile.
pub fn compile_styles(layout: &Layout, compiler: &StyleCompiler) -> Result<StyleReport, PipelineError> {
    let sass_dir = layout.sass_dir();
    let out_dir = layout.css_out();
    let mut report = StyleReport::default();

    for entry in sources::collect(&sass_dir, "*.scss")? {
        if !is_entry(&entry) {
            continue;
        }

        let compiled = match compiler.compile_file(&entry, &sass_dir) {
            Ok(compiled) => compiled,
            Err(e) => {
                tracing::error!("{}: {}", entry.display(), e);
                report.failed.push(entry);
                continue;
            }
        };

        let stem = entry
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("style");
        let css_name = format!("{}.css", stem);
        let map_name = format!("{}.map", css_name);

        fs::create_dir_all(&out_dir).map_err(|e| PipelineError::WriteError(e.to_string()))?;

        let code = format!("{}\n/*# sourceMappingURL={} */\n", compiled.code, map_name);
        let css_path = out_dir.join(&css_name);
        fs::write(&css_path, code).map_err(|e| PipelineError::WriteError(e.to_string()))?;
        fs::write(out_dir.join(&map_name), compiled.map)
            .map_err(|e| PipelineError::WriteError(e.to_string()))?;

        tracing::debug!("Compiled {}", css_path.display());
        report.written.push(css_path);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;
    use tempfile::tempdir;

    fn compiler() -> StyleCompiler {
        StyleCompiler::new("last 2 versions").unwrap()
    }

    #[test]
    fn minifies_css() {
        let css = r#"
.button {
    background-color: blue;
    padding: 10px;
}
        "#;

        let compiled = compiler().process_css(css, "button.css").unwrap();

        assert!(!compiled.code.contains('\n'));
        assert!(compiled.code.contains(".button"));
        assert!(compiled.map.contains("button.css"));
    }

    #[test]
    fn adds_vendor_prefixes() {
        let css = ".no-select { user-select: none; }";

        let compiled = compiler().process_css(css, "prefix.css").unwrap();

        assert!(
            compiled.code.contains("-webkit-user-select") || compiled.code.contains("-ms-user-select"),
            "expected a prefixed declaration in {}",
            compiled.code
        );
    }

    #[test]
    fn compiles_nested_sass_with_partials() {
        let temp = tempdir().unwrap();
        let layout = Layout::new(temp.path(), &PathsConfig::default());
        let sass = layout.sass_dir();
        fs::create_dir_all(sass.join("base")).unwrap();
        fs::write(sass.join("base/_colors.scss"), "$accent: #ff0000;").unwrap();
        fs::write(
            sass.join("main.scss"),
            "@import 'base/colors';\n.a { .b { color: $accent; } }\n",
        )
        .unwrap();

        let report = compile_styles(&layout, &compiler()).unwrap();

        assert_eq!(report.written.len(), 1);
        assert!(report.failed.is_empty());
        let css = fs::read_to_string(layout.css_out().join("main.css")).unwrap();
        assert!(css.contains(".a .b{color:red}"));
        assert!(css.contains("sourceMappingURL=main.css.map"));
        assert!(layout.css_out().join("main.css.map").exists());
    }

    #[test]
    fn broken_stylesheet_does_not_stop_others() {
        let temp = tempdir().unwrap();
        let layout = Layout::new(temp.path(), &PathsConfig::default());
        let sass = layout.sass_dir();
        fs::create_dir_all(&sass).unwrap();
        fs::write(sass.join("a-broken.scss"), ".a { color: ").unwrap();
        fs::write(sass.join("b-good.scss"), ".b { margin: 0; }").unwrap();
        fs::write(sass.join("_partial.scss"), ".p { margin: 0; }").unwrap();

        let report = compile_styles(&layout, &compiler()).unwrap();

        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.written.len(), 1);
        assert!(layout.css_out().join("b-good.css").exists());
        assert!(!layout.css_out().join("_partial.css").exists());
    }
}
