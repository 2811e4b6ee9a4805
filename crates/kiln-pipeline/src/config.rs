//! Site configuration and the fixed source/output layout derived from it.

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

/// Configuration file structure (kiln.toml).
///
/// Every section is optional; the defaults describe the standard layout
/// (`src/` in, `docs/` out, dev server on port 8000).
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SiteConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub styles: StylesConfig,
    #[serde(default)]
    pub scripts: ScriptsConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub pages: PagesConfig,
    #[serde(default)]
    pub serve: ServeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_source")]
    pub source: PathBuf,
    #[serde(default = "default_output")]
    pub output: PathBuf,
    #[serde(default = "default_cname")]
    pub cname: PathBuf,
    #[serde(default = "default_cache")]
    pub cache: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StylesConfig {
    /// Browserslist query used for vendor prefixing
    #[serde(default = "default_browsers")]
    pub browsers: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ScriptsConfig {
    /// Concatenate every script into this single file before minifying
    #[serde(default)]
    pub concat: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImagesConfig {
    #[serde(default = "default_png_level")]
    pub png_level: u8,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PagesConfig {
    /// Prefix for injected asset URLs
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_layout")]
    pub default_layout: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServeConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_open")]
    pub open: bool,
}

fn default_source() -> PathBuf {
    PathBuf::from("src")
}
fn default_output() -> PathBuf {
    PathBuf::from("docs")
}
fn default_cname() -> PathBuf {
    PathBuf::from("CNAME")
}
fn default_cache() -> PathBuf {
    PathBuf::from(".kiln-cache")
}
fn default_browsers() -> String {
    "last 2 versions".to_string()
}
fn default_png_level() -> u8 {
    5
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_base_url() -> String {
    "/".to_string()
}
fn default_layout() -> String {
    "default".to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_open() -> bool {
    true
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            output: default_output(),
            cname: default_cname(),
            cache: default_cache(),
        }
    }
}

impl Default for StylesConfig {
    fn default() -> Self {
        Self {
            browsers: default_browsers(),
        }
    }
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            png_level: default_png_level(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for PagesConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            default_layout: default_layout(),
        }
    }
}

impl Default for ServeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            open: default_open(),
        }
    }
}

/// Resolved source and output locations, anchored at the project root.
#[derive(Debug, Clone)]
pub struct Layout {
    pub root: PathBuf,
    pub source: PathBuf,
    pub output: PathBuf,
    pub cname: PathBuf,
    pub cache: PathBuf,
}

impl Layout {
    /// Resolve the configured paths against `root`.
    pub fn new(root: impl Into<PathBuf>, paths: &PathsConfig) -> Self {
        let root = root.into();
        Self {
            source: root.join(without_cur_dir(&paths.source)),
            output: root.join(without_cur_dir(&paths.output)),
            cname: root.join(without_cur_dir(&paths.cname)),
            cache: root.join(without_cur_dir(&paths.cache)),
            root,
        }
    }

    fn assets(&self) -> PathBuf {
        self.source.join("assets")
    }

    pub fn sass_dir(&self) -> PathBuf {
        self.assets().join("sass")
    }
    pub fn js_dir(&self) -> PathBuf {
        self.assets().join("js")
    }
    pub fn images_dir(&self) -> PathBuf {
        self.assets().join("images")
    }
    pub fn vendor_css_dir(&self) -> PathBuf {
        self.assets().join("css")
    }
    pub fn static_dir(&self) -> PathBuf {
        self.assets().join("static")
    }
    pub fn fonts_dir(&self) -> PathBuf {
        self.assets().join("fonts")
    }
    pub fn pages_dir(&self) -> PathBuf {
        self.source.join("pages")
    }
    pub fn layouts_dir(&self) -> PathBuf {
        self.source.join("layouts")
    }
    pub fn partials_dir(&self) -> PathBuf {
        self.source.join("partials")
    }
    pub fn helpers_dir(&self) -> PathBuf {
        self.source.join("helpers")
    }
    pub fn data_dir(&self) -> PathBuf {
        self.source.join("data")
    }

    pub fn css_out(&self) -> PathBuf {
        self.output.join("assets").join("css")
    }
    pub fn js_out(&self) -> PathBuf {
        self.output.join("assets").join("js")
    }
    pub fn images_out(&self) -> PathBuf {
        self.output.join("assets").join("images")
    }
    pub fn static_out(&self) -> PathBuf {
        self.output.join("assets").join("static")
    }
    pub fn fonts_out(&self) -> PathBuf {
        self.output.join("assets").join("fonts")
    }

    pub fn image_cache_dir(&self) -> PathBuf {
        self.cache.join("images")
    }

    /// Path of `path` relative to the project root, with `/` separators.
    pub fn relative_to_root(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        Some(slash_path(rel))
    }
}

/// `./src` -> `src`
fn without_cur_dir(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Render a relative path with forward slashes regardless of platform.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_standard_layout() {
        let config = SiteConfig::default();
        assert_eq!(config.paths.output, PathBuf::from("docs"));
        assert_eq!(config.serve.port, 8000);
        assert_eq!(config.styles.browsers, "last 2 versions");
        assert_eq!(config.images.png_level, 5);
        assert!(config.scripts.concat.is_none());
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let config: SiteConfig = serde_json::from_str(r#"{"serve": {"port": 9000}}"#).unwrap();
        assert_eq!(config.serve.port, 9000);
        assert_eq!(config.serve.host, "127.0.0.1");
        assert_eq!(config.pages.default_layout, "default");
    }

    #[test]
    fn layout_resolves_asset_dirs() {
        let layout = Layout::new("/site", &PathsConfig::default());
        assert_eq!(layout.sass_dir(), PathBuf::from("/site/src/assets/sass"));
        assert_eq!(layout.css_out(), PathBuf::from("/site/docs/assets/css"));
        assert_eq!(layout.image_cache_dir(), PathBuf::from("/site/.kiln-cache/images"));
        assert_eq!(
            layout.relative_to_root(Path::new("/site/src/data/x.json")),
            Some("src/data/x.json".to_string())
        );
    }

    #[test]
    fn dot_prefixed_paths_resolve_like_plain_ones() {
        let config: SiteConfig =
            serde_json::from_str(r#"{"paths": {"source": "./src", "output": "./docs"}}"#).unwrap();
        let layout = Layout::new("/site", &config.paths);

        assert_eq!(layout.source, PathBuf::from("/site/src"));
        assert_eq!(layout.output, PathBuf::from("/site/docs"));
        assert_eq!(layout.relative_to_root(&layout.source), Some("src".to_string()));
        assert_eq!(slash_path(Path::new("./src/data")), "src/data");
    }
}
