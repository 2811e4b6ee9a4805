//! Template cache holding parsed layouts, partials, helper templates and data.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use minijinja::{AutoEscape, Environment, Value};

use crate::config::{slash_path, Layout};
use crate::helpers;
use crate::sources;
use crate::tasks::PipelineError;

/// Name under which a layout is registered.
pub fn layout_template(name: &str) -> String {
    format!("layouts/{}", name)
}

/// Loaded templates and data, ready to render pages.
pub struct Templates {
    env: Environment<'static>,
    data: BTreeMap<String, Value>,
}

impl Templates {
    /// Load every layout, partial, helper template and data file.
    pub fn load(layout: &Layout) -> Result<Self, PipelineError> {
        let mut env = Environment::new();
        env.set_auto_escape_callback(|_| AutoEscape::Html);
        helpers::register(&mut env);

        let layouts_dir = layout.layouts_dir();
        for file in sources::collect(&layouts_dir, "*.html")? {
            add_template(&mut env, layout_template(&stem(&file)), &file)?;
        }

        // Partials are addressed by bare file name, wherever they are nested.
        let partials_dir = layout.partials_dir();
        for file in sources::collect(&partials_dir, "**/*.html")? {
            add_template(&mut env, stem(&file), &file)?;
        }

        let helpers_dir = layout.helpers_dir();
        for file in sources::collect(&helpers_dir, "**/*.html")? {
            let name = format!("helpers/{}", slash_path(&sources::relative(&file, &helpers_dir)));
            add_template(&mut env, name, &file)?;
        }

        let data = load_data(&layout.data_dir())?;

        Ok(Self { env, data })
    }

    /// Data file contents keyed by file stem.
    pub fn data(&self) -> &BTreeMap<String, Value> {
        &self.data
    }

    /// Render a page body from source.
    pub fn render_page(
        &self,
        name: &str,
        source: &str,
        context: &BTreeMap<String, Value>,
    ) -> Result<String, minijinja::Error> {
        self.env.render_named_str(name, source, context)
    }

    /// Wrap a rendered body in the named layout.
    pub fn render_layout(
        &self,
        layout: &str,
        body: String,
        context: &BTreeMap<String, Value>,
    ) -> Result<String, minijinja::Error> {
        let tmpl = self.env.get_template(&layout_template(layout))?;
        let mut context = context.clone();
        context.insert("body".to_string(), Value::from_safe_string(body));
        tmpl.render(context)
    }
}

/// Lazily loaded [`Templates`], explicitly invalidated with [`TemplateCache::reset`].
#[derive(Default)]
pub struct TemplateCache {
    loaded: Option<Templates>,
    loads: usize,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loaded templates, reading them from disk on first use after a reset.
    pub fn get(&mut self, layout: &Layout) -> Result<&Templates, PipelineError> {
        let templates = match self.loaded.take() {
            Some(templates) => templates,
            None => {
                let templates = Templates::load(layout)?;
                self.loads += 1;
                templates
            }
        };
        Ok(self.loaded.insert(templates))
    }

    /// Drop everything loaded so the next compile rereads the source tree.
    pub fn reset(&mut self) {
        self.loaded = None;
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    /// Number of times templates were read from disk.
    pub fn loads(&self) -> usize {
        self.loads
    }
}

fn stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn add_template(env: &mut Environment<'static>, name: String, path: &Path) -> Result<(), PipelineError> {
    let source = fs::read_to_string(path)
        .map_err(|e| PipelineError::ReadError(format!("{}: {}", path.display(), e)))?;
    env.add_template_owned(name, source)
        .map_err(|e| PipelineError::TemplateError(format!("{}: {}", path.display(), e)))
}

fn load_data(dir: &Path) -> Result<BTreeMap<String, Value>, PipelineError> {
    let mut data = BTreeMap::new();

    for file in sources::collect(dir, "*.{json,yml,yaml}")? {
        let content = fs::read_to_string(&file)
            .map_err(|e| PipelineError::ReadError(format!("{}: {}", file.display(), e)))?;

        let is_json = file.extension().is_some_and(|ext| ext == "json");
        let parsed: serde_json::Value = if is_json {
            serde_json::from_str(&content).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(&content).map_err(|e| e.to_string())
        }
        .map_err(|message| PipelineError::DataError {
            path: file.display().to_string(),
            message,
        })?;

        data.insert(stem(&file), Value::from_serialize(&parsed));
    }

    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PathsConfig;
    use tempfile::tempdir;

    fn site() -> (tempfile::TempDir, Layout) {
        let temp = tempdir().unwrap();
        let layout = Layout::new(temp.path(), &PathsConfig::default());
        fs::create_dir_all(layout.layouts_dir()).unwrap();
        fs::create_dir_all(layout.partials_dir().join("nav")).unwrap();
        fs::create_dir_all(layout.data_dir()).unwrap();
        fs::write(
            layout.layouts_dir().join("default.html"),
            "<main>{{ body }}</main>",
        )
        .unwrap();
        fs::write(
            layout.partials_dir().join("nav/menu.html"),
            "<nav>{{ site.name }}</nav>",
        )
        .unwrap();
        fs::write(layout.data_dir().join("site.json"), r#"{"name": "Kiln"}"#).unwrap();
        (temp, layout)
    }

    #[test]
    fn loads_partials_by_stem_and_data_by_file() {
        let (_temp, layout) = site();
        let templates = Templates::load(&layout).unwrap();

        let mut ctx = templates.data().clone();
        ctx.insert("page".to_string(), Value::from("index"));

        let body = templates
            .render_page("index.html", "{% include 'menu' %}", &ctx)
            .unwrap();
        let html = templates.render_layout("default", body, &ctx).unwrap();

        assert_eq!(html, "<main><nav>Kiln</nav></main>");
    }

    #[test]
    fn loads_yaml_data() {
        let (_temp, layout) = site();
        fs::write(layout.data_dir().join("team.yml"), "lead: Ada\n").unwrap();

        let templates = Templates::load(&layout).unwrap();
        let out = templates
            .render_page("t.html", "{{ team.lead }}", templates.data())
            .unwrap();

        assert_eq!(out, "Ada");
    }

    #[test]
    fn bad_data_file_is_an_error() {
        let (_temp, layout) = site();
        fs::write(layout.data_dir().join("broken.json"), "{").unwrap();

        assert!(matches!(
            Templates::load(&layout),
            Err(PipelineError::DataError { .. })
        ));
    }

    #[test]
    fn escapes_variables_in_html() {
        let (_temp, layout) = site();
        let templates = Templates::load(&layout).unwrap();
        let ctx: BTreeMap<String, Value> =
            [("x".to_string(), Value::from("<b>"))].into_iter().collect();

        let out = templates.render_page("p.html", "{{ x }}", &ctx).unwrap();
        assert_eq!(out, "&lt;b&gt;");
    }

    #[test]
    fn cache_reloads_only_after_reset() {
        let (_temp, layout) = site();
        let mut cache = TemplateCache::new();

        cache.get(&layout).unwrap();
        cache.get(&layout).unwrap();
        assert_eq!(cache.loads(), 1);

        fs::write(layout.data_dir().join("site.json"), r#"{"name": "Changed"}"#).unwrap();
        let templates = cache.get(&layout).unwrap();
        let stale = templates
            .render_page("p.html", "{{ site.name }}", templates.data())
            .unwrap();
        assert_eq!(stale, "Kiln");

        cache.reset();
        assert!(!cache.is_loaded());
        let templates = cache.get(&layout).unwrap();
        let fresh = templates
            .render_page("p.html", "{{ site.name }}", templates.data())
            .unwrap();
        assert_eq!(fresh, "Changed");
        assert_eq!(cache.loads(), 2);
    }
}
