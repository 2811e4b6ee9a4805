//! Page compilation: front matter, data, partials and layouts to final HTML.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use minijinja::Value;

use crate::config::{slash_path, Layout, PagesConfig};
use crate::frontmatter::extract_frontmatter;
use crate::inject::InjectedAssets;
use crate::sources;
use crate::tasks::PipelineError;
use crate::templates::{TemplateCache, Templates};

/// Outcome of one run of the page task.
#[derive(Debug, Default)]
pub struct PageReport {
    pub written: Vec<PathBuf>,
}

/// Relative prefix from a page back to the output root (`""`, `"../"`, ...).
fn root_prefix(relative: &Path) -> String {
    let depth = relative.components().count().saturating_sub(1);
    "../".repeat(depth)
}

fn page_context(
    templates: &Templates,
    values: &BTreeMap<String, serde_json::Value>,
    page: &str,
    layout: &str,
    root: &str,
) -> BTreeMap<String, Value> {
    let mut context = templates.data().clone();
    for (key, value) in values {
        context.insert(key.clone(), Value::from_serialize(value));
    }
    context.insert("page".to_string(), Value::from(page));
    context.insert("layout".to_string(), Value::from(layout));
    context.insert("root".to_string(), Value::from(root));
    context
}

fn compile_page(
    templates: &Templates,
    config: &PagesConfig,
    source_path: &Path,
    relative: &Path,
) -> Result<String, PipelineError> {
    let source = fs::read_to_string(source_path)
        .map_err(|e| PipelineError::ReadError(format!("{}: {}", source_path.display(), e)))?;

    let (frontmatter, body) =
        extract_frontmatter(&source).map_err(|e| PipelineError::FrontmatterError {
            path: source_path.display().to_string(),
            message: e.to_string(),
        })?;

    let page = relative
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let layout = frontmatter
        .layout()
        .unwrap_or(&config.default_layout)
        .to_string();
    let context = page_context(
        templates,
        &frontmatter.values,
        &page,
        &layout,
        &root_prefix(relative),
    );

    let template_error = |e: minijinja::Error| {
        PipelineError::TemplateError(format!("{}: {:#}", source_path.display(), e))
    };

    let name = format!("pages/{}", slash_path(relative));
    let body = templates
        .render_page(&name, body, &context)
        .map_err(template_error)?;

    templates
        .render_layout(&layout, body, &context)
        .map_err(template_error)
}

/// Compile every page into the output root, injecting the assets found there.
///
/// Templates come from `cache`, loading them if a reset dropped them.
pub fn compile_pages(
    layout: &Layout,
    config: &PagesConfig,
    cache: &mut TemplateCache,
) -> Result<PageReport, PipelineError> {
    let pages_dir = layout.pages_dir();
    let pages = sources::collect(&pages_dir, "**/*.html")?;
    let templates = cache.get(layout)?;
    let assets = InjectedAssets::scan(layout, &config.base_url)?;
    let mut report = PageReport::default();

    for source_path in pages {
        let relative = sources::relative(&source_path, &pages_dir);
        let html = compile_page(templates, config, &source_path, &relative)?;
        let html = assets.inject(&html);

        let target = layout.output.join(&relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| PipelineError::WriteError(e.to_string()))?;
        }
        fs::write(&target, html).map_err(|e| PipelineError::WriteError(e.to_string()))?;
        report.written.push(target);
    }

    Ok(report)
}
