//! Task graph and runner.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use rayon::prelude::*;

use crate::config::{Layout, SiteConfig};
use crate::copy;
use crate::image_cache::ImageCache;
use crate::images::{optimize_images, ImageOptimizer};
use crate::pages::compile_pages;
use crate::scripts::bundle_scripts;
use crate::styles::{compile_styles, StyleCompiler};
use crate::templates::TemplateCache;

/// Errors that can occur while running tasks.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid pattern: {0}")]
    PatternError(String),

    #[error("File not found: {}", .0.display())]
    MissingSource(PathBuf),

    #[error("Failed to read: {0}")]
    ReadError(String),

    #[error("Failed to write output: {0}")]
    WriteError(String),

    #[error("Failed to minify script: {path}: {message}")]
    ScriptError { path: String, message: String },

    #[error("Failed to optimize image: {path}: {message}")]
    ImageError { path: String, message: String },

    #[error("Failed to parse front matter: {path}: {message}")]
    FrontmatterError { path: String, message: String },

    #[error("Failed to load data file: {path}: {message}")]
    DataError { path: String, message: String },

    #[error("Failed to render template: {0}")]
    TemplateError(String),
}

/// Receiver of live-reload notifications emitted by tasks.
pub trait ReloadSink: Send + Sync {
    /// Ask every client to reload the page.
    fn reload(&self);

    /// Push freshly written files; stylesheets can be swapped in place.
    fn stream(&self, changed: &[PathBuf]);
}

/// A unit of work in the task graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Task {
    Clean,
    Styles,
    Scripts,
    Images,
    FontAwesome,
    Static,
    Fonts,
    Cname,
    Pages,
    ResetPages,
    Reload,
}

impl Task {
    pub fn name(&self) -> &'static str {
        match self {
            Task::Clean => "clean",
            Task::Styles => "styles",
            Task::Scripts => "scripts",
            Task::Images => "images",
            Task::FontAwesome => "font-awesome",
            Task::Static => "static",
            Task::Fonts => "fonts",
            Task::Cname => "cname",
            Task::Pages => "pages",
            Task::ResetPages => "reset-pages",
            Task::Reload => "reload",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One step of a plan. Each stage completes before the next starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Series(Task),
    Parallel(Vec<Task>),
}

/// Production build: clean, every asset task at once, then pages.
pub fn build_plan() -> Vec<Stage> {
    vec![
        Stage::Series(Task::Clean),
        Stage::Parallel(vec![
            Task::Styles,
            Task::Scripts,
            Task::Images,
            Task::FontAwesome,
            Task::Static,
            Task::Fonts,
            Task::Cname,
        ]),
        Stage::Series(Task::Pages),
    ]
}

/// Development startup, run before the watcher and server start.
///
/// Pages compile before the assets exist, so the first dev compile injects
/// no asset references until a watched change recompiles them.
pub fn dev_plan() -> Vec<Stage> {
    vec![
        Stage::Series(Task::Clean),
        Stage::Series(Task::Pages),
        Stage::Parallel(vec![
            Task::Fonts,
            Task::Styles,
            Task::Scripts,
            Task::Images,
            Task::FontAwesome,
            Task::Static,
            Task::ResetPages,
            Task::Cname,
        ]),
    ]
}

/// What a task did.
#[derive(Debug)]
pub struct TaskReport {
    pub task: Task,
    pub written: Vec<PathBuf>,
    /// Inputs skipped after a recoverable error
    pub failed: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub duration_ms: u64,
}

impl TaskReport {
    fn new(task: Task) -> Self {
        Self {
            task,
            written: Vec::new(),
            failed: 0,
            cache_hits: 0,
            cache_misses: 0,
            duration_ms: 0,
        }
    }

    fn with_written(task: Task, written: Vec<PathBuf>) -> Self {
        Self {
            written,
            ..Self::new(task)
        }
    }
}

/// Result of running a whole plan.
#[derive(Debug)]
pub struct BuildResult {
    pub reports: Vec<TaskReport>,
    pub duration_ms: u64,
    pub output_dir: PathBuf,
}

impl BuildResult {
    pub fn report(&self, task: Task) -> Option<&TaskReport> {
        self.reports.iter().find(|r| r.task == task)
    }
}

/// Runs tasks against one project.
pub struct Pipeline {
    config: SiteConfig,
    layout: Layout,
    styles: StyleCompiler,
    optimizer: ImageOptimizer,
    image_cache: ImageCache,
    templates: Mutex<TemplateCache>,
    reload: Option<Arc<dyn ReloadSink>>,
}

impl Pipeline {
    /// Create a pipeline for the project rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, config: SiteConfig) -> Result<Self, PipelineError> {
        let layout = Layout::new(root, &config.paths);
        let styles = StyleCompiler::new(&config.styles.browsers)?;
        let optimizer = ImageOptimizer::new(&config.images);
        let image_cache = ImageCache::new(layout.image_cache_dir());

        Ok(Self {
            config,
            layout,
            styles,
            optimizer,
            image_cache,
            templates: Mutex::new(TemplateCache::new()),
            reload: None,
        })
    }

    /// Send reload notifications to `sink`.
    pub fn with_reload(mut self, sink: Arc<dyn ReloadSink>) -> Self {
        self.reload = Some(sink);
        self
    }

    pub fn config(&self) -> &SiteConfig {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    fn stream(&self, written: &[PathBuf]) {
        if let Some(sink) = &self.reload {
            if !written.is_empty() {
                sink.stream(written);
            }
        }
    }

    fn templates(&self) -> std::sync::MutexGuard<'_, TemplateCache> {
        self.templates.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a single task to completion.
    pub fn run_task(&self, task: Task) -> Result<TaskReport, PipelineError> {
        let start = Instant::now();
        tracing::info!("Starting '{}'...", task);

        let result = self.execute(task);

        let elapsed = start.elapsed().as_millis() as u64;
        match result {
            Ok(mut report) => {
                report.duration_ms = elapsed;
                tracing::info!("Finished '{}' after {} ms", task, elapsed);
                Ok(report)
            }
            Err(e) => {
                tracing::error!("'{}' errored after {} ms: {}", task, elapsed, e);
                Err(e)
            }
        }
    }

    fn execute(&self, task: Task) -> Result<TaskReport, PipelineError> {
        let layout = &self.layout;

        match task {
            Task::Clean => {
                copy::clean(&layout.output)?;
                Ok(TaskReport::new(task))
            }
            Task::Styles => {
                let styles = compile_styles(layout, &self.styles)?;
                self.stream(&styles.written);
                Ok(TaskReport {
                    failed: styles.failed.len(),
                    ..TaskReport::with_written(task, styles.written)
                })
            }
            Task::Scripts => {
                let scripts = bundle_scripts(layout, self.config.scripts.concat.as_deref())?;
                self.stream(&scripts.written);
                Ok(TaskReport::with_written(task, scripts.written))
            }
            Task::Images => {
                let images = optimize_images(layout, &self.optimizer, &self.image_cache)?;
                Ok(TaskReport {
                    cache_hits: images.cache_hits,
                    cache_misses: images.cache_misses,
                    ..TaskReport::with_written(task, images.written)
                })
            }
            Task::FontAwesome => {
                let source = layout.vendor_css_dir().join("font-awesome.min.css");
                let target = layout.css_out().join("font-awesome.min.css");
                let written = copy::copy_required(&source, &target)?;
                Ok(TaskReport::with_written(task, vec![written]))
            }
            Task::Static => {
                let written =
                    copy::copy_matching(&layout.static_dir(), copy::STATIC_PATTERN, &layout.static_out())?;
                Ok(TaskReport::with_written(task, written))
            }
            Task::Fonts => {
                let written =
                    copy::copy_matching(&layout.fonts_dir(), copy::FONT_PATTERN, &layout.fonts_out())?;
                self.stream(&written);
                Ok(TaskReport::with_written(task, written))
            }
            Task::Cname => {
                let written = copy::copy_required(&layout.cname, &layout.output.join("CNAME"))?;
                Ok(TaskReport::with_written(task, vec![written]))
            }
            Task::Pages => {
                let mut cache = self.templates();
                let pages = compile_pages(layout, &self.config.pages, &mut cache)?;
                Ok(TaskReport::with_written(task, pages.written))
            }
            Task::ResetPages => {
                tracing::info!("Clearing page template cache");
                self.templates().reset();
                Ok(TaskReport::new(task))
            }
            Task::Reload => {
                if let Some(sink) = &self.reload {
                    sink.reload();
                }
                Ok(TaskReport::new(task))
            }
        }
    }

    /// Run tasks one after another, stopping at the first failure.
    pub fn run_series(&self, tasks: &[Task]) -> Result<Vec<TaskReport>, PipelineError> {
        tasks.iter().map(|task| self.run_task(*task)).collect()
    }

    /// Run tasks concurrently. Every task runs to completion; the first error is returned.
    pub fn run_parallel(&self, tasks: &[Task]) -> Result<Vec<TaskReport>, PipelineError> {
        let results: Vec<Result<TaskReport, PipelineError>> =
            tasks.par_iter().map(|task| self.run_task(*task)).collect();
        results.into_iter().collect()
    }

    /// Run a plan stage by stage.
    pub fn run_plan(&self, plan: &[Stage]) -> Result<BuildResult, PipelineError> {
        let start = Instant::now();
        let mut reports = Vec::new();

        for stage in plan {
            match stage {
                Stage::Series(task) => reports.push(self.run_task(*task)?),
                Stage::Parallel(tasks) => reports.extend(self.run_parallel(tasks)?),
            }
        }

        Ok(BuildResult {
            reports,
            duration_ms: start.elapsed().as_millis() as u64,
            output_dir: self.layout.output.clone(),
        })
    }

    /// One-shot production build.
    pub fn build(&self) -> Result<BuildResult, PipelineError> {
        self.run_plan(&build_plan())
    }
}
