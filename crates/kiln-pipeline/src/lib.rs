//! Build tasks for the kiln static site pipeline.
//!
//! Compiles Sass, minifies scripts, optimizes images, copies static files and
//! assembles pages from layouts, partials and data, wired together by a small
//! task graph.

pub mod config;
pub mod copy;
pub mod frontmatter;
pub mod helpers;
pub mod image_cache;
pub mod images;
pub mod inject;
pub mod pages;
pub mod scripts;
pub mod sources;
pub mod styles;
pub mod tasks;
pub mod templates;

pub use config::{Layout, SiteConfig};
pub use image_cache::ImageCache;
pub use inject::InjectedAssets;
pub use tasks::{
    build_plan, dev_plan, BuildResult, Pipeline, PipelineError, ReloadSink, Stage, Task, TaskReport,
};
pub use templates::TemplateCache;
