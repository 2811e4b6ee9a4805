//! Mapping from changed source paths to the task sequences they trigger.

use globset::GlobMatcher;

use kiln_pipeline::{sources, Layout, PipelineError, Task};

/// A watched pattern and the tasks it runs, in order.
#[derive(Debug, Clone)]
pub struct WatchRule {
    pub pattern: String,
    pub tasks: Vec<Task>,
    matcher: GlobMatcher,
}

impl WatchRule {
    pub fn new(pattern: String, tasks: Vec<Task>) -> Result<Self, PipelineError> {
        let matcher = sources::glob(&pattern)?;
        Ok(Self {
            pattern,
            tasks,
            matcher,
        })
    }

    /// Whether a project-relative path (with `/` separators) falls under this rule.
    pub fn matches(&self, relative: &str) -> bool {
        self.matcher.is_match(relative)
    }
}

/// The watch table.
#[derive(Debug, Clone)]
pub struct WatchRules {
    rules: Vec<WatchRule>,
}

impl WatchRules {
    /// The standard table for `layout`'s source tree.
    ///
    /// Patterns are relative to the project root, matching the paths the
    /// watch loop derives from file events.
    pub fn standard(layout: &Layout) -> Result<Self, PipelineError> {
        let src = source_prefix(layout)?;
        let pages = vec![Task::ResetPages, Task::Pages, Task::Reload];
        let styles = vec![Task::Styles, Task::Reload];

        let rules = vec![
            WatchRule::new(
                format!("{}assets/js/*", src),
                vec![Task::Scripts, Task::Reload],
            )?,
            WatchRule::new(format!("{}assets/images/**/*", src), vec![Task::Images])?,
            WatchRule::new(format!("{}data/*", src), pages.clone())?,
            WatchRule::new(format!("{}assets/static/*.*", src), vec![Task::Static])?,
            WatchRule::new(format!("{}assets/sass/*", src), styles.clone())?,
            WatchRule::new(format!("{}assets/sass/**/*", src), styles)?,
            WatchRule::new(format!("{}**/*.html", src), pages)?,
        ];

        Ok(Self { rules })
    }

    pub fn rules(&self) -> &[WatchRule] {
        &self.rules
    }

    /// Task sequences to run for a batch of changed paths.
    ///
    /// Sequences come out in table order; a sequence triggered several times
    /// in one batch runs once.
    pub fn plan<S: AsRef<str>>(&self, changed: &[S]) -> Vec<Vec<Task>> {
        let mut sequences: Vec<Vec<Task>> = Vec::new();

        for rule in &self.rules {
            let triggered = changed.iter().any(|path| rule.matches(path.as_ref()));
            if triggered && !sequences.contains(&rule.tasks) {
                sequences.push(rule.tasks.clone());
            }
        }

        sequences
    }
}

/// Source directory relative to the root, with a trailing `/` unless empty.
fn source_prefix(layout: &Layout) -> Result<String, PipelineError> {
    let relative = layout
        .relative_to_root(&layout.source)
        .filter(|rel| !rel.split('/').any(|part| part == ".."))
        .ok_or_else(|| {
            PipelineError::ConfigError(format!(
                "source directory {} must be inside the project root {}",
                layout.source.display(),
                layout.root.display()
            ))
        })?;

    if relative.is_empty() {
        Ok(relative)
    } else {
        Ok(format!("{}/", relative))
    }
}
