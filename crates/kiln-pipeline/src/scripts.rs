//! Per-file JavaScript minification with source maps.

use std::fs;
use std::path::{Path, PathBuf};

use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_minifier::{Minifier, MinifierOptions};
use oxc_parser::Parser;
use oxc_span::SourceType;

use crate::config::Layout;
use crate::sources;
use crate::tasks::PipelineError;

/// Minified script plus its source map JSON.
#[derive(Debug, Clone)]
pub struct MinifiedScript {
    pub code: String,
    pub map: Option<String>,
}

/// Outcome of one run of the script task.
#[derive(Debug, Default)]
pub struct ScriptReport {
    /// Every file written (companions, minified files and maps)
    pub written: Vec<PathBuf>,
}

/// Minify `source`, recording `name` as the source map target.
pub fn minify(source: &str, name: &str) -> Result<MinifiedScript, String> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, SourceType::cjs()).parse();

    if let Some(error) = parsed.errors.first() {
        return Err(error.to_string());
    }

    let mut program = parsed.program;
    let minified = Minifier::new(MinifierOptions::default()).build(&allocator, &mut program);

    let output = Codegen::new()
        .with_options(CodegenOptions {
            source_map_path: Some(PathBuf::from(name)),
            ..CodegenOptions::minify()
        })
        .with_scoping(minified.scoping)
        .build(&program);

    Ok(MinifiedScript {
        code: output.code,
        map: output.map.map(|m| m.to_json_string()),
    })
}

/// `app.js` -> `app-min.js`
fn minified_name(name: &str) -> String {
    match name.strip_suffix(".js") {
        Some(stem) => format!("{}-min.js", stem),
        None => format!("{}-min.js", name),
    }
}

/// Inputs as `(output file name, source text)`, concatenated when configured.
fn load_inputs(files: &[PathBuf], concat: Option<&str>) -> Result<Vec<(String, String)>, PipelineError> {
    let mut inputs = Vec::with_capacity(files.len());
    for file in files {
        let source = fs::read_to_string(file)
            .map_err(|e| PipelineError::ReadError(format!("{}: {}", file.display(), e)))?;
        let name = file
            .file_name()
            .map(|f| f.to_string_lossy().to_string())
            .unwrap_or_default();
        inputs.push((name, source));
    }

    match concat {
        Some(target) if !inputs.is_empty() => {
            let joined = inputs
                .into_iter()
                .map(|(_, source)| source)
                .collect::<Vec<_>>()
                .join("\n");
            Ok(vec![(target.to_string(), joined)])
        }
        _ => Ok(inputs),
    }
}

fn write(path: &Path, contents: &str, report: &mut ScriptReport) -> Result<(), PipelineError> {
    fs::write(path, contents).map_err(|e| PipelineError::WriteError(e.to_string()))?;
    report.written.push(path.to_path_buf());
    Ok(())
}

/// Minify every top-level script into `assets/js`.
///
/// Each file is handled on its own; a syntax error fails the task.
pub fn bundle_scripts(layout: &Layout, concat: Option<&str>) -> Result<ScriptReport, PipelineError> {
    let files = sources::collect(&layout.js_dir(), "*.js")?;
    let out_dir = layout.js_out();
    let mut report = ScriptReport::default();

    if files.is_empty() {
        return Ok(report);
    }

    fs::create_dir_all(&out_dir).map_err(|e| PipelineError::WriteError(e.to_string()))?;

    for (name, source) in load_inputs(&files, concat)? {
        write(&out_dir.join(&name), &source, &mut report)?;

        let min_name = minified_name(&name);
        let minified = minify(&source, &name).map_err(|message| PipelineError::ScriptError {
            path: name.clone(),
            message,
        })?;

        let code = match &minified.map {
            Some(map) => {
                let map_name = format!("{}.map", min_name);
                write(&out_dir.join(&map_name), map, &mut report)?;
                format!("{}\n//# sourceMappingURL={}\n", minified.code.trim_end(), map_name)
            }
            None => minified.code,
        };
        write(&out_dir.join(&min_name), &code, &mut report)?;
    }

    Ok(report)
}
