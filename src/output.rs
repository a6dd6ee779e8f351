//! Console output for builds.
//!
//! Each message has a `format_*` function that returns lines (for tests) and
//! most have a `print_*` wrapper that writes them out. Format functions are
//! pure and only depend on the [`Console`] passed in, never on global state.
//!
//! ```text
//! Minifying stylesheets
//! ignored: static/css/site.min.css              (verbose)
//! cat static/css/site.css                       (verbose)
//! wrote: static/css/site.min.css                (verbose)
//! ERROR PROCESSING: static/css/bad.css -> ["cat", "static/css/bad.css"]
//!     syntax error
//! 1 of 2 files failed
//! ...
//! Build finished in 1.204 seconds
//! ```

use crate::pipeline::{BuildEvent, HandlerKind, Stage};
use crate::walk::{WalkEvent, WalkSummary};
use owo_colors::OwoColorize;
use std::time::Duration;

const SEPARATOR: &str = "-----------------------------------------------------------";

/// How messages are rendered. Plain text unless `color` is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Console {
    pub color: bool,
}

impl Console {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    pub fn ok(&self, text: &str) -> String {
        if self.color { text.green().to_string() } else { text.to_string() }
    }

    pub fn warning(&self, text: &str) -> String {
        if self.color { text.yellow().to_string() } else { text.to_string() }
    }

    pub fn error(&self, text: &str) -> String {
        if self.color { text.red().to_string() } else { text.to_string() }
    }

    pub fn info(&self, text: &str) -> String {
        if self.color { text.blue().to_string() } else { text.to_string() }
    }

    pub fn msg(&self, text: &str) -> String {
        if self.color { text.white().to_string() } else { text.to_string() }
    }
}

// ============================================================================
// Build events
// ============================================================================

/// Lines for one walk event. Routine events only arrive in verbose mode, so
/// every event received is printed.
pub fn format_walk_event(event: &WalkEvent, console: &Console) -> Vec<String> {
    match event {
        WalkEvent::Ignored(path) => {
            vec![format!("{}{}", console.warning("ignored: "), path.display())]
        }
        WalkEvent::Excluded(path) => {
            vec![format!("{}{}", console.warning("excluded: "), path.display())]
        }
        WalkEvent::Running { command, .. } => vec![console.ok(&command.join(" "))],
        WalkEvent::Written { output, .. } => {
            vec![format!("{}{}", console.ok("wrote: "), output.display())]
        }
        WalkEvent::ToolFailed {
            path,
            command,
            code,
            stderr,
        } => {
            let mut lines = vec![format!(
                "{}{} -> {:?}",
                console.error("ERROR PROCESSING: "),
                path.display(),
                command
            )];
            if code.is_none() {
                lines.push("    killed by signal".to_string());
            }
            lines.extend(stderr.lines().map(|l| format!("    {l}")));
            lines
        }
        WalkEvent::TimedOut {
            path,
            command,
            after,
        } => vec![
            format!(
                "{}{} -> {:?}",
                console.error("ERROR PROCESSING: "),
                path.display(),
                command
            ),
            format!("    timed out after {}s", after.as_secs_f64()),
        ],
        WalkEvent::HandlerFailed { path, error } => {
            vec![format!(
                "{}{}: {}",
                console.error("WRITE FAILED: "),
                path.display(),
                error
            )]
        }
        WalkEvent::Skipped { path, reason } => {
            vec![format!(
                "{}{} ({})",
                console.warning("skipped: "),
                path.display(),
                reason
            )]
        }
    }
}

/// Failure tally for a finished stage; nothing when every file went through.
pub fn format_stage_finished(summary: &WalkSummary, console: &Console) -> Vec<String> {
    let failed = summary.tool_failures + summary.write_failures;
    if failed == 0 {
        return Vec::new();
    }
    vec![console.warning(&format!(
        "{} of {} files failed",
        failed, summary.invoked
    ))]
}

pub fn format_build_event(event: &BuildEvent, console: &Console) -> Vec<String> {
    match event {
        BuildEvent::StageStarted(kind) => vec![console.info(kind.label())],
        BuildEvent::Walk(walk_event) => format_walk_event(walk_event, console),
        BuildEvent::StageFinished { summary, .. } => format_stage_finished(summary, console),
    }
}

pub fn print_build_event(event: &BuildEvent, console: &Console) {
    for line in format_build_event(event, console) {
        println!("{}", line);
    }
}

// ============================================================================
// Build result
// ============================================================================

pub fn format_build_finished(elapsed: Duration, console: &Console) -> Vec<String> {
    let secs = format!("{:.3}", elapsed.as_secs_f64());
    if !console.color {
        return vec![format!("Build finished in {secs} seconds")];
    }
    vec![
        console.warning(SEPARATOR),
        format!(
            "{}{}{}",
            console.info("Build finished in "),
            console.warning(&secs),
            console.info(" seconds")
        ),
    ]
}

pub fn print_build_finished(elapsed: Duration, console: &Console) {
    for line in format_build_finished(elapsed, console) {
        println!("{}", line);
    }
}

pub fn format_build_failed(error: &dyn std::error::Error, console: &Console) -> Vec<String> {
    vec![console.error(&error.to_string()), console.error("Build Failed!")]
}

pub fn print_build_failed(error: &dyn std::error::Error, console: &Console) {
    for line in format_build_failed(error, console) {
        eprintln!("{}", line);
    }
}

// ============================================================================
// Stage plan
// ============================================================================

fn output_naming(handler: HandlerKind) -> &'static str {
    match handler {
        HandlerKind::MinifiedHtml {
            fix_templates: true,
        } => "name.min.ext (template tags fixed)",
        HandlerKind::MinifiedHtml { .. } | HandlerKind::MinifiedText => "name.min.ext",
        HandlerKind::Gzipped => "name.ext.gz",
    }
}

/// Numbered stage list with each stage's command, patterns and output naming.
///
/// ```text
/// 1 minify-css (Minifying stylesheets)
///     command: java -jar /opt/mini/yuicompressor.jar {file}
///     include: *.css
///     exclude: *.min.* lib libs vendor .DS_Store *.pyc tmp* *.xcf
///     output:  name.min.ext
/// ```
pub fn format_stage_plan(stages: &[Stage], console: &Console) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, stage) in stages.iter().enumerate() {
        let plan = stage.plan();
        lines.push(format!(
            "{} {} ({})",
            i + 1,
            console.info(stage.kind.id()),
            stage.kind.label()
        ));
        lines.push(format!("    command: {}", console.msg(&plan.command)));
        lines.push(format!("    include: {}", plan.include.join(" ")));
        lines.push(format!("    exclude: {}", plan.exclude.join(" ")));
        lines.push(format!("    output:  {}", output_naming(plan.handler)));
        if let Some(secs) = plan.timeout_secs {
            lines.push(format!("    timeout: {secs}s"));
        }
    }
    lines
}

pub fn print_stage_plan(stages: &[Stage], console: &Console) {
    for line in format_stage_plan(stages, console) {
        println!("{}", line);
    }
}
