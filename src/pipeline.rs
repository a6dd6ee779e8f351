//! The six-stage asset build.
//!
//! ```text
//! 1. Minify HTML    *.html                  →  name.min.html
//! 2. Minify CSS     *.css                   →  name.min.css
//! 3. Minify JS      *.js                    →  name.min.js
//! 4. Gzip CSS       *.css                   →  name.css.gz
//! 5. Gzip JS        *.js                    →  name.js.gz
//! 6. Gzip images    *.jpg *.png *.gif ...   →  name.png.gz
//! ```
//!
//! Every stage walks the whole root. Minify stages skip `*.min.*` and the
//! `lib`, `libs` and `vendor` directories; gzip stages skip `*.gz`. The
//! configured `ignore` list is added to both. Since gzip runs after minify, the
//! `.min` files written by stages 1-3 are compressed too.
//!
//! Stages run strictly in order. The first stage whose walk fails stops the
//! build; tool failures inside a stage do not.

use crate::config::BuildConfig;
use crate::glob::{GlobError, Patterns};
use crate::handler::{Gzipped, MinifiedHtml, MinifiedText, OutputHandler};
use crate::transform::{TransformError, TransformSpec};
use crate::walk::{WalkError, WalkEvent, WalkJob, WalkSummary, walk};
use serde::Serialize;
use std::path::Path;
use std::sync::mpsc::{self, Sender};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Names never minified: already-minified files and third-party code.
pub const MINIFY_EXCLUDES: [&str; 4] = ["*.min.*", "lib", "libs", "vendor"];
/// Names never gzipped: existing archives.
pub const GZIP_EXCLUDES: [&str; 1] = ["*.gz"];

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("invalid {stage} command: {source}")]
    Command {
        stage: StageKind,
        #[source]
        source: TransformError,
    },
    #[error("invalid {stage} patterns: {source}")]
    Patterns {
        stage: StageKind,
        #[source]
        source: GlobError,
    },
    #[error("{stage} failed: {source}")]
    Stage {
        stage: StageKind,
        #[source]
        source: WalkError,
    },
}

/// One of the six fixed build stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    MinifyHtml,
    MinifyCss,
    MinifyJs,
    GzipCss,
    GzipJs,
    GzipImages,
}

impl StageKind {
    pub const ALL: [StageKind; 6] = [
        StageKind::MinifyHtml,
        StageKind::MinifyCss,
        StageKind::MinifyJs,
        StageKind::GzipCss,
        StageKind::GzipJs,
        StageKind::GzipImages,
    ];

    /// Short identifier, as used by `stages --json`.
    pub fn id(self) -> &'static str {
        match self {
            StageKind::MinifyHtml => "minify-html",
            StageKind::MinifyCss => "minify-css",
            StageKind::MinifyJs => "minify-js",
            StageKind::GzipCss => "gzip-css",
            StageKind::GzipJs => "gzip-js",
            StageKind::GzipImages => "gzip-images",
        }
    }

    /// Banner printed when the stage starts.
    pub fn label(self) -> &'static str {
        match self {
            StageKind::MinifyHtml => "Minifying html",
            StageKind::MinifyCss => "Minifying stylesheets",
            StageKind::MinifyJs => "Minifying scripts",
            StageKind::GzipCss => "GZipping css",
            StageKind::GzipJs => "GZipping js",
            StageKind::GzipImages => "GZipping images",
        }
    }

    pub fn is_gzip(self) -> bool {
        matches!(
            self,
            StageKind::GzipCss | StageKind::GzipJs | StageKind::GzipImages
        )
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Which [`OutputHandler`] a stage writes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum HandlerKind {
    MinifiedHtml { fix_templates: bool },
    MinifiedText,
    Gzipped,
}

impl HandlerKind {
    pub fn handler(self) -> Box<dyn OutputHandler> {
        match self {
            HandlerKind::MinifiedHtml { fix_templates } => Box::new(MinifiedHtml { fix_templates }),
            HandlerKind::MinifiedText => Box::new(MinifiedText),
            HandlerKind::Gzipped => Box::new(Gzipped),
        }
    }
}

/// A resolved stage: what to run, on which files, written how.
#[derive(Debug, Clone)]
pub struct Stage {
    pub kind: StageKind,
    pub job: WalkJob,
    pub handler: HandlerKind,
}

/// Serializable view of a [`Stage`] for `stages --json`.
#[derive(Debug, Serialize)]
pub struct StagePlan {
    pub stage: StageKind,
    pub command: String,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub handler: HandlerKind,
    pub timeout_secs: Option<u64>,
}

impl Stage {
    pub fn plan(&self) -> StagePlan {
        StagePlan {
            stage: self.kind,
            command: self.job.transform.to_string(),
            include: self
                .job
                .include
                .as_ref()
                .map(|p| p.as_strings().to_vec())
                .unwrap_or_default(),
            exclude: self
                .job
                .exclude
                .as_ref()
                .map(|p| p.as_strings().to_vec())
                .unwrap_or_default(),
            handler: self.handler,
            timeout_secs: self.job.timeout.map(|t| t.as_secs()),
        }
    }
}

/// Progress reported while building.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    StageStarted(StageKind),
    Walk(WalkEvent),
    StageFinished { stage: StageKind, summary: WalkSummary },
}

/// Per-stage counters and total wall-clock time of a completed build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub stages: Vec<(StageKind, WalkSummary)>,
    pub elapsed: Duration,
}

impl BuildReport {
    pub fn summary(&self, kind: StageKind) -> Option<&WalkSummary> {
        self.stages.iter().find(|(k, _)| *k == kind).map(|(_, s)| s)
    }

    pub fn written(&self) -> usize {
        self.stages.iter().map(|(_, s)| s.written).sum()
    }

    /// Tool runs that failed or timed out, across all stages.
    pub fn tool_failures(&self) -> usize {
        self.stages.iter().map(|(_, s)| s.tool_failures).sum()
    }
}

/// The ordered list of stages for one build.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Resolve the six stages from a validated config.
    pub fn from_config(config: &BuildConfig, verbose: bool) -> Result<Self, PipelineError> {
        let tools_dir = config.tools_dir();
        let stages = StageKind::ALL
            .into_iter()
            .map(|kind| -> Result<Stage, PipelineError> {
                let command = match kind {
                    StageKind::MinifyHtml => &config.tools.html,
                    StageKind::MinifyCss => &config.tools.css,
                    StageKind::MinifyJs => &config.tools.js,
                    _ => &config.tools.gzip,
                };
                let transform = TransformSpec::parse(command, &tools_dir)
                    .map_err(|source| PipelineError::Command { stage: kind, source })?;

                let include: Vec<String> = match kind {
                    StageKind::MinifyHtml => vec!["*.html".into()],
                    StageKind::MinifyCss | StageKind::GzipCss => vec!["*.css".into()],
                    StageKind::MinifyJs | StageKind::GzipJs => vec!["*.js".into()],
                    StageKind::GzipImages => config.images.patterns.clone(),
                };
                let defaults: &[&str] = if kind.is_gzip() {
                    &GZIP_EXCLUDES
                } else {
                    &MINIFY_EXCLUDES
                };
                let exclude = defaults
                    .iter()
                    .map(|s| s.to_string())
                    .chain(config.ignore.iter().cloned());

                let patterns = |source| PipelineError::Patterns { stage: kind, source };
                let job = WalkJob {
                    transform,
                    include: Some(Patterns::new(include).map_err(patterns)?),
                    exclude: Some(Patterns::new(exclude).map_err(patterns)?),
                    verbose,
                    timeout: config.timeout(),
                };
                let handler = match kind {
                    StageKind::MinifyHtml => HandlerKind::MinifiedHtml {
                        fix_templates: config.fix_templates,
                    },
                    StageKind::MinifyCss | StageKind::MinifyJs => HandlerKind::MinifiedText,
                    _ => HandlerKind::Gzipped,
                };
                Ok(Stage { kind, job, handler })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Run every stage over `root`, in order.
    ///
    /// Walk events are forwarded to `events` wrapped in [`BuildEvent::Walk`],
    /// bracketed by `StageStarted` / `StageFinished`.
    pub fn run(
        &self,
        root: &Path,
        events: Option<&Sender<BuildEvent>>,
    ) -> Result<BuildReport, PipelineError> {
        let started = Instant::now();
        let emit = |event: BuildEvent| {
            if let Some(tx) = events {
                let _ = tx.send(event);
            }
        };

        let mut stages = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            tracing::debug!(stage = %stage.kind, root = %root.display(), "stage starting");
            emit(BuildEvent::StageStarted(stage.kind));

            let handler = stage.handler.handler();
            let outcome = match events {
                Some(outer) => forward_walk(root, stage, handler.as_ref(), outer.clone()),
                None => walk(root, &stage.job, handler.as_ref(), None),
            };
            let summary = outcome.map_err(|source| PipelineError::Stage {
                stage: stage.kind,
                source,
            })?;

            emit(BuildEvent::StageFinished {
                stage: stage.kind,
                summary,
            });
            stages.push((stage.kind, summary));
        }

        Ok(BuildReport {
            stages,
            elapsed: started.elapsed(),
        })
    }
}

/// Walk one stage, re-wrapping its events onto the build channel.
fn forward_walk(
    root: &Path,
    stage: &Stage,
    handler: &dyn OutputHandler,
    outer: Sender<BuildEvent>,
) -> Result<WalkSummary, WalkError> {
    thread::scope(|s| {
        let (tx, rx) = mpsc::channel();
        s.spawn(move || {
            for event in rx {
                if outer.send(BuildEvent::Walk(event)).is_err() {
                    break;
                }
            }
        });
        walk(root, &stage.job, handler, Some(&tx))
    })
}
