//! The tree processor: walk a directory, run a transform on every matching
//! file, hand each result to an [`OutputHandler`].
//!
//! ## Filtering
//!
//! Include and exclude patterns are matched against entry *names*, one
//! directory level at a time:
//!
//! - a name matching `exclude` is skipped, file or directory alike, and an
//!   excluded directory is never descended into;
//! - a *file* whose name does not match `include` is skipped;
//! - a directory is never filtered by `include`, so `*.css` still reaches
//!   `styles/theme/site.css`.
//!
//! A job without an include set does nothing at all. This guards against
//! accidentally running a tool over an entire unfiltered tree.
//!
//! ## Failure policy
//!
//! | Failure | Effect |
//! |---------|--------|
//! | tool exits non-zero / times out | reported, file skipped, walk continues |
//! | output file cannot be written | reported, walk continues |
//! | directory cannot be listed | walk aborts with [`WalkError`] |
//! | root is not a directory | walk aborts with [`WalkError`] |
//! | tool cannot be started | walk aborts with [`WalkError`] |
//!
//! Entries are visited depth-first in file-name order. Symlinked directories
//! are followed; a link that leads back to one of its own ancestors is
//! reported and skipped rather than walked forever.

use crate::glob::Patterns;
use crate::handler::OutputHandler;
use crate::transform::{ProcessResult, TransformError, TransformSpec};
use std::cell::Cell;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::time::Duration;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum WalkError {
    #[error("failed to list directory: {0}")]
    Listing(#[from] walkdir::Error),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error(transparent)]
    Transform(#[from] TransformError),
}

/// Result of walking one tree: counters on success, the first fault otherwise.
pub type WalkOutcome = Result<WalkSummary, WalkError>;

/// Everything one walk needs besides the handler.
#[derive(Debug, Clone)]
pub struct WalkJob {
    pub transform: TransformSpec,
    /// `None` disables the job entirely.
    pub include: Option<Patterns>,
    pub exclude: Option<Patterns>,
    /// Report skipped entries, command lines and written files.
    pub verbose: bool,
    /// Per-invocation limit; `None` waits for the tool indefinitely.
    pub timeout: Option<Duration>,
}

/// Counters for a completed walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkSummary {
    /// Files the transform was run on.
    pub invoked: usize,
    /// Output files successfully written.
    pub written: usize,
    /// Tool runs that exited non-zero or timed out.
    pub tool_failures: usize,
    /// Successful tool runs whose output could not be written.
    pub write_failures: usize,
    /// Entries skipped by the exclude set.
    pub ignored: usize,
    /// Files skipped for not matching the include set.
    pub excluded: usize,
    /// Symlink loops and dangling links that were skipped.
    pub skipped: usize,
}

/// Progress reported while walking.
#[derive(Debug, Clone, PartialEq)]
pub enum WalkEvent {
    Ignored(PathBuf),
    Excluded(PathBuf),
    Running {
        path: PathBuf,
        command: Vec<String>,
    },
    Written {
        source: PathBuf,
        output: PathBuf,
    },
    ToolFailed {
        path: PathBuf,
        command: Vec<String>,
        code: Option<i32>,
        stderr: String,
    },
    TimedOut {
        path: PathBuf,
        command: Vec<String>,
        after: Duration,
    },
    HandlerFailed {
        path: PathBuf,
        error: String,
    },
    Skipped {
        path: PathBuf,
        reason: String,
    },
}

/// Walk `dir`, running `job.transform` on every included file.
///
/// `events`, when given, receives a [`WalkEvent`] for every reportable step.
/// Skips, command lines and writes are only sent when `job.verbose` is set;
/// failures are always sent.
pub fn walk(
    dir: &Path,
    job: &WalkJob,
    handler: &dyn OutputHandler,
    events: Option<&Sender<WalkEvent>>,
) -> WalkOutcome {
    let mut summary = WalkSummary::default();
    let Some(include) = job.include.as_ref() else {
        return Ok(summary);
    };
    // A file root would be yielded as-is, bypassing both pattern sets.
    if fs::metadata(dir).is_ok_and(|m| !m.is_dir()) {
        return Err(WalkError::NotADirectory(dir.to_path_buf()));
    }
    let no_patterns = Patterns::empty();
    let exclude = job.exclude.as_ref().unwrap_or(&no_patterns);

    let emit = |event: WalkEvent| {
        if let Some(tx) = events {
            // The receiver going away only means nobody is printing.
            let _ = tx.send(event);
        }
    };

    let ignored = Cell::new(0usize);
    let excluded = Cell::new(0usize);

    let entries = WalkDir::new(dir)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            let name = entry.file_name().to_string_lossy();
            if exclude.is_match(&name) {
                ignored.set(ignored.get() + 1);
                if job.verbose {
                    emit(WalkEvent::Ignored(entry.path().to_path_buf()));
                }
                return false;
            }
            if !entry.file_type().is_dir() && !include.is_match(&name) {
                excluded.set(excluded.get() + 1);
                if job.verbose {
                    emit(WalkEvent::Excluded(entry.path().to_path_buf()));
                }
                return false;
            }
            true
        });

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => match skip_reason(&err) {
                Some(reason) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                    tracing::warn!(path = %path.display(), "{reason}");
                    summary.skipped += 1;
                    emit(WalkEvent::Skipped { path, reason });
                    continue;
                }
                None => return Err(err.into()),
            },
        };
        if entry.file_type().is_dir() {
            continue;
        }
        process_file(entry.path(), job, handler, &emit, &mut summary)?;
    }

    summary.ignored = ignored.get();
    summary.excluded = excluded.get();
    Ok(summary)
}

/// Errors below the root that concern a single entry rather than a listing.
fn skip_reason(err: &walkdir::Error) -> Option<String> {
    if let Some(ancestor) = err.loop_ancestor() {
        return Some(format!("symlink loop back to {}", ancestor.display()));
    }
    let dangling = err.depth() > 0
        && err
            .io_error()
            .is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound);
    dangling.then(|| "dangling symlink".to_string())
}

fn process_file(
    path: &Path,
    job: &WalkJob,
    handler: &dyn OutputHandler,
    emit: &impl Fn(WalkEvent),
    summary: &mut WalkSummary,
) -> Result<(), WalkError> {
    let command = job.transform.command_line(path);
    if job.verbose {
        emit(WalkEvent::Running {
            path: path.to_path_buf(),
            command: command.clone(),
        });
    }

    summary.invoked += 1;
    match job.transform.run(path, job.timeout)? {
        ProcessResult::Success(output) => match handler.handle(path, &output) {
            Ok(written) => {
                summary.written += 1;
                if job.verbose {
                    emit(WalkEvent::Written {
                        source: path.to_path_buf(),
                        output: written,
                    });
                }
            }
            Err(err) => {
                tracing::warn!(file = %path.display(), "output not written: {err}");
                summary.write_failures += 1;
                emit(WalkEvent::HandlerFailed {
                    path: path.to_path_buf(),
                    error: err.to_string(),
                });
            }
        },
        ProcessResult::Failure { code, stderr } => {
            summary.tool_failures += 1;
            emit(WalkEvent::ToolFailed {
                path: path.to_path_buf(),
                command,
                code,
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
            });
        }
        ProcessResult::TimedOut { after, .. } => {
            summary.tool_failures += 1;
            emit(WalkEvent::TimedOut {
                path: path.to_path_buf(),
                command,
                after,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{HandlerError, MinifiedText};
    use crate::test_helpers::*;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn job(include: Option<&[&str]>, exclude: Option<&[&str]>) -> WalkJob {
        WalkJob {
            transform: cat_transform(),
            include: include.map(|p| Patterns::new(p.iter().copied()).unwrap()),
            exclude: exclude.map(|p| Patterns::new(p.iter().copied()).unwrap()),
            verbose: false,
            timeout: None,
        }
    }

    #[test]
    fn no_include_set_does_nothing() {
        let tmp = tree(&[("a.css", "a")]);
        let handler = RecordingHandler::default();

        let summary = walk(tmp.path(), &job(None, None), &handler, None).unwrap();

        assert_eq!(summary, WalkSummary::default());
        assert!(handler.sources().is_empty());
    }

    #[test]
    fn min_files_excluded_nested_files_included() {
        let tmp = tree(&[("a.css", "A"), ("b.min.css", "B"), ("sub/c.css", "C")]);

        let summary = walk(
            tmp.path(),
            &job(Some(&["*.css"]), Some(&["*.min.*"])),
            &MinifiedText,
            None,
        )
        .unwrap();

        assert_eq!(summary.invoked, 2);
        assert_eq!(summary.written, 2);
        assert_eq!(fs::read_to_string(tmp.path().join("a.min.css")).unwrap(), "A");
        assert_eq!(fs::read_to_string(tmp.path().join("sub/c.min.css")).unwrap(), "C");
        assert!(!tmp.path().join("b.min.min.css").exists());
    }

    #[test]
    fn files_visited_depth_first_in_name_order() {
        let tmp = tree(&[("b.js", ""), ("a/z.js", ""), ("a/y.js", ""), ("c.js", "")]);
        let handler = RecordingHandler::default();

        walk(tmp.path(), &job(Some(&["*.js"]), None), &handler, None).unwrap();

        assert_eq!(relative(tmp.path(), &handler.sources()), vec!["a/y.js", "a/z.js", "b.js", "c.js"]);
    }

    #[test]
    fn handler_receives_tool_stdout() {
        let tmp = tree(&[("a.css", "body{}"), ("b.css", "p{}")]);
        let handler = RecordingHandler::default();

        walk(tmp.path(), &job(Some(&["*.css"]), None), &handler, None).unwrap();

        assert_eq!(handler.outputs(), vec![b"body{}".to_vec(), b"p{}".to_vec()]);
    }

    #[test]
    fn directories_not_filtered_by_include() {
        let tmp = tree(&[("styles/theme/site.css", "x")]);
        let handler = RecordingHandler::default();

        walk(tmp.path(), &job(Some(&["*.css"]), None), &handler, None).unwrap();

        assert_eq!(relative(tmp.path(), &handler.sources()), vec!["styles/theme/site.css"]);
    }

    #[test]
    fn excluded_directories_not_descended() {
        let tmp = tree(&[("vendor/jq.js", ""), ("lib/x.js", ""), ("app.js", "")]);
        let handler = RecordingHandler::default();

        let summary = walk(
            tmp.path(),
            &job(Some(&["*.js"]), Some(&["lib", "libs", "vendor"])),
            &handler,
            None,
        )
        .unwrap();

        assert_eq!(relative(tmp.path(), &handler.sources()), vec!["app.js"]);
        assert_eq!(summary.ignored, 2);
    }

    #[test]
    fn exclude_matches_names_not_paths() {
        // "vendor" excludes a directory of that name, not files inside
        // other directories whose path merely contains it.
        let tmp = tree(&[("js/vendor.js", ""), ("js/vendor/x.js", "")]);
        let handler = RecordingHandler::default();

        walk(tmp.path(), &job(Some(&["*.js"]), Some(&["vendor"])), &handler, None).unwrap();

        assert_eq!(relative(tmp.path(), &handler.sources()), vec!["js/vendor.js"]);
    }

    #[test]
    fn non_matching_files_counted_as_excluded() {
        let tmp = tree(&[("a.css", ""), ("b.png", ""), ("c.txt", "")]);
        let summary = walk(
            tmp.path(),
            &job(Some(&["*.css"]), None),
            &RecordingHandler::default(),
            None,
        )
        .unwrap();
        assert_eq!(summary.excluded, 2);
        assert_eq!(summary.invoked, 1);
    }

    #[test]
    fn tool_failure_does_not_stop_siblings() {
        let tmp = tree(&[("a/bad.js", "x"), ("a/good.js", "g"), ("b/good.js", "h")]);
        let mut j = job(Some(&["*.js"]), None);
        j.transform = failing_on("bad");
        let (tx, rx) = mpsc::channel();

        let summary = walk(tmp.path(), &j, &MinifiedText, Some(&tx)).unwrap();
        drop(tx);

        assert_eq!(summary.invoked, 3);
        assert_eq!(summary.tool_failures, 1);
        assert_eq!(summary.written, 2);
        assert!(!tmp.path().join("a/bad.min.js").exists());
        assert!(tmp.path().join("a/good.min.js").exists());
        assert!(tmp.path().join("b/good.min.js").exists());

        let failures: Vec<WalkEvent> = rx
            .iter()
            .filter(|e| matches!(e, WalkEvent::ToolFailed { .. }))
            .collect();
        assert_eq!(failures.len(), 1);
        match &failures[0] {
            WalkEvent::ToolFailed { path, command, code, stderr } => {
                assert!(path.ends_with("a/bad.js"));
                assert_eq!(command[0], "sh");
                assert_eq!(*code, Some(1));
                assert_eq!(stderr.trim(), "syntax error");
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn single_failing_file_still_succeeds() {
        let tmp = tree(&[("x.js", "var")]);
        let mut j = job(Some(&["*.js"]), None);
        j.transform = failing_on("x.js");

        let outcome = walk(tmp.path(), &j, &MinifiedText, None);

        assert!(outcome.is_ok());
        assert!(!tmp.path().join("x.min.js").exists());
    }

    #[test]
    fn missing_executable_aborts_walk() {
        let tmp = tree(&[("a.css", ""), ("b.css", "")]);
        let mut j = job(Some(&["*.css"]), None);
        j.transform = TransformSpec::parse(&["no-such-minifier-on-path", "{file}"], Path::new(".")).unwrap();

        let err = walk(tmp.path(), &j, &MinifiedText, None).unwrap_err();
        assert!(matches!(err, WalkError::Transform(TransformError::Spawn { .. })));
    }

    #[test]
    fn missing_root_is_listing_error() {
        let tmp = TempDir::new().unwrap();
        let err = walk(
            &tmp.path().join("nope"),
            &job(Some(&["*.css"]), None),
            &MinifiedText,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, WalkError::Listing(_)));
    }

    #[test]
    fn file_root_is_rejected() {
        let tmp = tree(&[("logo.png", "PNG")]);
        let handler = RecordingHandler::default();

        let err = walk(
            &tmp.path().join("logo.png"),
            &job(Some(&["*.css"]), Some(&["*.png"])),
            &handler,
            None,
        )
        .unwrap_err();

        assert!(matches!(err, WalkError::NotADirectory(ref p) if p.ends_with("logo.png")));
        assert!(handler.sources().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_subdirectory_aborts_walk() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tree(&[("a.css", ""), ("locked/b.css", ""), ("z.css", "")]);
        let locked = tmp.path().join("locked");
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::read_dir(&locked).is_ok() {
            // Running as root: permissions are not enforced.
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }
        let handler = RecordingHandler::default();

        let outcome = walk(tmp.path(), &job(Some(&["*.css"]), None), &handler, None);
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert!(matches!(outcome, Err(WalkError::Listing(_))));
        // Siblings after the failing directory are not visited.
        assert_eq!(relative(tmp.path(), &handler.sources()), vec!["a.css"]);
    }

    #[test]
    fn handler_failure_is_reported_and_walk_continues() {
        struct Broken;
        impl OutputHandler for Broken {
            fn handle(&self, source: &Path, _: &[u8]) -> Result<PathBuf, HandlerError> {
                Err(HandlerError::NoFileName(source.to_path_buf()))
            }
        }

        let tmp = tree(&[("a.css", ""), ("b.css", "")]);
        let (tx, rx) = mpsc::channel();
        let summary = walk(tmp.path(), &job(Some(&["*.css"]), None), &Broken, Some(&tx)).unwrap();
        drop(tx);

        assert_eq!(summary.invoked, 2);
        assert_eq!(summary.write_failures, 2);
        assert_eq!(
            rx.iter().filter(|e| matches!(e, WalkEvent::HandlerFailed { .. })).count(),
            2
        );
    }

    #[test]
    fn verbose_reports_skips_commands_and_writes() {
        let tmp = tree(&[("a.css", ""), ("b.min.css", ""), ("c.png", "")]);
        let mut j = job(Some(&["*.css"]), Some(&["*.min.*"]));
        j.verbose = true;
        let (tx, rx) = mpsc::channel();

        walk(tmp.path(), &j, &MinifiedText, Some(&tx)).unwrap();
        drop(tx);
        let events: Vec<WalkEvent> = rx.iter().collect();

        assert_eq!(events.len(), 4);
        assert!(matches!(&events[0], WalkEvent::Running { path, .. } if path.ends_with("a.css")));
        assert!(matches!(&events[1], WalkEvent::Written { output, .. } if output.ends_with("a.min.css")));
        assert!(matches!(&events[2], WalkEvent::Ignored(p) if p.ends_with("b.min.css")));
        assert!(matches!(&events[3], WalkEvent::Excluded(p) if p.ends_with("c.png")));
    }

    #[test]
    fn quiet_walk_sends_no_routine_events() {
        let tmp = tree(&[("a.css", ""), ("b.min.css", ""), ("c.png", "")]);
        let (tx, rx) = mpsc::channel();

        walk(
            tmp.path(),
            &job(Some(&["*.css"]), Some(&["*.min.*"])),
            &MinifiedText,
            Some(&tx),
        )
        .unwrap();
        drop(tx);

        assert_eq!(rx.iter().count(), 0);
    }

    #[test]
    fn rerun_overwrites_with_identical_output() {
        let tmp = tree(&[("a.css", "body{}"), ("sub/b.css", "p{}")]);
        let j = job(Some(&["*.css"]), Some(&["*.min.*"]));

        walk(tmp.path(), &j, &MinifiedText, None).unwrap();
        let first = fs::read(tmp.path().join("sub/b.min.css")).unwrap();
        let second_summary = walk(tmp.path(), &j, &MinifiedText, None).unwrap();
        let second = fs::read(tmp.path().join("sub/b.min.css")).unwrap();

        assert_eq!(first, second);
        // The .min files from the first run are not themselves re-minified.
        assert_eq!(second_summary.invoked, 2);
        assert_eq!(second_summary.ignored, 2);
    }

    #[test]
    fn timed_out_tool_is_non_fatal() {
        let tmp = tree(&[("slow.js", "")]);
        let mut j = job(Some(&["*.js"]), None);
        j.transform = TransformSpec::parse(&["sh", "-c", "exec sleep 5", "sh", "{file}"], Path::new(".")).unwrap();
        j.timeout = Some(Duration::from_millis(100));
        let (tx, rx) = mpsc::channel();

        let summary = walk(tmp.path(), &j, &MinifiedText, Some(&tx)).unwrap();
        drop(tx);

        assert_eq!(summary.tool_failures, 1);
        assert!(rx.iter().any(|e| matches!(e, WalkEvent::TimedOut { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn symlink_loop_is_skipped() {
        let tmp = tree(&[("sub/a.css", "a")]);
        std::os::unix::fs::symlink(tmp.path(), tmp.path().join("sub/back")).unwrap();
        let handler = RecordingHandler::default();

        let summary = walk(tmp.path(), &job(Some(&["*.css"]), None), &handler, None).unwrap();

        assert_eq!(relative(tmp.path(), &handler.sources()), vec!["sub/a.css"]);
        assert_eq!(summary.skipped, 1);
    }
}
