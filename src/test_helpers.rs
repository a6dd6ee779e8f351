//! Shared test utilities: throwaway asset trees, stand-in transforms built
//! from POSIX tools, and a handler that only records what it was given.
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = tree(&[("a.css", "body{}"), ("sub/b.css", "p{}")]);
//! let handler = RecordingHandler::default();
//! walk(tmp.path(), &job, &handler, None).unwrap();
//! assert_eq!(relative(tmp.path(), &handler.sources()), vec!["a.css", "sub/b.css"]);
//! ```

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::handler::{HandlerError, OutputHandler};
use crate::transform::TransformSpec;

// =========================================================================
// Fixture trees
// =========================================================================

/// Create a temp directory holding `files` (relative path → contents).
/// Parent directories are created as needed.
pub fn tree(files: &[(&str, &str)]) -> TempDir {
    let tmp = TempDir::new().unwrap();
    for (rel, contents) in files {
        let path = tmp.path().join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, contents).unwrap();
    }
    tmp
}

/// Paths relative to `root`, `/`-separated, in the given order.
pub fn relative(root: &Path, paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| {
            p.strip_prefix(root)
                .unwrap_or_else(|_| panic!("{} is not under {}", p.display(), root.display()))
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect()
}

// =========================================================================
// Stand-in transforms
// =========================================================================

/// `cat {file}`: the "minified" output is the input unchanged.
pub fn cat_transform() -> TransformSpec {
    TransformSpec::parse(&["cat", "{file}"], Path::new(".")).unwrap()
}

/// Like [`cat_transform`], but exits 1 with `syntax error` on stderr for any
/// file whose path contains `needle`.
pub fn failing_on(needle: &str) -> TransformSpec {
    let script = format!(
        r#"case "$1" in *{needle}*) echo "syntax error" >&2; exit 1;; *) cat "$1";; esac"#
    );
    TransformSpec::parse(&["sh", "-c", script.as_str(), "sh", "{file}"], Path::new(".")).unwrap()
}

// =========================================================================
// Recording handler
// =========================================================================

/// Handler that remembers every source it was called with and writes nothing.
#[derive(Default)]
pub struct RecordingHandler {
    calls: RefCell<Vec<(PathBuf, Vec<u8>)>>,
}

impl RecordingHandler {
    /// Sources in call order.
    pub fn sources(&self) -> Vec<PathBuf> {
        self.calls.borrow().iter().map(|(p, _)| p.clone()).collect()
    }

    /// Output bytes passed for each call, in call order.
    pub fn outputs(&self) -> Vec<Vec<u8>> {
        self.calls.borrow().iter().map(|(_, o)| o.clone()).collect()
    }
}

impl OutputHandler for RecordingHandler {
    fn handle(&self, source: &Path, output: &[u8]) -> Result<PathBuf, HandlerError> {
        self.calls
            .borrow_mut()
            .push((source.to_path_buf(), output.to_vec()));
        Ok(source.to_path_buf())
    }
}
