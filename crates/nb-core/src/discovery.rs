//! Input discovery.
//!
//! Resolves user-supplied paths (bundles, packages, directories) into a
//! deduplicated, sorted list. Bad inputs are dropped with a warning and never
//! abort resolution of the rest.

use nb_package::{has_extension, BUNDLE_EXTENSION, DOCUMENT_FILE_NAME, PACKAGE_EXTENSION};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

pub use nb_package::is_valid_bundle;

/// Controls how directories are scanned for bundles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryOptions {
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Accept any directory holding a `document.json`, whatever its name.
    pub detect_all: bool,
}

impl DiscoveryOptions {
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn detect_all(mut self, detect_all: bool) -> Self {
        self.detect_all = detect_all;
        self
    }
}

/// An input that did not resolve to anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DroppedInput {
    pub path: PathBuf,
    pub reason: String,
}

/// Outcome of resolving a list of inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Resolved {
    /// Sorted, deduplicated paths.
    pub paths: Vec<PathBuf>,
    pub dropped: Vec<DroppedInput>,
}

/// Find bundles inside `directory`.
pub fn discover_bundles(directory: &Path, options: DiscoveryOptions) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let max_depth = if options.recursive { None } else { Some(1) };
    walk_dirs(directory, max_depth, &mut |dir, depth| {
        if depth == 0 {
            return true;
        }
        let is_candidate = options.detect_all || has_extension(dir, BUNDLE_EXTENSION);
        if is_candidate && dir.join(DOCUMENT_FILE_NAME).is_file() {
            found.push(absolute(dir));
            // bundles are leaves
            return false;
        }
        true
    });
    let found = sort_dedup(found);
    debug!(
        directory = %directory.display(),
        recursive = options.recursive,
        detect_all = options.detect_all,
        count = found.len(),
        "Discovered bundles"
    );
    found
}

/// Find `.snbx` packages inside `directory`.
pub fn discover_packages(directory: &Path, recursive: bool) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let max_depth = if recursive { None } else { Some(0) };
    walk_dirs(directory, max_depth, &mut |dir, _depth| {
        if let Ok(entries) = fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_file() && has_extension(&path, PACKAGE_EXTENSION) {
                    found.push(absolute(&path));
                }
            }
        }
        true
    });
    let found = sort_dedup(found);
    debug!(
        directory = %directory.display(),
        recursive,
        count = found.len(),
        "Discovered packages"
    );
    found
}

/// Resolve bundle inputs: valid bundles are kept, directories expanded.
pub fn resolve_bundle_inputs(inputs: &[PathBuf], options: DiscoveryOptions) -> Resolved {
    let mut paths = Vec::new();
    let mut dropped = Vec::new();

    for input in inputs {
        if is_valid_bundle(input) {
            paths.push(absolute(input));
        } else if is_bundle_candidate(input) {
            // the batch reports why it cannot be opened
            debug!(path = %input.display(), "Bundle does not validate, keeping it as input");
            paths.push(absolute(input));
        } else if input.is_dir() {
            let found = discover_bundles(input, options);
            if found.is_empty() {
                drop_input(&mut dropped, input, "no notebooks found in directory");
            }
            paths.extend(found);
        } else if input.exists() {
            drop_input(&mut dropped, input, "not a notebook bundle");
        } else {
            drop_input(&mut dropped, input, "path does not exist");
        }
    }

    Resolved {
        paths: sort_dedup(paths),
        dropped,
    }
}

/// Resolve package inputs: `.snbx` files are kept, directories expanded.
pub fn resolve_package_inputs(inputs: &[PathBuf], recursive: bool) -> Resolved {
    let mut paths = Vec::new();
    let mut dropped = Vec::new();

    for input in inputs {
        if input.is_file() && has_extension(input, PACKAGE_EXTENSION) {
            paths.push(absolute(input));
        } else if input.is_dir() {
            let found = discover_packages(input, recursive);
            if found.is_empty() {
                drop_input(&mut dropped, input, "no packages found in directory");
            }
            paths.extend(found);
        } else if input.exists() {
            drop_input(&mut dropped, input, "not a .snbx package");
        } else {
            drop_input(&mut dropped, input, "path does not exist");
        }
    }

    Resolved {
        paths: sort_dedup(paths),
        dropped,
    }
}

/// Bundle paths for `inputs`, dropping anything unusable.
pub fn expand_input_paths(inputs: &[PathBuf], options: DiscoveryOptions) -> Vec<PathBuf> {
    resolve_bundle_inputs(inputs, options).paths
}

/// A directory named like a bundle or holding a `document.json`.
fn is_bundle_candidate(path: &Path) -> bool {
    path.is_dir()
        && (has_extension(path, BUNDLE_EXTENSION) || path.join(DOCUMENT_FILE_NAME).is_file())
}

/// Package paths for `inputs`, dropping anything unusable.
pub fn expand_package_paths(inputs: &[PathBuf], recursive: bool) -> Vec<PathBuf> {
    resolve_package_inputs(inputs, recursive).paths
}

fn drop_input(dropped: &mut Vec<DroppedInput>, path: &Path, reason: &str) {
    warn!(path = %path.display(), reason, "Skipping input");
    dropped.push(DroppedInput {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    });
}

/// Depth-first walk over `root` and directories below it, down to
/// `max_depth` levels (`None` = unbounded).
///
/// `visit(dir, depth)` returns whether to descend into `dir`. Canonical paths
/// guard against symlink cycles.
fn walk_dirs(root: &Path, max_depth: Option<usize>, visit: &mut dyn FnMut(&Path, usize) -> bool) {
    let mut visited: HashSet<PathBuf> = HashSet::new();
    let mut stack = vec![(root.to_path_buf(), 0usize)];

    while let Some((dir, depth)) = stack.pop() {
        let key = fs::canonicalize(&dir).unwrap_or_else(|_| dir.clone());
        if !visited.insert(key) {
            continue;
        }
        if !visit(&dir, depth) {
            continue;
        }
        if max_depth.is_some_and(|max| depth >= max) {
            continue;
        }

        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %dir.display(), error = %e, "Cannot read directory");
                continue;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push((path, depth + 1));
            }
        }
    }
}

fn sort_dedup(mut paths: Vec<PathBuf>) -> Vec<PathBuf> {
    paths.sort_by(|a, b| {
        let la = a.to_string_lossy().to_lowercase();
        let lb = b.to_string_lossy().to_lowercase();
        la.cmp(&lb).then_with(|| a.cmp(b))
    });
    paths.dedup();
    paths
}

/// Absolute, lexically normalized form of `path` (symlinks are not resolved).
pub fn absolute(path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
