//! Session context: working directory, files created this run, spawned processes.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::warn;

use crate::core::path::confine;
use crate::io::registry::ProcessRegistry;

/// Resolve the operator-supplied working directory to an absolute path,
/// creating it when missing.
pub fn resolve_workdir(arg: &Path) -> Result<PathBuf> {
    let joined = if arg.is_absolute() {
        arg.to_path_buf()
    } else {
        env::current_dir()
            .context("read current directory")?
            .join(arg)
    };
    fs::create_dir_all(&joined)
        .with_context(|| format!("create working directory {}", joined.display()))?;
    fs::canonicalize(&joined).with_context(|| format!("resolve {}", joined.display()))
}

/// Absolute paths written this session, in first-write order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreatedFileSet {
    paths: Vec<PathBuf>,
}

impl CreatedFileSet {
    /// Returns `false` if the path was already present.
    pub fn insert(&mut self, path: PathBuf) -> bool {
        if self.contains(&path) {
            return false;
        }
        self.paths.push(path);
        true
    }

    pub fn remove(&mut self, path: &Path) -> bool {
        let before = self.paths.len();
        self.paths.retain(|p| p != path);
        self.paths.len() != before
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

pub struct Workspace {
    root: PathBuf,
    created: CreatedFileSet,
    processes: ProcessRegistry,
}

impl Workspace {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            created: CreatedFileSet::default(),
            processes: ProcessRegistry::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn created(&self) -> &CreatedFileSet {
        &self.created
    }

    pub fn created_mut(&mut self) -> &mut CreatedFileSet {
        &mut self.created
    }

    pub fn processes(&self) -> &ProcessRegistry {
        &self.processes
    }

    pub fn processes_mut(&mut self) -> &mut ProcessRegistry {
        &mut self.processes
    }

    /// Confine a model-supplied relative path to the working directory.
    ///
    /// The lexical check is followed by resolving the deepest existing
    /// ancestor, so symlinks inside the root cannot lead outside it.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let path = confine(&self.root, relative)?;
        let root = fs::canonicalize(&self.root)
            .with_context(|| format!("resolve {}", self.root.display()))?;
        let Some(existing) = path
            .ancestors()
            .find(|ancestor| fs::symlink_metadata(ancestor).is_ok())
        else {
            bail!("path '{relative}' has no existing ancestor");
        };
        let resolved = fs::canonicalize(existing)
            .with_context(|| format!("resolve {}", existing.display()))?;
        if !resolved.starts_with(&root) {
            bail!("path '{relative}' resolves outside the working directory");
        }
        Ok(path)
    }

    /// Path relative to the root for display, falling back to the full path.
    pub fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .display()
            .to_string()
    }

    /// Contents of every created file, rendered for escalation feedback.
    pub fn code_context(&self) -> String {
        let mut blocks = Vec::new();
        for path in self.created.iter() {
            match fs::read_to_string(path) {
                Ok(content) => blocks.push(format!(
                    "File: {}\n---\n{}",
                    self.display_path(path),
                    content
                )),
                Err(err) => {
                    warn!(path = %path.display(), err = %err, "skipping unreadable file in code context");
                }
            }
        }
        blocks.join("\n\n")
    }

    /// Terminate every spawned process still tracked.
    pub fn shutdown(&mut self) -> usize {
        self.processes.terminate_all()
    }
}
