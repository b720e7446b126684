//! Filename validation and working-directory confinement.

use std::path::{Component, Path, PathBuf};

use anyhow::{Result, anyhow};

use crate::core::grammar::ParseRejection;

const RESERVED_CHARS: [char; 7] = ['<', '>', ':', '"', '|', '?', '*'];

/// Reject names that cannot safely name a file on common platforms.
pub fn validate_filename(name: &str) -> Result<(), ParseRejection> {
    let reject = |reason| ParseRejection::InvalidFilename {
        name: name.to_string(),
        reason,
    };
    if name.trim().is_empty() {
        return Err(reject("empty name"));
    }
    if name.contains('\0') {
        return Err(reject("contains a null byte"));
    }
    if name.contains(RESERVED_CHARS) {
        return Err(reject("contains a reserved character"));
    }
    Ok(())
}

/// Join `relative` onto `root` and verify the result stays inside `root`.
///
/// Normalization is lexical (`.` and `..` are folded without touching the
/// filesystem), so the check also covers files that do not exist yet.
pub fn confine(root: &Path, relative: &str) -> Result<PathBuf> {
    let relative = relative.trim();
    if relative.is_empty() {
        return Err(anyhow!("empty path"));
    }
    let candidate = Path::new(relative);
    if candidate.has_root() || candidate.is_absolute() {
        return Err(anyhow!(
            "path '{relative}' must be relative to the working directory"
        ));
    }

    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for component in candidate.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::ParentDir => {
                if depth == 0 {
                    return Err(anyhow!(
                        "path '{relative}' escapes the working directory"
                    ));
                }
                resolved.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(anyhow!(
                    "path '{relative}' must be relative to the working directory"
                ));
            }
        }
    }
    if depth == 0 {
        return Err(anyhow!("path '{relative}' names the working directory itself"));
    }
    Ok(resolved)
}
