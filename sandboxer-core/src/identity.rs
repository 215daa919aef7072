//! Stable sandbox names derived from project paths

use crate::error::{Result, SandboxError};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Prefix shared by every derived sandbox name
pub const NAME_PREFIX: &str = "sandboxer";

/// Longest name we hand to the runtime; the name doubles as the container
/// hostname, which is limited to one DNS label
pub const MAX_NAME_LEN: usize = 63;

/// Number of hex characters of the path digest kept in the name
pub const HASH_LEN: usize = 8;

/// Canonicalize a project path, resolving `.`, `..` and symlinks
///
/// The path must exist and be a directory.
pub fn canonicalize(project_path: &Path) -> Result<PathBuf> {
    let canonical = project_path
        .canonicalize()
        .map_err(|e| SandboxError::InvalidPath {
            path: project_path.to_path_buf(),
            reason: e.to_string(),
        })?;

    if !canonical.is_dir() {
        return Err(SandboxError::InvalidPath {
            path: project_path.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }

    // the path is stored in a text label and compared on every resume
    if canonical.to_str().is_none() {
        return Err(SandboxError::InvalidPath {
            path: project_path.to_path_buf(),
            reason: "path is not valid UTF-8".to_string(),
        });
    }

    Ok(canonical)
}

/// Derive the sandbox name for a project path
///
/// Paths that canonicalize to the same directory always yield the same name.
pub fn resolve(project_path: &Path) -> Result<String> {
    let canonical = canonicalize(project_path)?;
    Ok(name_for_canonical(&canonical))
}

/// Name for a path that is already canonical
///
/// Format is `sandboxer-{slug}-{hash}`. Only the slug is ever shortened to fit
/// [`MAX_NAME_LEN`]; the hash carries the uniqueness and is kept whole.
pub fn name_for_canonical(canonical: &Path) -> String {
    let hash = path_hash(canonical);
    let budget = MAX_NAME_LEN - NAME_PREFIX.len() - HASH_LEN - 2;

    let segment = canonical
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut slug = slugify(&segment);
    if slug.len() > budget {
        // slug is ASCII, so byte truncation is safe
        slug.truncate(budget);
        slug.truncate(slug.trim_end_matches('-').len());
    }
    if slug.is_empty() {
        slug.push_str("root");
    }

    format!("{}-{}-{}", NAME_PREFIX, slug, hash)
}

/// First [`HASH_LEN`] hex characters of the SHA-256 of the path bytes
pub fn path_hash(canonical: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_os_str().as_encoded_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..HASH_LEN].to_string()
}

/// Lower-case, map anything outside `[a-z0-9-]` to `-`, collapse repeats and
/// trim dashes at both ends
pub fn slugify(segment: &str) -> String {
    let mut slug = String::with_capacity(segment.len());
    for c in segment.chars().flat_map(char::to_lowercase) {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() {
            c
        } else {
            '-'
        };
        if c == '-' && (slug.is_empty() || slug.ends_with('-')) {
            continue;
        }
        slug.push(c);
    }
    slug.truncate(slug.trim_end_matches('-').len());
    slug
}

/// Check an explicit `--name` against what container runtimes accept
pub fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| SandboxError::InvalidName {
        name: name.to_string(),
        reason: reason.to_string(),
    };

    let mut chars = name.chars();
    match chars.next() {
        None => return Err(invalid("name is empty")),
        Some(c) if !c.is_ascii_alphanumeric() => {
            return Err(invalid("must start with a letter or digit"))
        }
        Some(_) => {}
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')) {
        return Err(invalid("only letters, digits, '_', '.' and '-' are allowed"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid(&format!("longer than {} characters", MAX_NAME_LEN)));
    }
    Ok(())
}
