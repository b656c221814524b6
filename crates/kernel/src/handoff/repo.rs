//! Canonical repository identity for lane routing.
//!
//! A lane keys on the normalized git remote when one exists (so clones of
//! the same repo share lanes), else on the canonical filesystem path.

use std::path::Path;
use std::process::Command;

use sha2::{Digest, Sha256};

use engram_domain::handoff::RepoIdentity;

fn run_git(repo_path: &Path, args: &[&str]) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(repo_path)
        .args(args)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!value.is_empty()).then_some(value)
}

/// Normalize a git remote URL: ssh-ify `git@` shorthand, strip `.git`,
/// lowercase.
pub fn normalize_remote(remote: &str) -> Option<String> {
    let mut value = remote.trim().to_string();
    if value.is_empty() {
        return None;
    }
    if value.starts_with("git@") {
        // git@github.com:owner/repo.git -> ssh://git@github.com/owner/repo
        value = format!("ssh://{}", value.replacen(':', "/", 1));
    }
    if let Some(stripped) = value.strip_suffix(".git") {
        value = stripped.to_string();
    }
    Some(value.to_lowercase())
}

fn digest_id(prefix: &str, value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    format!("{prefix}:{}", &hex::encode(digest)[..20])
}

/// Resolve a stable repo identity for `repo_path` (default: cwd).
pub fn canonicalize_repo_identity(repo_path: Option<&str>, branch: Option<&str>) -> RepoIdentity {
    let hint = repo_path
        .map(String::from)
        .or_else(|| std::env::current_dir().ok().map(|p| p.display().to_string()))
        .unwrap_or_else(|| ".".to_string());
    let resolved = std::fs::canonicalize(&hint).unwrap_or_else(|_| hint.clone().into());

    let git_root = run_git(&resolved, &["rev-parse", "--show-toplevel"])
        .map(|root| std::fs::canonicalize(&root).unwrap_or_else(|_| root.into()));
    let canonical_path = git_root.unwrap_or(resolved);

    let remote = run_git(&canonical_path, &["config", "--get", "remote.origin.url"])
        .and_then(|raw| normalize_remote(&raw));
    let git_branch = branch
        .map(String::from)
        .or_else(|| run_git(&canonical_path, &["rev-parse", "--abbrev-ref", "HEAD"]))
        .filter(|b| b != "HEAD");

    let repo_id = match &remote {
        Some(remote) => digest_id("git", remote),
        None => digest_id("path", &canonical_path.display().to_string().to_lowercase()),
    };

    RepoIdentity {
        repo_id: Some(repo_id),
        repo_path: Some(canonical_path.display().to_string()),
        branch: git_branch,
        remote,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_normalization() {
        assert_eq!(
            normalize_remote("git@github.com:Owner/Repo.git"),
            Some("ssh://git@github.com/owner/repo".to_string())
        );
        assert_eq!(
            normalize_remote("https://github.com/owner/repo.git"),
            Some("https://github.com/owner/repo".to_string())
        );
        assert_eq!(normalize_remote("  "), None);
    }

    #[test]
    fn same_path_same_id() {
        let dir = std::env::temp_dir();
        let path = dir.display().to_string();
        let a = canonicalize_repo_identity(Some(&path), None);
        let b = canonicalize_repo_identity(Some(&path), Some("feature"));
        assert_eq!(a.repo_id, b.repo_id);
        assert!(a.repo_id.unwrap().starts_with("path:"));
        assert_eq!(b.branch.as_deref(), Some("feature"));
    }

    #[test]
    fn missing_path_still_yields_identity() {
        let identity = canonicalize_repo_identity(Some("/definitely/not/a/real/path"), None);
        assert!(identity.repo_id.is_some());
    }
}
