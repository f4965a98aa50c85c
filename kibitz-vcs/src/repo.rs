//! Git-backed classification of "who is editing what", built on libgit2.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use git2::{BranchType, DiffOptions, ErrorClass, ErrorCode, Repository, Tree};

use crate::diff::{parse_patch, LineDiff};
use crate::{Error, Result};

/// Metadata for one file in one repository, produced per query.
///
/// `relative_path` carries no leading separator and is only meaningful when
/// the file is tracked and not ignored. `remote_url`/`remote_branch` are
/// `None` when the current branch has no configured upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoDocInfo {
    /// Version-control provider tag.
    pub provider: &'static str,
    /// URL of the remote the tracked branch belongs to.
    pub remote_url: Option<String>,
    /// Canonical reference name of the tracked branch
    /// (e.g. `refs/remotes/origin/main`).
    pub remote_branch: Option<String>,
    /// Path of the file relative to the repository root.
    pub relative_path: PathBuf,
    /// Whether the file differs from HEAD locally, or HEAD differs from the
    /// tracked branch tip, restricted to this path.
    pub being_edited: bool,
    /// When this query ran.
    pub last_actioned: SystemTime,
}

/// Baseline a working-copy comparison is computed against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DiffBase {
    /// The last committed snapshot (HEAD).
    #[default]
    Head,
    /// The tip of the branch tracked by the current branch.
    Upstream,
}

/// Read-only adapter over the repository enclosing a file.
///
/// All operations are synchronous, re-entrant, side-effect-free reads with
/// no caching across calls. "Not in a repository", "ignored", and "no
/// change" are `None`, not errors; internal git failures also degrade to
/// `None` with a debug log so a broken repository never blocks editing.
#[derive(Debug, Default)]
pub struct GitAdapter;

struct Discovered {
    repo: Repository,
    relative: PathBuf,
}

struct UpstreamInfo<'repo> {
    tree: Tree<'repo>,
    reference_name: Option<String>,
    remote_url: Option<String>,
}

impl GitAdapter {
    /// Construct a new adapter instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Repository-relative path of `path`, with the root prefix and any
    /// leading separator stripped. `None` when no enclosing repository
    /// exists.
    pub fn locate(&self, path: &Path) -> Option<PathBuf> {
        degrade(discover(path).map(|d| d.map(|d| d.relative)), "locate", path)
    }

    /// Classify the edit state of `path`.
    ///
    /// `None` for paths outside any repository or matching its ignore
    /// rules. Otherwise `being_edited` is the OR of two comparisons
    /// restricted to this path: working copy (including index) vs HEAD,
    /// and HEAD vs the tracked branch tip.
    pub fn classify(&self, path: &Path) -> Option<RepoDocInfo> {
        degrade(self.try_classify(path), "classify", path)
    }

    /// Line positions of the working-copy-vs-HEAD patch for `path`, via the
    /// scanner in [`crate::diff`]. `None` when there is no repository, the
    /// path is ignored, or nothing changed.
    pub fn diff_against_head(&self, path: &Path) -> Option<LineDiff> {
        self.diff_against(path, DiffBase::Head)
    }

    /// Line positions of the working-copy patch against a caller-selected
    /// baseline. [`DiffBase::Upstream`] also yields `None` when the current
    /// branch has no configured upstream.
    pub fn diff_against(&self, path: &Path, base: DiffBase) -> Option<LineDiff> {
        self.patch_text_against(path, base)
            .map(|patch| parse_patch(&patch))
    }

    /// Raw unified-diff patch text between working copy (including index)
    /// and HEAD for `path`. Same `None` outcomes as
    /// [`diff_against_head`](Self::diff_against_head).
    pub fn patch_text(&self, path: &Path) -> Option<String> {
        self.patch_text_against(path, DiffBase::Head)
    }

    /// Raw unified-diff patch text against a caller-selected baseline.
    pub fn patch_text_against(&self, path: &Path, base: DiffBase) -> Option<String> {
        degrade(self.try_patch_text(path, base), "patch_text", path)
    }

    fn try_classify(&self, path: &Path) -> Result<Option<RepoDocInfo>> {
        let Some(Discovered { repo, relative }) = discover(path)? else {
            return Ok(None);
        };
        if repo.is_path_ignored(&relative)? {
            return Ok(None);
        }

        let head_tree = repo.head()?.peel_to_tree()?;
        let upstream = upstream_info(&repo)?;

        let locally_edited = {
            let mut opts = single_path_opts(&relative);
            let diff = repo.diff_tree_to_workdir_with_index(Some(&head_tree), Some(&mut opts))?;
            diff.deltas().len() > 0
        };
        // A local edit can coincidentally restore the remote content; that
        // still counts as being edited.
        let diverged_from_remote = match &upstream {
            Some(info) => {
                let mut opts = single_path_opts(&relative);
                let diff = repo.diff_tree_to_tree(Some(&info.tree), Some(&head_tree), Some(&mut opts))?;
                diff.deltas().len() > 0
            }
            None => false,
        };

        Ok(Some(RepoDocInfo {
            provider: "git",
            remote_url: upstream.as_ref().and_then(|u| u.remote_url.clone()),
            remote_branch: upstream.and_then(|u| u.reference_name),
            relative_path: relative,
            being_edited: locally_edited || diverged_from_remote,
            last_actioned: SystemTime::now(),
        }))
    }

    fn try_patch_text(&self, path: &Path, base: DiffBase) -> Result<Option<String>> {
        let Some(Discovered { repo, relative }) = discover(path)? else {
            return Ok(None);
        };
        if repo.is_path_ignored(&relative)? {
            return Ok(None);
        }

        let baseline = match base {
            DiffBase::Head => repo.head()?.peel_to_tree()?,
            DiffBase::Upstream => match upstream_info(&repo)? {
                Some(info) => info.tree,
                None => return Ok(None),
            },
        };
        let mut opts = single_path_opts(&relative);
        let diff = repo.diff_tree_to_workdir_with_index(Some(&baseline), Some(&mut opts))?;
        if diff.deltas().len() == 0 {
            return Ok(None);
        }

        let mut text = String::new();
        diff.print(git2::DiffFormat::Patch, |_delta, _hunk, line| {
            // The print callback strips the origin marker from line
            // content; re-attach it so the text scans as a plain patch.
            match line.origin() {
                '+' | '-' | ' ' => text.push(line.origin()),
                _ => {}
            }
            text.push_str(&String::from_utf8_lossy(line.content()));
            true
        })?;
        Ok(Some(text))
    }
}

fn degrade<T>(result: Result<Option<T>>, op: &str, path: &Path) -> Option<T> {
    match result {
        Ok(value) => value,
        Err(err) => {
            log::debug!("{op}({}) degraded to no-info: {err}", path.display());
            None
        }
    }
}

fn discover(path: &Path) -> Result<Option<Discovered>> {
    let canonical = std::fs::canonicalize(path).map_err(|source| Error::Io {
        path: path.display().to_string(),
        source,
    })?;

    let repo = match Repository::discover(&canonical) {
        Ok(repo) => repo,
        Err(err) if err.class() == ErrorClass::Repository && err.code() == ErrorCode::NotFound => {
            return Ok(None)
        }
        Err(err) => return Err(err.into()),
    };

    let root = repo
        .workdir()
        .map(Path::to_path_buf)
        .ok_or_else(|| Error::BareRepository {
            path: canonical.display().to_string(),
        })?;
    let root = std::fs::canonicalize(&root).map_err(|source| Error::Io {
        path: root.display().to_string(),
        source,
    })?;

    let Ok(relative) = canonical.strip_prefix(&root) else {
        return Ok(None);
    };
    let relative = relative.to_path_buf();
    Ok(Some(Discovered { repo, relative }))
}

fn single_path_opts(relative: &Path) -> DiffOptions {
    let mut opts = DiffOptions::new();
    opts.pathspec(relative);
    opts.include_untracked(true);
    opts.recurse_untracked_dirs(true);
    opts
}

fn upstream_info(repo: &Repository) -> Result<Option<UpstreamInfo<'_>>> {
    let head = match repo.head() {
        Ok(head) => head,
        Err(err)
            if matches!(
                (err.class(), err.code()),
                (
                    ErrorClass::Reference,
                    ErrorCode::NotFound | ErrorCode::UnbornBranch
                )
            ) =>
        {
            return Ok(None)
        }
        Err(err) => return Err(err.into()),
    };
    if !head.is_branch() {
        return Ok(None);
    }
    let Some(shorthand) = head.shorthand().map(str::to_owned) else {
        return Ok(None);
    };

    let local = repo.find_branch(&shorthand, BranchType::Local)?;
    let upstream = match local.upstream() {
        Ok(branch) => branch,
        Err(err) if err.code() == ErrorCode::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    let reference_name = upstream.get().name().map(str::to_owned);
    let remote_url = head.name().and_then(|refname| {
        repo.branch_upstream_remote(refname)
            .ok()
            .and_then(|buf| buf.as_str().map(str::to_owned))
            .and_then(|name| repo.find_remote(&name).ok())
            .and_then(|remote| remote.url().map(str::to_owned))
    });
    let tree = upstream.get().peel_to_tree()?;

    Ok(Some(UpstreamInfo {
        tree,
        reference_name,
        remote_url,
    }))
}
