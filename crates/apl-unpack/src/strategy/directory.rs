//! Directory inputs: version-control checkouts and plain directories.
//!
//! All of them extract the same way, by copying the directory's children
//! into the scratch directory with symlinks kept as symlinks. The VCS kinds
//! only differ in how they are recognized.

use crate::error::Result;
use crate::fs::copy_tree;
use crate::probe::ArchivePath;

use super::{Strategy, StrategyKind, UnpackJob};

const fn checkout(kind: StrategyKind, signature: fn(&ArchivePath) -> bool) -> Strategy {
    Strategy {
        kind,
        extensions: &[],
        dependencies: &[],
        container: true,
        signature: Some(signature),
        active: None,
        extract: copy_children,
    }
}

pub(crate) const GIT: Strategy = checkout(StrategyKind::Git, is_git);
pub(crate) const MERCURIAL: Strategy = checkout(StrategyKind::Mercurial, is_mercurial);
pub(crate) const SUBVERSION: Strategy = checkout(StrategyKind::Subversion, is_subversion);
pub(crate) const CVS: Strategy = checkout(StrategyKind::Cvs, is_cvs);
pub(crate) const BAZAAR: Strategy = checkout(StrategyKind::Bazaar, is_bazaar);
pub(crate) const FOSSIL: Strategy = checkout(StrategyKind::Fossil, is_fossil);
pub(crate) const DIRECTORY: Strategy = checkout(StrategyKind::Directory, ArchivePath::is_dir);

fn has_marker_dir(path: &ArchivePath, marker: &str) -> bool {
    path.is_dir() && path.path().join(marker).is_dir()
}

fn is_git(path: &ArchivePath) -> bool {
    // Worktrees and submodules use a `.git` file pointing at the real repo.
    path.is_dir() && path.path().join(".git").exists()
}

fn is_mercurial(path: &ArchivePath) -> bool {
    has_marker_dir(path, ".hg")
}

fn is_subversion(path: &ArchivePath) -> bool {
    has_marker_dir(path, ".svn")
}

fn is_cvs(path: &ArchivePath) -> bool {
    has_marker_dir(path, "CVS")
}

fn is_bazaar(path: &ArchivePath) -> bool {
    has_marker_dir(path, ".bzr")
}

fn is_fossil(path: &ArchivePath) -> bool {
    path.is_dir()
        && [".fslckout", "_FOSSIL_"]
            .iter()
            .any(|marker| path.path().join(marker).is_file())
}

fn copy_children(job: &UnpackJob<'_>) -> Result<()> {
    copy_tree(job.source.path(), job.unpack_dir)
}
