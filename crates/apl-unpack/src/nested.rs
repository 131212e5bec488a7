//! Nested extraction: `.tar.gz` decompresses to a lone `.tar`, which is
//! extracted in turn, until the scratch directory holds something that is
//! not itself a container.

use std::path::Path;
use std::sync::Arc;

use crate::context::ExtractContext;
use crate::error::{Result, UnpackError};
use crate::fs::{children, make_owner_writable, relocate};
use crate::probe::ArchivePath;
use crate::registry;
use crate::strategy::Strategy;

/// Predicate that takes responsibility for a lone nested artifact.
///
/// Returning `true` leaves the artifact as-is instead of unwrapping it,
/// e.g. when an installer declares that file as its own payload.
pub type NestedClaim = Arc<dyn Fn(&Path) -> bool + Send + Sync>;

/// How far nested unwrapping may go for one request.
#[derive(Clone, Copy)]
pub(crate) struct Nesting<'a> {
    pub(crate) enabled: bool,
    pub(crate) claim: Option<&'a NestedClaim>,
    pub(crate) verbose: bool,
    /// Inner layers are detected the same way as the outer input.
    pub(crate) prioritize_extension: bool,
}

impl std::fmt::Debug for Nesting<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Nesting")
            .field("enabled", &self.enabled)
            .field("claim", &self.claim.is_some())
            .field("verbose", &self.verbose)
            .field("prioritize_extension", &self.prioritize_extension)
            .finish()
    }
}

/// Extract `source` with `strategy` into `unpack_dir`, then keep unwrapping
/// while the result is a single non-directory container.
///
/// # Errors
///
/// Any strategy error, or [`UnpackError::BadContainer`] once the nesting
/// depth exceeds [`crate::UnpackConfig::max_nesting_depth`].
pub(crate) fn extract_nestedly(
    strategy: &Strategy,
    source: &ArchivePath,
    unpack_dir: &Path,
    basename: &str,
    nesting: Nesting<'_>,
    ctx: &ExtractContext,
) -> Result<()> {
    unwrap_level(0, strategy, source, unpack_dir, basename, nesting, ctx)
}

fn unwrap_level(
    depth: usize,
    strategy: &Strategy,
    source: &ArchivePath,
    unpack_dir: &Path,
    basename: &str,
    nesting: Nesting<'_>,
    ctx: &ExtractContext,
) -> Result<()> {
    strategy.extract_to_dir(source, unpack_dir, basename, nesting.verbose, ctx)?;

    // Verbatim copies are final even when the copied file is an archive.
    let inner = if nesting.enabled && strategy.container {
        lone_container(unpack_dir, nesting, ctx)?
    } else {
        None
    };

    if let Some((child, next)) = inner {
        if depth + 1 > ctx.config().max_nesting_depth {
            return Err(UnpackError::bad_container(
                source.path(),
                format!("nested deeper than {} levels", ctx.config().max_nesting_depth),
            ));
        }

        let child_name = child
            .file_name()
            .map_or_else(|| basename.to_owned(), str::to_owned);
        tracing::debug!(
            "Unwrapping nested {} ({})",
            child.path().display(),
            next.name()
        );

        let scratch_root = &ctx.config().scratch_root;
        std::fs::create_dir_all(scratch_root).map_err(|e| UnpackError::io(scratch_root, e))?;
        let inner_dir = tempfile::Builder::new()
            .prefix("apl-nested-")
            .tempdir_in(scratch_root)
            .map_err(|e| UnpackError::io(scratch_root, e))?;

        unwrap_level(depth + 1, next, &child, inner_dir.path(), &child_name, nesting, ctx)?;

        std::fs::remove_file(child.path()).map_err(|e| UnpackError::io(child.path(), e))?;
        relocate(inner_dir.path(), unpack_dir)?;
    }

    make_owner_writable(unpack_dir, true)
}

/// The single entry of `dir`, if it is a regular file some container
/// strategy recognizes and nobody else has claimed first.
fn lone_container(
    dir: &Path,
    nesting: Nesting<'_>,
    ctx: &ExtractContext,
) -> Result<Option<(ArchivePath, &'static Strategy)>> {
    let entries = children(dir)?;
    let [only] = entries.as_slice() else {
        return Ok(None);
    };

    let meta = std::fs::symlink_metadata(only).map_err(|e| UnpackError::io(only, e))?;
    // Links are never followed out of the scratch tree; a lone directory is
    // already unwrapped.
    if meta.file_type().is_symlink() || meta.is_dir() {
        return Ok(None);
    }
    if nesting.claim.is_some_and(|claim| claim(only)) {
        tracing::debug!("{} is claimed; not unwrapping", only.display());
        return Ok(None);
    }

    let child = ArchivePath::new(only);
    let next = registry::detect_with(&child, nesting.prioritize_extension, ctx);
    Ok(next.container.then_some((child, next)))
}
