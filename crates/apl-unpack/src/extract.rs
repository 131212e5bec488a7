//! Extraction entry point.
//!
//! Every call works in its own scratch directory under
//! [`UnpackConfig::scratch_root`](crate::UnpackConfig::scratch_root) and only
//! touches the destination once extraction has fully succeeded.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::context::ExtractContext;
use crate::error::{Result, UnpackError};
use crate::fs::relocate;
use crate::nested::{NestedClaim, Nesting, extract_nestedly};
use crate::probe::ArchivePath;
use crate::registry;
use crate::strategy::StrategyKind;

/// What to extract into, and how.
#[derive(Clone)]
pub struct ExtractionRequest {
    /// Directory receiving the extracted entries. Created if missing.
    pub destination: PathBuf,
    /// File name for single-file results; defaults to the input's name.
    pub basename: Option<String>,
    /// Log tool command lines at info level and let tools print.
    pub verbose: bool,
    /// Unwrap nested containers (`.tar.gz` -> `.tar` -> contents).
    pub nested: bool,
    /// Skip detection and use this format.
    pub format: Option<StrategyKind>,
    /// Trust the file extension over the content.
    pub prioritize_extension: bool,
    /// Stops nested unwrapping for artifacts it returns `true` for.
    pub nested_claim: Option<NestedClaim>,
}

impl std::fmt::Debug for ExtractionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionRequest")
            .field("destination", &self.destination)
            .field("basename", &self.basename)
            .field("verbose", &self.verbose)
            .field("nested", &self.nested)
            .field("format", &self.format)
            .field("prioritize_extension", &self.prioritize_extension)
            .field("nested_claim", &self.nested_claim.is_some())
            .finish()
    }
}

impl ExtractionRequest {
    /// Extract into `destination` with default options.
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: destination.into(),
            basename: None,
            verbose: false,
            nested: true,
            format: None,
            prioritize_extension: false,
            nested_claim: None,
        }
    }

    pub fn basename(mut self, basename: impl Into<String>) -> Self {
        self.basename = Some(basename.into());
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn nested(mut self, nested: bool) -> Self {
        self.nested = nested;
        self
    }

    pub fn format(mut self, kind: StrategyKind) -> Self {
        self.format = Some(kind);
        self
    }

    pub fn prioritize_extension(mut self, prioritize: bool) -> Self {
        self.prioritize_extension = prioritize;
        self
    }

    /// Install a [`NestedClaim`] predicate.
    pub fn nested_claim(mut self, claim: impl Fn(&Path) -> bool + Send + Sync + 'static) -> Self {
        self.nested_claim = Some(Arc::new(claim));
        self
    }
}

/// Extract `path` into `request.destination`.
///
/// Returns the format the input was handled as.
///
/// # Errors
///
/// [`UnpackError::Detection`] when `path` is missing,
/// [`UnpackError::DestinationConflict`] when an extracted name already exists
/// in the destination, and any strategy error. The destination is untouched
/// on failure.
pub fn extract(
    path: &Path,
    request: &ExtractionRequest,
    ctx: &ExtractContext,
) -> Result<StrategyKind> {
    if let Err(e) = fs::metadata(path) {
        return Err(UnpackError::Detection {
            path: path.to_path_buf(),
            reason: e.to_string(),
        });
    }
    fs::create_dir_all(&request.destination)
        .map_err(|e| UnpackError::io(&request.destination, e))?;

    let source = ArchivePath::new(path);
    let strategy = match request.format {
        Some(kind) => registry::from_kind(kind),
        None => registry::detect_with(&source, request.prioritize_extension, ctx),
    };
    let basename = match (&request.basename, source.file_name()) {
        (Some(name), _) => name.clone(),
        (None, Some(name)) => name.to_owned(),
        (None, None) => {
            return Err(UnpackError::Detection {
                path: path.to_path_buf(),
                reason: "path has no file name".into(),
            });
        }
    };

    let scratch_root = &ctx.config().scratch_root;
    fs::create_dir_all(scratch_root).map_err(|e| UnpackError::io(scratch_root, e))?;
    let scratch = tempfile::Builder::new()
        .prefix("apl-unpack-")
        .tempdir_in(scratch_root)
        .map_err(|e| UnpackError::io(scratch_root, e))?;

    tracing::info!(
        "Extracting {} ({}) to {}",
        path.display(),
        strategy.name(),
        request.destination.display()
    );

    let nesting = Nesting {
        enabled: request.nested,
        claim: request.nested_claim.as_ref(),
        verbose: request.verbose,
        prioritize_extension: request.prioritize_extension,
    };
    extract_nestedly(strategy, &source, scratch.path(), &basename, nesting, ctx)?;
    relocate(scratch.path(), &request.destination)?;

    Ok(strategy.kind)
}

/// [`extract`] on tokio's blocking pool.
///
/// # Errors
///
/// As [`extract`], plus a panic in the blocking task.
pub async fn extract_async(
    path: PathBuf,
    request: ExtractionRequest,
    ctx: ExtractContext,
) -> Result<StrategyKind> {
    tokio::task::spawn_blocking(move || extract(&path, &request, &ctx))
        .await
        .map_err(|e| UnpackError::RawIo(std::io::Error::other(format!("Task panic: {e}"))))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::children;
    use crate::process::CommandOutput;
    use crate::strategy::testing::{FakeRunner, context};
    use tempfile::tempdir;

    fn quiet_context(scratch: &Path) -> ExtractContext {
        context(FakeRunner::new(|_| CommandOutput::failure(1, "")), scratch.to_path_buf())
    }

    #[test]
    fn test_missing_input_is_detection_error() {
        let dir = tempdir().unwrap();
        let ctx = quiet_context(&dir.path().join("scratch"));
        let err = extract(
            &dir.path().join("nope.tar.gz"),
            &ExtractionRequest::new(dir.path().join("out")),
            &ctx,
        )
        .unwrap_err();
        assert!(matches!(err, UnpackError::Detection { .. }));
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_plain_file_copied_with_basename() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("download-1234");
        fs::write(&input, "plain").unwrap();
        let scratch = dir.path().join("scratch");
        let ctx = quiet_context(&scratch);
        let out = dir.path().join("out");

        let kind = extract(&input, &ExtractionRequest::new(&out).basename("tool"), &ctx).unwrap();

        assert_eq!(kind, StrategyKind::Uncompressed);
        assert_eq!(fs::read_to_string(out.join("tool")).unwrap(), "plain");
        assert!(input.exists());
        assert!(children(&scratch).unwrap().is_empty());
    }

    #[test]
    fn test_forced_format_skips_detection() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("fake.gz");
        fs::write(&input, b"\x1F\x8B\x08\x00").unwrap();
        let runner = FakeRunner::new(|_| CommandOutput::failure(1, ""));
        let ctx = context(runner.clone(), dir.path().join("scratch"));
        let out = dir.path().join("out");

        let request = ExtractionRequest::new(&out).format(StrategyKind::Uncompressed);
        assert_eq!(extract(&input, &request, &ctx).unwrap(), StrategyKind::Uncompressed);
        assert_eq!(fs::read(out.join("fake.gz")).unwrap(), b"\x1F\x8B\x08\x00");
        assert!(runner.commands().is_empty());
    }

    #[test]
    fn test_conflict_leaves_destination_and_cleans_scratch() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("notes");
        fs::write(&input, "new").unwrap();
        let out = dir.path().join("out");
        fs::create_dir(&out).unwrap();
        fs::write(out.join("notes"), "old").unwrap();
        let scratch = dir.path().join("scratch");
        let ctx = quiet_context(&scratch);

        let err = extract(&input, &ExtractionRequest::new(&out), &ctx).unwrap_err();

        assert!(matches!(err, UnpackError::DestinationConflict { .. }));
        assert_eq!(fs::read_to_string(out.join("notes")).unwrap(), "old");
        assert!(children(&scratch).unwrap().is_empty());
    }

    #[test]
    fn test_tool_failure_cleans_scratch() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("broken.gz");
        fs::write(&input, b"\x1F\x8B\x08\x00").unwrap();
        let scratch = dir.path().join("scratch");
        let ctx = quiet_context(&scratch);
        let out = dir.path().join("out");

        let err = extract(&input, &ExtractionRequest::new(&out), &ctx).unwrap_err();

        assert!(err.is_corrupt_input());
        assert!(children(&out).unwrap().is_empty());
        assert!(children(&scratch).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_extract_async() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("README");
        fs::write(&input, "hi").unwrap();
        let ctx = quiet_context(&dir.path().join("scratch"));
        let out = dir.path().join("out");

        let kind = extract_async(input, ExtractionRequest::new(&out), ctx)
            .await
            .unwrap();
        assert_eq!(kind, StrategyKind::Uncompressed);
        assert_eq!(fs::read_to_string(out.join("README")).unwrap(), "hi");
    }
}
