//! Ordered strategy table and format detection.
//!
//! [`STRATEGIES`] is the single source of truth for precedence. Detection
//! makes two passes over it: every signature check first, then every active
//! probe. Within a pass, the earlier entry wins, so specializations (Jar,
//! Office documents) sit before the general format (Zip) they refine.

use crate::context::ExtractContext;
use crate::dmg;
use crate::probe::ArchivePath;
use crate::strategy::{Strategy, StrategyKind, archive, compressed, directory, verbatim};

/// Every strategy, in detection order.
pub static STRATEGIES: &[Strategy] = &[
    verbatim::PKG,
    directory::GIT,
    directory::MERCURIAL,
    directory::SUBVERSION,
    directory::CVS,
    directory::BAZAAR,
    directory::FOSSIL,
    directory::DIRECTORY,
    archive::TAR,
    compressed::GZIP,
    compressed::BZIP2,
    compressed::XZ,
    compressed::LZMA,
    compressed::ZSTD,
    compressed::LZIP,
    verbatim::JAR,
    verbatim::MICROSOFT_OFFICE_XML,
    archive::ZIP,
    archive::XAR,
    verbatim::TTF,
    verbatim::OTF,
    archive::SEVEN_ZIP,
    archive::RAR,
    archive::CAB,
    archive::SIT,
    archive::LHA,
    dmg::DMG,
    archive::SELF_EXTRACTING_EXECUTABLE,
    verbatim::EXECUTABLE,
    verbatim::UNCOMPRESSED,
];

static FALLBACK: Strategy = verbatim::UNCOMPRESSED;

/// The verbatim-copy strategy used when nothing else matches.
pub fn fallback() -> &'static Strategy {
    &FALLBACK
}

/// Look a strategy up by kind (forced format).
pub fn from_kind(kind: StrategyKind) -> &'static Strategy {
    STRATEGIES
        .iter()
        .find(|s| s.kind == kind)
        .unwrap_or_else(fallback)
}

/// Strategy whose extension is the longest suffix of `path`'s file name.
///
/// Equal-length matches go to the earlier table entry.
pub fn from_extension(path: &ArchivePath) -> Option<&'static Strategy> {
    STRATEGIES
        .iter()
        .rev()
        .filter_map(|s| s.extension_match(path).map(|len| (len, s)))
        .max_by_key(|(len, _)| *len)
        .map(|(_, s)| s)
}

/// Content-based detection: signatures, then active probes, then the
/// [`fallback`].
pub fn detect(path: &ArchivePath, ctx: &ExtractContext) -> &'static Strategy {
    detect_with(path, false, ctx)
}

/// Detection with an optional extension-first mode.
///
/// With `prioritize_extension` and a path that has an extension, the
/// extension decides, then the directory family; content is not inspected.
/// Otherwise content decides and the extension is a second chance.
pub fn detect_with(
    path: &ArchivePath,
    prioritize_extension: bool,
    ctx: &ExtractContext,
) -> &'static Strategy {
    let found = if prioritize_extension && !path.extension().is_empty() {
        from_extension(path).or_else(|| directory_family(path))
    } else {
        from_content(path, ctx).or_else(|| from_extension(path))
    };
    let strategy = found.unwrap_or_else(fallback);
    tracing::debug!("Detected {} as {}", path.path().display(), strategy.name());
    strategy
}

fn from_content(path: &ArchivePath, ctx: &ExtractContext) -> Option<&'static Strategy> {
    STRATEGIES
        .iter()
        .find(|s| s.matches_signature(path))
        .or_else(|| STRATEGIES.iter().find(|s| s.matches_probe(path, ctx)))
}

fn directory_family(path: &ArchivePath) -> Option<&'static Strategy> {
    STRATEGIES
        .iter()
        .filter(|s| is_directory_kind(s.kind))
        .find(|s| s.matches_signature(path))
}

fn is_directory_kind(kind: StrategyKind) -> bool {
    matches!(
        kind,
        StrategyKind::Git
            | StrategyKind::Mercurial
            | StrategyKind::Subversion
            | StrategyKind::Cvs
            | StrategyKind::Bazaar
            | StrategyKind::Fossil
            | StrategyKind::Directory
    )
}
