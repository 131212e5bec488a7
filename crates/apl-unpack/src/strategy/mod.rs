//! Format strategies.
//!
//! A [`Strategy`] is plain data: a kind, its extensions, the tools it needs,
//! and function pointers for detection and extraction. The registry orders
//! them in one table; nothing here dispatches through trait objects.
//!
//! Detection is split by cost. A *signature* check only looks at the cached
//! magic prefix (or, for a few formats, static structure such as a directory
//! marker). An *active* probe spawns a tool in list/info mode and is only
//! consulted once every signature check has failed.

use std::path::Path;

use crate::context::ExtractContext;
use crate::error::Result;
use crate::probe::ArchivePath;
use crate::process::ExternalTool;

pub mod archive;
pub mod compressed;
pub mod directory;
pub mod verbatim;

/// Every format the engine knows, in no particular order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StrategyKind {
    Pkg,
    Git,
    Mercurial,
    Subversion,
    Cvs,
    Bazaar,
    Fossil,
    Directory,
    Tar,
    Gzip,
    Bzip2,
    Xz,
    Lzma,
    Zstd,
    Lzip,
    Jar,
    MicrosoftOfficeXml,
    Zip,
    Xar,
    Ttf,
    Otf,
    SevenZip,
    Rar,
    Cab,
    Sit,
    Lha,
    Dmg,
    SelfExtractingExecutable,
    Executable,
    Uncompressed,
}

impl StrategyKind {
    /// Short lowercase name used in logs and errors.
    pub fn name(self) -> &'static str {
        match self {
            Self::Pkg => "pkg",
            Self::Git => "git",
            Self::Mercurial => "mercurial",
            Self::Subversion => "subversion",
            Self::Cvs => "cvs",
            Self::Bazaar => "bazaar",
            Self::Fossil => "fossil",
            Self::Directory => "directory",
            Self::Tar => "tar",
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
            Self::Xz => "xz",
            Self::Lzma => "lzma",
            Self::Zstd => "zstd",
            Self::Lzip => "lzip",
            Self::Jar => "jar",
            Self::MicrosoftOfficeXml => "microsoft_office_xml",
            Self::Zip => "zip",
            Self::Xar => "xar",
            Self::Ttf => "ttf",
            Self::Otf => "otf",
            Self::SevenZip => "seven_zip",
            Self::Rar => "rar",
            Self::Cab => "cab",
            Self::Sit => "sit",
            Self::Lha => "lha",
            Self::Dmg => "dmg",
            Self::SelfExtractingExecutable => "self_extracting_executable",
            Self::Executable => "executable",
            Self::Uncompressed => "uncompressed",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// How expensive a strategy's detection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeCost {
    /// Prefix bytes, extension, or directory markers only.
    Signature,
    /// Spawns a tool.
    Active,
    /// Never detected; only reachable by extension, kind, or fallback.
    None,
}

/// One extraction request handed to a strategy.
#[derive(Debug, Clone, Copy)]
pub struct UnpackJob<'a> {
    /// The input being extracted.
    pub source: &'a ArchivePath,
    /// Fresh scratch directory to populate.
    pub unpack_dir: &'a Path,
    /// File name to use for single-file outputs.
    pub basename: &'a str,
    /// Show tool output and commands.
    pub verbose: bool,
    /// Runner, resolver and configuration.
    pub ctx: &'a ExtractContext,
}

pub(crate) type SignatureFn = fn(&ArchivePath) -> bool;
pub(crate) type ActiveFn = fn(&ArchivePath, &ExtractContext) -> bool;
pub(crate) type ExtractFn = fn(&UnpackJob<'_>) -> Result<()>;

/// A format handler: detection predicates plus an extraction routine.
pub struct Strategy {
    /// Which format this is.
    pub kind: StrategyKind,
    /// Extensions that select this strategy when magic detection is skipped.
    pub extensions: &'static [&'static str],
    /// Tools that must be installed before extracting.
    pub dependencies: &'static [ExternalTool],
    /// Whether output may itself be unwrapped further. Verbatim copies are not.
    pub container: bool,
    pub(crate) signature: Option<SignatureFn>,
    pub(crate) active: Option<ActiveFn>,
    pub(crate) extract: ExtractFn,
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Strategy")
            .field("kind", &self.kind)
            .field("probe", &self.probe_cost())
            .field("container", &self.container)
            .finish_non_exhaustive()
    }
}

impl Strategy {
    /// Short name of the format.
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Most expensive check detection may perform for this strategy.
    pub fn probe_cost(&self) -> ProbeCost {
        match (self.signature, self.active) {
            (_, Some(_)) => ProbeCost::Active,
            (Some(_), None) => ProbeCost::Signature,
            (None, None) => ProbeCost::None,
        }
    }

    /// Static check against the cached prefix.
    pub fn matches_signature(&self, path: &ArchivePath) -> bool {
        self.signature.is_some_and(|check| check(path))
    }

    /// Process-spawning check, only used after every signature failed.
    pub fn matches_probe(&self, path: &ArchivePath, ctx: &ExtractContext) -> bool {
        self.active.is_some_and(|check| check(path, ctx))
    }

    /// Either check.
    pub fn can_extract(&self, path: &ArchivePath, ctx: &ExtractContext) -> bool {
        self.matches_signature(path) || self.matches_probe(path, ctx)
    }

    /// Whether any of this strategy's extensions ends `path`'s file name.
    /// Returns the length of the longest matching extension.
    pub fn extension_match(&self, path: &ArchivePath) -> Option<usize> {
        self.extensions
            .iter()
            .filter(|ext| path.extension_matches(ext))
            .map(|ext| ext.len())
            .max()
    }

    /// Extract `source` into `unpack_dir`.
    ///
    /// Declared dependencies are resolved first so a missing tool is
    /// reported before any work is done.
    ///
    /// # Errors
    ///
    /// [`crate::UnpackError::MissingTool`], tool failures, or IO errors.
    pub fn extract_to_dir(
        &self,
        source: &ArchivePath,
        unpack_dir: &Path,
        basename: &str,
        verbose: bool,
        ctx: &ExtractContext,
    ) -> Result<()> {
        for dep in self.dependencies {
            ctx.tool(dep, self.name())?;
        }
        std::fs::create_dir_all(unpack_dir)
            .map_err(|e| crate::UnpackError::io(unpack_dir, e))?;

        tracing::debug!(
            "Extracting {} as {} into {}",
            source.path().display(),
            self.name(),
            unpack_dir.display()
        );

        (self.extract)(&UnpackJob {
            source,
            unpack_dir,
            basename,
            verbose,
            ctx,
        })
    }
}
