//! Single-stream compressors: gzip, bzip2, xz, lzma, zstd, lzip.
//!
//! Each one copies the input into the scratch directory and decompresses it
//! in place, leaving exactly one file behind. What that file contains is not
//! their concern; the nested coordinator re-detects it.

use crate::error::{Result, UnpackError};
use crate::probe::ArchivePath;
use crate::process::{ExternalTool, tools};

use super::{Strategy, StrategyKind, UnpackJob};

pub(crate) const GZIP: Strategy = Strategy {
    kind: StrategyKind::Gzip,
    extensions: &[".gz"],
    dependencies: &[],
    container: true,
    signature: Some(is_gzip),
    active: None,
    extract: |job| {
        let suffixes = &[".gz", ".tgz", ".taz", ".z", "-gz"];
        decompress(job, &tools::GZIP, suffixes, &["-N"])
    },
};

pub(crate) const BZIP2: Strategy = Strategy {
    kind: StrategyKind::Bzip2,
    extensions: &[".bz2"],
    dependencies: &[],
    container: true,
    signature: Some(is_bzip2),
    active: None,
    extract: |job| decompress(job, &tools::BZIP2, &[".bz2", ".bz", ".tbz2", ".tbz"], &[]),
};

pub(crate) const XZ: Strategy = Strategy {
    kind: StrategyKind::Xz,
    extensions: &[".xz"],
    dependencies: &[tools::XZ],
    container: true,
    signature: Some(is_xz),
    active: None,
    extract: |job| decompress(job, &tools::XZ, &[".xz", ".txz"], &["-T0"]),
};

pub(crate) const LZMA: Strategy = Strategy {
    kind: StrategyKind::Lzma,
    extensions: &[".lzma"],
    dependencies: &[tools::LZMA],
    container: true,
    signature: Some(is_lzma),
    active: None,
    extract: |job| decompress(job, &tools::LZMA, &[".lzma", ".tlz"], &[]),
};

pub(crate) const ZSTD: Strategy = Strategy {
    kind: StrategyKind::Zstd,
    extensions: &[".zst"],
    dependencies: &[tools::ZSTD],
    container: true,
    signature: Some(is_zstd),
    active: None,
    extract: |job| decompress(job, &tools::ZSTD, &[".zst", ".tzst"], &["--rm"]),
};

pub(crate) const LZIP: Strategy = Strategy {
    kind: StrategyKind::Lzip,
    extensions: &[".lz"],
    dependencies: &[tools::LZIP],
    container: true,
    signature: Some(is_lzip),
    active: None,
    extract: |job| decompress(job, &tools::LZIP, &[".lz", ".tlz"], &["-d"]),
};

fn is_gzip(path: &ArchivePath) -> bool {
    path.magic_number_starts_with(b"\x1F\x8B")
}

fn is_bzip2(path: &ArchivePath) -> bool {
    path.magic_number_starts_with(b"BZh")
}

fn is_xz(path: &ArchivePath) -> bool {
    path.magic_number_starts_with(b"\xFD7zXZ\x00")
}

/// `.lzma` (lzma-alone) has no magic. The header is the default
/// properties byte, a little-endian dictionary size that encoders only ever
/// write as `2^n` or `2^n + 2^(n-1)`, and an uncompressed size that is
/// either unknown (all ones) or below 256 GiB.
fn is_lzma(path: &ArchivePath) -> bool {
    let header = path.magic_number();
    let Some((&0x5D, rest)) = header.split_first() else {
        return false;
    };
    let Some(dict) = rest.get(..4).and_then(|b| <[u8; 4]>::try_from(b).ok()) else {
        return false;
    };
    if !is_lzma_dict_size(u32::from_le_bytes(dict)) {
        return false;
    }
    match rest.get(4..12).and_then(|b| <[u8; 8]>::try_from(b).ok()) {
        Some(size) => {
            let size = u64::from_le_bytes(size);
            size == u64::MAX || size < 1 << 38
        }
        None => true,
    }
}

fn is_lzma_dict_size(size: u32) -> bool {
    size.is_power_of_two() || (size % 3 == 0 && (size / 3).is_power_of_two())
}

fn is_zstd(path: &ArchivePath) -> bool {
    path.magic_number_starts_with(b"\x28\xB5\x2F\xFD")
}

fn is_lzip(path: &ArchivePath) -> bool {
    path.magic_number_starts_with(b"LZIP")
}

/// Copy the input to `unpack_dir/basename` and decompress it in place.
///
/// The decompressors refuse names without a suffix they recognize, so the
/// first suffix in `suffixes` is appended when none is present.
fn decompress(
    job: &UnpackJob<'_>,
    tool: &ExternalTool,
    suffixes: &[&str],
    flags: &[&str],
) -> Result<()> {
    let name = with_known_suffix(job.basename, suffixes);
    let target = job.unpack_dir.join(&name);

    std::fs::copy(job.source.path(), &target).map_err(|e| UnpackError::io(&target, e))?;

    let mut cmd = job.ctx.command(tool, tool.name)?;
    if !job.verbose {
        cmd = cmd.arg("-q");
    }
    let cmd = cmd.args(flags).arg("--").arg(&target);
    job.ctx.run(&cmd, job.verbose)?;

    if target.exists() {
        return Err(UnpackError::bad_container(
            job.source.path(),
            format!("{} left its input in place", tool.primary()),
        ));
    }
    Ok(())
}

fn with_known_suffix(basename: &str, suffixes: &[&str]) -> String {
    let lower = basename.to_ascii_lowercase();
    if suffixes.iter().any(|s| lower.ends_with(s) && lower.len() > s.len()) {
        basename.to_string()
    } else {
        format!("{basename}{}", suffixes.first().copied().unwrap_or_default())
    }
}

/// Whether `path` starts with any single-stream compressor signature.
pub(crate) fn is_compressed(path: &ArchivePath) -> bool {
    [GZIP, BZIP2, XZ, LZMA, ZSTD, LZIP]
        .iter()
        .any(|s| s.matches_signature(path))
}
