//! Disk image handling via `hdiutil` and `diskutil`.
//!
//! An image is attached read-only under a private mount root, the contents
//! of each volume are copied out according to a bill of materials that skips
//! volume metadata and convenience links such as `Applications ->
//! /Applications`, and every volume is ejected again on every exit path.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use walkdir::WalkDir;

use crate::context::ExtractContext;
use crate::error::{Result, UnpackError};
use crate::fs::{copy_entry, make_owner_writable};
use crate::probe::ArchivePath;
use crate::process::{CommandOutput, ToolCommand, tools};
use crate::strategy::{Strategy, StrategyKind, UnpackJob};

const STRATEGY: &str = "dmg";

pub(crate) const DMG: Strategy = Strategy {
    kind: StrategyKind::Dmg,
    extensions: &[".dmg"],
    dependencies: &[tools::HDIUTIL, tools::DISKUTIL],
    container: true,
    signature: None,
    active: Some(is_disk_image),
    extract: extract_image,
};

/// Top-level volume entries that are never copied.
pub const DMG_METADATA: &[&str] = &[
    ".background",
    ".com.apple.timemachine.donotpresent",
    ".com.apple.timemachine.supported",
    ".DocumentRevisions-V100",
    ".DS_Store",
    ".fseventsd",
    ".MobileBackups",
    ".Spotlight-V100",
    ".TemporaryItems",
    ".Trashes",
    ".VolumeIcon.icns",
];

/// Symlinks resolving to (or into) these are dropped from the copy.
pub const SYSTEM_DIRS: &[&str] = &[
    "/",
    "/Applications",
    "/Library",
    "/System",
    "/Users",
    "/Volumes",
    "/bin",
    "/cores",
    "/dev",
    "/etc",
    "/opt",
    "/private",
    "/sbin",
    "/tmp",
    "/usr",
    "/var",
];

/// Lifecycle of an attached volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    /// Attached and not yet ejected.
    Attached,
    /// Ejected, or found to be already gone.
    Ejected,
    /// Every eject attempt failed.
    EjectFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MountKind {
    Volume,
    // A device node without a mounted filesystem.
    Device,
}

/// An attached volume. Dropping it while still attached ejects it.
#[derive(Debug)]
pub struct MountPoint<'a> {
    path: PathBuf,
    kind: MountKind,
    state: MountState,
    verbose: bool,
    ctx: &'a ExtractContext,
}

impl<'a> MountPoint<'a> {
    /// Guard for a mounted filesystem at `path`.
    pub fn volume(path: impl Into<PathBuf>, ctx: &'a ExtractContext, verbose: bool) -> Self {
        Self::new(path.into(), MountKind::Volume, ctx, verbose)
    }

    fn device(path: impl Into<PathBuf>, ctx: &'a ExtractContext, verbose: bool) -> Self {
        Self::new(path.into(), MountKind::Device, ctx, verbose)
    }

    fn new(path: PathBuf, kind: MountKind, ctx: &'a ExtractContext, verbose: bool) -> Self {
        tracing::debug!("Attached {}", path.display());
        Self {
            path,
            kind,
            state: MountState::Attached,
            verbose,
            ctx,
        }
    }

    /// Mount path (or device node).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current lifecycle state.
    pub fn state(&self) -> MountState {
        self.state
    }

    /// Eject with retries.
    ///
    /// Each attempt first checks whether the volume is already gone. Attempts
    /// before the last use `diskutil eject`, aimed at the APFS physical
    /// stores backing the volume when `diskutil info` reports any, so the
    /// container device goes away too. The last attempt forces an unmount of
    /// the mount path.
    ///
    /// # Errors
    ///
    /// [`UnpackError::EjectFailed`] once every attempt has failed.
    pub fn eject(&mut self) -> Result<()> {
        let config = self.ctx.config();
        let attempts = config.eject_attempts.max(1);
        let backoff = config.eject_backoff;

        for attempt in 1..=attempts {
            if self.kind == MountKind::Volume && !self.path.exists() {
                tracing::debug!("{} is already gone", self.path.display());
                self.state = MountState::Ejected;
                return Ok(());
            }

            let last = attempt == attempts;
            let result = if last {
                self.diskutil(&["unmount", "force"], &self.path).map(drop)
            } else {
                self.eject_targets().and_then(|targets| {
                    targets
                        .iter()
                        .try_for_each(|target| self.diskutil(&["eject"], target).map(drop))
                })
            };

            match result {
                Ok(()) => {
                    tracing::debug!("Ejected {}", self.path.display());
                    self.state = MountState::Ejected;
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        "Eject attempt {attempt}/{attempts} for {} failed: {e}",
                        self.path.display()
                    );
                    if !last {
                        std::thread::sleep(backoff);
                    }
                }
            }
        }

        self.state = MountState::EjectFailed;
        Err(UnpackError::EjectFailed {
            mount_point: self.path.clone(),
            attempts,
        })
    }

    fn diskutil(&self, args: &[&str], target: &Path) -> Result<CommandOutput> {
        let cmd = self
            .ctx
            .command(&tools::DISKUTIL, STRATEGY)?
            .args(args)
            .arg(target);
        self.ctx.run(&cmd, self.verbose)
    }

    /// Physical stores of an APFS volume, or the mount itself.
    fn eject_targets(&self) -> Result<Vec<PathBuf>> {
        if self.kind == MountKind::Device {
            return Ok(vec![self.path.clone()]);
        }
        let info = self.diskutil(&["info", "-plist"], &self.path)?;
        let stores = parse_physical_stores(&info.stdout_str());
        if stores.is_empty() {
            Ok(vec![self.path.clone()])
        } else {
            tracing::debug!("{} is backed by {stores:?}", self.path.display());
            Ok(stores)
        }
    }
}

impl Drop for MountPoint<'_> {
    fn drop(&mut self) {
        if self.state != MountState::Attached {
            return;
        }
        if let Err(e) = self.eject() {
            tracing::warn!("{e}");
        }
    }
}

fn is_disk_image(path: &ArchivePath, ctx: &ExtractContext) -> bool {
    if path.is_dir() {
        return false;
    }
    let Ok(hdiutil) = ctx.tool(&tools::HDIUTIL, STRATEGY) else {
        return false;
    };
    let cmd = ToolCommand::new(hdiutil)
        .args(["imageinfo", "-format"])
        .arg(path.path());
    ctx.probe(&cmd)
        .is_some_and(|out| !out.stdout_str().trim().is_empty())
}

fn extract_image(job: &UnpackJob<'_>) -> Result<()> {
    let scratch_root = &job.ctx.config().scratch_root;
    fs::create_dir_all(scratch_root).map_err(|e| UnpackError::io(scratch_root, e))?;
    let mount_root = tempfile::Builder::new()
        .prefix("apl-dmg-")
        .tempdir_in(scratch_root)
        .map_err(|e| UnpackError::io(scratch_root, e))?;

    let mounts = attach(job, mount_root.path())?;

    let copied = mounts
        .iter()
        .try_for_each(|mount| copy_volume(mount.path(), job.unpack_dir));

    let mut eject_error = None;
    for mut mount in mounts {
        if let Err(e) = mount.eject() {
            eject_error.get_or_insert(e);
        }
    }

    match (copied, eject_error) {
        (Err(copy), Some(eject)) => {
            tracing::warn!("{eject}");
            Err(copy)
        }
        (Err(copy), None) => Err(copy),
        (Ok(()), Some(eject)) => Err(eject),
        (Ok(()), None) => make_owner_writable(job.unpack_dir, false),
    }
}

fn attach_command(
    job: &UnpackJob<'_>,
    image: &Path,
    mount_root: &Path,
) -> Result<ToolCommand> {
    Ok(job
        .ctx
        .command(&tools::HDIUTIL, STRATEGY)?
        .args(["attach", "-plist", "-nobrowse", "-readonly", "-mountrandom"])
        .arg(mount_root)
        .arg(image))
}

/// Attach the image, converting it first if a license agreement blocks a
/// plain attach.
fn attach<'a>(job: &UnpackJob<'a>, mount_root: &Path) -> Result<Vec<MountPoint<'a>>> {
    let image = job.source.path();

    // "qn" declines the license pager without hanging on it.
    let without_eula = attach_command(job, image, mount_root)?.stdin("qn\n");
    if job.verbose {
        tracing::info!("==> {}", without_eula.display());
    }
    let first = job.ctx.runner().run(&without_eula)?;

    let plist = if first.is_success() {
        first.stdout_str()
    } else {
        let stem = image
            .file_stem()
            .map_or_else(|| "image".into(), |s| s.to_string_lossy());
        let cdr = mount_root.join(format!("{stem}.cdr"));

        let mut convert = job.ctx.command(&tools::HDIUTIL, STRATEGY)?.arg("convert");
        if !job.verbose {
            convert = convert.arg("-quiet");
        }
        let convert = convert
            .args(["-format", "UDTO", "-o"])
            .arg(&cdr)
            .arg(image);
        job.ctx.run(&convert, job.verbose)?;

        let with_eula = job
            .ctx
            .run(&attach_command(job, &cdr, mount_root)?, job.verbose)?;

        let license = first.stdout_str();
        if job.verbose && !license.trim().is_empty() {
            tracing::info!("Software License Agreement for {}:\n{license}", image.display());
        }
        with_eula.stdout_str()
    };

    let entities = parse_plist(&plist);
    if entities.mount_points.is_empty() {
        for dev in entities.dev_entries {
            let mut guard = MountPoint::device(dev, job.ctx, job.verbose);
            if let Err(e) = guard.eject() {
                tracing::warn!("{e}");
            }
        }
        return Err(UnpackError::bad_container(
            image,
            "no mounts found; perhaps this is a bad disk image?",
        ));
    }

    Ok(entities
        .mount_points
        .into_iter()
        .map(|path| MountPoint::volume(path, job.ctx, job.verbose))
        .collect())
}

#[derive(Debug, Default, PartialEq, Eq)]
struct SystemEntities {
    mount_points: Vec<PathBuf>,
    dev_entries: Vec<PathBuf>,
}

static PLIST_ENTRY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<key>(mount-point|dev-entry)</key>\s*<string>([^<]*)</string>")
        .unwrap_or_else(|e| panic!("invalid plist pattern: {e}"))
});

fn parse_plist(plist: &str) -> SystemEntities {
    let mut entities = SystemEntities::default();
    for caps in PLIST_ENTRY.captures_iter(plist) {
        let value = PathBuf::from(unescape_xml(&caps[2]));
        if &caps[1] == "mount-point" {
            entities.mount_points.push(value);
        } else {
            entities.dev_entries.push(value);
        }
    }
    entities
}

static PHYSICAL_STORE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<key>APFSPhysicalStore</key>\s*<string>([^<]*)</string>")
        .unwrap_or_else(|e| panic!("invalid physical store pattern: {e}"))
});

fn parse_physical_stores(plist: &str) -> Vec<PathBuf> {
    PHYSICAL_STORE
        .captures_iter(plist)
        .map(|caps| PathBuf::from(unescape_xml(&caps[1])))
        .collect()
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Relative paths on `mount` worth copying, parents before children.
///
/// # Errors
///
/// The volume cannot be walked.
pub fn bill_of_materials(mount: &Path) -> Result<Vec<PathBuf>> {
    let walker = WalkDir::new(mount)
        .min_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let skip = entry.depth() == 1
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| DMG_METADATA.contains(&name));
            if skip {
                tracing::trace!("Skipping volume metadata {}", entry.path().display());
            }
            !skip
        });

    let mut bom = Vec::new();
    for entry in walker {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(mount).to_path_buf();
            UnpackError::io(path, std::io::Error::other(e))
        })?;

        if entry.path_is_symlink() {
            let target = fs::read_link(entry.path()).map_err(|e| UnpackError::io(entry.path(), e))?;
            if links_into_system_dir(mount, entry.path(), &target) {
                tracing::debug!(
                    "Skipping {} -> {}",
                    entry.path().display(),
                    target.display()
                );
                continue;
            }
        }

        if let Ok(rel) = entry.path().strip_prefix(mount) {
            bom.push(rel.to_path_buf());
        }
    }
    Ok(bom)
}

/// Whether a link at `link` pointing to `target` escapes `mount` into a
/// system directory.
fn links_into_system_dir(mount: &Path, link: &Path, target: &Path) -> bool {
    let base = link.parent().unwrap_or(mount);
    let resolved = normalize(&base.join(target));
    if resolved.starts_with(normalize(mount)) {
        return false;
    }
    SYSTEM_DIRS.iter().any(|dir| {
        let dir = Path::new(dir);
        if dir.parent().is_none() {
            resolved == dir
        } else {
            resolved.starts_with(dir)
        }
    })
}

/// Lexical `.`/`..` folding; the filesystem is not consulted.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

fn copy_volume(mount: &Path, unpack_dir: &Path) -> Result<()> {
    tracing::debug!("Copying {} into {}", mount.display(), unpack_dir.display());
    let bom = bill_of_materials(mount)?;

    let mut dirs = Vec::new();
    for rel in &bom {
        let src = mount.join(rel);
        let dst = unpack_dir.join(rel);
        let meta = fs::symlink_metadata(&src).map_err(|e| UnpackError::io(&src, e))?;
        if meta.is_dir() {
            fs::create_dir_all(&dst).map_err(|e| UnpackError::io(&dst, e))?;
            dirs.push((src, dst));
        } else {
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent).map_err(|e| UnpackError::io(parent, e))?;
            }
            copy_entry(&src, &dst)?;
        }
    }

    for (src, dst) in dirs.iter().rev() {
        copy_entry(src, dst)?;
    }
    Ok(())
}
