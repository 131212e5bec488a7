//! Inputs that are installed as-is: plain files, scripts and executables,
//! Java archives, Office documents, installer packages, and fonts.
//!
//! These are never containers. Extracting one copies it to
//! `unpack_dir/basename` with its permission bits intact.

use std::fs::File;
use std::sync::LazyLock;

use regex::bytes::Regex;

use crate::context::ExtractContext;
use crate::error::{Result, UnpackError};
use crate::fs::{copy_entry, copy_tree};
use crate::probe::ArchivePath;

use super::{Strategy, StrategyKind, UnpackJob};

pub(crate) const UNCOMPRESSED: Strategy = Strategy {
    kind: StrategyKind::Uncompressed,
    extensions: &[],
    dependencies: &[],
    container: false,
    signature: None,
    active: None,
    extract: copy_verbatim,
};

// `MZ` is checked in the active pass so self-extracting archives, which
// share the prefix, get the first look.
pub(crate) const EXECUTABLE: Strategy = Strategy {
    kind: StrategyKind::Executable,
    extensions: &[".exe", ".sh"],
    dependencies: &[],
    container: false,
    signature: Some(has_shebang),
    active: Some(is_pe_executable),
    extract: copy_verbatim,
};

pub(crate) const JAR: Strategy = Strategy {
    kind: StrategyKind::Jar,
    extensions: &[".apk", ".jar"],
    dependencies: &[],
    container: false,
    signature: Some(is_jar),
    active: None,
    extract: copy_verbatim,
};

pub(crate) const MICROSOFT_OFFICE_XML: Strategy = Strategy {
    kind: StrategyKind::MicrosoftOfficeXml,
    extensions: &[".docx", ".pptx", ".xlsx"],
    dependencies: &[],
    container: false,
    signature: Some(is_office_xml),
    active: None,
    extract: copy_verbatim,
};

pub(crate) const PKG: Strategy = Strategy {
    kind: StrategyKind::Pkg,
    extensions: &[".pkg", ".mpkg"],
    dependencies: &[],
    container: false,
    signature: Some(is_pkg),
    active: None,
    extract: copy_verbatim,
};

pub(crate) const TTF: Strategy = Strategy {
    kind: StrategyKind::Ttf,
    extensions: &[".ttc", ".ttf"],
    dependencies: &[],
    container: false,
    signature: Some(is_ttf),
    active: None,
    extract: copy_verbatim,
};

pub(crate) const OTF: Strategy = Strategy {
    kind: StrategyKind::Otf,
    extensions: &[".otf"],
    dependencies: &[],
    container: false,
    signature: Some(is_otf),
    active: None,
    extract: copy_verbatim,
};

static SHEBANG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s-u)\A#!\s*\S+").unwrap_or_else(|e| panic!("invalid shebang pattern: {e}"))
});

const JAR_MANIFEST: &str = "META-INF/MANIFEST.MF";
const OFFICE_CONTENT_TYPES: &str = "[Content_Types].xml";
const OFFICE_PARTS: &[&str] = &["word/", "xl/", "ppt/"];

fn has_shebang(path: &ArchivePath) -> bool {
    path.magic_number_matches(&SHEBANG)
}

fn is_pe_executable(path: &ArchivePath, _ctx: &ExtractContext) -> bool {
    path.magic_number_starts_with(b"MZ")
}

fn is_local_zip(path: &ArchivePath) -> bool {
    path.magic_number_starts_with(b"PK\x03\x04") || path.magic_number_starts_with(b"PK\x05\x06")
}

/// Open the zip central directory of `path`, if it has one. Reading it is
/// in-process; no tool is spawned.
fn central_directory(path: &ArchivePath) -> Option<zip::ZipArchive<File>> {
    if !is_local_zip(path) {
        return None;
    }
    let file = File::open(path.path()).ok()?;
    match zip::ZipArchive::new(file) {
        Ok(archive) => Some(archive),
        Err(e) => {
            tracing::trace!("{} is not a readable zip: {e}", path.path().display());
            None
        }
    }
}

fn is_jar(path: &ArchivePath) -> bool {
    central_directory(path).is_some_and(|archive| archive.index_for_name(JAR_MANIFEST).is_some())
}

fn is_office_xml(path: &ArchivePath) -> bool {
    central_directory(path).is_some_and(|archive| {
        archive.index_for_name(OFFICE_CONTENT_TYPES).is_some()
            && archive
                .file_names()
                .any(|name| OFFICE_PARTS.iter().any(|part| name.starts_with(part)))
    })
}

/// Flat packages are xar archives; bundle packages are directories.
fn is_pkg(path: &ArchivePath) -> bool {
    let named = [".pkg", ".mpkg"]
        .iter()
        .any(|ext| path.extension_matches(ext));
    named && (path.is_dir() || path.magic_number_starts_with(b"xar!"))
}

fn is_ttf(path: &ArchivePath) -> bool {
    path.magic_number_starts_with(b"\x00\x01\x00\x00\x00") || path.magic_number_starts_with(b"ttcf")
}

fn is_otf(path: &ArchivePath) -> bool {
    path.magic_number_starts_with(b"OTTO")
}

fn copy_verbatim(job: &UnpackJob<'_>) -> Result<()> {
    let source = job.source.path();
    let target = job.unpack_dir.join(job.basename);

    if job.source.is_dir() {
        copy_tree(source, &target)?;
        copy_entry(source, &target)
    } else {
        // Follows a symlinked input so the content, not the link, is kept.
        std::fs::copy(source, &target).map_err(|e| UnpackError::io(&target, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandOutput;
    use crate::strategy::testing::{FakeRunner, context};
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn write_zip(path: &Path, entries: &[&str]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for name in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(b"content").unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_jar_needs_manifest() {
        let dir = tempdir().unwrap();
        let jar = dir.path().join("tool.zip");
        let plain = dir.path().join("plain.zip");
        write_zip(&jar, &["META-INF/MANIFEST.MF", "Main.class"]);
        write_zip(&plain, &["README"]);

        assert!(JAR.matches_signature(&ArchivePath::new(&jar)));
        assert!(!JAR.matches_signature(&ArchivePath::new(&plain)));
    }

    #[test]
    fn test_office_xml_needs_content_types_and_part() {
        let dir = tempdir().unwrap();
        let doc = dir.path().join("report");
        let bare = dir.path().join("bare");
        write_zip(&doc, &["[Content_Types].xml", "_rels/.rels", "word/document.xml"]);
        write_zip(&bare, &["[Content_Types].xml", "other/thing.xml"]);

        assert!(MICROSOFT_OFFICE_XML.matches_signature(&ArchivePath::new(&doc)));
        assert!(!MICROSOFT_OFFICE_XML.matches_signature(&ArchivePath::new(&bare)));
        assert!(!JAR.matches_signature(&ArchivePath::new(&doc)));
    }

    #[test]
    fn test_pkg_needs_name_and_shape() {
        let dir = tempdir().unwrap();
        let flat = write(dir.path(), "Installer.pkg", b"xar!\x00\x1c");
        let bundle = dir.path().join("Bundle.mpkg");
        std::fs::create_dir(&bundle).unwrap();
        let misnamed = write(dir.path(), "Installer.xar", b"xar!\x00\x1c");
        let fake = write(dir.path(), "Fake.pkg", b"not xar");

        assert!(PKG.matches_signature(&ArchivePath::new(&flat)));
        assert!(PKG.matches_signature(&ArchivePath::new(&bundle)));
        assert!(!PKG.matches_signature(&ArchivePath::new(&misnamed)));
        assert!(!PKG.matches_signature(&ArchivePath::new(&fake)));
    }

    #[test]
    fn test_font_and_script_signatures() {
        let dir = tempdir().unwrap();
        let ttf = ArchivePath::new(write(dir.path(), "a", b"\x00\x01\x00\x00\x00\x12"));
        let ttc = ArchivePath::new(write(dir.path(), "b", b"ttcf\x00\x02"));
        let otf = ArchivePath::new(write(dir.path(), "c", b"OTTO\x00\x0b"));
        let script = ArchivePath::new(write(dir.path(), "d", b"#!/usr/bin/env bash\necho hi\n"));

        assert!(TTF.matches_signature(&ttf));
        assert!(TTF.matches_signature(&ttc));
        assert!(OTF.matches_signature(&otf));
        assert!(!TTF.matches_signature(&otf));
        assert!(EXECUTABLE.matches_signature(&script));
        assert!(!EXECUTABLE.matches_signature(&otf));
    }

    #[test]
    fn test_pe_executable_is_active_only() {
        let dir = tempdir().unwrap();
        let exe = ArchivePath::new(write(dir.path(), "setup.exe", b"MZ\x90\x00"));
        let runner = FakeRunner::new(|_| CommandOutput::success(""));
        let ctx = context(runner.clone(), dir.path().to_path_buf());

        assert!(!EXECUTABLE.matches_signature(&exe));
        assert!(EXECUTABLE.matches_probe(&exe, &ctx));
        assert!(runner.commands().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_keeps_mode_and_uses_basename() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        let script = write(dir.path(), "download", b"#!/bin/sh\n");
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        let runner = FakeRunner::new(|_| CommandOutput::success(""));
        let ctx = context(runner, dir.path().to_path_buf());

        EXECUTABLE
            .extract_to_dir(&ArchivePath::new(&script), &out, "tool", false, &ctx)
            .unwrap();

        let copied = out.join("tool");
        assert_eq!(std::fs::read(&copied).unwrap(), b"#!/bin/sh\n");
        assert_eq!(
            std::fs::metadata(&copied).unwrap().permissions().mode() & 0o777,
            0o755
        );
        assert!(script.exists());
    }

    #[test]
    fn test_bundle_pkg_copied_as_directory() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        let bundle = dir.path().join("Thing.pkg");
        std::fs::create_dir_all(bundle.join("Contents")).unwrap();
        std::fs::write(bundle.join("Contents/Info.plist"), "<plist/>").unwrap();
        let runner = FakeRunner::new(|_| CommandOutput::success(""));
        let ctx = context(runner, dir.path().to_path_buf());

        PKG.extract_to_dir(&ArchivePath::new(&bundle), &out, "Thing.pkg", false, &ctx)
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(out.join("Thing.pkg/Contents/Info.plist")).unwrap(),
            "<plist/>"
        );
    }
}
