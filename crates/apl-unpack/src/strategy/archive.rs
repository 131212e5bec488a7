//! Multi-file archives: tar, zip, xar, 7z, cab, and the formats handed to
//! the generic `unar` unpacker (rar, sit, lha, self-extracting executables).

use std::ffi::OsString;
use std::sync::LazyLock;

use regex::bytes::Regex;

use crate::context::ExtractContext;
use crate::error::Result;
use crate::probe::ArchivePath;
use crate::process::{ToolCommand, tools};

use super::compressed::is_compressed;
use super::{Strategy, StrategyKind, UnpackJob};

/// Extensions for which an unrecognized file is worth a `tar --list` probe.
const TAR_EXTENSIONS: &[&str] = &[
    ".tar", ".tbz", ".tbz2", ".tgz", ".tlz", ".txz", ".tzst", ".taz",
];

pub(crate) const TAR: Strategy = Strategy {
    kind: StrategyKind::Tar,
    extensions: TAR_EXTENSIONS,
    dependencies: &[],
    container: true,
    signature: Some(is_ustar),
    active: Some(tar_lists),
    extract: |job| {
        let cmd = job
            .ctx
            .command(&tools::TAR, "tar")?
            .args(["--extract", "--no-same-owner", "--file"])
            .arg(job.source.path())
            .arg("--directory")
            .arg(job.unpack_dir);
        job.ctx.run(&cmd, job.verbose).map(drop)
    },
};

pub(crate) const ZIP: Strategy = Strategy {
    kind: StrategyKind::Zip,
    extensions: &[".zip"],
    dependencies: &[],
    container: true,
    signature: Some(is_zip),
    active: None,
    extract: |job| {
        let mut cmd = job.ctx.command(&tools::UNZIP, "zip")?;
        if !job.verbose {
            cmd = cmd.arg("-qq");
        }
        let cmd = cmd
            .args(["-o", "-d"])
            .arg(job.unpack_dir)
            .arg(job.source.path());
        job.ctx.run(&cmd, job.verbose).map(drop)
    },
};

pub(crate) const XAR: Strategy = Strategy {
    kind: StrategyKind::Xar,
    extensions: &[".xar"],
    dependencies: &[],
    container: true,
    signature: Some(is_xar),
    active: None,
    extract: |job| {
        let cmd = job
            .ctx
            .command(&tools::XAR, "xar")?
            .args(["-x", "-f"])
            .arg(job.source.path())
            .arg("-C")
            .arg(job.unpack_dir);
        job.ctx.run(&cmd, job.verbose).map(drop)
    },
};

pub(crate) const SEVEN_ZIP: Strategy = Strategy {
    kind: StrategyKind::SevenZip,
    extensions: &[".7z"],
    dependencies: &[tools::P7ZIP],
    container: true,
    signature: Some(is_seven_zip),
    active: None,
    extract: |job| {
        let mut output = OsString::from("-o");
        output.push(job.unpack_dir);
        let cmd = job
            .ctx
            .command(&tools::P7ZIP, "7z")?
            .args(["x", "-y", "-bd", "-bso0"])
            .arg(job.source.path())
            .arg(output);
        job.ctx.run(&cmd, job.verbose).map(drop)
    },
};

pub(crate) const CAB: Strategy = Strategy {
    kind: StrategyKind::Cab,
    extensions: &[".cab"],
    dependencies: &[tools::CABEXTRACT],
    container: true,
    signature: Some(is_cab),
    active: None,
    extract: |job| {
        let mut cmd = job.ctx.command(&tools::CABEXTRACT, "cab")?;
        if !job.verbose {
            cmd = cmd.arg("-q");
        }
        let cmd = cmd
            .arg("-d")
            .arg(job.unpack_dir)
            .arg("--")
            .arg(job.source.path());
        job.ctx.run(&cmd, job.verbose).map(drop)
    },
};

pub(crate) const RAR: Strategy = Strategy {
    kind: StrategyKind::Rar,
    extensions: &[".rar"],
    dependencies: &[tools::UNAR],
    container: true,
    signature: Some(is_rar),
    active: None,
    extract: |job| generic_unar(job, "rar"),
};

pub(crate) const SIT: Strategy = Strategy {
    kind: StrategyKind::Sit,
    extensions: &[".sit"],
    dependencies: &[tools::UNAR],
    container: true,
    signature: Some(is_sit),
    active: None,
    extract: |job| generic_unar(job, "sit"),
};

pub(crate) const LHA: Strategy = Strategy {
    kind: StrategyKind::Lha,
    extensions: &[".lha", ".lzh"],
    dependencies: &[tools::UNAR],
    container: true,
    signature: Some(is_lha),
    active: None,
    extract: |job| generic_unar(job, "lha"),
};

pub(crate) const SELF_EXTRACTING_EXECUTABLE: Strategy = Strategy {
    kind: StrategyKind::SelfExtractingExecutable,
    extensions: &[],
    dependencies: &[tools::UNAR],
    container: true,
    signature: None,
    active: Some(is_self_extracting),
    extract: |job| generic_unar(job, "self-extracting executable"),
};

fn is_ustar(path: &ArchivePath) -> bool {
    path.magic_number_at(257, b"ustar")
}

fn is_zip(path: &ArchivePath) -> bool {
    path.magic_number_starts_with(b"PK\x03\x04") || path.magic_number_starts_with(b"PK\x05\x06")
}

fn is_xar(path: &ArchivePath) -> bool {
    path.magic_number_starts_with(b"xar!")
}

fn is_seven_zip(path: &ArchivePath) -> bool {
    path.magic_number_starts_with(b"7z\xBC\xAF\x27\x1C")
}

fn is_cab(path: &ArchivePath) -> bool {
    path.magic_number_starts_with(b"MSCF")
}

fn is_rar(path: &ArchivePath) -> bool {
    path.magic_number_starts_with(b"Rar!")
}

fn is_sit(path: &ArchivePath) -> bool {
    path.magic_number_starts_with(b"StuffIt")
}

static LHA_MAGIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s-u)\A..-(lh0|lh1|lz4|lz5|lzs|lh\x20|lhd|lh2|lh3|lh4|lh5|lh6|lh7)-")
        .unwrap_or_else(|e| panic!("invalid LHA signature pattern: {e}"))
});

fn is_lha(path: &ArchivePath) -> bool {
    path.magic_number_matches(&LHA_MAGIC)
}

/// `tar` can read formats we have no signature for (old v7 headers,
/// `compress`). Only ask it when the name or the `.Z` magic suggests tar.
fn tar_lists(path: &ArchivePath, ctx: &ExtractContext) -> bool {
    if path.is_dir() || is_compressed(path) {
        return false;
    }
    let tar_named = TAR_EXTENSIONS.iter().any(|ext| path.extension_matches(ext))
        || path.extension_matches(".tar.z");
    if !tar_named && !path.magic_number_starts_with(b"\x1F\x9D") {
        return false;
    }
    let Ok(tar) = ctx.tool(&tools::TAR, "tar") else {
        return false;
    };
    let cmd = ToolCommand::new(tar)
        .args(["--list", "--file"])
        .arg(path.path());
    ctx.probe(&cmd)
        .is_some_and(|out| !out.stdout_str().trim().is_empty())
}

/// Windows executables that `file` identifies as self-extracting archives.
fn is_self_extracting(path: &ArchivePath, ctx: &ExtractContext) -> bool {
    if !path.magic_number_starts_with(b"MZ") {
        return false;
    }
    let Ok(file) = ctx.tool(&tools::FILE, "self-extracting executable") else {
        return false;
    };
    let cmd = ToolCommand::new(file).arg("-b").arg(path.path());
    ctx.probe(&cmd)
        .is_some_and(|out| out.stdout_str().contains("self-extracting archive"))
}

/// Shared invocation for every format `unar` understands.
fn generic_unar(job: &UnpackJob<'_>, strategy: &'static str) -> Result<()> {
    let mut cmd = job
        .ctx
        .command(&tools::UNAR, strategy)?
        .arg("-force-overwrite");
    if !job.verbose {
        cmd = cmd.arg("-quiet");
    }
    let cmd = cmd
        .args(["-no-recursion", "-output-directory"])
        .arg(job.unpack_dir)
        .arg("--")
        .arg(job.source.path());
    job.ctx.run(&cmd, job.verbose).map(drop)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandOutput;
    use crate::strategy::testing::{FakeRunner, context};
    use std::path::Path;
    use tempfile::tempdir;

    fn write(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_signatures() {
        let dir = tempdir().unwrap();
        let mut ustar = vec![0u8; 512];
        ustar[257..263].copy_from_slice(b"ustar\0");

        let cases: Vec<(Vec<u8>, &Strategy)> = vec![
            (ustar, &TAR),
            (b"PK\x03\x04rest".to_vec(), &ZIP),
            (b"PK\x05\x06".to_vec(), &ZIP),
            (b"xar!\x00\x1c".to_vec(), &XAR),
            (b"7z\xBC\xAF\x27\x1C\x00\x04".to_vec(), &SEVEN_ZIP),
            (b"MSCF\x00\x00\x00\x00".to_vec(), &CAB),
            (b"Rar!\x1A\x07\x00".to_vec(), &RAR),
            (b"StuffIt (c)1997".to_vec(), &SIT),
            (b"\x24\x9A-lh5-\x10\x00".to_vec(), &LHA),
        ];

        for (i, (bytes, expected)) in cases.iter().enumerate() {
            let probe = ArchivePath::new(write(dir.path(), &format!("f{i}"), bytes));
            assert!(expected.matches_signature(&probe), "{} should match", expected.name());
            for other in [&TAR, &ZIP, &XAR, &SEVEN_ZIP, &CAB, &RAR, &SIT, &LHA] {
                if other.kind != expected.kind {
                    assert!(
                        !other.matches_signature(&probe),
                        "{} matched {}",
                        other.name(),
                        expected.name()
                    );
                }
            }
        }
    }

    #[test]
    fn test_seven_zip_command() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        let source = write(dir.path(), "a.7z", b"7z\xBC\xAF\x27\x1C");
        let runner = FakeRunner::new(|_| CommandOutput::success(""));
        let ctx = context(runner.clone(), dir.path().to_path_buf());

        SEVEN_ZIP
            .extract_to_dir(&ArchivePath::new(&source), &out, "a.7z", false, &ctx)
            .unwrap();

        assert_eq!(
            runner.commands(),
            vec![format!("7zr x -y -bd -bso0 {} -o{}", source.display(), out.display())]
        );
    }

    #[test]
    fn test_rar_uses_generic_unar() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        let source = write(dir.path(), "a.rar", b"Rar!\x1A\x07\x00");
        let runner = FakeRunner::new(|_| CommandOutput::success(""));
        let ctx = context(runner.clone(), dir.path().to_path_buf());

        RAR.extract_to_dir(&ArchivePath::new(&source), &out, "a.rar", false, &ctx)
            .unwrap();

        assert_eq!(
            runner.commands(),
            vec![format!(
                "unar -force-overwrite -quiet -no-recursion -output-directory {} -- {}",
                out.display(),
                source.display()
            )]
        );
    }

    #[test]
    fn test_cab_and_xar_commands() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("out");
        let cab = write(dir.path(), "a.cab", b"MSCF");
        let xar = write(dir.path(), "a.xar", b"xar!");
        let runner = FakeRunner::new(|_| CommandOutput::success(""));
        let ctx = context(runner.clone(), dir.path().to_path_buf());

        CAB.extract_to_dir(&ArchivePath::new(&cab), &out, "a.cab", false, &ctx)
            .unwrap();
        XAR.extract_to_dir(&ArchivePath::new(&xar), &out, "a.xar", true, &ctx)
            .unwrap();

        assert_eq!(
            runner.commands(),
            vec![
                format!("cabextract -q -d {} -- {}", out.display(), cab.display()),
                format!("xar -x -f {} -C {}", xar.display(), out.display()),
            ]
        );
    }

    #[test]
    fn test_tar_probe_only_for_tar_names() {
        let dir = tempdir().unwrap();
        let named = write(dir.path(), "old.tar", b"v7 header without magic");
        let unnamed = write(dir.path(), "blob.bin", b"v7 header without magic");
        let runner = FakeRunner::new(|_| CommandOutput::success("file\n"));
        let ctx = context(runner.clone(), dir.path().to_path_buf());

        assert!(!TAR.matches_probe(&ArchivePath::new(&unnamed), &ctx));
        assert!(runner.commands().is_empty());

        assert!(TAR.matches_probe(&ArchivePath::new(&named), &ctx));
        assert_eq!(
            runner.commands(),
            vec![format!("tar --list --file {}", named.display())]
        );
    }

    #[test]
    fn test_tar_needs_a_non_empty_listing() {
        let dir = tempdir().unwrap();
        let empty = write(dir.path(), "empty.tar", b"");
        let runner = FakeRunner::new(|_| CommandOutput::success(""));
        let ctx = context(runner.clone(), dir.path().to_path_buf());

        assert!(!TAR.matches_probe(&ArchivePath::new(&empty), &ctx));
        assert_eq!(runner.commands().len(), 1);
    }

    #[test]
    fn test_self_extracting_probe() {
        let dir = tempdir().unwrap();
        let exe = write(dir.path(), "setup.exe", b"MZ\x90\x00");
        let sfx = FakeRunner::new(|_| {
            CommandOutput::success(concat!(
                "PE32 executable (GUI) Intel 80386, for MS Windows, ",
                "RAR self-extracting archive"
            ))
        });
        let plain = FakeRunner::new(|_| CommandOutput::success("PE32 executable (console) x86-64"));

        let probe = ArchivePath::new(&exe);
        let scratch = dir.path().to_path_buf();
        let sfx = context(sfx, scratch.clone());
        let plain = context(plain, scratch);
        assert!(SELF_EXTRACTING_EXECUTABLE.matches_probe(&probe, &sfx));
        assert!(!SELF_EXTRACTING_EXECUTABLE.matches_probe(&probe, &plain));
    }

    #[test]
    fn test_missing_dependency_reported_before_running() {
        struct Nothing;
        impl crate::process::ToolResolver for Nothing {
            fn resolve(&self, _: &crate::process::ExternalTool) -> Option<std::path::PathBuf> {
                None
            }
        }

        let dir = tempdir().unwrap();
        let source = write(dir.path(), "a.rar", b"Rar!");
        let runner = FakeRunner::new(|_| CommandOutput::success(""));
        let ctx = ExtractContext::new(
            runner.clone(),
            std::sync::Arc::new(Nothing),
            crate::config::UnpackConfig::default(),
        );

        let out = dir.path().join("out");
        let err = RAR
            .extract_to_dir(&ArchivePath::new(&source), &out, "a.rar", false, &ctx)
            .unwrap_err();
        assert!(matches!(err, crate::UnpackError::MissingTool { tool: "unar", strategy: "rar" }));
        assert!(runner.commands().is_empty());
    }
}
