//! External tool plumbing.
//!
//! Strategies never call `std::process` directly. They build a
//! [`ToolCommand`] and hand it to an injected [`CommandRunner`]; binaries
//! are located through an injected [`ToolResolver`]. Both seams keep the
//! engine testable without the real tools installed.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use wait_timeout::ChildExt;

use crate::error::{Result, UnpackError};

/// A logical tool and the binary names that can satisfy it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternalTool {
    /// Logical name, as a user would install it (`p7zip`).
    pub name: &'static str,
    /// Candidate executables, in preference order (`7zr`, `7za`, `7z`).
    pub binaries: &'static [&'static str],
}

impl ExternalTool {
    /// A tool satisfied by any of `binaries`.
    pub const fn new(name: &'static str, binaries: &'static [&'static str]) -> Self {
        Self { name, binaries }
    }

    /// The preferred binary name.
    pub fn primary(&self) -> &'static str {
        self.binaries.first().copied().unwrap_or(self.name)
    }
}

/// Tool catalogue.
pub mod tools {
    use super::ExternalTool;

    pub const TAR: ExternalTool = ExternalTool::new("tar", &["tar", "gtar", "bsdtar"]);
    pub const GZIP: ExternalTool = ExternalTool::new("gzip", &["gunzip"]);
    pub const BZIP2: ExternalTool = ExternalTool::new("bzip2", &["bunzip2"]);
    pub const XZ: ExternalTool = ExternalTool::new("xz", &["unxz"]);
    pub const LZMA: ExternalTool = ExternalTool::new("xz", &["unlzma"]);
    pub const LZIP: ExternalTool = ExternalTool::new("lzip", &["lzip"]);
    pub const ZSTD: ExternalTool = ExternalTool::new("zstd", &["unzstd"]);
    pub const UNZIP: ExternalTool = ExternalTool::new("unzip", &["unzip"]);
    pub const XAR: ExternalTool = ExternalTool::new("xar", &["xar"]);
    pub const P7ZIP: ExternalTool = ExternalTool::new("p7zip", &["7zr", "7za", "7z"]);
    pub const CABEXTRACT: ExternalTool = ExternalTool::new("cabextract", &["cabextract"]);
    pub const UNAR: ExternalTool = ExternalTool::new("unar", &["unar"]);
    pub const FILE: ExternalTool = ExternalTool::new("file", &["file"]);
    pub const HDIUTIL: ExternalTool = ExternalTool::new("hdiutil", &["hdiutil"]);
    pub const DISKUTIL: ExternalTool = ExternalTool::new("diskutil", &["diskutil"]);
}

/// A fully resolved command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    /// Executable to spawn.
    pub program: PathBuf,
    /// Arguments, in order.
    pub args: Vec<OsString>,
    /// Bytes written to stdin before waiting.
    pub stdin: Option<Vec<u8>>,
}

impl ToolCommand {
    /// Start a command for `program`.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
        }
    }

    /// Append one argument.
    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Append several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    /// Feed `input` on stdin.
    pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    /// Program file name (`tar` for `/usr/bin/tar`).
    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .unwrap_or(self.program.as_os_str())
            .to_string_lossy()
            .into_owned()
    }

    /// Shell-like rendering for logs and errors.
    pub fn display(&self) -> String {
        let mut out = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            out.push(' ');
            let arg = arg.to_string_lossy();
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                out.push('\'');
                out.push_str(&arg);
                out.push('\'');
            } else {
                out.push_str(&arg);
            }
        }
        out
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` if killed by a signal.
    pub status: Option<i32>,
    /// Captured stdout.
    pub stdout: Vec<u8>,
    /// Captured stderr.
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn success(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failure(code: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            status: Some(code),
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    /// Whether the process exited with status zero.
    pub fn is_success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stdout decoded lossily.
    pub fn stdout_str(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stderr decoded lossily.
    pub fn stderr_str(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// Process-spawn facility.
pub trait CommandRunner: Send + Sync {
    /// Run `cmd` to completion, capturing its output.
    ///
    /// A non-zero exit is *not* an error here; see [`run_checked`].
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned or times out.
    fn run(&self, cmd: &ToolCommand) -> Result<CommandOutput>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for std::sync::Arc<T> {
    fn run(&self, cmd: &ToolCommand) -> Result<CommandOutput> {
        (**self).run(cmd)
    }
}

/// Run `cmd` and turn a non-zero exit into [`UnpackError::ToolFailed`].
///
/// # Errors
///
/// Spawn failures, timeouts, and non-zero exits.
pub fn run_checked(runner: &dyn CommandRunner, cmd: &ToolCommand) -> Result<CommandOutput> {
    let output = runner.run(cmd)?;
    if output.is_success() {
        Ok(output)
    } else {
        Err(UnpackError::ToolFailed {
            command: cmd.display(),
            status: output.status,
            stderr: output.stderr_str(),
        })
    }
}

/// [`CommandRunner`] backed by `std::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    timeout: Option<Duration>,
}

impl SystemRunner {
    /// Runner that waits indefinitely.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner that kills processes exceeding `timeout`.
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &ToolCommand) -> Result<CommandOutput> {
        let mut command = Command::new(&cmd.program);
        command
            .args(&cmd.args)
            .stdin(if cmd.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command
            .spawn()
            .map_err(|e| UnpackError::io(&cmd.program, e))?;

        if let (Some(input), Some(mut pipe)) = (cmd.stdin.clone(), child.stdin.take()) {
            // Some tools exit before draining stdin; a broken pipe is fine.
            std::thread::spawn(move || {
                let _ = pipe.write_all(&input);
            });
        }

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let status = match self.timeout {
            Some(limit) => {
                if let Some(status) = child.wait_timeout(limit)? {
                    status
                } else {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(UnpackError::ToolTimeout {
                        command: cmd.display(),
                        timeout: limit,
                    });
                }
            }
            None => child.wait()?,
        };

        Ok(CommandOutput {
            status: status.code(),
            stdout: stdout.map(join_drain).unwrap_or_default(),
            stderr: stderr.map(join_drain).unwrap_or_default(),
        })
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        buf
    })
}

fn join_drain(handle: std::thread::JoinHandle<Vec<u8>>) -> Vec<u8> {
    handle.join().unwrap_or_default()
}

/// Maps a logical tool to an installed binary.
pub trait ToolResolver: Send + Sync {
    /// Path to a binary satisfying `tool`, if installed.
    fn resolve(&self, tool: &ExternalTool) -> Option<PathBuf>;
}

impl<T: ToolResolver + ?Sized> ToolResolver for std::sync::Arc<T> {
    fn resolve(&self, tool: &ExternalTool) -> Option<PathBuf> {
        (**self).resolve(tool)
    }
}

/// [`ToolResolver`] that searches `PATH` via `which`, honoring overrides.
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    overrides: HashMap<String, PathBuf>,
}

impl PathResolver {
    /// Resolver with explicit `name -> binary` overrides.
    pub fn new(overrides: HashMap<String, PathBuf>) -> Self {
        Self { overrides }
    }
}

impl ToolResolver for PathResolver {
    fn resolve(&self, tool: &ExternalTool) -> Option<PathBuf> {
        if let Some(path) = self.overrides.get(tool.name) {
            return Some(path.clone());
        }
        tool.binaries
            .iter()
            .find_map(|bin| which::which(bin).ok())
    }
}

/// Resolve every binary to its own name, leaving lookup to the OS.
///
/// Useful with fake runners in tests, where nothing is on disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct BareNameResolver;

impl ToolResolver for BareNameResolver {
    fn resolve(&self, tool: &ExternalTool) -> Option<PathBuf> {
        Some(PathBuf::from(tool.primary()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_quotes_whitespace() {
        let cmd = ToolCommand::new("/usr/bin/unzip")
            .args(["-qq", "-d"])
            .arg("/tmp/My Dir")
            .arg("");
        assert_eq!(cmd.display(), "/usr/bin/unzip -qq -d '/tmp/My Dir' ''");
        assert_eq!(cmd.program_name(), "unzip");
    }

    #[test]
    fn test_primary_binary() {
        assert_eq!(tools::P7ZIP.primary(), "7zr");
        assert_eq!(tools::LZMA.name, "xz");
    }

    #[test]
    fn test_override_wins() {
        let mut overrides = HashMap::new();
        overrides.insert("unar".to_string(), PathBuf::from("/opt/unar/bin/unar"));
        let resolver = PathResolver::new(overrides);
        assert_eq!(
            resolver.resolve(&tools::UNAR),
            Some(PathBuf::from("/opt/unar/bin/unar"))
        );
    }

    #[test]
    fn test_missing_binary_unresolved() {
        let tool = ExternalTool {
            name: "nope",
            binaries: &["apl-unpack-definitely-not-installed"],
        };
        assert!(PathResolver::default().resolve(&tool).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_captures_output() {
        let runner = SystemRunner::new();
        let cmd = ToolCommand::new("/bin/sh")
            .arg("-c")
            .arg("cat; echo err >&2; exit 3")
            .stdin("hello");
        let out = runner.run(&cmd).unwrap();
        assert_eq!(out.status, Some(3));
        assert_eq!(out.stdout_str(), "hello");
        assert_eq!(out.stderr_str().trim(), "err");

        let err = run_checked(&runner, &cmd).unwrap_err();
        assert!(matches!(err, UnpackError::ToolFailed { status: Some(3), .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_system_runner_timeout() {
        let runner = SystemRunner::with_timeout(Some(Duration::from_millis(100)));
        let cmd = ToolCommand::new("/bin/sh").arg("-c").arg("sleep 5");
        let err = runner.run(&cmd).unwrap_err();
        assert!(matches!(err, UnpackError::ToolTimeout { .. }));
    }

    #[test]
    fn test_spawn_failure_names_program() {
        let runner = SystemRunner::new();
        let err = runner
            .run(&ToolCommand::new("/nonexistent/apl-unpack-tool"))
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/apl-unpack-tool"));
    }
}
