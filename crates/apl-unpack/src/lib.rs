//! apl-unpack - archive detection and extraction for APL
#![allow(missing_docs)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
//!
//! Given a downloaded artifact, work out what it is from its bytes (or, on
//! request, its name) and unpack it into a destination directory using the
//! platform's own tools: `tar`, `unzip`, `xar`, `7zr`, `cabextract`, `unar`,
//! the single-stream decompressors, and `hdiutil`/`diskutil` for disk images.
//!
//! # Overview
//!
//! - **Probe**: [`ArchivePath`] caches at most 262 leading bytes per input.
//! - **Registry**: [`STRATEGIES`] is one ordered table. Detection runs every
//!   cheap signature check before any check that spawns a process.
//! - **Nesting**: a lone container in the output (`.tar` inside `.gz`) is
//!   unwrapped again, up to a configurable depth.
//! - **Disk images**: mounted volumes are copied through a bill of materials
//!   and always ejected, with retries.
//!
//! # Example
//!
//! ```no_run
//! use apl_unpack::{ExtractContext, ExtractionRequest, extract};
//! use std::path::Path;
//!
//! let ctx = ExtractContext::from_env();
//! let request = ExtractionRequest::new("/tmp/out");
//! let kind = extract(Path::new("/tmp/ripgrep.tar.gz"), &request, &ctx)?;
//! println!("unpacked as {kind}");
//! # Ok::<(), apl_unpack::UnpackError>(())
//! ```

pub mod config;
pub mod context;
pub mod dmg;
pub mod error;
pub mod extract;
pub mod fs;
pub mod nested;
pub mod paths;
pub mod probe;
pub mod process;
pub mod registry;
pub mod strategy;

pub use config::UnpackConfig;
pub use context::ExtractContext;
pub use dmg::{MountPoint, MountState};
pub use error::{Result, UnpackError};
pub use extract::{ExtractionRequest, extract, extract_async};
pub use nested::NestedClaim;
pub use probe::ArchivePath;
pub use process::{
    BareNameResolver, CommandOutput, CommandRunner, ExternalTool, PathResolver, SystemRunner,
    ToolCommand, ToolResolver, tools,
};
pub use registry::{STRATEGIES, detect, detect_with, from_extension, from_kind};
pub use strategy::{ProbeCost, Strategy, StrategyKind};
