//! Per-call collaborators handed to every strategy.

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::UnpackConfig;
use crate::error::{Result, UnpackError};
use crate::process::{
    CommandOutput, CommandRunner, ExternalTool, PathResolver, SystemRunner, ToolCommand,
    ToolResolver, run_checked,
};

/// Runner, resolver and configuration for one or more extractions.
///
/// Cheap to clone; holds no mutable state.
#[derive(Clone)]
pub struct ExtractContext {
    runner: Arc<dyn CommandRunner>,
    resolver: Arc<dyn ToolResolver>,
    config: UnpackConfig,
}

impl std::fmt::Debug for ExtractContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ExtractContext {
    /// Assemble a context from explicit collaborators.
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        resolver: Arc<dyn ToolResolver>,
        config: UnpackConfig,
    ) -> Self {
        Self {
            runner,
            resolver,
            config,
        }
    }

    /// Real processes and `PATH` lookup, configured from the environment.
    pub fn from_env() -> Self {
        Self::with_config(UnpackConfig::from_env())
    }

    /// Real processes and `PATH` lookup with the given configuration.
    pub fn with_config(config: UnpackConfig) -> Self {
        let runner = Arc::new(SystemRunner::with_timeout(config.tool_timeout));
        let resolver = Arc::new(PathResolver::new(config.tool_overrides.clone()));
        Self::new(runner, resolver, config)
    }

    /// The active configuration.
    pub fn config(&self) -> &UnpackConfig {
        &self.config
    }

    /// The process runner.
    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    /// Resolve `tool` or fail with [`UnpackError::MissingTool`].
    ///
    /// # Errors
    ///
    /// The tool is not installed.
    pub fn tool(&self, tool: &ExternalTool, strategy: &'static str) -> Result<PathBuf> {
        self.resolver
            .resolve(tool)
            .ok_or(UnpackError::MissingTool {
                tool: tool.name,
                strategy,
            })
    }

    /// Start a [`ToolCommand`] for a resolved `tool`.
    ///
    /// # Errors
    ///
    /// The tool is not installed.
    pub fn command(&self, tool: &ExternalTool, strategy: &'static str) -> Result<ToolCommand> {
        self.tool(tool, strategy).map(ToolCommand::new)
    }

    /// Run `cmd`, failing on non-zero exit. Verbose runs log at info level.
    ///
    /// # Errors
    ///
    /// Spawn failure, timeout, or non-zero exit.
    pub fn run(&self, cmd: &ToolCommand, verbose: bool) -> Result<CommandOutput> {
        if verbose {
            tracing::info!("==> {}", cmd.display());
        } else {
            tracing::debug!("Running {}", cmd.display());
        }
        run_checked(self.runner(), cmd)
    }

    /// Run `cmd` and report only whether it succeeded. Used by probes.
    pub fn probe(&self, cmd: &ToolCommand) -> Option<CommandOutput> {
        tracing::trace!("Probing with {}", cmd.display());
        match self.runner.run(cmd) {
            Ok(out) if out.is_success() => Some(out),
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("Probe {} failed to run: {e}", cmd.program_name());
                None
            }
        }
    }
}
