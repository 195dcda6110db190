//! Best-effort lossless PNG optimization via an external program.

use crate::{Error, Result};
use log::debug;
use std::path::Path;
use std::process::Command;

/// Default optimizer executable, looked up on `PATH`.
pub const DEFAULT_OPTIMIZER: &str = "optipng";

/// Rewrites a PNG in place without changing its pixels.
pub trait Optimizer: Send + Sync {
    fn name(&self) -> &str;

    fn optimize(&self, path: &Path) -> Result<()>;
}

/// Runs `program [args..] <path>` and waits for it.
#[derive(Debug, Clone)]
pub struct ExternalOptimizer {
    program: String,
    args: Vec<String>,
}

impl ExternalOptimizer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for ExternalOptimizer {
    fn default() -> Self {
        Self::new(DEFAULT_OPTIMIZER)
    }
}

impl Optimizer for ExternalOptimizer {
    fn name(&self) -> &str {
        &self.program
    }

    fn optimize(&self, path: &Path) -> Result<()> {
        debug!("running {} on {}", self.program, path.display());
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .output()
            .map_err(|e| Error::Optimizer(format!("failed to run {}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Optimizer(format!(
                "{} {} exited with {}: {}",
                self.program,
                path.display(),
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}

/// Leaves files untouched (`--no-optimize`).
#[derive(Debug, Clone, Default)]
pub struct NoopOptimizer;

impl Optimizer for NoopOptimizer {
    fn name(&self) -> &str {
        "none"
    }

    fn optimize(&self, _path: &Path) -> Result<()> {
        Ok(())
    }
}
