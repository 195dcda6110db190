//! tableshot
//!
//! Exports every identified `<table>` of an already-rendered HTML page as a
//! high-resolution PNG, one file per table id, then runs a lossless PNG
//! optimizer over each image on a best-effort basis.
//!
//! # Layout
//!
//! For a date `YYYYMMDD` and a base directory `<base>`:
//!
//! - input: `<base>/data/<YYYYMMDD>/rendered.html`
//! - output: `<base>/public/<YYYY>/<MM>/<DD>/<table id>.png`
//!
//! # Example
//!
//! ```no_run
//! use tableshot::{ExportConfig, ExportDate};
//!
//! # async fn demo() -> tableshot::Result<()> {
//! let config = ExportConfig {
//!     base_dir: "/srv/stats".into(),
//!     ..Default::default()
//! };
//! let date = ExportDate::parse("20240115")?;
//! let report = tableshot::run(&config, &date, &mut std::io::stdout(), &mut std::io::stderr()).await?;
//! println!("{} tables exported", report.images.len());
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod error;
pub use error::{Error, Result};

pub mod date;
pub use date::ExportDate;

pub mod layout;
pub use layout::Layout;

pub mod discover;
pub mod optimize;

#[cfg(feature = "cdp")]
pub mod cdp;

// Async facade over a worker-owned engine
pub mod async_api;
pub use async_api::{Browser, Page};

pub mod export;
#[cfg(feature = "cdp")]
pub use export::run;
pub use export::{run_with, ExportReport};

/// Configuration for an export run
///
/// The defaults reproduce the production settings: a 3840x2160 viewport
/// rendered at 3x density, `optipng` as the optimizer and a 30 second wait
/// for each table to become visible.
///
/// # Examples
///
/// ```
/// let cfg = tableshot::ExportConfig::default();
/// assert_eq!(cfg.viewport.device_scale_factor, 3.0);
/// ```
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Directory holding `data/` and `public/`
    pub base_dir: PathBuf,
    /// Browser viewport
    pub viewport: Viewport,
    /// How long to wait for each table to become visible, in milliseconds
    pub wait_timeout_ms: u64,
    /// How long Chrome may sit idle before the connection is dropped
    pub idle_browser_timeout_ms: u64,
    /// Optimizer executable; `None` disables optimization
    pub optimizer: Option<String>,
}

impl ExportConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn idle_browser_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_browser_timeout_ms)
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("."),
            viewport: Viewport::default(),
            wait_timeout_ms: 30_000,
            idle_browser_timeout_ms: 600_000,
            optimizer: Some(optimize::DEFAULT_OPTIMIZER.to_string()),
        }
    }
}

/// Viewport dimensions in logical pixels plus the device pixel ratio
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub device_scale_factor: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 3840,
            height: 2160,
            device_scale_factor: 3.0,
        }
    }
}

/// The browser operations an export needs.
///
/// Implementations are driven from a single worker thread (see
/// [`async_api::Browser`]) and need not be `Send`.
pub trait Engine {
    /// Navigate to a local file and wait for the load to finish
    fn load_file(&mut self, path: &Path) -> Result<()>;

    /// Ids of every `table[id]` in document order
    fn table_ids(&mut self) -> Result<Vec<String>>;

    /// Block until an element with `id` is present and rendered.
    /// Returns `Error::Timeout` once `timeout` has elapsed.
    fn wait_visible(&mut self, id: &str, timeout: Duration) -> Result<()>;

    /// PNG bytes cropped to the `index`-th `table[id]`
    fn capture_table(&mut self, index: usize) -> Result<Vec<u8>>;

    /// Close the engine and release the browser
    fn close(self) -> Result<()>
    where
        Self: Sized;
}
