//! Filesystem layout: where rendered documents are read from and where
//! table images are written.

use crate::{Error, ExportDate, Result};
use log::debug;
use std::path::{Path, PathBuf};

/// Paths derived from a base directory.
#[derive(Debug, Clone)]
pub struct Layout {
    base_dir: PathBuf,
}

impl Layout {
    /// Anchor the layout at `base_dir`, made absolute against the current
    /// working directory so printed image paths are absolute.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref();
        let base_dir = if base_dir.is_absolute() {
            base_dir.to_path_buf()
        } else {
            std::env::current_dir()?.join(base_dir)
        };
        Ok(Self { base_dir })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// `<base>/data/<YYYYMMDD>/rendered.html`
    pub fn rendered_document(&self, date: &ExportDate) -> PathBuf {
        self.base_dir
            .join("data")
            .join(date.as_token())
            .join("rendered.html")
    }

    /// `<base>/public/<YYYY>/<MM>/<DD>`
    pub fn output_dir(&self, date: &ExportDate) -> PathBuf {
        self.base_dir
            .join("public")
            .join(&date.yyyy)
            .join(&date.mm)
            .join(&date.dd)
    }

    /// The rendered document path, or `Error::MissingInput` if it is absent.
    pub fn require_document(&self, date: &ExportDate) -> Result<PathBuf> {
        let path = self.rendered_document(date);
        if !path.exists() {
            return Err(Error::MissingInput(path));
        }
        Ok(path)
    }
}

/// Create the output directory chain. Existing directories are fine.
pub fn prepare_output_dir(dir: &Path) -> Result<()> {
    debug!("creating output directory {}", dir.display());
    std::fs::create_dir_all(dir)?;
    Ok(())
}

/// `<out_dir>/<id>.png`
pub fn image_path(out_dir: &Path, id: &str) -> PathBuf {
    out_dir.join(format!("{id}.png"))
}
