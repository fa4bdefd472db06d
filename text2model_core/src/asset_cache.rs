use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use image::{ImageFormat, RgbaImage};
use tracing::debug;

use crate::error::{Error, Result};

/// A generated bitmap together with the file it is persisted to.
#[derive(Debug, Clone)]
pub struct GeneratedImageRecord {
    pub bitmap: RgbaImage,
    pub path: PathBuf,
    pub index: usize,
    pub created_at: DateTime<Utc>,
}

/// PNG files for generated images, one per slot index.
#[derive(Debug, Clone)]
pub struct AssetCache {
    temp_dir: PathBuf,
}

impl AssetCache {
    pub fn new(temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            temp_dir: temp_dir.into(),
        }
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// `<temp dir>/generated_<index>.png`
    pub fn path_for(&self, index: usize) -> PathBuf {
        self.temp_dir.join(format!("generated_{index}.png"))
    }

    /// Writes `bitmap` to the slot for `index`, replacing whatever was there.
    pub fn store(&self, bitmap: &RgbaImage, index: usize) -> Result<PathBuf> {
        fs::create_dir_all(&self.temp_dir).map_err(|err| Error::io(&self.temp_dir, err))?;

        let mut encoded = Cursor::new(Vec::new());
        bitmap.write_to(&mut encoded, ImageFormat::Png)?;

        let path = self.path_for(index);
        fs::write(&path, encoded.get_ref()).map_err(|err| Error::io(&path, err))?;
        debug!(path = %path.display(), bytes = encoded.get_ref().len(), "stored generated image");
        Ok(path)
    }

    /// Stores `bitmap` and wraps it into a record.
    pub fn record(&self, bitmap: RgbaImage, index: usize) -> Result<GeneratedImageRecord> {
        let path = self.store(&bitmap, index)?;
        Ok(GeneratedImageRecord {
            bitmap,
            path,
            index,
            created_at: Utc::now(),
        })
    }

    /// Re-writes a record's file when it is no longer on disk.
    pub fn ensure_stored(&self, record: &GeneratedImageRecord) -> Result<()> {
        if record.path.exists() {
            return Ok(());
        }
        if let Some(parent) = record.path.parent() {
            fs::create_dir_all(parent).map_err(|err| Error::io(parent, err))?;
        }
        let mut encoded = Cursor::new(Vec::new());
        record.bitmap.write_to(&mut encoded, ImageFormat::Png)?;
        fs::write(&record.path, encoded.get_ref()).map_err(|err| Error::io(&record.path, err))?;
        debug!(path = %record.path.display(), "restored missing image file");
        Ok(())
    }
}
