//! Directory-of-JSON raster source.
//!
//! Each raster is one file holding `{"shape": [C, H, W], "data": [...]}`
//! with `data` in row-major order. `null` samples decode to NaN, so
//! no-data pixels survive until the dataset sanitizes them.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::model::Frame;
use crate::{Error, Result};
use super::{select_bands, BandSelection, RasterHandle, RasterSource, SourceCapabilities};

/// On-disk representation of one raster.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterFile {
    pub shape: [usize; 3],
    pub data: Vec<Option<f32>>,
}

impl RasterFile {
    pub fn from_frame(frame: &Frame) -> Self {
        let (c, h, w) = frame.dim();
        Self {
            shape: [c, h, w],
            data: frame.iter().map(|&v| if v.is_nan() { None } else { Some(v) }).collect(),
        }
    }

    pub fn into_frame(self, id: &str) -> Result<Frame> {
        let [c, h, w] = self.shape;
        let len = self.data.len();
        let data = self.data.into_iter().map(|v| v.unwrap_or(f32::NAN)).collect();
        Frame::from_shape_vec((c, h, w), data).map_err(|_| Error::RasterUnreadable {
            id: id.to_string(),
            reason: format!("shape {:?} needs {} samples, file has {len}", [c, h, w], c * h * w),
        })
    }
}

/// Rasters stored as JSON files in one directory (no recursion).
#[derive(Debug, Clone)]
pub struct JsonDirSource {
    root: PathBuf,
    extension: String,
}

impl JsonDirSource {
    /// Open a directory; fails if it does not exist.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("raster directory {} not found", root.display()),
            )));
        }
        Ok(Self { root, extension: "json".into() })
    }

    /// Filter on a different file extension (without the dot).
    pub fn with_extension(mut self, ext: impl Into<String>) -> Self {
        self.extension = ext.into();
        self
    }

    /// Write a frame as `<root>/<id>.<ext>`.
    pub fn write(&self, id: &str, frame: &Frame) -> Result<PathBuf> {
        let path = self.path_of(id);
        let file = fs::File::create(&path)?;
        serde_json::to_writer(std::io::BufWriter::new(file), &RasterFile::from_frame(frame))?;
        Ok(path)
    }

    fn path_of(&self, id: &str) -> PathBuf {
        self.root.join(format!("{id}.{}", self.extension))
    }
}

/// A decoded JSON raster.
pub struct JsonHandle {
    frame: Frame,
}

impl RasterHandle for JsonHandle {
    fn band_count(&self) -> usize {
        self.frame.dim().0
    }

    fn shape(&self) -> (usize, usize) {
        let (_, h, w) = self.frame.dim();
        (h, w)
    }

    fn read(&self, bands: &BandSelection) -> Result<Frame> {
        select_bands(&self.frame, bands)
    }
}

impl RasterSource for JsonDirSource {
    type Handle = JsonHandle;

    fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some(self.extension.as_str()) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        Ok(ids)
    }

    fn open(&self, id: &str) -> Result<JsonHandle> {
        let bytes = fs::read(self.path_of(id))?;
        let file: RasterFile = serde_json::from_slice(&bytes).map_err(|e| Error::RasterUnreadable {
            id: id.to_string(),
            reason: e.to_string(),
        })?;
        Ok(JsonHandle { frame: file.into_frame(id)? })
    }

    fn capabilities(&self) -> SourceCapabilities {
        SourceCapabilities {
            concurrent_reads: true,
            lazy_decode: false,
            extensions: vec![self.extension.clone()],
        }
    }
}
