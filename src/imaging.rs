//! Image grids and quadrant crops
//!
//! Decoding and encoding are CPU bound, so every public function moves the
//! work onto the blocking pool.

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, Rgba, RgbaImage};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImagingError {
    #[error("failed to decode {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("failed to encode {path}: {reason}")]
    Encode { path: String, reason: String },

    #[error("grid needs at least one image")]
    Empty,

    #[error("image worker failed: {0}")]
    Worker(String),
}

/// How a 2-column grid is laid out
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    /// Fixed cell edge; `None` uses the first image's size
    pub cell: Option<u32>,
    pub padding: u32,
    pub background: Rgba<u8>,
}

impl GridLayout {
    /// 1024×1024 canvas of four 512px cells
    pub fn square() -> Self {
        Self {
            cell: Some(512),
            padding: 0,
            background: Rgba([0, 0, 0, 255]),
        }
    }

    /// Native-size cells separated by a 10px dark border
    pub fn padded() -> Self {
        Self {
            cell: None,
            padding: 10,
            background: Rgba([0x1a, 0x1a, 0x2e, 255]),
        }
    }
}

/// Compose up to four images into a 2×2 grid written to `out`
pub async fn compose_grid(inputs: Vec<PathBuf>, layout: GridLayout, out: PathBuf) -> Result<(), ImagingError> {
    tokio::task::spawn_blocking(move || compose_grid_blocking(&inputs, layout, &out))
        .await
        .map_err(|e| ImagingError::Worker(e.to_string()))?
}

/// Crop quadrant `index` (0 = top-left, row major) of a 2×2 grid into `out`
pub async fn crop_quadrant(input: PathBuf, index: usize, out: PathBuf) -> Result<(), ImagingError> {
    tokio::task::spawn_blocking(move || crop_quadrant_blocking(&input, index, &out))
        .await
        .map_err(|e| ImagingError::Worker(e.to_string()))?
}

/// Sniffs the format from content; remote files often carry the wrong extension
fn open(path: &Path) -> Result<DynamicImage, ImagingError> {
    let decode_error = |reason: String| ImagingError::Decode {
        path: path.display().to_string(),
        reason,
    };
    ImageReader::open(path)
        .map_err(|e| decode_error(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| decode_error(e.to_string()))?
        .decode()
        .map_err(|e| decode_error(e.to_string()))
}

fn save(image: DynamicImage, path: &Path) -> Result<(), ImagingError> {
    // JPEG has no alpha channel
    DynamicImage::ImageRgb8(image.to_rgb8())
        .save(path)
        .map_err(|e| ImagingError::Encode {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

fn compose_grid_blocking(inputs: &[PathBuf], layout: GridLayout, out: &Path) -> Result<(), ImagingError> {
    let first = inputs.first().ok_or(ImagingError::Empty)?;
    let images = inputs.iter().take(4).map(|p| open(p)).collect::<Result<Vec<_>, _>>()?;

    let (cell_w, cell_h) = match layout.cell {
        Some(edge) => (edge, edge),
        None => {
            let first = images.first().ok_or(ImagingError::Empty)?;
            (first.width(), first.height())
        }
    };
    let pad = layout.padding;
    let width = cell_w * 2 + pad * 3;
    let height = cell_h * 2 + pad * 3;

    let mut canvas = RgbaImage::from_pixel(width, height, layout.background);
    for (i, img) in images.iter().enumerate() {
        let col = (i % 2) as u32;
        let row = (i / 2) as u32;
        let cell = if img.width() == cell_w && img.height() == cell_h {
            img.to_rgba8()
        } else {
            img.resize_exact(cell_w, cell_h, FilterType::Triangle).to_rgba8()
        };
        let x = pad + col * (cell_w + pad);
        let y = pad + row * (cell_h + pad);
        imageops::overlay(&mut canvas, &cell, x as i64, y as i64);
    }

    tracing::debug!("Composed {} images from {} into {}x{}", images.len(), first.display(), width, height);
    save(DynamicImage::ImageRgba8(canvas), out)
}

fn crop_quadrant_blocking(input: &Path, index: usize, out: &Path) -> Result<(), ImagingError> {
    let grid = open(input)?;
    let half_w = grid.width() / 2;
    let half_h = grid.height() / 2;
    let idx = index.min(3) as u32;
    let x = (idx % 2) * half_w;
    let y = (idx / 2) * half_h;

    save(grid.crop_imm(x, y, half_w, half_h), out)
}
