use std::io::Cursor;

use base64::Engine;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use qrcode::{Color, EcLevel, QrCode};

pub const DEFAULT_SIZE: u32 = 300;
pub const DEFAULT_MARGIN: u32 = 2;

const DARK: Luma<u8> = Luma([0]);
const LIGHT: Luma<u8> = Luma([255]);

/// Renders payload strings as square PNG QR codes.
///
/// Error correction is fixed at level M (roughly 15% of the symbol can be
/// damaged and still scan).
#[derive(Debug, Clone, Copy)]
pub struct QrRenderer {
    size: u32,
    margin: u32,
}

impl QrRenderer {
    pub fn new(size: u32, margin: u32) -> Self {
        Self {
            size: size.max(21),
            margin,
        }
    }

    /// Render to raw PNG bytes
    pub fn render_png(&self, payload: &str) -> Result<Vec<u8>, RenderError> {
        let code = QrCode::with_error_correction_level(payload.as_bytes(), EcLevel::M)
            .map_err(|e| RenderError::Capacity(e.to_string()))?;

        let modules = self.rasterize(&code);
        let scaled = imageops::resize(&modules, self.size, self.size, FilterType::Nearest);

        let mut png = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(scaled)
            .write_to(&mut png, ImageFormat::Png)
            .map_err(|e| RenderError::Encode(e.to_string()))?;
        Ok(png.into_inner())
    }

    /// Render as a `data:image/png;base64,...` URI
    pub fn render_data_uri(&self, payload: &str) -> Result<String, RenderError> {
        let png = self.render_png(payload)?;
        Ok(format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(png)
        ))
    }

    /// One pixel per module, surrounded by the quiet margin
    fn rasterize(&self, code: &QrCode) -> GrayImage {
        let width = code.width() as u32;
        let side = width + 2 * self.margin;
        let mut img = GrayImage::from_pixel(side, side, LIGHT);

        for (i, color) in code.to_colors().into_iter().enumerate() {
            if color == Color::Dark {
                let i = i as u32;
                img.put_pixel(self.margin + i % width, self.margin + i / width, DARK);
            }
        }
        img
    }
}

impl Default for QrRenderer {
    fn default() -> Self {
        Self::new(DEFAULT_SIZE, DEFAULT_MARGIN)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RenderError {
    #[error("Payload does not fit in a QR symbol: {0}")]
    Capacity(String),

    #[error("Image encoding failed: {0}")]
    Encode(String),
}
