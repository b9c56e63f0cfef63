use color_eyre::Result;
use crate::renderer::error::RenderError;

/// Tightly packed RGBA8 pixels handed over by the scene layer
#[derive(Debug, Clone)]
pub struct TextureData {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl TextureData {
    pub const BYTES_PER_PIXEL: u64 = 4;

    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let texture = Self {
            pixels,
            width,
            height,
        };
        texture.validate()?;
        Ok(texture)
    }

    /// Two-tone checkerboard with `cells` squares per side
    pub fn checkerboard(size: u32, cells: u32, a: [u8; 4], b: [u8; 4]) -> Self {
        let cell = (size / cells.max(1)).max(1);
        let pixels = (0..size)
            .flat_map(|y| (0..size).map(move |x| (x, y)))
            .flat_map(|(x, y)| {
                if (x / cell + y / cell) % 2 == 0 { a } else { b }
            })
            .collect();
        Self {
            pixels,
            width: size,
            height: size,
        }
    }

    pub fn byte_size(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * Self::BYTES_PER_PIXEL
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::invalid("texture extent must be non-zero"));
        }
        if self.pixels.len() as u64 != self.byte_size() {
            return Err(RenderError::invalid(format!(
                "texture of {}x{} needs {} bytes, got {}",
                self.width,
                self.height,
                self.byte_size(),
                self.pixels.len()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkerboard_size_matches_extent() {
        let texture = TextureData::checkerboard(8, 2, [255; 4], [0, 0, 0, 255]);
        assert!(texture.validate().is_ok());
        assert_eq!(&texture.pixels[0..4], &[255; 4]);
        // First pixel of the second cell in the first row
        assert_eq!(&texture.pixels[16..20], &[0, 0, 0, 255]);
    }

    #[test]
    fn test_short_pixel_buffer_is_rejected() {
        assert!(TextureData::new(vec![0; 15], 2, 2).is_err());
    }
}
