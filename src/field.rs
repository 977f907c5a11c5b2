//! Wind field state.
//!
//! A wind field is an RGBA8 image whose red and green channels hold the
//! quantized `u` (eastward) and `v` (northward) velocity components. The value
//! range needed to de-quantize them travels alongside the image:
//!
//! ```text
//! u = u_min + (u_max - u_min) * R / 255
//! v = v_min + (v_max - v_min) * G / 255
//! ```
//!
//! Fields are supplied wholesale and are immutable; replacing one means
//! building a new [`WindField`].

use glam::Vec2;
use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::AssetLoadError;

/// Lower bound of [`WindRange::max_speed`]; keeps the normalization finite
/// for all-zero ranges.
pub const MIN_SPEED: f32 = 1e-6;

/// Value range of the two velocity components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindRange {
    pub u_min: f32,
    pub u_max: f32,
    pub v_min: f32,
    pub v_max: f32,
}

impl WindRange {
    pub fn new(u_min: f32, u_max: f32, v_min: f32, v_max: f32) -> Self {
        Self {
            u_min,
            u_max,
            v_min,
            v_max,
        }
    }

    /// Same range on both axes.
    pub fn symmetric(limit: f32) -> Self {
        Self::new(-limit, limit, -limit, limit)
    }

    pub fn min(&self) -> Vec2 {
        Vec2::new(self.u_min, self.v_min)
    }

    pub fn max(&self) -> Vec2 {
        Vec2::new(self.u_max, self.v_max)
    }

    /// Speed used to normalize particle colors and the speed-dependent drop
    /// rate: the longer of the two corner vectors, never below [`MIN_SPEED`].
    pub fn max_speed(&self) -> f32 {
        self.max().length().max(self.min().length()).max(MIN_SPEED)
    }

    fn validate(&self) -> Result<(), AssetLoadError> {
        let all_finite = [self.u_min, self.u_max, self.v_min, self.v_max]
            .iter()
            .all(|v| v.is_finite());
        if !all_finite || self.u_min > self.u_max || self.v_min > self.v_max {
            return Err(AssetLoadError::InvalidField(format!(
                "invalid value range u=[{}, {}] v=[{}, {}]",
                self.u_min, self.u_max, self.v_min, self.v_max
            )));
        }
        Ok(())
    }

    /// De-quantize a stored `(R, G)` pair.
    #[inline]
    pub fn decode(&self, r: u8, g: u8) -> Vec2 {
        self.decode_normalized(Vec2::new(r as f32, g as f32) / 255.0)
    }

    /// De-quantize channel values already normalized to `[0, 1]`.
    #[inline]
    pub fn decode_normalized(&self, rg: Vec2) -> Vec2 {
        self.min() + (self.max() - self.min()) * rg
    }

    /// Quantize a velocity, clamping to the range.
    pub fn encode(&self, velocity: Vec2) -> [u8; 2] {
        let q = |value: f32, min: f32, max: f32| {
            if max <= min {
                return 0;
            }
            (((value - min) / (max - min)).clamp(0.0, 1.0) * 255.0).round() as u8
        };
        [
            q(velocity.x, self.u_min, self.u_max),
            q(velocity.y, self.v_min, self.v_max),
        ]
    }
}

/// Metadata file accompanying a wind image.
///
/// ```json
/// { "width": 360, "height": 180, "uMin": -21.3, "uMax": 26.8,
///   "vMin": -21.6, "vMax": 20.7, "source": "gfs", "date": "2016-11-20T00:00Z" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindMeta {
    pub width: u32,
    pub height: u32,
    pub u_min: f32,
    pub u_max: f32,
    pub v_min: f32,
    pub v_max: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl WindMeta {
    pub fn range(&self) -> WindRange {
        WindRange::new(self.u_min, self.u_max, self.v_min, self.v_max)
    }
}

/// A quantized vector field plus what is needed to decode it.
#[derive(Debug, Clone, PartialEq)]
pub struct WindField {
    width: u32,
    height: u32,
    range: WindRange,
    pixels: Vec<u8>,
}

impl WindField {
    /// Wrap raw RGBA bytes (`width * height * 4`).
    pub fn from_bytes(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        range: WindRange,
    ) -> Result<Self, AssetLoadError> {
        if width == 0 || height == 0 {
            return Err(AssetLoadError::InvalidField(format!(
                "field size {}x{} is empty",
                width, height
            )));
        }
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(AssetLoadError::InvalidField(format!(
                "expected {} bytes for {}x{} RGBA, got {}",
                expected,
                width,
                height,
                pixels.len()
            )));
        }
        range.validate()?;
        Ok(Self {
            width,
            height,
            range,
            pixels,
        })
    }

    /// Use a decoded image; dimensions come from the image.
    pub fn from_image(image: RgbaImage, range: WindRange) -> Result<Self, AssetLoadError> {
        let (width, height) = image.dimensions();
        Self::from_bytes(image.into_raw(), width, height, range)
    }

    /// Combine a metadata record with its image.
    ///
    /// The image is authoritative for the size; a disagreeing record is logged.
    pub fn from_meta(meta: &WindMeta, image: RgbaImage) -> Result<Self, AssetLoadError> {
        if image.dimensions() != (meta.width, meta.height) {
            log::warn!(
                "wind metadata says {}x{} but image is {}x{}; using the image size",
                meta.width,
                meta.height,
                image.width(),
                image.height()
            );
        }
        Self::from_image(image, meta.range())
    }

    /// A field with the same velocity everywhere.
    pub fn uniform(
        width: u32,
        height: u32,
        velocity: Vec2,
        range: WindRange,
    ) -> Result<Self, AssetLoadError> {
        Self::from_fn(width, height, range, |_| velocity)
    }

    /// Quantize an analytic field. `f` receives texel centers in `[0, 1]²`
    /// with `y` pointing down the image.
    pub fn from_fn<F>(width: u32, height: u32, range: WindRange, f: F) -> Result<Self, AssetLoadError>
    where
        F: Fn(Vec2) -> Vec2,
    {
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                let uv = Vec2::new(
                    (x as f32 + 0.5) / width as f32,
                    (y as f32 + 0.5) / height as f32,
                );
                let [r, g] = range.encode(f(uv));
                pixels.extend_from_slice(&[r, g, 0, 255]);
            }
        }
        Self::from_bytes(pixels, width, height, range)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn resolution(&self) -> Vec2 {
        Vec2::new(self.width as f32, self.height as f32)
    }

    pub fn range(&self) -> &WindRange {
        &self.range
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Stored `(R, G)` channels of a texel, normalized to `[0, 1]`.
    /// `x` wraps around and `y` is clamped.
    pub fn texel(&self, x: i64, y: i64) -> Vec2 {
        let x = x.rem_euclid(self.width as i64) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        let i = (y * self.width as usize + x) * 4;
        Vec2::new(self.pixels[i] as f32, self.pixels[i + 1] as f32) / 255.0
    }

    /// Velocity at a texel.
    pub fn velocity_at(&self, x: u32, y: u32) -> Vec2 {
        self.range
            .decode_normalized(self.texel(x as i64, y as i64))
    }

    /// Bilinear lookup of the de-quantized velocity at `uv`, matching the
    /// update shader: corners at `floor(uv * res)`, weights `fract(uv * res)`.
    pub fn lookup(&self, uv: Vec2) -> Vec2 {
        let scaled = uv * self.resolution();
        let corner = scaled.floor();
        let f = scaled - corner;
        let (x, y) = (corner.x as i64, corner.y as i64);

        let tl = self.texel(x, y);
        let tr = self.texel(x + 1, y);
        let bl = self.texel(x, y + 1);
        let br = self.texel(x + 1, y + 1);
        let rg = tl.lerp(tr, f.x).lerp(bl.lerp(br, f.x), f.y);
        self.range.decode_normalized(rg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_128_decodes_near_zero() {
        let range = WindRange::new(-10.0, 10.0, -10.0, 10.0);
        let v = range.decode(128, 128);
        assert!(v.x.abs() < 0.05, "{}", v.x);
        assert!((v.x - 0.0392).abs() < 1e-3);
        assert_eq!(range.decode(0, 255), Vec2::new(-10.0, 10.0));
    }

    #[test]
    fn test_max_speed_covers_both_corners() {
        assert_eq!(WindRange::new(-3.0, 0.0, -4.0, 0.0).max_speed(), 5.0);
        assert_eq!(WindRange::new(0.0, 3.0, 0.0, 4.0).max_speed(), 5.0);
        assert_eq!(WindRange::new(0.0, 0.0, 0.0, 0.0).max_speed(), MIN_SPEED);
    }

    #[test]
    fn test_encode_clamps() {
        let range = WindRange::symmetric(1.0);
        assert_eq!(range.encode(Vec2::new(-5.0, 5.0)), [0, 255]);
        assert_eq!(range.encode(Vec2::ZERO), [128, 128]);
    }

    #[test]
    fn test_from_bytes_rejects_bad_length() {
        let err = WindField::from_bytes(vec![0; 7], 2, 1, WindRange::symmetric(1.0)).unwrap_err();
        assert!(matches!(err, AssetLoadError::InvalidField(_)));
    }

    #[test]
    fn test_from_bytes_rejects_inverted_range() {
        let range = WindRange::new(1.0, -1.0, 0.0, 1.0);
        assert!(WindField::from_bytes(vec![0; 4], 1, 1, range).is_err());
    }

    #[test]
    fn test_uniform_field_lookup() {
        let range = WindRange::symmetric(1.0);
        let field = WindField::uniform(8, 4, Vec2::new(1.0, -1.0), range).unwrap();
        let v = field.lookup(Vec2::new(0.3, 0.7));
        assert!((v.x - 1.0).abs() < 1e-5);
        assert!((v.y + 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_lookup_wraps_horizontally() {
        let range = WindRange::symmetric(1.0);
        // Left column +1, right column -1.
        let field = WindField::from_fn(2, 1, range, |uv| {
            if uv.x < 0.5 {
                Vec2::new(1.0, 0.0)
            } else {
                Vec2::new(-1.0, 0.0)
            }
        })
        .unwrap();
        // Halfway between the last column and the wrapped first one.
        let v = field.lookup(Vec2::new(0.75, 0.0));
        assert!(v.x.abs() < 0.01, "{}", v.x);
    }

    #[test]
    fn test_meta_json() {
        let json = r#"{"width":4,"height":2,"uMin":-21.3,"uMax":26.8,"vMin":-21.6,"vMax":20.7}"#;
        let meta: WindMeta = serde_json::from_str(json).unwrap();
        assert_eq!(meta.width, 4);
        assert_eq!(meta.source, None);
        assert_eq!(meta.range().u_max, 26.8);

        let image = RgbaImage::new(4, 2);
        let field = WindField::from_meta(&meta, image).unwrap();
        assert_eq!(field.resolution(), Vec2::new(4.0, 2.0));
    }
}
