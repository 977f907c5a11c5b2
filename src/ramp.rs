//! Color ramps for speed-based particle coloring.
//!
//! A ramp is a sparse mapping from stop position in `[0, 1]` to color. It is
//! rasterized into a 256×1 RGBA lookup texture that the particle shader samples
//! with the normalized particle speed.
//!
//! ```ignore
//! let ramp = ColorRamp::new([(0.0, "#000000"), (1.0, "#ffffff")])?;
//! engine.set_color_ramp(&ramp)?;
//! ```

use std::collections::BTreeMap;
use std::fmt;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Width of the rasterized ramp texture.
pub const RAMP_WIDTH: u32 = 256;

/// An 8-bit RGBA color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Rgba(pub [u8; 4]);

impl Rgba {
    pub const TRANSPARENT: Rgba = Rgba([0, 0, 0, 0]);
    pub const BLACK: Rgba = Rgba([0, 0, 0, 255]);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Rgba([r, g, b, 255])
    }

    /// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidColor(s.to_string());
        let hex = s.trim().strip_prefix('#').ok_or_else(invalid)?;
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());
        match hex.len() {
            3 => {
                let nibble = |i: usize| {
                    u8::from_str_radix(&hex[i..i + 1], 16)
                        .map(|v| v * 17)
                        .map_err(|_| invalid())
                };
                Ok(Rgba([nibble(0)?, nibble(1)?, nibble(2)?, 255]))
            }
            6 => Ok(Rgba([byte(0)?, byte(2)?, byte(4)?, 255])),
            8 => Ok(Rgba([byte(0)?, byte(2)?, byte(4)?, byte(6)?])),
            _ => Err(invalid()),
        }
    }

    /// Convert a linear `[0, 1]` RGB triple.
    pub fn from_vec3(c: Vec3) -> Self {
        let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        Rgba([q(c.x), q(c.y), q(c.z), 255])
    }

    pub fn lerp(self, other: Rgba, t: f32) -> Rgba {
        let mut out = [0u8; 4];
        for (i, o) in out.iter_mut().enumerate() {
            let a = self.0[i] as f32;
            let b = other.0[i] as f32;
            *o = (a + (b - a) * t).round().clamp(0.0, 255.0) as u8;
        }
        Rgba(out)
    }

    /// Normalized `[r, g, b, a]`, as used for clear colors.
    pub fn to_f64(self) -> [f64; 4] {
        self.0.map(|c| c as f64 / 255.0)
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.0;
        if a == 255 {
            write!(f, "#{:02x}{:02x}{:02x}", r, g, b)
        } else {
            write!(f, "#{:02x}{:02x}{:02x}{:02x}", r, g, b, a)
        }
    }
}

impl std::str::FromStr for Rgba {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Rgba::parse(s)
    }
}

impl Serialize for Rgba {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Rgba {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Rgba::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// One stop of a color ramp.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorStop {
    pub position: f32,
    pub color: Rgba,
}

/// Predefined ramps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Palette {
    /// Blue to red spectral ramp.
    #[default]
    Spectral,
    Viridis,
    Magma,
    Plasma,
    Inferno,
    Ocean,
    Fire,
    Grayscale,
}

impl Palette {
    pub const ALL: [Palette; 8] = [
        Palette::Spectral,
        Palette::Viridis,
        Palette::Magma,
        Palette::Plasma,
        Palette::Inferno,
        Palette::Ocean,
        Palette::Fire,
        Palette::Grayscale,
    ];

    /// The palette after this one in [`Palette::ALL`], wrapping around.
    pub fn next(self) -> Palette {
        let index = Self::ALL.iter().position(|p| *p == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }

    fn colors(&self) -> [Vec3; 5] {
        match self {
            Palette::Spectral => [
                Vec3::new(0.196, 0.533, 0.741),
                Vec3::new(0.671, 0.867, 0.643),
                Vec3::new(0.996, 0.878, 0.545),
                Vec3::new(0.957, 0.427, 0.263),
                Vec3::new(0.835, 0.243, 0.310),
            ],
            Palette::Viridis => [
                Vec3::new(0.267, 0.004, 0.329),
                Vec3::new(0.282, 0.140, 0.458),
                Vec3::new(0.127, 0.566, 0.551),
                Vec3::new(0.369, 0.789, 0.383),
                Vec3::new(0.993, 0.906, 0.144),
            ],
            Palette::Magma => [
                Vec3::new(0.001, 0.0, 0.014),
                Vec3::new(0.329, 0.071, 0.435),
                Vec3::new(0.716, 0.215, 0.475),
                Vec3::new(0.994, 0.541, 0.380),
                Vec3::new(0.987, 0.991, 0.749),
            ],
            Palette::Plasma => [
                Vec3::new(0.050, 0.030, 0.528),
                Vec3::new(0.494, 0.012, 0.658),
                Vec3::new(0.798, 0.280, 0.470),
                Vec3::new(0.973, 0.580, 0.254),
                Vec3::new(0.940, 0.975, 0.131),
            ],
            Palette::Inferno => [
                Vec3::new(0.001, 0.0, 0.014),
                Vec3::new(0.341, 0.063, 0.429),
                Vec3::new(0.735, 0.216, 0.330),
                Vec3::new(0.988, 0.645, 0.198),
                Vec3::new(0.988, 1.0, 0.644),
            ],
            Palette::Ocean => [
                Vec3::new(0.0, 0.05, 0.15),
                Vec3::new(0.0, 0.2, 0.4),
                Vec3::new(0.0, 0.4, 0.6),
                Vec3::new(0.2, 0.6, 0.8),
                Vec3::new(0.6, 0.9, 1.0),
            ],
            Palette::Fire => [
                Vec3::new(0.1, 0.0, 0.0),
                Vec3::new(0.5, 0.0, 0.0),
                Vec3::new(1.0, 0.3, 0.0),
                Vec3::new(1.0, 0.7, 0.0),
                Vec3::new(1.0, 1.0, 0.8),
            ],
            Palette::Grayscale => [
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(0.25, 0.25, 0.25),
                Vec3::new(0.5, 0.5, 0.5),
                Vec3::new(0.75, 0.75, 0.75),
                Vec3::new(1.0, 1.0, 1.0),
            ],
        }
    }
}

/// A validated set of color stops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, Rgba>", into = "BTreeMap<String, Rgba>")]
pub struct ColorRamp {
    stops: Vec<ColorStop>,
}

impl ColorRamp {
    /// Build a ramp from `(position, color)` pairs in any order.
    pub fn new<'a, I>(stops: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (f32, &'a str)>,
    {
        let stops = stops
            .into_iter()
            .map(|(position, color)| {
                Ok(ColorStop {
                    position,
                    color: Rgba::parse(color)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Self::from_stops(stops)
    }

    pub fn from_stops(stops: Vec<ColorStop>) -> Result<Self, ConfigError> {
        if stops.is_empty() {
            return Err(ConfigError::EmptyRamp);
        }
        if let Some(bad) = stops
            .iter()
            .find(|s| !s.position.is_finite() || !(0.0..=1.0).contains(&s.position))
        {
            return Err(ConfigError::InvalidStop(bad.position.to_string()));
        }
        Ok(Self { stops })
    }

    /// Evenly spaced stops from a predefined palette.
    pub fn from_palette(palette: Palette) -> Self {
        let colors = palette.colors();
        let last = (colors.len() - 1) as f32;
        let stops = colors
            .iter()
            .enumerate()
            .map(|(i, &c)| ColorStop {
                position: i as f32 / last,
                color: Rgba::from_vec3(c),
            })
            .collect();
        Self { stops }
    }

    pub fn stops(&self) -> &[ColorStop] {
        &self.stops
    }

    /// Rasterize into [`RAMP_WIDTH`]×1 RGBA bytes.
    pub fn rasterize(&self) -> Vec<u8> {
        build_color_ramp(&self.stops)
    }
}

impl Default for ColorRamp {
    fn default() -> Self {
        let stops = [
            (0.0, Rgba::rgb(0x32, 0x88, 0xbd)),
            (0.1, Rgba::rgb(0x66, 0xc2, 0xa5)),
            (0.2, Rgba::rgb(0xab, 0xdd, 0xa4)),
            (0.3, Rgba::rgb(0xe6, 0xf5, 0x98)),
            (0.4, Rgba::rgb(0xfe, 0xe0, 0x8b)),
            (0.5, Rgba::rgb(0xfd, 0xae, 0x61)),
            (0.6, Rgba::rgb(0xf4, 0x6d, 0x43)),
            (1.0, Rgba::rgb(0xd5, 0x3e, 0x4f)),
        ];
        Self {
            stops: stops
                .into_iter()
                .map(|(position, color)| ColorStop { position, color })
                .collect(),
        }
    }
}

impl TryFrom<BTreeMap<String, Rgba>> for ColorRamp {
    type Error = ConfigError;

    fn try_from(map: BTreeMap<String, Rgba>) -> Result<Self, Self::Error> {
        let stops = map
            .into_iter()
            .map(|(key, color)| {
                let position = key
                    .trim()
                    .parse::<f32>()
                    .map_err(|_| ConfigError::InvalidStop(key.clone()))?;
                Ok(ColorStop { position, color })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        Self::from_stops(stops)
    }
}

impl From<ColorRamp> for BTreeMap<String, Rgba> {
    fn from(ramp: ColorRamp) -> Self {
        ramp.stops
            .into_iter()
            .map(|s| (s.position.to_string(), s.color))
            .collect()
    }
}

/// Rasterize color stops into a 256-wide RGBA byte buffer.
///
/// Stops are sorted by position first, so the order in which they are given
/// does not matter. Texel `x` samples the gradient at `(x + 0.5) / 256`;
/// positions before the first stop or after the last take that stop's color.
pub fn build_color_ramp(stops: &[ColorStop]) -> Vec<u8> {
    let mut sorted = stops.to_vec();
    sorted.sort_by(|a, b| {
        a.position
            .total_cmp(&b.position)
            .then_with(|| a.color.cmp(&b.color))
    });

    let mut out = Vec::with_capacity(RAMP_WIDTH as usize * 4);
    for x in 0..RAMP_WIDTH {
        let t = (x as f32 + 0.5) / RAMP_WIDTH as f32;
        out.extend_from_slice(&sample_sorted(&sorted, t).0);
    }
    out
}

fn sample_sorted(stops: &[ColorStop], t: f32) -> Rgba {
    let Some(first) = stops.first() else {
        return Rgba::TRANSPARENT;
    };
    let upper = stops.partition_point(|s| s.position < t);
    if upper == 0 {
        return first.color;
    }
    let Some(b) = stops.get(upper) else {
        return stops[stops.len() - 1].color;
    };
    let a = &stops[upper - 1];
    let span = b.position - a.position;
    if span <= f32::EPSILON {
        return b.color;
    }
    a.color.lerp(b.color, (t - a.position) / span)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texel(buf: &[u8], x: usize) -> [u8; 4] {
        [buf[x * 4], buf[x * 4 + 1], buf[x * 4 + 2], buf[x * 4 + 3]]
    }

    fn assert_close(actual: [u8; 4], expected: [u8; 4]) {
        for (a, e) in actual.iter().zip(expected) {
            assert!(a.abs_diff(e) <= 2, "{:?} != {:?}", actual, expected);
        }
    }

    #[test]
    fn test_parse_colors() {
        assert_eq!(Rgba::parse("#3288bd").unwrap(), Rgba::rgb(0x32, 0x88, 0xbd));
        assert_eq!(Rgba::parse("#fff").unwrap(), Rgba::rgb(255, 255, 255));
        assert_eq!(Rgba::parse("#01020304").unwrap(), Rgba([1, 2, 3, 4]));
        assert!(Rgba::parse("3288bd").is_err());
        assert!(Rgba::parse("#12345").is_err());
        assert!(Rgba::parse("#zzzzzz").is_err());
    }

    #[test]
    fn test_ramp_is_order_independent() {
        let forward = ColorRamp::new([(0.0, "#000000"), (0.5, "#ff0000"), (1.0, "#ffffff")]).unwrap();
        let shuffled = ColorRamp::new([(1.0, "#ffffff"), (0.0, "#000000"), (0.5, "#ff0000")]).unwrap();
        assert_eq!(forward.rasterize(), shuffled.rasterize());
    }

    #[test]
    fn test_ramp_size_and_endpoints() {
        let buf = ColorRamp::new([(0.0, "#000000"), (1.0, "#ffffff")])
            .unwrap()
            .rasterize();
        assert_eq!(buf.len(), 256 * 4);
        assert_close(texel(&buf, 0), [0, 0, 0, 255]);
        assert_close(texel(&buf, 255), [255, 255, 255, 255]);
        let mid = texel(&buf, 128);
        assert!(mid[0] > 120 && mid[0] < 136);
    }

    #[test]
    fn test_ramp_clamps_outside_stops() {
        let buf = ColorRamp::new([(0.25, "#ff0000"), (0.75, "#0000ff")])
            .unwrap()
            .rasterize();
        assert_eq!(texel(&buf, 0), [255, 0, 0, 255]);
        assert_eq!(texel(&buf, 255), [0, 0, 255, 255]);
    }

    #[test]
    fn test_ramp_rejects_bad_stops() {
        assert!(matches!(
            ColorRamp::new(std::iter::empty()),
            Err(ConfigError::EmptyRamp)
        ));
        assert!(matches!(
            ColorRamp::new([(1.5, "#000000")]),
            Err(ConfigError::InvalidStop(_))
        ));
    }

    #[test]
    fn test_default_ramp_matches_spectral_stops() {
        let ramp = ColorRamp::default();
        assert_eq!(ramp.stops().len(), 8);
        let buf = ramp.rasterize();
        assert_close(texel(&buf, 0), [0x32, 0x88, 0xbd, 255]);
        assert_close(texel(&buf, 255), [0xd5, 0x3e, 0x4f, 255]);
    }

    #[test]
    fn test_ramp_json_round_trip() {
        let json = r##"{"0.0": "#3288bd", "1": "#d53e4f"}"##;
        let ramp: ColorRamp = serde_json::from_str(json).unwrap();
        assert_eq!(ramp.stops().len(), 2);
        let text = serde_json::to_string(&ramp).unwrap();
        let again: ColorRamp = serde_json::from_str(&text).unwrap();
        assert_eq!(ramp.rasterize(), again.rasterize());
    }

    #[test]
    fn test_palette_has_five_stops() {
        let ramp = ColorRamp::from_palette(Palette::Viridis);
        assert_eq!(ramp.stops().len(), 5);
        assert_eq!(ramp.stops()[4].position, 1.0);
    }

    #[test]
    fn test_palette_next_wraps() {
        assert_eq!(Palette::Spectral.next(), Palette::Viridis);
        assert_eq!(Palette::Grayscale.next(), Palette::Spectral);
    }
}
