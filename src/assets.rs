//! Loading of shader sources and wind data.
//!
//! The engine never fetches anything itself; hosts hand it a [`ShaderSources`]
//! and a [`WindField`]. This module covers the common ways of producing them:
//! shaders embedded in the binary or read from a directory, and wind data
//! stored as a metadata JSON file next to a PNG image.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::AssetLoadError;
use crate::field::{WindField, WindMeta};

/// The five shader sources the engine needs, by role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderSources {
    /// Places particles (`a_index` → state texel → clip position).
    pub draw_vert: String,
    /// Colors particles by speed.
    pub draw_frag: String,
    /// Full-target quad shared by the screen and update programs.
    pub quad_vert: String,
    /// Draws a texture with an opacity.
    pub screen_frag: String,
    /// Advances particle state.
    pub update_frag: String,
}

impl ShaderSources {
    /// File names used by [`ShaderSources::load_dir`], in role order.
    pub const FILE_NAMES: [&'static str; 5] = [
        "draw.vert.wgsl",
        "draw.frag.wgsl",
        "quad.vert.wgsl",
        "screen.frag.wgsl",
        "update.frag.wgsl",
    ];

    /// The shaders compiled into the crate.
    pub fn embedded() -> Self {
        Self {
            draw_vert: include_str!("shaders/draw.vert.wgsl").to_string(),
            draw_frag: include_str!("shaders/draw.frag.wgsl").to_string(),
            quad_vert: include_str!("shaders/quad.vert.wgsl").to_string(),
            screen_frag: include_str!("shaders/screen.frag.wgsl").to_string(),
            update_frag: include_str!("shaders/update.frag.wgsl").to_string(),
        }
    }

    /// Role names, parallel to [`Self::FILE_NAMES`].
    pub const ROLES: [&'static str; 5] = [
        "draw vertex",
        "draw fragment",
        "quad vertex",
        "screen fragment",
        "update fragment",
    ];

    /// Read all five roles from `dir` using [`Self::FILE_NAMES`].
    pub fn load_dir(dir: impl AsRef<Path>) -> Result<Self, AssetLoadError> {
        let dir = dir.as_ref();
        let mut roles = Self::ROLES.iter();
        let [draw_vert, draw_frag, quad_vert, screen_frag, update_frag] =
            Self::FILE_NAMES.map(|name| {
                let role = roles.next().copied().unwrap_or("shader");
                let path = dir.join(name);
                match fs::read_to_string(&path) {
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        Err(AssetLoadError::MissingShader { role, path })
                    }
                    Err(source) => Err(AssetLoadError::Io { path, source }),
                    Ok(text) => Ok(text),
                }
            });
        Ok(Self {
            draw_vert: draw_vert?,
            draw_frag: draw_frag?,
            quad_vert: quad_vert?,
            screen_frag: screen_frag?,
            update_frag: update_frag?,
        })
    }
}

impl Default for ShaderSources {
    fn default() -> Self {
        Self::embedded()
    }
}

fn read_text(path: &Path) -> Result<String, AssetLoadError> {
    fs::read_to_string(path).map_err(|source| AssetLoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Parse wind metadata JSON.
pub fn parse_wind_meta(json: &str) -> Result<WindMeta, AssetLoadError> {
    Ok(serde_json::from_str(json)?)
}

/// Load a wind field from its metadata JSON and PNG image.
pub fn load_wind_field(
    meta_path: impl AsRef<Path>,
    image_path: impl AsRef<Path>,
) -> Result<WindField, AssetLoadError> {
    let meta = parse_wind_meta(&read_text(meta_path.as_ref())?)?;
    let image_path: PathBuf = image_path.as_ref().to_path_buf();
    let bytes = fs::read(&image_path).map_err(|source| AssetLoadError::Io {
        path: image_path.clone(),
        source,
    })?;
    let image = image::load_from_memory(&bytes)?.into_rgba8();
    log::info!(
        "loaded wind field {}x{}{}",
        image.width(),
        image.height(),
        meta.date
            .as_deref()
            .map(|d| format!(" ({})", d))
            .unwrap_or_default()
    );
    WindField::from_meta(&meta, image)
}

/// Load `<stem>.json` and `<stem>.png`, the layout used by wind data dumps.
pub fn load_wind_pair(stem: impl AsRef<Path>) -> Result<WindField, AssetLoadError> {
    let stem = stem.as_ref();
    load_wind_field(stem.with_extension("json"), stem.with_extension("png"))
}
