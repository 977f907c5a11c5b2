mod window;

use std::path::PathBuf;

use winit::event_loop::{ControlFlow, EventLoop};

use windfield::logging::{init_logging, LoggingConfig};
use windfield::{ShaderSources, Vec2, WindConfig, WindError, WindField, WindRange};

const USAGE: &str = "usage: windfield [--shaders DIR] [--config FILE] [WIND_STEM]

  --shaders DIR   load the five .wgsl shaders from DIR instead of the built-in ones
  --config FILE   read engine settings from a JSON file
  WIND_STEM       load WIND_STEM.json and WIND_STEM.png; without it a synthetic
                  vortex field is shown

keys: space pause, c cycle palette, [ ] halve/double particles, esc quit";

#[derive(Debug, Default)]
struct Args {
    shaders: Option<PathBuf>,
    config: Option<PathBuf>,
    wind: Option<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args::default();
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--shaders" => args.shaders = Some(iter.next().ok_or("--shaders needs a directory")?.into()),
            "--config" => args.config = Some(iter.next().ok_or("--config needs a file")?.into()),
            "-h" | "--help" => return Err(String::new()),
            other if other.starts_with('-') => return Err(format!("unknown option {other}")),
            other => args.wind = Some(other.into()),
        }
    }
    Ok(args)
}

/// Two counter-rotating vortices over a weak westerly.
fn vortex_field() -> Result<WindField, WindError> {
    let range = WindRange::symmetric(30.0);
    let centers = [(Vec2::new(0.3, 0.5), 1.0), (Vec2::new(0.7, 0.5), -1.0)];
    let field = WindField::from_fn(360, 180, range, |uv| {
        let mut v = Vec2::new(4.0, 0.0);
        for (center, spin) in centers {
            let d = uv - center;
            let falloff = (-d.length_squared() * 40.0).exp();
            v += Vec2::new(-d.y, d.x) * spin * 150.0 * falloff;
        }
        v
    })?;
    Ok(field)
}

fn load_options(args: &Args) -> Result<window::DemoOptions, WindError> {
    let shaders = match &args.shaders {
        Some(dir) => ShaderSources::load_dir(dir)?,
        None => ShaderSources::embedded(),
    };
    let config = match &args.config {
        Some(path) => WindConfig::load(path)?,
        None => WindConfig::default(),
    };
    let field = match &args.wind {
        Some(stem) => windfield::assets::load_wind_pair(stem)?,
        None => vortex_field()?,
    };
    Ok(window::DemoOptions {
        shaders,
        config,
        field,
    })
}

fn main() {
    init_logging(LoggingConfig::default());

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            if !message.is_empty() {
                eprintln!("{message}");
            }
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };
    let options = match load_options(&args) {
        Ok(options) => options,
        Err(e) => {
            log::error!("{e}");
            std::process::exit(1);
        }
    };

    let event_loop = match EventLoop::new() {
        Ok(event_loop) => event_loop,
        Err(e) => {
            log::error!("failed to create event loop: {e}");
            std::process::exit(1);
        }
    };
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = window::App::new(options);
    if let Err(e) = event_loop.run_app(&mut app) {
        log::error!("event loop error: {e}");
    }
}
