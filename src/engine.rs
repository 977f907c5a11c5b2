//! The particle simulation engine.
//!
//! [`WindEngine`] owns every GPU resource of one visualization: the particle
//! state textures, the two screen textures used for trails, the color ramp,
//! the wind field texture and the three programs. Construction is two-phase:
//!
//! 1. [`WindEngine::new`] allocates textures (synchronous),
//! 2. [`WindEngine::initialize`] compiles the programs (asynchronous).
//!
//! Until both have happened and a wind field was supplied, [`WindEngine::draw`]
//! does nothing.
//!
//! Each frame runs two passes, in this order:
//!
//! - **screen**: draw the previous screen faded by `fade_opacity` plus the
//!   particles into the next screen texture, blend that onto the output
//!   surface, then swap the screen roles;
//! - **update**: run the update program over every particle texel into the
//!   next state texture, then swap the particle roles.
//!
//! ```ignore
//! let ctx = Context::headless(800, 600).await?;
//! let mut engine = WindEngine::new(ctx, WindConfig::default())?;
//! engine.initialize(&ShaderSources::embedded()).await?;
//! engine.set_wind_field(field)?;
//! loop {
//!     engine.draw()?;
//! }
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::assets::ShaderSources;
use crate::config::{self, WindConfig};
use crate::error::{GpuError, WindError};
use crate::field::WindField;
use crate::gpu::{
    Context, DrawMode, DrawStats, FilterMode, Framebuffer, Program, Texture, TextureData,
};
use crate::particles::{particle_resolution, ParticleState, PingPong};
use crate::ramp::{ColorRamp, RAMP_WIDTH};

/// Two triangles covering the unit square.
pub const QUAD: [[f32; 2]; 6] = [
    [0.0, 0.0],
    [1.0, 0.0],
    [0.0, 1.0],
    [0.0, 1.0],
    [1.0, 0.0],
    [1.0, 1.0],
];

const UNIT_WIND: u32 = 0;
const UNIT_PARTICLES: u32 = 1;
/// Shared by the screen texture and the color ramp.
const UNIT_AUX: u32 = 2;

struct Programs {
    draw: Program,
    screen: Program,
    update: Program,
}

enum EngineState {
    Uninitialized,
    Ready(Box<Programs>),
}

struct InstalledField {
    field: WindField,
    texture: Texture,
}

/// GPU wind visualization: one field, one particle population.
pub struct WindEngine {
    ctx: Context,
    config: WindConfig,
    state: EngineState,
    framebuffer: Framebuffer,
    ramp: Texture,
    screens: PingPong<Texture>,
    particles: PingPong<Texture>,
    particle_res: u32,
    /// Particle count the `a_index` attribute was last filled for.
    indexed: u32,
    field: Option<InstalledField>,
    rng: StdRng,
}

impl WindEngine {
    /// Allocate the engine's textures against `ctx`.
    pub fn new(mut ctx: Context, config: WindConfig) -> Result<Self, WindError> {
        config.validate()?;
        if let Some(color) = config.background {
            let [r, g, b, a] = color.to_f64();
            ctx.set_clear_color(wgpu::Color { r, g, b, a });
        }

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let ramp = create_ramp_texture(&ctx, &config.color_ramp)?;
        let (width, height) = ctx.surface_size();
        let screens = create_screen_textures(&ctx, width.max(1), height.max(1))?;
        let (particles, particle_res) =
            create_particle_textures(&ctx, config.particle_count, &mut rng)?;

        log::debug!(
            "engine allocated: screen {}x{}, {} particles",
            width,
            height,
            particle_res * particle_res
        );
        Ok(Self {
            ctx,
            config,
            state: EngineState::Uninitialized,
            framebuffer: Framebuffer::new(),
            ramp,
            screens,
            particles,
            particle_res,
            indexed: 0,
            field: None,
            rng,
        })
    }

    /// Compile the draw, screen and update programs.
    ///
    /// On failure the engine keeps its previous state; a fresh engine stays
    /// uninitialized and never draws.
    pub async fn initialize(&mut self, sources: &ShaderSources) -> Result<(), WindError> {
        let ctx = &self.ctx;
        let draw = Program::new(ctx, &sources.draw_vert, &sources.draw_frag).await?;
        let mut screen = Program::new(ctx, &sources.quad_vert, &sources.screen_frag).await?;
        let mut update = Program::new(ctx, &sources.quad_vert, &sources.update_frag).await?;

        screen.attribute_mut("a_pos")?.set(ctx, &QUAD)?;
        update.attribute_mut("a_pos")?.set(ctx, &QUAD)?;

        self.state = EngineState::Ready(Box::new(Programs {
            draw,
            screen,
            update,
        }));
        self.indexed = 0;
        log::info!("wind engine ready");
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, EngineState::Ready(_))
    }

    pub fn config(&self) -> &WindConfig {
        &self.config
    }

    /// Draw calls and frames since the context was created.
    pub fn stats(&self) -> DrawStats {
        self.ctx.stats()
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    /// Reallocate both screen textures (zero-filled) and resize the surface.
    ///
    /// Like every setter that replaces a texture, this also empties the
    /// texture units holding the old one so it is freed right away.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), WindError> {
        if width == 0 || height == 0 {
            return Err(GpuError::resource(
                "screen texture",
                format!("cannot resize to {}x{}", width, height),
            )
            .into());
        }
        let screens = create_screen_textures(&self.ctx, width, height)?;
        self.ctx.resize_surface(width, height);
        for old in self.screens.iter() {
            old.unbind(&mut self.ctx);
        }
        self.screens = screens;
        log::debug!("resized to {}x{}", width, height);
        Ok(())
    }

    /// Rebuild the color ramp texture.
    pub fn set_color_ramp(&mut self, ramp: &ColorRamp) -> Result<(), WindError> {
        let texture = create_ramp_texture(&self.ctx, ramp)?;
        self.ramp.unbind(&mut self.ctx);
        self.ramp = texture;
        self.config.color_ramp = ramp.clone();
        Ok(())
    }

    /// Re-seed the population with `ceil(sqrt(count))²` random particles.
    pub fn set_particle_count(&mut self, count: u32) -> Result<(), WindError> {
        config::check_particle_count(count)?;
        let (particles, res) = create_particle_textures(&self.ctx, count, &mut self.rng)?;
        for old in self.particles.iter() {
            old.unbind(&mut self.ctx);
        }
        self.particles = particles;
        self.particle_res = res;
        self.config.particle_count = count;
        Ok(())
    }

    /// Number of simulated particles (a perfect square).
    ///
    /// Always fits in `u32`: larger populations are rejected at allocation.
    pub fn particle_count(&self) -> u32 {
        self.particle_res * self.particle_res
    }

    /// Side length of the particle state textures.
    pub fn particle_resolution(&self) -> u32 {
        self.particle_res
    }

    /// Install a wind field, replacing any previous one.
    pub fn set_wind_field(&mut self, field: WindField) -> Result<(), WindError> {
        let texture = Texture::new(
            &self.ctx,
            "wind field",
            FilterMode::Linear,
            TextureData::bytes(field.pixels(), field.width(), field.height()),
        )?;
        log::info!(
            "wind field installed: {}x{}, u=[{}, {}], v=[{}, {}]",
            field.width(),
            field.height(),
            field.range().u_min,
            field.range().u_max,
            field.range().v_min,
            field.range().v_max
        );
        if let Some(old) = &self.field {
            old.texture.unbind(&mut self.ctx);
        }
        self.field = Some(InstalledField { field, texture });
        Ok(())
    }

    pub fn wind_field(&self) -> Option<&WindField> {
        self.field.as_ref().map(|f| &f.field)
    }

    pub fn set_fade_opacity(&mut self, value: f32) -> Result<(), WindError> {
        self.config.fade_opacity = config::check_fade_opacity(value)?;
        Ok(())
    }

    pub fn set_speed_factor(&mut self, value: f32) -> Result<(), WindError> {
        self.config.speed_factor = config::check_speed_factor(value)?;
        Ok(())
    }

    pub fn set_drop_rate(&mut self, value: f32) -> Result<(), WindError> {
        self.config.drop_rate = config::check_drop_rate(value)?;
        Ok(())
    }

    pub fn set_drop_rate_bump(&mut self, value: f32) -> Result<(), WindError> {
        self.config.drop_rate_bump = config::check_drop_rate_bump(value)?;
        Ok(())
    }

    /// Role flag of the screen textures; flips on every drawn frame.
    pub fn screens_swapped(&self) -> bool {
        self.screens.is_swapped()
    }

    /// Role flag of the particle state textures; flips on every drawn frame.
    pub fn particles_swapped(&self) -> bool {
        self.particles.is_swapped()
    }

    /// `(background, screen)`: last frame's image and the one drawn next.
    pub fn screen_textures(&self) -> (&Texture, &Texture) {
        self.screens.pair()
    }

    /// `(current, next)` particle state textures.
    pub fn particle_textures(&self) -> (&Texture, &Texture) {
        self.particles.pair()
    }

    /// Read the current particle state back from the GPU.
    pub fn read_particle_state(&self) -> Result<ParticleState, WindError> {
        let bytes = self.particles.current().read_pixels(&self.ctx)?;
        ParticleState::from_bytes(self.particle_res, bytes).ok_or_else(|| {
            GpuError::BufferMapping("particle readback has unexpected size".to_string()).into()
        })
    }

    /// Render one frame. A no-op until the engine is ready and has a field.
    pub fn draw(&mut self) -> Result<(), WindError> {
        let Self {
            ctx,
            config,
            state,
            framebuffer,
            ramp,
            screens,
            particles,
            particle_res,
            indexed,
            field,
            rng,
        } = self;

        let EngineState::Ready(programs) = state else {
            log::trace!("draw skipped: engine not initialized");
            return Ok(());
        };
        let Some(field) = field.as_ref() else {
            log::trace!("draw skipped: no wind field");
            return Ok(());
        };

        field.texture.bind_to_unit(ctx, UNIT_WIND)?;
        particles.current().bind_to_unit(ctx, UNIT_PARTICLES)?;

        let count = *particle_res * *particle_res;
        if *indexed != count {
            let indices: Vec<f32> = (0..count).map(|i| i as f32).collect();
            programs
                .draw
                .attribute_mut("a_index")?
                .set_scalars(ctx, &indices)?;
            *indexed = count;
        }

        let pass = ScreenPass {
            framebuffer: &mut *framebuffer,
            screens: &mut *screens,
            ramp,
            field: &field.field,
            particle_res: *particle_res,
            fade_opacity: config.fade_opacity,
        };
        pass.run(ctx, programs)?;

        let rand_seed = rng.gen::<f32>();
        let pass = UpdatePass {
            framebuffer,
            particles,
            field: &field.field,
            config,
            rand_seed,
        };
        pass.run(ctx, &mut programs.update)?;

        ctx.present();
        Ok(())
    }
}

struct ScreenPass<'a> {
    framebuffer: &'a mut Framebuffer,
    screens: &'a mut PingPong<Texture>,
    ramp: &'a Texture,
    field: &'a WindField,
    particle_res: u32,
    fade_opacity: f32,
}

impl ScreenPass<'_> {
    fn run(self, ctx: &mut Context, programs: &mut Programs) -> Result<(), WindError> {
        let (background, screen) = self.screens.pair();
        {
            let mut target = self.framebuffer.attach(ctx, screen);
            draw_texture(&mut programs.screen, &mut target, background, self.fade_opacity)?;
            self.draw_particles(&mut programs.draw, &mut target)?;
            target.detach();
        }

        ctx.set_blend(Some(wgpu::BlendState::ALPHA_BLENDING));
        let composited = draw_texture(&mut programs.screen, ctx, screen, 1.0);
        ctx.set_blend(None);
        composited?;

        self.screens.swap();
        Ok(())
    }

    fn draw_particles(&self, program: &mut Program, ctx: &mut Context) -> Result<(), WindError> {
        let range = self.field.range();
        self.ramp.bind_to_unit(ctx, UNIT_AUX)?;

        program.set_uniform(ctx, "u_wind", UNIT_WIND)?;
        program.set_uniform(ctx, "u_particles", UNIT_PARTICLES)?;
        program.set_uniform(ctx, "u_color_ramp", UNIT_AUX)?;
        program.set_uniform(ctx, "u_particles_res", self.particle_res as f32)?;
        program.set_uniform(ctx, "u_wind_min", range.min())?;
        program.set_uniform(ctx, "u_wind_max", range.max())?;

        let count = self.particle_res * self.particle_res;
        program.draw(ctx, DrawMode::Points, 0..count)
    }
}

struct UpdatePass<'a> {
    framebuffer: &'a mut Framebuffer,
    particles: &'a mut PingPong<Texture>,
    field: &'a WindField,
    config: &'a WindConfig,
    rand_seed: f32,
}

impl UpdatePass<'_> {
    fn run(self, ctx: &mut Context, program: &mut Program) -> Result<(), WindError> {
        let range = self.field.range();
        {
            let mut target = self.framebuffer.attach(ctx, self.particles.next());

            program.set_uniform(&target, "u_wind", UNIT_WIND)?;
            program.set_uniform(&target, "u_particles", UNIT_PARTICLES)?;
            program.set_uniform(&target, "u_rand_seed", self.rand_seed)?;
            program.set_uniform(&target, "u_wind_res", self.field.resolution())?;
            program.set_uniform(&target, "u_wind_min", range.min())?;
            program.set_uniform(&target, "u_wind_max", range.max())?;
            program.set_uniform(&target, "u_speed_factor", self.config.speed_factor)?;
            program.set_uniform(&target, "u_drop_rate", self.config.drop_rate)?;
            program.set_uniform(&target, "u_drop_rate_bump", self.config.drop_rate_bump)?;

            program.draw(&mut target, DrawMode::Triangles, 0..QUAD.len() as u32)?;
            target.detach();
        }
        self.particles.swap();
        Ok(())
    }
}

/// Full-target quad sampling `texture` at `opacity`.
fn draw_texture(
    program: &mut Program,
    ctx: &mut Context,
    texture: &Texture,
    opacity: f32,
) -> Result<(), WindError> {
    texture.bind_to_unit(ctx, UNIT_AUX)?;
    program.set_uniform(ctx, "u_screen", UNIT_AUX)?;
    program.set_uniform(ctx, "u_opacity", opacity)?;
    program.draw(ctx, DrawMode::Triangles, 0..QUAD.len() as u32)
}

fn create_ramp_texture(ctx: &Context, ramp: &ColorRamp) -> Result<Texture, GpuError> {
    let pixels = ramp.rasterize();
    Texture::new(
        ctx,
        "color ramp",
        FilterMode::Linear,
        TextureData::bytes(&pixels, RAMP_WIDTH, 1),
    )
}

fn create_screen_textures(ctx: &Context, width: u32, height: u32) -> Result<PingPong<Texture>, GpuError> {
    let background = Texture::zeroed(ctx, "background", FilterMode::Nearest, width, height)?;
    let screen = Texture::zeroed(ctx, "screen", FilterMode::Nearest, width, height)?;
    Ok(PingPong::new(background, screen))
}

fn create_particle_textures(
    ctx: &Context,
    count: u32,
    rng: &mut StdRng,
) -> Result<(PingPong<Texture>, u32), GpuError> {
    let res = particle_resolution(count);
    let max = ctx.device().limits().max_texture_dimension_2d;
    if res > max || res.checked_mul(res).is_none() {
        return Err(GpuError::resource(
            "particle state",
            format!("{count} particles need a {res}x{res} texture, the device allows {max}x{max}"),
        ));
    }
    let state = ParticleState::random(count, rng).ok_or_else(|| {
        GpuError::resource("particle state", format!("{count} particles do not fit in memory"))
    })?;
    let data = TextureData::bytes(state.bytes(), res, res);
    let current = Texture::new(ctx, "particle state 0", FilterMode::Nearest, data)?;
    let next = Texture::new(ctx, "particle state 1", FilterMode::Nearest, data)?;
    log::debug!("particle state {}x{} ({} particles)", res, res, res * res);
    Ok((PingPong::new(current, next), res))
}
