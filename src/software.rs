//! CPU reference of the particle update pass.
//!
//! [`SoftwareUpdater`] runs the same per-texel program as `update.frag.wgsl`
//! over a [`ParticleState`], using the same byte codec and the same bilinear
//! field lookup. It is useful without a GPU (tests, benchmarks, tooling) and
//! documents the numeric contract of the shader in plain Rust.
//!
//! Floating-point `sin` differs between CPUs and GPUs, so the random reset
//! pattern matches the shader statistically, not bit for bit.

use glam::Vec2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::WindConfig;
use crate::field::WindField;
use crate::particles::{decode_position, encode_position, ParticleState, PingPong};

const RAND_CONSTANTS: [f32; 3] = [12.9898, 78.233, 4375.85453];

/// Scale from field units to normalized positions per pass.
pub const STEP_SCALE: f32 = 0.0001;

/// Uniforms of one update pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateParams {
    pub speed_factor: f32,
    pub drop_rate: f32,
    pub drop_rate_bump: f32,
    /// Per-pass random value in `[0, 1)`.
    pub rand_seed: f32,
}

impl UpdateParams {
    pub fn from_config(config: &WindConfig, rand_seed: f32) -> Self {
        Self {
            speed_factor: config.speed_factor,
            drop_rate: config.drop_rate,
            drop_rate_bump: config.drop_rate_bump,
            rand_seed,
        }
    }
}

#[inline]
fn fract(v: f32) -> f32 {
    v - v.floor()
}

#[inline]
fn fract2(v: Vec2) -> Vec2 {
    v - v.floor()
}

/// Shader hash: `fract(sin(dot(k.xy, co)) * (k.z + dot(k.xy, co)))`.
#[inline]
pub fn rand(co: Vec2) -> f32 {
    let t = RAND_CONSTANTS[0] * co.x + RAND_CONSTANTS[1] * co.y;
    fract(t.sin() * (RAND_CONSTANTS[2] + t))
}

/// Advance one particle. Returns the new position and whether it was reset.
pub fn update_particle(field: &WindField, pos: Vec2, tex_pos: Vec2, params: &UpdateParams) -> (Vec2, bool) {
    let range = field.range();
    let velocity = field.lookup(pos);
    let speed_t = velocity.length() / range.max_speed();

    // equirectangular: horizontal steps grow towards the poles
    let distortion = (pos.y * 180.0 - 90.0).to_radians().cos();
    let offset = Vec2::new(velocity.x / distortion, -velocity.y) * STEP_SCALE * params.speed_factor;
    let moved = fract2(Vec2::ONE + pos + offset);

    let seed = (moved + tex_pos) * params.rand_seed;
    let drop_rate = params.drop_rate + speed_t * params.drop_rate_bump;
    let drop = rand(seed) >= 1.0 - drop_rate;
    if drop {
        let random_pos = Vec2::new(rand(seed + 1.3), rand(seed + 2.1));
        (random_pos, true)
    } else {
        (moved, false)
    }
}

/// Run one update pass from `src` into `dst`; returns the number of resets.
pub fn update_pass(field: &WindField, src: &ParticleState, dst: &mut ParticleState, params: &UpdateParams) -> usize {
    let res = src.resolution();
    let inv = 1.0 / res as f32;
    let mut dropped = 0;
    for (i, (texel_in, texel_out)) in src
        .bytes()
        .chunks_exact(4)
        .zip(dst.bytes_mut().chunks_exact_mut(4))
        .enumerate()
    {
        let (x, y) = (i as u32 % res, i as u32 / res);
        let tex_pos = Vec2::new((x as f32 + 0.5) * inv, (y as f32 + 0.5) * inv);
        let pos = decode_position([texel_in[0], texel_in[1], texel_in[2], texel_in[3]]);
        let (next, reset) = update_particle(field, pos, tex_pos, params);
        dropped += reset as usize;
        texel_out.copy_from_slice(&encode_position(next));
    }
    dropped
}

/// A double-buffered particle population advanced on the CPU.
pub struct SoftwareUpdater {
    particles: PingPong<ParticleState>,
    config: WindConfig,
    rng: StdRng,
}

impl SoftwareUpdater {
    /// `None` when the population is too large to hold in memory.
    pub fn new(config: WindConfig) -> Option<Self> {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let state = ParticleState::random(config.particle_count, &mut rng)?;
        Some(Self {
            particles: PingPong::new(state.clone(), state),
            config,
            rng,
        })
    }

    pub fn state(&self) -> &ParticleState {
        self.particles.current()
    }

    pub fn particles(&self) -> &PingPong<ParticleState> {
        &self.particles
    }

    /// Run one pass and swap roles. Returns the number of particles reset.
    pub fn step(&mut self, field: &WindField) -> usize {
        let params = UpdateParams::from_config(&self.config, self.rng.gen::<f32>());
        let src = self.particles.current().clone();
        let dropped = update_pass(field, &src, self.particles.next_mut(), &params);
        self.particles.swap();
        log::trace!("software update pass: {} particle(s) reset", dropped);
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::WindRange;

    #[test]
    fn test_rand_in_unit_interval() {
        for i in 0..1000 {
            let v = rand(Vec2::new(i as f32 * 0.37, i as f32 * 0.11));
            assert!((0.0..1.0).contains(&v), "{v}");
        }
    }

    #[test]
    fn test_calm_field_without_drops_keeps_positions() {
        let field = WindField::uniform(4, 4, Vec2::ZERO, WindRange::symmetric(1.0)).unwrap();
        let params = UpdateParams {
            speed_factor: 0.25,
            drop_rate: 0.0,
            drop_rate_bump: 0.0,
            rand_seed: 0.5,
        };
        let pos = Vec2::new(0.25, 0.5);
        let (next, reset) = update_particle(&field, pos, Vec2::splat(0.5), &params);
        assert!(!reset);
        assert!((next - pos).length() < 1e-4);
    }

    #[test]
    fn test_eastward_wind_moves_right() {
        let field = WindField::uniform(4, 4, Vec2::new(1.0, 0.0), WindRange::symmetric(1.0)).unwrap();
        let params = UpdateParams {
            speed_factor: 1.0,
            drop_rate: 0.0,
            drop_rate_bump: 0.0,
            rand_seed: 0.5,
        };
        let (next, _) = update_particle(&field, Vec2::new(0.5, 0.5), Vec2::splat(0.5), &params);
        assert!((next.x - 0.5001).abs() < 1e-5, "{}", next.x);
        assert!((next.y - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_full_drop_rate_resets_every_particle() {
        let field = WindField::uniform(2, 2, Vec2::ZERO, WindRange::symmetric(1.0)).unwrap();
        let params = UpdateParams {
            speed_factor: 0.25,
            drop_rate: 1.0,
            drop_rate_bump: 0.0,
            rand_seed: 0.3,
        };
        let mut rng = StdRng::seed_from_u64(3);
        let src = ParticleState::random(16, &mut rng).unwrap();
        let mut dst = src.clone();
        assert_eq!(update_pass(&field, &src, &mut dst, &params), 16);
    }

    #[test]
    fn test_range_without_positive_corner_still_drops() {
        // every wind blows south-west, so the range maximum is the zero vector
        let range = WindRange::new(-1.0, 0.0, -1.0, 0.0);
        let field = WindField::uniform(4, 4, Vec2::new(-1.0, -1.0), range).unwrap();
        let params = UpdateParams {
            speed_factor: 0.25,
            drop_rate: 1.0,
            drop_rate_bump: 0.0,
            rand_seed: 0.7,
        };
        let mut rng = StdRng::seed_from_u64(9);
        let src = ParticleState::random(256, &mut rng).unwrap();
        let mut dst = src.clone();

        assert_eq!(update_pass(&field, &src, &mut dst, &params), 256);
        assert!(dst.positions().iter().all(|p| p.is_finite()));

        let (_, reset) = update_particle(&field, Vec2::splat(0.5), Vec2::splat(0.5), &UpdateParams {
            drop_rate: 0.0,
            drop_rate_bump: 1.0,
            ..params
        });
        assert!(reset, "a full-speed particle with bump 1.0 must drop");
    }

    #[test]
    fn test_hundred_passes_stay_valid() {
        let field = WindField::from_fn(16, 8, WindRange::symmetric(1.0), |uv| {
            Vec2::new((uv.y * 6.28).sin(), (uv.x * 6.28).cos())
        })
        .unwrap();
        let config = WindConfig::default()
            .with_particle_count(256)
            .with_seed(42);
        let mut updater = SoftwareUpdater::new(config).unwrap();

        let mut dropped = 0;
        for _ in 0..100 {
            dropped += updater.step(&field);
        }

        assert!(dropped >= 1);
        let state = updater.state();
        assert_eq!(state.len(), 256);
        for p in state.positions() {
            assert!(p.is_finite());
            assert!(p.x >= 0.0 && p.x < 1.004 && p.y >= 0.0 && p.y < 1.004);
        }
        assert!(!updater.particles().is_swapped());
    }
}
