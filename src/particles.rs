//! Particle state storage.
//!
//! Particles live in a square RGBA8 texture, one texel per particle. Each axis
//! of the normalized position is stored as a 16-bit fixed-point pair split
//! across two channels:
//!
//! | channel | contents |
//! |---|---|
//! | R | low byte of x |
//! | G | low byte of y |
//! | B | high byte of x |
//! | A | high byte of y |
//!
//! which decodes as `x = B / 255 + R / 255²`. The shaders use exactly the same
//! layout (`pos = color.rg / 255.0 + color.ba`), so bytes produced here are read
//! back unchanged by the GPU and vice versa.

use glam::Vec2;
use rand::Rng;

const SCALE: f32 = 255.0;

/// Side length of the square state texture holding `count` particles.
///
/// The population actually simulated is `particle_resolution(count)²`.
pub fn particle_resolution(count: u32) -> u32 {
    if count == 0 {
        return 0;
    }
    let mut res = (count as f64).sqrt().ceil() as u64;
    let n = count as u64;
    while res * res < n {
        res += 1;
    }
    while res > 1 && (res - 1) * (res - 1) >= n {
        res -= 1;
    }
    res as u32
}

/// Byte size of a `resolution²` RGBA8 state texture, `None` if it overflows `usize`.
pub fn state_byte_len(resolution: u32) -> Option<usize> {
    let side = usize::try_from(resolution).ok()?;
    side.checked_mul(side)?.checked_mul(4)
}

/// Split a normalized coordinate into `(low, high)` bytes.
#[inline]
pub fn encode_coord(value: f32) -> (u8, u8) {
    let scaled = value.clamp(0.0, 1.0) * SCALE;
    let high = scaled.floor();
    let low = ((scaled - high) * SCALE).round();
    (low as u8, high as u8)
}

/// Inverse of [`encode_coord`].
#[inline]
pub fn decode_coord(low: u8, high: u8) -> f32 {
    high as f32 / SCALE + low as f32 / (SCALE * SCALE)
}

/// Encode one position into its RGBA texel.
#[inline]
pub fn encode_position(pos: Vec2) -> [u8; 4] {
    let (x_lo, x_hi) = encode_coord(pos.x);
    let (y_lo, y_hi) = encode_coord(pos.y);
    [x_lo, y_lo, x_hi, y_hi]
}

/// Decode one RGBA texel into a position.
#[inline]
pub fn decode_position(texel: [u8; 4]) -> Vec2 {
    Vec2::new(
        decode_coord(texel[0], texel[2]),
        decode_coord(texel[1], texel[3]),
    )
}

/// Decode a whole state texture.
pub fn decode_positions(bytes: &[u8]) -> Vec<Vec2> {
    bytes
        .chunks_exact(4)
        .map(|t| decode_position([t[0], t[1], t[2], t[3]]))
        .collect()
}

/// Encode positions into state-texture bytes.
pub fn encode_positions(positions: &[Vec2]) -> Vec<u8> {
    positions
        .iter()
        .flat_map(|&p| encode_position(p))
        .collect()
}

/// CPU-side description of a particle population.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleState {
    resolution: u32,
    /// RGBA8 texels, `resolution² * 4` bytes.
    bytes: Vec<u8>,
}

impl ParticleState {
    /// Seed `particle_resolution(count)²` particles with uniformly random bytes.
    ///
    /// Returns `None` when the state would not fit in addressable memory.
    pub fn random<R: Rng>(count: u32, rng: &mut R) -> Option<Self> {
        let resolution = particle_resolution(count);
        let mut bytes = vec![0u8; state_byte_len(resolution)?];
        rng.fill(bytes.as_mut_slice());
        Some(Self { resolution, bytes })
    }

    pub fn from_bytes(resolution: u32, bytes: Vec<u8>) -> Option<Self> {
        (Some(bytes.len()) == state_byte_len(resolution)).then_some(Self { resolution, bytes })
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    /// Number of particles (always a perfect square).
    pub fn len(&self) -> u64 {
        u64::from(self.resolution) * u64::from(self.resolution)
    }

    pub fn is_empty(&self) -> bool {
        self.resolution == 0
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn positions(&self) -> Vec<Vec2> {
        decode_positions(&self.bytes)
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// Two resources with swappable "current" and "next" roles.
///
/// Swapping only flips the role flag; nothing is copied.
#[derive(Debug)]
pub struct PingPong<T> {
    slots: [T; 2],
    current: usize,
}

impl<T> PingPong<T> {
    pub fn new(current: T, next: T) -> Self {
        Self {
            slots: [current, next],
            current: 0,
        }
    }

    pub fn current(&self) -> &T {
        &self.slots[self.current]
    }

    pub fn next(&self) -> &T {
        &self.slots[1 - self.current]
    }

    pub fn next_mut(&mut self) -> &mut T {
        &mut self.slots[1 - self.current]
    }

    /// Exchange the roles of the two slots.
    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    /// Role flag: `false` while slot 0 is current.
    pub fn is_swapped(&self) -> bool {
        self.current == 1
    }

    /// Borrow both slots as `(current, next)`.
    pub fn pair(&self) -> (&T, &T) {
        (self.current(), self.next())
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.slots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_resolution_is_ceil_sqrt() {
        assert_eq!(particle_resolution(0), 0);
        assert_eq!(particle_resolution(1), 1);
        assert_eq!(particle_resolution(2), 2);
        assert_eq!(particle_resolution(4), 2);
        assert_eq!(particle_resolution(5), 3);
        assert_eq!(particle_resolution(65536), 256);
        assert_eq!(particle_resolution(65537), 257);
        assert_eq!(particle_resolution(u32::MAX), 65536);
    }

    #[test]
    fn test_codec_precision() {
        for i in 0..=1000 {
            let x = i as f32 / 1000.0;
            let (lo, hi) = encode_coord(x);
            let back = decode_coord(lo, hi);
            assert!((back - x).abs() <= 0.5 / 65025.0 + 1e-6, "{x} -> {back}");
        }
    }

    #[test]
    fn test_codec_channel_layout() {
        // x = 0.5: 127.5 -> high 127, low round(0.5 * 255) = 128
        let texel = encode_position(Vec2::new(0.5, 0.0));
        assert_eq!(texel, [128, 0, 127, 0]);
        assert!((decode_position(texel).x - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_random_state_size_and_range() {
        let mut rng = StdRng::seed_from_u64(7);
        let state = ParticleState::random(1000, &mut rng).unwrap();
        assert_eq!(state.resolution(), 32);
        assert_eq!(state.len(), 1024);
        assert_eq!(state.bytes().len(), 1024 * 4);
        for p in state.positions() {
            assert!(p.x >= 0.0 && p.x < 1.004);
            assert!(p.y >= 0.0 && p.y < 1.004);
        }
    }

    #[test]
    fn test_reseeding_changes_positions_not_count() {
        let mut rng = StdRng::seed_from_u64(1);
        let a = ParticleState::random(256, &mut rng).unwrap();
        let b = ParticleState::random(256, &mut rng).unwrap();
        assert_eq!(a.len(), b.len());
        assert_ne!(a.bytes(), b.bytes());
    }

    #[test]
    fn test_ping_pong_roles() {
        let mut pp = PingPong::new("a", "b");
        assert!(!pp.is_swapped());
        assert_eq!(pp.pair(), (&"a", &"b"));

        pp.swap();
        assert!(pp.is_swapped());
        assert_eq!(*pp.current(), "b");
        assert_eq!(*pp.next(), "a");

        pp.swap();
        assert!(!pp.is_swapped());
        assert_eq!(*pp.current(), "a");

        let all: Vec<_> = pp.iter().copied().collect();
        assert_eq!(all, ["a", "b"]);
    }

    #[test]
    fn test_state_size_does_not_overflow() {
        assert_eq!(state_byte_len(0), Some(0));
        assert_eq!(state_byte_len(32), Some(4096));
        // u32::MAX particles need a 65536² texture: 2^34 bytes
        let res = particle_resolution(u32::MAX);
        assert_eq!(state_byte_len(res).map(|n| n as u64), (usize::BITS > 34).then_some(1u64 << 34));

        let state = ParticleState::from_bytes(65536, Vec::new());
        assert!(state.is_none());
    }
}
