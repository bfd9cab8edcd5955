//! Curl-noise velocity field
//!
//! Three decorrelated 4D simplex potentials (xyz + time) are summed over
//! octaves and the curl of the resulting vector potential is taken with
//! forward differences. A curl field is divergence free, which keeps the
//! particle cloud from collapsing into sinks.

use drift_core::NoiseConfig;
use glam::Vec3;
use noise::{NoiseFn, Simplex};

/// Offsets that decorrelate the three potential components
pub const POTENTIAL_OFFSETS: [[f64; 3]; 3] = [
    [0.0, 0.0, 0.0],
    [31.341, -43.117, 17.583],
    [-27.951, 13.427, -51.277],
];

/// Forward difference step, in noise space
pub const CURL_EPSILON: f64 = 1e-2;

/// Upper bound on the gradient magnitude of the unit-frequency simplex field
pub const SIMPLEX_GRADIENT_BOUND: f32 = 256.0;

/// Weight of octave `octave` under the persistence control.
///
/// The first octave always carries full weight, including when persistence
/// is zero.
pub fn octave_weight(persistence: f32, octave: u32) -> f32 {
    if octave == 0 {
        1.0
    } else {
        persistence.powi(octave as i32)
    }
}

/// Combined amplitude of one octave: the 1/2^i falloff times its weight
pub fn octave_amplitude(persistence: f32, octave: u32) -> f32 {
    0.5f32.powi(octave as i32) * octave_weight(persistence, octave)
}

pub struct CurlNoise {
    simplex: Simplex,
    octaves: u32,
    position_scale: f32,
    time_scale: f32,
    velocity_scale: f32,
}

impl CurlNoise {
    pub fn new(config: &NoiseConfig) -> Self {
        Self {
            simplex: Simplex::new(config.seed),
            octaves: config.octaves,
            position_scale: config.position_scale,
            time_scale: config.time_scale,
            velocity_scale: config.velocity_scale,
        }
    }

    fn potential(&self, component: usize, point: [f64; 3], time: f64) -> f64 {
        let offset = POTENTIAL_OFFSETS[component];
        self.simplex.get([
            point[0] + offset[0],
            point[1] + offset[1],
            point[2] + offset[2],
            time,
        ])
    }

    /// Curl of a single octave, evaluated at a noise-space point
    fn octave_curl(&self, p: [f64; 3], time: f64) -> [f64; 3] {
        let e = CURL_EPSILON;
        let shifted = |axis: usize| {
            let mut q = p;
            q[axis] += e;
            q
        };

        // Only the off-diagonal partials enter the curl
        let px = self.potential(0, p, time);
        let dpx_dy = (self.potential(0, shifted(1), time) - px) / e;
        let dpx_dz = (self.potential(0, shifted(2), time) - px) / e;

        let py = self.potential(1, p, time);
        let dpy_dx = (self.potential(1, shifted(0), time) - py) / e;
        let dpy_dz = (self.potential(1, shifted(2), time) - py) / e;

        let pz = self.potential(2, p, time);
        let dpz_dx = (self.potential(2, shifted(0), time) - pz) / e;
        let dpz_dy = (self.potential(2, shifted(1), time) - pz) / e;

        [dpz_dy - dpy_dz, dpx_dz - dpz_dx, dpy_dx - dpx_dy]
    }

    /// Noise contribution to the velocity at `position` and simulated `time`
    pub fn velocity(&self, position: Vec3, time: f32, persistence: f32) -> Vec3 {
        let base = position * self.position_scale;
        let noise_time = (time * self.time_scale) as f64;

        let mut curl = [0.0f64; 3];
        for octave in 0..self.octaves {
            let amplitude = octave_amplitude(persistence, octave) as f64;
            if amplitude == 0.0 {
                continue;
            }
            let frequency = (1u32 << octave.min(31)) as f64;
            let p = [
                base.x as f64 * frequency,
                base.y as f64 * frequency,
                base.z as f64 * frequency,
            ];
            let c = self.octave_curl(p, noise_time);
            for (sum, value) in curl.iter_mut().zip(c) {
                *sum += value * amplitude;
            }
        }

        Vec3::new(curl[0] as f32, curl[1] as f32, curl[2] as f32) * self.velocity_scale
    }

    /// Upper bound on `velocity(..).length()` for a persistence value
    pub fn speed_bound(&self, persistence: f32) -> f32 {
        let amplitude: f32 = (0..self.octaves)
            .map(|octave| octave_amplitude(persistence, octave))
            .sum();
        // Each curl component is a difference of two bounded partials
        3f32.sqrt() * 2.0 * SIMPLEX_GRADIENT_BOUND * amplitude * self.velocity_scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_octave_ignores_zero_persistence() {
        assert_eq!(octave_weight(0.0, 0), 1.0);
        assert_eq!(octave_weight(0.0, 1), 0.0);
        assert_eq!(octave_weight(0.5, 2), 0.25);
        assert_eq!(octave_amplitude(0.5, 2), 0.0625);
    }

    #[test]
    fn velocity_is_finite_and_bounded() {
        let field = CurlNoise::new(&NoiseConfig::default());
        let bound = field.speed_bound(0.5);
        for i in 0..200 {
            let t = i as f32 * 0.37;
            let p = Vec3::new(t.sin() * 3.0, t.cos() * 2.0, (t * 0.3).sin());
            let v = field.velocity(p, t, 0.5);
            assert!(v.is_finite());
            assert!(v.length() <= bound);
        }
    }

    #[test]
    fn field_is_deterministic_and_varies() {
        let config = NoiseConfig::default();
        let a = CurlNoise::new(&config);
        let b = CurlNoise::new(&config);
        let p = Vec3::new(0.3, -0.2, 0.7);
        assert_eq!(a.velocity(p, 1.0, 0.2), b.velocity(p, 1.0, 0.2));
        assert_ne!(a.velocity(p, 1.0, 0.2), a.velocity(p + Vec3::X, 1.0, 0.2));
    }

    #[test]
    fn persistence_only_affects_higher_octaves() {
        let single = CurlNoise::new(&NoiseConfig {
            octaves: 1,
            ..NoiseConfig::default()
        });
        let p = Vec3::new(0.1, 0.2, 0.3);
        assert_eq!(single.velocity(p, 0.5, 0.0), single.velocity(p, 0.5, 0.5));

        let layered = CurlNoise::new(&NoiseConfig::default());
        assert_eq!(layered.velocity(p, 0.5, 0.0), single.velocity(p, 0.5, 0.0));
    }
}
