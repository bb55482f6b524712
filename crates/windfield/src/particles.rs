use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::{field::VectorFieldSnapshot, projection::CanvasProjection, sampler::VectorFieldSampler};

/// One tracer in canvas space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Particle {
    pub x: f64,
    pub y: f64,
    pub age: u32,
    pub max_age: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdvectorSettings {
    pub particle_count: usize,
    /// Canvas pixels moved per m/s per frame.
    pub velocity_scale: f64,
    pub max_age: u32,
}

impl Default for AdvectorSettings {
    fn default() -> Self {
        Self {
            particle_count: 600,
            velocity_scale: 0.6,
            max_age: 80,
        }
    }
}

/// Owns the particle pool and the sampler it is advected through.
pub struct ParticleAdvector {
    sampler: VectorFieldSampler,
    particles: Vec<Particle>,
    settings: AdvectorSettings,
    rng: StdRng,
    frames: u64,
}

impl ParticleAdvector {
    pub fn new(projection: CanvasProjection, settings: AdvectorSettings) -> Self {
        Self::with_rng(projection, settings, StdRng::from_os_rng())
    }

    /// Deterministic pool, used by tests and reproducible renders.
    pub fn with_seed(projection: CanvasProjection, settings: AdvectorSettings, seed: u64) -> Self {
        Self::with_rng(projection, settings, StdRng::seed_from_u64(seed))
    }

    fn with_rng(projection: CanvasProjection, settings: AdvectorSettings, rng: StdRng) -> Self {
        let mut advector = Self {
            sampler: VectorFieldSampler::new(projection),
            particles: Vec::with_capacity(settings.particle_count),
            settings,
            rng,
            frames: 0,
        };
        advector.regenerate();
        advector
    }

    /// Swap in a new snapshot and canvas. The whole pool is respawned so no
    /// particle keeps coordinates from the previous geometry. Returns whether
    /// the snapshot was accepted by the sampler.
    pub fn replace_field(
        &mut self,
        snapshot: Option<VectorFieldSnapshot>,
        projection: CanvasProjection,
    ) -> bool {
        self.sampler.set_projection(projection);
        let accepted = match snapshot {
            Some(snapshot) => self.sampler.load(snapshot),
            None => {
                self.sampler.clear();
                false
            }
        };
        self.regenerate();
        accepted
    }

    /// Advance every particle by one frame.
    pub fn step(&mut self) {
        let projection = *self.sampler.projection();
        let scale = self.settings.velocity_scale;
        for idx in 0..self.particles.len() {
            let particle = self.particles[idx];
            let wind = self.sampler.query(particle.x, particle.y);
            let moved = Particle {
                x: particle.x + wind.u * scale,
                y: particle.y - wind.v * scale,
                age: particle.age + 1,
                max_age: particle.max_age,
            };
            self.particles[idx] = if !projection.contains(moved.x, moved.y)
                || moved.age > moved.max_age
            {
                self.spawn(false)
            } else {
                moved
            };
        }
        self.frames += 1;
    }

    pub fn particles(&self) -> &[Particle] {
        &self.particles
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn sampler(&self) -> &VectorFieldSampler {
        &self.sampler
    }

    pub fn settings(&self) -> &AdvectorSettings {
        &self.settings
    }

    fn regenerate(&mut self) {
        self.particles.clear();
        for _ in 0..self.settings.particle_count {
            let particle = self.spawn(true);
            self.particles.push(particle);
        }
    }

    /// Fresh particle at a random canvas position. Initial spawns get a random
    /// age so the pool does not expire in one burst.
    fn spawn(&mut self, staggered: bool) -> Particle {
        let projection = self.sampler.projection();
        let (width, height) = (projection.width as f64, projection.height as f64);
        let max_age = self.lifetime();
        let age = if staggered {
            self.rng.random_range(0..=max_age)
        } else {
            0
        };
        Particle {
            x: self.rng.random_range(0.0..width),
            y: self.rng.random_range(0.0..height),
            age,
            max_age,
        }
    }

    /// Configured maximum age jittered by +/-20%.
    fn lifetime(&mut self) -> u32 {
        let jitter: f64 = self.rng.random_range(0.8..1.2);
        ((self.settings.max_age as f64 * jitter).round() as u32).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{FieldHeader, WindVector};
    use hazard_core::BoundingBox;

    fn projection() -> CanvasProjection {
        CanvasProjection::new(BoundingBox::new(10.0, 8.0, 126.0, 124.0), 200, 100)
    }

    fn settings(count: usize) -> AdvectorSettings {
        AdvectorSettings {
            particle_count: count,
            velocity_scale: 1.0,
            max_age: 50,
        }
    }

    fn uniform_field(wind: WindVector) -> VectorFieldSnapshot {
        let header = FieldHeader::covering(&projection().bounds, 3, 3);
        VectorFieldSnapshot::from_vectors(header, &[wind; 9]).expect("uniform field")
    }

    #[test]
    fn pool_spawns_inside_the_canvas_with_staggered_ages() {
        let advector = ParticleAdvector::with_seed(projection(), settings(200), 7);
        assert_eq!(advector.particles().len(), 200);
        for particle in advector.particles() {
            assert!(projection().contains(particle.x, particle.y));
            assert!(particle.age <= particle.max_age);
            assert!((40..=60).contains(&particle.max_age));
        }
        let first_age = advector.particles()[0].age;
        assert!(advector.particles().iter().any(|p| p.age != first_age));
    }

    #[test]
    fn particles_move_with_the_sampled_wind() {
        let mut advector = ParticleAdvector::with_seed(projection(), settings(50), 3);
        assert!(advector.replace_field(Some(uniform_field(WindVector::new(2.0, 1.0))), projection()));
        let before = advector.particles().to_vec();
        advector.step();
        for (old, new) in before.iter().zip(advector.particles()) {
            if new.age == old.age + 1 {
                assert!((new.x - (old.x + 2.0)).abs() < 1e-9);
                assert!((new.y - (old.y - 1.0)).abs() < 1e-9);
            } else {
                assert_eq!(new.age, 0);
            }
        }
        assert_eq!(advector.frames(), 1);
    }

    #[test]
    fn expired_or_escaped_particles_respawn() {
        let mut advector = ParticleAdvector::with_seed(projection(), settings(100), 11);
        advector.replace_field(Some(uniform_field(WindVector::new(40.0, 0.0))), projection());
        for _ in 0..30 {
            advector.step();
            for particle in advector.particles() {
                assert!(projection().contains(particle.x, particle.y));
                assert!(particle.age <= particle.max_age);
            }
        }
    }

    #[test]
    fn malformed_field_keeps_animating_on_fallback() {
        let mut advector = ParticleAdvector::with_seed(projection(), settings(10), 5);
        let mut broken = uniform_field(WindVector::new(3.0, 3.0));
        broken.u.truncate(2);
        assert!(!advector.replace_field(Some(broken), projection()));
        assert!(!advector.sampler().has_field());
        advector.step();
        assert_eq!(advector.particles().len(), 10);
    }

    #[test]
    fn replacing_the_field_regenerates_the_pool() {
        let mut advector = ParticleAdvector::with_seed(projection(), settings(20), 9);
        let before = advector.particles().to_vec();
        let narrow = CanvasProjection::new(BoundingBox::new(1.0, 0.0, 1.0, 0.0), 10, 10);
        advector.replace_field(None, narrow);
        assert_ne!(advector.particles(), before.as_slice());
        for particle in advector.particles() {
            assert!(narrow.contains(particle.x, particle.y));
        }
    }
}
