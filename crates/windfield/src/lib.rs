//! Wind vector field sampling and particle animation.
//!
//! The crate is split into focused modules:
//! - `field`: snapshot format, validation and the fallback vector.
//! - `projection`: viewport canvas <-> geographic transform.
//! - `sampler`: bilinear queries over a loaded snapshot.
//! - `particles`: fixed-size particle pool advected through the sampler.
//! - `render`: rasterises the pool into an RGBA frame.
//! - `animation`: cooperative start/stop frame loop.

pub mod animation;
pub mod field;
pub mod particles;
pub mod projection;
pub mod render;
pub mod sampler;

pub use animation::{AnimationLoop, LoopState, SharedAdvector};
pub use field::{FALLBACK_VECTOR, FieldError, FieldHeader, VectorFieldSnapshot, WindVector};
pub use particles::{AdvectorSettings, Particle, ParticleAdvector};
pub use projection::CanvasProjection;
pub use render::{encode_png, render_frame};
pub use sampler::VectorFieldSampler;
