//! Rasterisation of the particle pool.
//!
//! Rendering only reads the advector; the same pool state always produces the
//! same frame.

use image::{ExtendedColorType, ImageBuffer, ImageEncoder, ImageError, Rgba, RgbaImage, codecs::png::PngEncoder};

use crate::particles::ParticleAdvector;

const DOT_SIZE: i32 = 2;
/// Wind speed (m/s) at which the colour ramp saturates.
const RAMP_MAX_SPEED: f64 = 20.0;

pub fn render_frame(advector: &ParticleAdvector) -> RgbaImage {
    let projection = advector.sampler().projection();
    let mut image: RgbaImage =
        ImageBuffer::from_pixel(projection.width, projection.height, Rgba([0, 0, 0, 0]));

    for particle in advector.particles() {
        let speed = advector.sampler().query(particle.x, particle.y).magnitude();
        let life = if particle.max_age == 0 {
            0.0
        } else {
            1.0 - particle.age as f64 / particle.max_age as f64
        };
        let alpha = (40.0 + 215.0 * life.clamp(0.0, 1.0)).round() as u8;
        let left = particle.x.floor() as i32;
        let top = particle.y.floor() as i32;
        fill_rect(
            &mut image,
            left,
            top,
            left + DOT_SIZE - 1,
            top + DOT_SIZE - 1,
            speed_color(speed, alpha),
        );
    }
    image
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, ImageError> {
    let mut buffer = Vec::new();
    PngEncoder::new(&mut buffer).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ExtendedColorType::Rgba8,
    )?;
    Ok(buffer)
}

/// Blue for calm air through cyan and yellow to red at the ramp maximum.
fn speed_color(speed: f64, alpha: u8) -> Rgba<u8> {
    let t = (speed / RAMP_MAX_SPEED).clamp(0.0, 1.0);
    let (r, g, b) = if t < 0.5 {
        let k = t * 2.0;
        (0.0, 120.0 + 135.0 * k, 255.0 * (1.0 - k) + 80.0 * k)
    } else {
        let k = (t - 0.5) * 2.0;
        (255.0 * k, 255.0 * (1.0 - k) + 60.0 * k, 80.0 * (1.0 - k))
    };
    Rgba([r.round() as u8, g.round() as u8, b.round() as u8, alpha])
}

fn fill_rect(image: &mut RgbaImage, left: i32, top: i32, right: i32, bottom: i32, color: Rgba<u8>) {
    let width = image.width() as i32;
    let height = image.height() as i32;
    if right < 0 || bottom < 0 || left >= width || top >= height {
        return;
    }
    let left = left.clamp(0, width - 1);
    let right = right.clamp(0, width - 1);
    let top = top.clamp(0, height - 1);
    let bottom = bottom.clamp(0, height - 1);

    for y in top..=bottom {
        for x in left..=right {
            *image.get_pixel_mut(x as u32, y as u32) = color;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{particles::AdvectorSettings, projection::CanvasProjection};
    use hazard_core::BoundingBox;

    fn advector() -> ParticleAdvector {
        let projection = CanvasProjection::new(BoundingBox::new(10.0, 8.0, 126.0, 124.0), 64, 32);
        let settings = AdvectorSettings {
            particle_count: 40,
            velocity_scale: 0.5,
            max_age: 20,
        };
        ParticleAdvector::with_seed(projection, settings, 21)
    }

    #[test]
    fn frame_matches_canvas_and_marks_particles() {
        let advector = advector();
        let frame = render_frame(&advector);
        assert_eq!(frame.dimensions(), (64, 32));
        let particle = advector.particles()[0];
        let pixel = frame.get_pixel(particle.x.floor() as u32, particle.y.floor() as u32);
        assert!(pixel.0[3] >= 40);
    }

    #[test]
    fn rendering_is_a_pure_function_of_state() {
        let advector = advector();
        assert_eq!(render_frame(&advector), render_frame(&advector));
    }

    #[test]
    fn png_output_has_signature() {
        let png = encode_png(&render_frame(&advector())).expect("png encode");
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn ramp_runs_from_blue_to_red() {
        assert_eq!(speed_color(0.0, 255), Rgba([0, 120, 255, 255]));
        assert_eq!(speed_color(50.0, 255), Rgba([255, 60, 0, 255]));
    }
}
