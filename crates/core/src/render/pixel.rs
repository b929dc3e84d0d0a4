use glam::Vec2;

use super::surface::{BlendMode, Rgba, Surface};
use crate::particles::TrailPoint;

/// Software rasteriser over an opaque RGB buffer, starting black.
///
/// Shapes get one pixel of analytic edge coverage; that is enough for
/// previews and snapshots, not a replacement for a GPU canvas.
#[derive(Debug, Clone)]
pub struct PixelSurface {
    width: usize,
    height: usize,
    pixels: Vec<[f32; 3]>,
}

impl PixelSurface {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0.0; 3]; width * height],
        }
    }

    pub fn pixel(&self, x: usize, y: usize) -> Option<[f32; 3]> {
        (x < self.width && y < self.height).then(|| self.pixels[y * self.width + x])
    }

    /// Packs the buffer into 8-bit RGBA rows, ready for an image encoder.
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|p| {
                let [r, g, b] = p.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8);
                [r, g, b, 255]
            })
            .collect()
    }

    pub fn pixel_width(&self) -> usize {
        self.width
    }

    pub fn pixel_height(&self) -> usize {
        self.height
    }

    fn blend(&mut self, x: usize, y: usize, color: Rgba, coverage: f32, blend: BlendMode) {
        let alpha = (color.a * coverage).clamp(0.0, 1.0);
        if alpha <= 0.0 {
            return;
        }
        let dst = &mut self.pixels[y * self.width + x];
        let src = [color.r, color.g, color.b];
        for (d, s) in dst.iter_mut().zip(src) {
            *d = match blend {
                BlendMode::SourceOver => *d + (s - *d) * alpha,
                BlendMode::Lighter => (*d + s * alpha).min(1.0),
            };
        }
    }

    /// Visits pixel centres inside the clipped bounding box of a shape.
    fn for_each_in(&mut self, min: Vec2, max: Vec2, mut visit: impl FnMut(&mut Self, usize, usize, Vec2)) {
        let x0 = min.x.floor().max(0.0) as usize;
        let y0 = min.y.floor().max(0.0) as usize;
        let x1 = (max.x.ceil().max(0.0) as usize).min(self.width);
        let y1 = (max.y.ceil().max(0.0) as usize).min(self.height);
        for y in y0..y1 {
            for x in x0..x1 {
                visit(self, x, y, Vec2::new(x as f32 + 0.5, y as f32 + 0.5));
            }
        }
    }
}

fn distance_to_segment(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let len2 = ab.length_squared();
    let t = if len2 > 0.0 {
        ((p - a).dot(ab) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    p.distance(a + ab * t)
}

impl Surface for PixelSurface {
    fn width(&self) -> f32 {
        self.width as f32
    }

    fn height(&self) -> f32 {
        self.height as f32
    }

    fn resize(&mut self, width: f32, height: f32) {
        *self = Self::new(width.max(0.0) as usize, height.max(0.0) as usize);
    }

    fn fill_rect(&mut self, origin: Vec2, size: Vec2, color: Rgba, blend: BlendMode) {
        self.for_each_in(origin, origin + size, |surface, x, y, _| {
            surface.blend(x, y, color, 1.0, blend);
        });
    }

    fn radial_glow(&mut self, centre: Vec2, radius: f32, inner: Rgba, outer: Rgba, blend: BlendMode) {
        if radius <= 0.0 {
            return;
        }
        let extent = Vec2::splat(radius);
        self.for_each_in(centre - extent, centre + extent, |surface, x, y, p| {
            let t = p.distance(centre) / radius;
            if t <= 1.0 {
                let mix = |a: f32, b: f32| a + (b - a) * t;
                let color = Rgba::new(
                    mix(inner.r, outer.r),
                    mix(inner.g, outer.g),
                    mix(inner.b, outer.b),
                    mix(inner.a, outer.a),
                );
                surface.blend(x, y, color, 1.0, blend);
            }
        });
    }

    fn stroke_trail(&mut self, points: &[TrailPoint], width: f32, color: Rgba, blend: BlendMode) {
        if points.len() < 2 {
            return;
        }
        let half = (width * 0.5).max(0.5);
        let segments = points.len() - 1;
        for (i, pair) in points.windows(2).enumerate() {
            let a = Vec2::new(pair[0].x, pair[0].y);
            let b = Vec2::new(pair[1].x, pair[1].y);
            // Wrapped particles jump across the surface; skip the jump.
            if a.distance(b) > 100.0 {
                continue;
            }
            let ramp = (i + 1) as f32 / segments as f32;
            let segment = color.with_alpha(color.a * ramp * pair[1].alpha);
            let pad = Vec2::splat(half + 1.0);
            self.for_each_in(a.min(b) - pad, a.max(b) + pad, |surface, x, y, p| {
                let coverage = (half + 0.5 - distance_to_segment(p, a, b)).clamp(0.0, 1.0);
                surface.blend(x, y, segment, coverage, blend);
            });
        }
    }

    fn fill_circle(&mut self, centre: Vec2, radius: f32, color: Rgba, blend: BlendMode) {
        let extent = Vec2::splat(radius + 1.0);
        self.for_each_in(centre - extent, centre + extent, |surface, x, y, p| {
            let coverage = (radius + 0.5 - p.distance(centre)).clamp(0.0, 1.0);
            surface.blend(x, y, color, coverage, blend);
        });
    }
}
