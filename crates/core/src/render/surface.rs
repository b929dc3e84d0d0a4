use glam::Vec2;
use serde::{Deserialize, Serialize};

use crate::particles::TrailPoint;

/// Straight (non-premultiplied) colour with components in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rgba {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Rgba {
    pub const TRANSPARENT: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Hue in degrees, saturation and lightness in [0, 1].
    pub fn from_hsla(hue: f32, saturation: f32, lightness: f32, alpha: f32) -> Self {
        let h = hue.rem_euclid(360.0) / 60.0;
        let s = saturation.clamp(0.0, 1.0);
        let l = lightness.clamp(0.0, 1.0);
        let chroma = (1.0 - (2.0 * l - 1.0).abs()) * s;
        let x = chroma * (1.0 - (h % 2.0 - 1.0).abs());
        let (r, g, b) = match h as u32 {
            0 => (chroma, x, 0.0),
            1 => (x, chroma, 0.0),
            2 => (0.0, chroma, x),
            3 => (0.0, x, chroma),
            4 => (x, 0.0, chroma),
            _ => (chroma, 0.0, x),
        };
        let m = l - chroma / 2.0;
        Self::new(r + m, g + m, b + m, alpha.clamp(0.0, 1.0))
    }

    pub fn with_alpha(self, a: f32) -> Self {
        Self {
            a: a.clamp(0.0, 1.0),
            ..self
        }
    }
}

/// How a primitive combines with what is already on the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlendMode {
    /// Alpha-blend over the destination.
    SourceOver,
    /// Additive blending; overlapping glows brighten.
    Lighter,
}

/// Drawable the renderer composites onto. Coordinates are in surface units
/// with the origin at the top-left corner.
pub trait Surface {
    fn width(&self) -> f32;

    fn height(&self) -> f32;

    /// Changes the drawable size; content is discarded.
    fn resize(&mut self, width: f32, height: f32);

    fn fill_rect(&mut self, origin: Vec2, size: Vec2, color: Rgba, blend: BlendMode);

    /// Radial gradient from `inner` at the centre to `outer` at `radius`.
    fn radial_glow(&mut self, centre: Vec2, radius: f32, inner: Rgba, outer: Rgba, blend: BlendMode);

    /// Polyline through `points`, oldest first, fading in from transparent at
    /// the tail to `color` at the head; each point's alpha scales its segment.
    fn stroke_trail(&mut self, points: &[TrailPoint], width: f32, color: Rgba, blend: BlendMode);

    fn fill_circle(&mut self, centre: Vec2, radius: f32, color: Rgba, blend: BlendMode);
}

/// A primitive captured by [`RecordingSurface`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DrawCommand {
    FillRect {
        origin: Vec2,
        size: Vec2,
        color: Rgba,
        blend: BlendMode,
    },
    RadialGlow {
        centre: Vec2,
        radius: f32,
        inner: Rgba,
        outer: Rgba,
        blend: BlendMode,
    },
    StrokeTrail {
        points: usize,
        width: f32,
        color: Rgba,
        blend: BlendMode,
    },
    FillCircle {
        centre: Vec2,
        radius: f32,
        color: Rgba,
        blend: BlendMode,
    },
}

impl DrawCommand {
    pub fn blend(&self) -> BlendMode {
        match self {
            Self::FillRect { blend, .. }
            | Self::RadialGlow { blend, .. }
            | Self::StrokeTrail { blend, .. }
            | Self::FillCircle { blend, .. } => *blend,
        }
    }
}

/// Surface that records draw calls instead of rasterising them.
#[derive(Debug, Clone, Default)]
pub struct RecordingSurface {
    width: f32,
    height: f32,
    commands: Vec<DrawCommand>,
}

impl RecordingSurface {
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            commands: Vec::new(),
        }
    }

    pub fn commands(&self) -> &[DrawCommand] {
        &self.commands
    }

    /// Returns and clears the recorded commands.
    pub fn take_commands(&mut self) -> Vec<DrawCommand> {
        std::mem::take(&mut self.commands)
    }
}

impl Surface for RecordingSurface {
    fn width(&self) -> f32 {
        self.width
    }

    fn height(&self) -> f32 {
        self.height
    }

    fn resize(&mut self, width: f32, height: f32) {
        self.width = width;
        self.height = height;
        self.commands.clear();
    }

    fn fill_rect(&mut self, origin: Vec2, size: Vec2, color: Rgba, blend: BlendMode) {
        self.commands.push(DrawCommand::FillRect {
            origin,
            size,
            color,
            blend,
        });
    }

    fn radial_glow(&mut self, centre: Vec2, radius: f32, inner: Rgba, outer: Rgba, blend: BlendMode) {
        self.commands.push(DrawCommand::RadialGlow {
            centre,
            radius,
            inner,
            outer,
            blend,
        });
    }

    fn stroke_trail(&mut self, points: &[TrailPoint], width: f32, color: Rgba, blend: BlendMode) {
        self.commands.push(DrawCommand::StrokeTrail {
            points: points.len(),
            width,
            color,
            blend,
        });
    }

    fn fill_circle(&mut self, centre: Vec2, radius: f32, color: Rgba, blend: BlendMode) {
        self.commands.push(DrawCommand::FillCircle {
            centre,
            radius,
            color,
            blend,
        });
    }
}
