//! Per-frame and per-object render settings.
//!
//! These values replace the mutable toggles a viewer UI would otherwise share
//! with the renderer: the host owns them, edits them however it likes, and
//! hands a copy to [`render_frame`](crate::TransparencyRenderer::render_frame)
//! each frame. The renderer only reads them.

use glam::{Vec3, Vec4};

use crate::config::PeelConfig;

/// Straight (non-premultiplied) RGBA color.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    pub const fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    /// Build a color from 8-bit channels, e.g. `Color::from_rgba8(224, 86, 253, 128)`.
    pub fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::rgba(
            r as f32 / 255.0,
            g as f32 / 255.0,
            b as f32 / 255.0,
            a as f32 / 255.0,
        )
    }

    pub const WHITE: Color = Color::rgba(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgba(0.0, 0.0, 0.0, 1.0);
    pub const TRANSPARENT: Color = Color::rgba(0.0, 0.0, 0.0, 0.0);

    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    pub fn to_vec4(self) -> Vec4 {
        Vec4::from_array(self.to_array())
    }

    pub(crate) fn to_wgpu(self) -> wgpu::Color {
        wgpu::Color {
            r: self.r as f64,
            g: self.g as f64,
            b: self.b as f64,
            a: self.a as f64,
        }
    }
}

impl From<[f32; 4]> for Color {
    fn from(c: [f32; 4]) -> Self {
        Self::rgba(c[0], c[1], c[2], c[3])
    }
}

/// Display toggles for one scene object.
///
/// # Example
///
/// ```
/// use lamina::{Color, DrawFlags};
///
/// let flags = DrawFlags::default()
///     .lines(true)
///     .line_color(Color::rgb(0.2, 0.2, 0.2));
/// assert!(flags.show_faces && flags.show_lines);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawFlags {
    /// Draw filled triangles.
    pub show_faces: bool,
    /// Draw the wireframe overlay.
    pub show_lines: bool,
    /// Wireframe width in pixels. Widths below one pixel are drawn one pixel
    /// wide.
    pub line_width: f32,
    /// Fixed color of the wireframe overlay.
    pub line_color: Color,
    /// Modulate the shaded color by the object's texture.
    pub show_texture: bool,
    /// Flip normals before lighting.
    pub invert_normals: bool,
}

impl Default for DrawFlags {
    fn default() -> Self {
        Self {
            show_faces: true,
            show_lines: false,
            line_width: 0.5,
            line_color: Color::BLACK,
            show_texture: false,
            invert_normals: false,
        }
    }
}

impl DrawFlags {
    pub fn faces(mut self, show: bool) -> Self {
        self.show_faces = show;
        self
    }

    pub fn lines(mut self, show: bool) -> Self {
        self.show_lines = show;
        self
    }

    pub fn line_width(mut self, width: f32) -> Self {
        self.line_width = width;
        self
    }

    pub fn line_color(mut self, color: Color) -> Self {
        self.line_color = color;
        self
    }

    pub fn texture(mut self, show: bool) -> Self {
        self.show_texture = show;
        self
    }

    pub fn invert_normals(mut self, invert: bool) -> Self {
        self.invert_normals = invert;
        self
    }

    /// Number of draw calls one peeling pass issues for an object with these flags.
    pub fn draw_count(&self) -> usize {
        self.show_faces as usize + self.show_lines as usize
    }
}

/// Settings shared by every object in a frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameOptions {
    /// Clear color of every layer and (optionally) of the destination.
    pub background: Color,
    /// Light position in eye space.
    pub light_position: Vec3,
    /// Phong specular exponent.
    pub shininess: f32,
    /// Blend between full Phong shading (1.0) and flat diffuse color (0.0).
    pub lighting_factor: f32,
    /// Composite each layer's depth as grey instead of its color.
    pub show_depth: bool,
    /// Clear the destination to `background` before compositing. When
    /// `false` the layers are blended over whatever the destination holds.
    pub clear_destination: bool,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self::from(&PeelConfig::default())
    }
}

impl From<&PeelConfig> for FrameOptions {
    fn from(config: &PeelConfig) -> Self {
        Self {
            background: config.background,
            light_position: config.light_position,
            shininess: config.shininess,
            lighting_factor: config.lighting_factor,
            show_depth: false,
            clear_destination: true,
        }
    }
}
