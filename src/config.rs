use glam::Vec3;

use crate::draw::Color;
use crate::error::{PeelError, Result};

/// Environment variable read by [`PeelConfig::from_env`].
pub const LAYERS_ENV: &str = "LAMINA_LAYERS";

/// Runtime configuration for a [`DepthPeeler`](crate::DepthPeeler).
///
/// `layers` is the number of transparency layers captured per frame. Larger
/// values resolve deeper overlaps correctly at a linear cost: every layer is
/// one more full pass over the scene and one more render target.
///
/// # Example
///
/// ```
/// use lamina::{Color, PeelConfig};
///
/// let config = PeelConfig::new()
///     .layers(8)
///     .background(Color::rgb(0.1, 0.1, 0.15));
/// assert_eq!(config.layers, 8);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PeelConfig {
    /// Number of peeled layers (N).
    pub layers: usize,
    /// Clear color for every layer and for the destination.
    pub background: Color,
    /// Light position in eye space.
    pub light_position: Vec3,
    /// Phong specular exponent.
    pub shininess: f32,
    /// 1.0 for full Phong shading, 0.0 for flat diffuse color.
    pub lighting_factor: f32,
}

impl Default for PeelConfig {
    fn default() -> Self {
        Self {
            layers: 6,
            background: Color::WHITE,
            light_position: Vec3::new(0.0, 0.3, 0.0),
            shininess: 35.0,
            lighting_factor: 1.0,
        }
    }
}

impl PeelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, with the layer count taken from `LAMINA_LAYERS` when it is set
    /// to a positive integer.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(value) = std::env::var(LAYERS_ENV) {
            match value.trim().parse::<usize>() {
                Ok(n) if n > 0 => config.layers = n,
                _ => log::warn!("Ignoring {}={:?}: expected a positive integer", LAYERS_ENV, value),
            }
        }
        config
    }

    pub fn layers(mut self, layers: usize) -> Self {
        self.layers = layers;
        self
    }

    pub fn background(mut self, color: Color) -> Self {
        self.background = color;
        self
    }

    pub fn light_position(mut self, position: Vec3) -> Self {
        self.light_position = position;
        self
    }

    pub fn shininess(mut self, shininess: f32) -> Self {
        self.shininess = shininess;
        self
    }

    pub fn lighting_factor(mut self, factor: f32) -> Self {
        self.lighting_factor = factor;
        self
    }

    /// Checks that the configuration can drive a peeler.
    pub fn validate(&self) -> Result<()> {
        if self.layers == 0 {
            return Err(PeelError::InvalidConfig(
                "at least one transparency layer is required".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.lighting_factor) {
            return Err(PeelError::InvalidConfig(format!(
                "lighting factor {} is outside [0, 1]",
                self.lighting_factor
            )));
        }
        Ok(())
    }
}

/// A validated, non-empty viewport size in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Viewport {
    width: u32,
    height: u32,
}

impl Viewport {
    /// Returns [`PeelError::InvalidViewport`] if either dimension is zero.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PeelError::InvalidViewport { width, height });
        }
        Ok(Self { width, height })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub(crate) fn extent(&self) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: self.width,
            height: self.height,
            depth_or_array_layers: 1,
        }
    }
}
