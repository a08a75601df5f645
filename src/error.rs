//! Error types for the peeling renderer.
//!
//! Every fallible operation returns [`Result<T>`], an alias for
//! `std::result::Result<T, PeelError>`. Allocation and shader failures are
//! fatal for the call that produced them; [`PeelError::InvalidViewport`] is a
//! rejected request that leaves the renderer exactly as it was.

use thiserror::Error;

/// Everything that can go wrong while building or driving the peeler.
#[derive(Error, Debug)]
pub enum PeelError {
    // ========================================================================
    // GPU context
    // ========================================================================
    /// No adapter matched the request (or none exists on this machine).
    #[error("Failed to find a suitable GPU adapter: {0}")]
    AdapterUnavailable(String),

    /// The adapter refused to create a device.
    #[error("Failed to create WGPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    /// The window surface could not be created.
    #[error("Failed to create surface: {0}")]
    Surface(#[from] wgpu::CreateSurfaceError),

    // ========================================================================
    // Resources
    // ========================================================================
    /// A texture, buffer or bind group could not be created.
    #[error("GPU resource allocation failed: {0}")]
    ResourceAllocation(String),

    /// A shader module or pipeline failed to build.
    #[error("Shader '{label}' failed to compile:\n{log}")]
    ShaderCompile {
        /// Which program failed.
        label: String,
        /// Diagnostic text reported by the compiler or the reflection pass.
        log: String,
    },

    // ========================================================================
    // Requests
    // ========================================================================
    /// A viewport with a zero dimension was requested.
    #[error("Invalid viewport {width}x{height}: both dimensions must be non-zero")]
    InvalidViewport {
        /// Requested width in pixels.
        width: u32,
        /// Requested height in pixels.
        height: u32,
    },

    /// Replacement geometry does not match the bound mesh.
    #[error("Geometry mismatch: expected {expected} vertices, got {actual}")]
    GeometryMismatch {
        /// Vertex count of the bound mesh.
        expected: usize,
        /// Vertex count that was supplied.
        actual: usize,
    },

    /// The configuration cannot be used.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The renderer was used before `initialize` or after `shutdown`.
    #[error("Renderer is not initialized")]
    NotInitialized,
}

impl PeelError {
    /// Returns `true` for errors after which the renderer state is unchanged.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PeelError::InvalidViewport { .. }
                | PeelError::GeometryMismatch { .. }
                | PeelError::NotInitialized
        )
    }
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, PeelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shader_error_carries_log() {
        let err = PeelError::ShaderCompile {
            label: "Layer Program".into(),
            log: "unknown identifier `foo`".into(),
        };
        let text = err.to_string();
        assert!(text.contains("Layer Program"));
        assert!(text.contains("unknown identifier `foo`"));
    }

    #[test]
    fn viewport_error_is_a_rejection() {
        let err = PeelError::InvalidViewport {
            width: 0,
            height: 480,
        };
        assert!(err.is_rejection());
        assert!(!PeelError::ResourceAllocation("oom".into()).is_rejection());
    }
}
