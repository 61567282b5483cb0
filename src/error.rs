//! Error types for the video output core
//!
//! Transient per-frame failures (upload, render) are absorbed inside the
//! render cycle. Only pool setup problems and fatal present failures are
//! ever returned to the caller.

use crate::gpu::GpuError;

/// Errors raised by the video output core
#[derive(Debug, Clone, PartialEq)]
pub enum VoutError {
    /// Pool or transfer buffer creation failed (recovered by the copy-based pool)
    Allocation(String),
    /// A plane upload failed (recovered by drawing a failure frame)
    Upload {
        /// Plane index that failed
        plane: usize,
        /// Backend-provided reason
        reason: String,
    },
    /// Swapchain submission failed; the display path may need reinitialization
    FatalPresent(String),
    /// Picture layout or plane arguments were invalid
    InvalidFormat(String),
    /// Low-level GPU error outside of the upload path
    Gpu(GpuError),
}

impl std::fmt::Display for VoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoutError::Allocation(msg) => write!(f, "Allocation failed: {}", msg),
            VoutError::Upload { plane, reason } => {
                write!(f, "Failed uploading plane {}: {}", plane, reason)
            }
            VoutError::FatalPresent(msg) => write!(f, "Present failed: {}", msg),
            VoutError::InvalidFormat(msg) => write!(f, "Invalid picture format: {}", msg),
            VoutError::Gpu(e) => write!(f, "GPU error: {}", e),
        }
    }
}

impl std::error::Error for VoutError {}

impl From<GpuError> for VoutError {
    fn from(e: GpuError) -> Self {
        match e {
            GpuError::OutOfMemory(msg) => VoutError::Allocation(msg),
            other => VoutError::Gpu(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_memory_maps_to_allocation() {
        let err: VoutError = GpuError::OutOfMemory("64 MiB".to_string()).into();
        assert_eq!(err, VoutError::Allocation("64 MiB".to_string()));
    }

    #[test]
    fn test_upload_error_display() {
        let err = VoutError::Upload {
            plane: 2,
            reason: "texture lost".to_string(),
        };
        assert_eq!(err.to_string(), "Failed uploading plane 2: texture lost");
    }
}
