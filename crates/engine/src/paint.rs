use anyhow::Result;
use collageconfig::Color;

use crate::types::{DecodedImage, QuadParams, TextureHandle};

/// Failure while presenting a frame.
///
/// All variants are recoverable from the render loop's point of view: the
/// renderer logs them and skips the frame. Surface loss is expected during
/// compositor reconfiguration and resolves on the next surface event.
#[derive(Debug, thiserror::Error)]
pub enum DrawError {
    #[error("render surface lost or outdated")]
    SurfaceLost,
    #[error("render surface timed out")]
    Timeout,
    #[error("GPU out of memory")]
    OutOfMemory,
    #[error("draw failed: {0}")]
    Other(#[from] anyhow::Error),
}

/// The seam between the engine and the GPU.
///
/// Exactly one backend exists per surface, and every method must be called
/// on the GPU command thread. Draw calls issued between [`begin_frame`] and
/// [`end_frame`] are painted in submission order (no depth buffer).
///
/// [`begin_frame`]: PaintBackend::begin_frame
/// [`end_frame`]: PaintBackend::end_frame
pub trait PaintBackend {
    /// Reconfigures the swapchain to the given physical size.
    fn configure_surface(&mut self, width: u32, height: u32);

    /// Uploads decoded pixels and returns an opaque handle. The handle is
    /// valid until [`destroy_texture`](PaintBackend::destroy_texture).
    fn create_texture(&mut self, image: &DecodedImage, label: &str) -> Result<TextureHandle>;

    /// Releases a texture. Unknown handles are ignored.
    fn destroy_texture(&mut self, handle: TextureHandle);

    /// Acquires the next frame and records a clear to `clear`.
    fn begin_frame(&mut self, clear: Color) -> Result<(), DrawError>;

    /// Queues a textured quad for the current frame.
    fn draw_photo(&mut self, texture: TextureHandle, quad: QuadParams);

    /// Queues a solid-color quad (borders, overlay) for the current frame.
    fn draw_fill(&mut self, color: Color, quad: QuadParams);

    /// Submits and presents the current frame.
    fn end_frame(&mut self) -> Result<(), DrawError>;
}
