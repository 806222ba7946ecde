//! Core engine for PhotoFlux (animated photo-collage wallpaper).
//!
//! The engine coordinates a GPU-bound single-threaded render context with
//! background media decoding and timer-driven transition scheduling:
//!
//! ```text
//!   host surface callbacks (GPU command thread)
//!          │
//!          ▼
//!   Renderer ──▶ drain GpuDispatcher ──▶ TextureCache::drain_completed()
//!          │                                   ▲
//!          ├─▶ World::draw ──▶ PaintBackend    │ decoded photos
//!          └─▶ TransitionEngine tick           │
//!                                     decode worker thread ──▶ MediaSource
//! ```
//!
//! Every GPU object is created, read, and destroyed on the GPU command
//! thread; the decode worker only produces CPU-side pixel data and hands it
//! back through a channel. The host (a winit window, a Wayland layer
//! surface, ...) owns the surface lifecycle and calls into [`Renderer`].

pub mod cache;
pub mod dispatch;
pub mod gpu;
pub mod media;
pub mod paint;
pub mod renderer;
pub mod transition;
pub mod types;
pub mod world;

pub use dispatch::{DispatcherHandle, EngineEvent, SettingsEvent};
pub use gpu::WgpuBackend;
pub use media::{DiskMediaSource, MediaSource};
pub use paint::{DrawError, PaintBackend};
pub use renderer::Renderer;
pub use types::{DecodedImage, MediaId, QuadParams, Rect, RenderMode, SlotId, TextureHandle};
