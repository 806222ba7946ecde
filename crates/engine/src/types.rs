use std::fmt;

/// Rectangle in normalized device coordinates (`-1.0..=1.0`), origin at the
/// bottom-left corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub const FULLSCREEN: Self = Self {
        x: -1.0,
        y: -1.0,
        w: 2.0,
        h: 2.0,
    };

    pub const fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    /// Shrinks the rectangle on all sides by a fraction of its smaller
    /// dimension. Used for the photo border inset.
    pub fn inset_by_fraction(self, fraction: f32) -> Self {
        let margin = self.w.min(self.h) * fraction;
        Self {
            x: self.x + margin,
            y: self.y + margin,
            w: (self.w - 2.0 * margin).max(0.0),
            h: (self.h - 2.0 * margin).max(0.0),
        }
    }
}

/// Opaque reference to a GPU-resident texture owned by a [`PaintBackend`].
///
/// [`PaintBackend`]: crate::paint::PaintBackend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u64);

/// Index into the texture cache's bounded slot pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub usize);

/// Identifier of one enumerable media entry (a file path for the disk
/// source, an arbitrary key for synthetic sources).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaId(pub String);

impl MediaId {
    pub fn new(id: impl Into<String>) -> Self {
        MediaId(id.into())
    }
}

impl fmt::Display for MediaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// CPU-side RGBA8 pixel data ready for GPU upload.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl DecodedImage {
    /// Builds an image, checking that the buffer length matches the
    /// dimensions.
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Self {
        debug_assert_eq!(rgba.len(), (width * height * 4) as usize);
        Self {
            width,
            height,
            rgba,
        }
    }
}

/// Per-draw placement parameters for a quad.
///
/// `offset` is expressed in frame widths/heights so transition effects stay
/// independent of the grid geometry; `x_scale` squeezes the quad around its
/// horizontal center (flip effect).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuadParams {
    pub rect: Rect,
    pub offset: (f32, f32),
    pub x_scale: f32,
    pub alpha: f32,
}

impl QuadParams {
    pub fn still(rect: Rect) -> Self {
        Self {
            rect,
            offset: (0.0, 0.0),
            x_scale: 1.0,
            alpha: 1.0,
        }
    }
}

/// How the host should drive redraws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Redraw every frame; used while a transition animates.
    Continuous,
    /// Redraw only when the engine requests it.
    OnDemand,
}
