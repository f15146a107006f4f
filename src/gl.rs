/// Opaque handle to the embedding application's GL context. The pipeline
/// shares state with it but never dereferences it; only the backend does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SharedContext(pub usize);

/// Output viewport in surface coordinates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// GL context owned by the recorder worker.
pub trait GlContext: Send {
    fn release(&mut self);
}

/// Window surface wrapping the encoder's input surface. All calls happen on
/// the recorder worker thread.
pub trait RecordSurface: Send {
    fn make_current(&mut self) -> anyhow::Result<()>;

    /// Stamp the next swapped frame, nanoseconds.
    fn set_presentation_time(&mut self, ts_ns: i64);

    /// Submit the rendered frame to the encoder input.
    fn swap_buffers(&mut self) -> anyhow::Result<()>;

    /// Drop the GL-side surface binding but keep the native window, so the
    /// surface can be `recreate`d against a fresh context.
    fn release_gl_surface(&mut self);

    fn recreate(&mut self, context: &mut dyn GlContext) -> anyhow::Result<()>;

    fn release(&mut self);
}

/// Compositing renderer drawing the current scene into whatever surface is
/// current. The decode side feeds it through its own surface layers; this
/// crate only drives the lifecycle hooks and per-frame draw.
pub trait Renderer: Send {
    fn on_surface_created(&mut self);

    fn on_surface_changed(&mut self, width: u32, height: u32);

    fn draw_frame(&mut self);

    fn set_viewport(&mut self, viewport: Viewport);

    fn release(&mut self);
}
