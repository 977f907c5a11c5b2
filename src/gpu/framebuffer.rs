//! Off-screen render targets.
//!
//! A [`Framebuffer`] redirects draws from the output surface into a texture.
//! Attaching returns a [`FramebufferBinding`] that borrows the context
//! mutably, so only one attachment can exist at a time and every attach is
//! paired with a detach, either explicitly or when the binding goes out of
//! scope.
//!
//! ```ignore
//! let mut target = framebuffer.attach(&mut ctx, &screen_texture);
//! program.draw(&mut target, DrawMode::Triangles, 0..6)?;
//! target.detach();
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use super::{Context, Texture};

/// Redirects rendering into one color attachment at a time.
#[derive(Debug, Default)]
pub struct Framebuffer;

impl Framebuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `texture` the destination of subsequent draws.
    pub fn attach<'a>(&mut self, ctx: &'a mut Context, texture: &Texture) -> FramebufferBinding<'a> {
        log::trace!(
            "framebuffer attach '{}' {}x{}",
            texture.label(),
            texture.width(),
            texture.height()
        );
        ctx.attach(Arc::clone(texture.inner()));
        FramebufferBinding { ctx }
    }
}

/// An active attachment. Draws through it land in the attached texture.
pub struct FramebufferBinding<'a> {
    ctx: &'a mut Context,
}

impl FramebufferBinding<'_> {
    /// Restore drawing to the output surface.
    pub fn detach(self) {}
}

impl Deref for FramebufferBinding<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.ctx
    }
}

impl DerefMut for FramebufferBinding<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx
    }
}

impl Drop for FramebufferBinding<'_> {
    fn drop(&mut self) {
        self.ctx.detach();
    }
}
