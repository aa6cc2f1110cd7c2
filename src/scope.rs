use crate::context::Context;
use crate::tag::Tag;
use std::fmt;

/// Guard that owns a tag for the length of a scope.
///
/// Dropping it cancels every task, main-thread job and delayed job still
/// registered under the tag, so nothing outlives the screen or request
/// that started it.
pub struct TagScope<'ctx> {
    ctx: &'ctx Context,
    tag: Tag,
}

impl<'ctx> TagScope<'ctx> {
    pub(crate) fn new(ctx: &'ctx Context, tag: Tag) -> Self {
        Self { ctx, tag }
    }

    pub fn tag(&self) -> &Tag {
        &self.tag
    }
}

impl<'ctx> Drop for TagScope<'ctx> {
    fn drop(&mut self) {
        self.ctx.release_tag(&self.tag);
    }
}

impl<'ctx> fmt::Debug for TagScope<'ctx> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagScope").field("tag", &self.tag).finish()
    }
}
