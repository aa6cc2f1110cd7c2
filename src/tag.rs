//! Opaque grouping keys for bulk cancellation.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static TAG_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Groups related work so it can be cancelled together.
///
/// Tags compare by identity: every call to [`Tag::new`] yields a distinct
/// tag, even for identical labels, while clones of one tag compare equal.
#[derive(Clone)]
pub struct Tag {
    inner: Arc<TagInner>,
}

struct TagInner {
    id: u64,
    label: Option<String>,
}

impl Tag {
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Creates a tag with a label used only for diagnostics.
    pub fn labeled<S: Into<String>>(label: S) -> Self {
        Self::build(Some(label.into()))
    }

    fn build(label: Option<String>) -> Self {
        Tag {
            inner: Arc::new(TagInner {
                id: TAG_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
                label,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn label(&self) -> Option<&str> {
        self.inner.label.as_deref()
    }
}

impl Default for Tag {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Tag {}

impl Hash for Tag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Tag");
        s.field("id", &self.inner.id);
        if let Some(label) = &self.inner.label {
            s.field("label", label);
        }
        s.finish()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner.label {
            Some(label) => write!(f, "{}#{}", label, self.inner.id),
            None => write!(f, "#{}", self.inner.id),
        }
    }
}
