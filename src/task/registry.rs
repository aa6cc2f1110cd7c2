use super::TaskId;
use crate::tag::Tag;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Something the registry can cancel in bulk.
pub trait Cancellable: Send + Sync {
    fn id(&self) -> TaskId;

    fn cancel(&self, interrupt: bool);
}

/// Tracks live tasks per tag.
///
/// A tag has an entry only while at least one of its tasks is live.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: Mutex<HashMap<Tag, Vec<Arc<dyn Cancellable>>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tag: &Tag, task: Arc<dyn Cancellable>) {
        self.tasks.lock().entry(tag.clone()).or_default().push(task);
    }

    /// Removes the task with `id` from `tag`, pruning the tag if it becomes
    /// empty. Returns whether the task was found.
    pub fn unregister(&self, tag: &Tag, id: TaskId) -> bool {
        let mut tasks = self.tasks.lock();
        let Some(list) = tasks.get_mut(tag) else {
            return false;
        };

        let before = list.len();
        list.retain(|task| task.id() != id);
        let found = list.len() != before;

        if list.is_empty() {
            tasks.remove(tag);
        }
        found
    }

    /// Cancels, with interruption, every task under `tag` and drops the tag.
    /// An unknown tag is a no-op. Returns the number of tasks cancelled.
    pub fn cancel_all(&self, tag: &Tag) -> usize {
        // Detach the list first: cancelled tasks deregister themselves from
        // other threads, and must find nothing to remove.
        let Some(list) = self.tasks.lock().remove(tag) else {
            return 0;
        };

        for task in &list {
            task.cancel(true);
        }

        debug!(%tag, cancelled = list.len(), "tasks cancelled");
        list.len()
    }

    pub fn len(&self, tag: &Tag) -> usize {
        self.tasks.lock().get(tag).map_or(0, |list| list.len())
    }

    pub fn contains(&self, tag: &Tag) -> bool {
        self.tasks.lock().contains_key(tag)
    }

    pub fn tag_count(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tags", &self.tag_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Stub {
        id: TaskId,
        interrupted: AtomicBool,
    }

    impl Stub {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                id: TaskId::next(),
                interrupted: AtomicBool::new(false),
            })
        }
    }

    impl Cancellable for Stub {
        fn id(&self) -> TaskId {
            self.id
        }

        fn cancel(&self, interrupt: bool) {
            self.interrupted.store(interrupt, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_prunes_empty_tag() {
        let registry = TaskRegistry::new();
        let tag = Tag::new();
        let a = Stub::new();
        let b = Stub::new();

        registry.register(&tag, a.clone());
        registry.register(&tag, b.clone());
        assert_eq!(registry.len(&tag), 2);

        assert!(registry.unregister(&tag, a.id));
        assert!(registry.contains(&tag));
        assert!(registry.unregister(&tag, b.id));
        assert!(!registry.contains(&tag));
        assert!(!registry.unregister(&tag, b.id));
    }

    #[test]
    fn test_cancel_all_interrupts_and_removes() {
        let registry = TaskRegistry::new();
        let tag = Tag::new();
        let other = Tag::new();
        let stubs: Vec<_> = (0..3).map(|_| Stub::new()).collect();
        for stub in &stubs {
            registry.register(&tag, stub.clone());
        }
        let bystander = Stub::new();
        registry.register(&other, bystander.clone());

        assert_eq!(registry.cancel_all(&tag), 3);
        assert!(stubs.iter().all(|p| p.interrupted.load(Ordering::SeqCst)));
        assert!(!registry.contains(&tag));
        assert!(!bystander.interrupted.load(Ordering::SeqCst));
        assert_eq!(registry.tag_count(), 1);
    }

    #[test]
    fn test_cancel_unknown_tag_is_noop() {
        let registry = TaskRegistry::new();
        assert_eq!(registry.cancel_all(&Tag::new()), 0);
    }

    #[test]
    fn test_concurrent_register_and_cancel() {
        let registry = Arc::new(TaskRegistry::new());
        let tag = Tag::new();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                let tag = tag.clone();
                std::thread::spawn(move || {
                    for _ in 0..200 {
                        let stub = Stub::new();
                        registry.register(&tag, stub.clone());
                        registry.unregister(&tag, stub.id);
                        registry.cancel_all(&tag);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.is_empty());
    }
}
