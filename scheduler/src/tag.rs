//! Interned, name-keyed tags (spec.md §3, §4.2).
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, Weak};

/// An interned tag. Two tags with the same name compare equal and hash equal;
/// cloning is cheap (an `Arc` bump).
#[derive(Clone)]
pub struct Tag(Arc<str>);

impl Tag {
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.0.as_ref() == other.0.as_ref()
    }
}

impl Eq for Tag {}

impl Hash for Tag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.as_ref().hash(state);
    }
}

impl std::fmt::Debug for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tag({:?})", self.0)
    }
}

/// Interning map from tag name to canonical tag identity.
///
/// Entries are reclaimed once no external holder retains the tag: the
/// registry only keeps a `Weak` reference, upgrading on lookup and
/// re-interning on a miss. A scheduler-owned registry (rather than a
/// process-wide singleton) is the preferred shape per design note 9 ("Global
/// registry") — it keeps test runs isolated from one another.
#[derive(Default)]
pub struct TagRegistry {
    entries: Mutex<HashMap<String, Weak<str>>>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the canonical tag for `name`, creating it if it does not
    /// already exist or if its last strong reference was dropped.
    pub fn create(&self, name: &str) -> Tag {
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.get(name).and_then(Weak::upgrade) {
            return Tag(existing);
        }
        let fresh: Arc<str> = Arc::from(name);
        entries.insert(name.to_string(), Arc::downgrade(&fresh));
        Tag(fresh)
    }

    /// Returns the canonical tag for `name` if a strong reference to it is
    /// currently alive, without creating one.
    pub fn get(&self, name: &str) -> Option<Tag> {
        self.entries
            .lock()
            .unwrap()
            .get(name)
            .and_then(Weak::upgrade)
            .map(Tag)
    }

    /// Number of live (strongly referenced) tags. Exposed for tests that
    /// assert on reclamation.
    pub fn live_count(&self) -> usize {
        self.entries
            .lock()
            .unwrap()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Drops entries whose last strong reference has gone away.
    pub fn gc(&self) {
        self.entries
            .lock()
            .unwrap()
            .retain(|_, weak| weak.strong_count() > 0);
    }
}
