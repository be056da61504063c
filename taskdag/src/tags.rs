// src/tags.rs

//! Interned tags used as secondary lookup keys for activities.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// An immutable, name-keyed tag value.
///
/// Two tags with the same name compare equal and hash equal, regardless of
/// which registry produced them.
#[derive(Debug, Clone)]
pub struct Tag {
    inner: Arc<TagInner>,
}

#[derive(Debug)]
struct TagInner {
    name: String,
}

impl Tag {
    fn new(name: &str) -> Self {
        Self {
            inner: Arc::new(TagInner {
                name: name.to_string(),
            }),
        }
    }

    /// The tag name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for Tag {}

impl Hash for Tag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name().hash(state);
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag:[{}]", self.name())
    }
}

/// Cache of tags keyed by name.
///
/// `create` returns the same canonical instance for a name while any strong
/// reference to it is held; once all holders drop the tag, the entry is
/// reclaimed on the next access. Cloning the registry yields a handle to the
/// same underlying cache, so a registry can be shared between a scheduler and
/// its host, or kept private for test isolation.
#[derive(Debug, Clone, Default)]
pub struct TagRegistry {
    cache: Arc<Mutex<HashMap<String, Weak<TagInner>>>>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the tag with the provided name, creating it if no live instance
    /// exists.
    pub fn create(&self, name: &str) -> Tag {
        let mut cache = self.lock();
        prune(&mut cache);

        if let Some(inner) = cache.get(name).and_then(Weak::upgrade) {
            return Tag { inner };
        }

        let tag = Tag::new(name);
        cache.insert(name.to_string(), Arc::downgrade(&tag.inner));
        tag
    }

    /// The tag with the provided name, or `None` if no live instance exists.
    pub fn get(&self, name: &str) -> Option<Tag> {
        let mut cache = self.lock();
        prune(&mut cache);
        cache.get(name).and_then(Weak::upgrade).map(|inner| Tag { inner })
    }

    /// Number of live tags in the registry.
    pub fn len(&self) -> usize {
        let mut cache = self.lock();
        prune(&mut cache);
        cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Weak<TagInner>>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drop entries whose value is no longer referenced by any holder.
fn prune(cache: &mut HashMap<String, Weak<TagInner>>) {
    cache.retain(|_, weak| weak.strong_count() > 0);
}
