//! Tags: named, externally indexed subsets of another registry's keys, exposed as a registry of their own.
use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use arc_swap::ArcSwap;
use hashbrown::{HashMap, HashSet};
use itertools::Itertools;
use tracing::debug;

use crate::error::RegistryError;
use crate::key::{RegistryId, RegistryType, ResourceKey};
use crate::lifecycle::Lifecycle;
use crate::registry::{identity, Registry, RegistryKind};

/// A named set of keys of the registry `registry`.
pub struct Tag<T: ?Sized> {
    key: ResourceKey,
    registry: RegistryType<T>,
    members: HashSet<ResourceKey>,
}

impl<T: ?Sized> Tag<T> {
    /// The tag's own key.
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// The registry whose keys this tag groups.
    pub fn registry(&self) -> &RegistryType<T> {
        &self.registry
    }

    /// Checks membership of a key of the tagged registry.
    pub fn contains(&self, member: &ResourceKey) -> bool {
        self.members.contains(member)
    }

    /// All members, sorted.
    pub fn members(&self) -> Vec<&ResourceKey> {
        self.members.iter().sorted().collect()
    }

    /// Number of members.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Checks if the tag has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl<T: ?Sized> Debug for Tag<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tag")
            .field("key", &self.key)
            .field("registry", &self.registry)
            .field("members", &self.members())
            .finish()
    }
}

struct IndexedTag<T: ?Sized> {
    tag: Arc<Tag<T>>,
    lifecycle: Lifecycle,
}

/// An immutable snapshot of every tag over one registry.
pub struct TagIndex<T: ?Sized> {
    target: RegistryType<T>,
    tags: Vec<IndexedTag<T>>,
    by_key: HashMap<ResourceKey, usize>,
    lifecycle: Lifecycle,
}

impl<T: ?Sized> TagIndex<T> {
    /// An index with no tags.
    pub fn empty(target: RegistryType<T>) -> Self {
        TagIndexBuilder::new(target).build()
    }

    /// Starts building an index.
    pub fn builder(target: RegistryType<T>) -> TagIndexBuilder<T> {
        TagIndexBuilder::new(target)
    }

    /// The tagged registry.
    pub fn target(&self) -> &RegistryType<T> {
        &self.target
    }

    /// Looks up a tag.
    pub fn get(&self, tag: &ResourceKey) -> Option<&Arc<Tag<T>>> {
        self.by_key.get(tag).map(|&i| &self.tags[i].tag)
    }

    /// Every tag, in the order the indexer first added them.
    pub fn tags(&self) -> impl Iterator<Item = &Arc<Tag<T>>> {
        self.tags.iter().map(|indexed| &indexed.tag)
    }

    /// Every tag `member` belongs to.
    pub fn tags_containing<'s>(&'s self, member: &'s ResourceKey) -> impl Iterator<Item = &'s Arc<Tag<T>>> + 's {
        self.tags().filter(move |tag| tag.contains(member))
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    /// Checks if there are no tags.
    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Accumulates tag memberships into a [`TagIndex`]. Adding the same tag again extends its members.
pub struct TagIndexBuilder<T: ?Sized> {
    target: RegistryType<T>,
    tags: Vec<(ResourceKey, HashSet<ResourceKey>, Lifecycle)>,
    by_key: HashMap<ResourceKey, usize>,
}

impl<T: ?Sized> TagIndexBuilder<T> {
    /// An empty builder for tags over `target`.
    pub fn new(target: RegistryType<T>) -> Self {
        Self {
            target,
            tags: Vec::new(),
            by_key: HashMap::new(),
        }
    }

    /// Adds members to a tag, creating it if needed. Lifecycles of repeated additions are merged.
    pub fn add(
        &mut self,
        tag: ResourceKey,
        members: impl IntoIterator<Item = ResourceKey>,
        lifecycle: Lifecycle,
    ) -> &mut Self {
        let index = *self.by_key.entry(tag.clone()).or_insert_with(|| {
            self.tags.push((tag, HashSet::new(), Lifecycle::Stable));
            self.tags.len() - 1
        });
        let (_, set, merged) = &mut self.tags[index];
        set.extend(members);
        *merged = merged.merge(lifecycle);
        self
    }

    /// Freezes the builder into an index.
    pub fn build(self) -> TagIndex<T> {
        let target = self.target;
        let tags: Vec<_> = self
            .tags
            .into_iter()
            .map(|(key, members, lifecycle)| IndexedTag {
                tag: Arc::new(Tag {
                    key,
                    registry: target.clone(),
                    members,
                }),
                lifecycle,
            })
            .collect();
        let lifecycle = Lifecycle::merge_all(tags.iter().map(|indexed| indexed.lifecycle));
        TagIndex {
            target,
            tags,
            by_key: self.by_key,
            lifecycle,
        }
    }
}

/// The shared slot an external re-indexing pass publishes new tag snapshots into.
///
/// Readers always see either the previous or the new snapshot, never a partial one.
pub struct TagIndexHandle<T: ?Sized> {
    current: Arc<ArcSwap<TagIndex<T>>>,
}

impl<T: ?Sized> TagIndexHandle<T> {
    /// A handle holding an empty index over `target`.
    pub fn new(target: RegistryType<T>) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(TagIndex::empty(target))),
        }
    }

    /// Replaces the current snapshot.
    pub fn publish(&self, index: TagIndex<T>) {
        debug!(registry = %index.target, tags = index.len(), "Published tag index");
        self.current.store(Arc::new(index));
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<TagIndex<T>> {
        self.current.load_full()
    }
}

impl<T: ?Sized> Clone for TagIndexHandle<T> {
    fn clone(&self) -> Self {
        Self {
            current: Arc::clone(&self.current),
        }
    }
}

/// A read-only registry view over a [`TagIndexHandle`].
///
/// Every call reads the latest published snapshot, so two calls may disagree if the index was
/// republished in between. Direct registration is ignored: tags are added by publishing a new index.
pub struct TagRegistry<T: ?Sized + 'static> {
    registry_type: RegistryType<Tag<T>>,
    index: TagIndexHandle<T>,
}

impl<T: ?Sized + 'static> TagRegistry<T> {
    /// A view at `registry_type` over `index`.
    pub fn new(registry_type: RegistryType<Tag<T>>, index: TagIndexHandle<T>) -> Self {
        Self { registry_type, index }
    }

    /// The handle this view reads from.
    pub fn index(&self) -> &TagIndexHandle<T> {
        &self.index
    }

    /// Checks if `member` is currently in the tag `tag`.
    pub fn is_member(&self, tag: &ResourceKey, member: &ResourceKey) -> bool {
        self.index
            .snapshot()
            .get(tag)
            .is_some_and(|tag| tag.contains(member))
    }

    /// Every tag `member` currently belongs to.
    pub fn tags_containing(&self, member: &ResourceKey) -> Vec<Arc<Tag<T>>> {
        self.index
            .snapshot()
            .tags_containing(member)
            .cloned()
            .collect()
    }

    fn unsupported(&self, operation: &'static str) -> RegistryError {
        RegistryError::Unsupported {
            registry: self.registry_type.erased().clone(),
            operation,
        }
    }
}

impl<T: ?Sized + 'static> Registry<Tag<T>> for TagRegistry<T> {
    fn registry_type(&self) -> &RegistryType<Tag<T>> {
        &self.registry_type
    }

    fn kind(&self) -> RegistryKind {
        RegistryKind::Tag
    }

    fn len(&self) -> usize {
        self.index.snapshot().len()
    }

    fn get(&self, key: &ResourceKey) -> Option<Arc<Tag<T>>> {
        self.index.snapshot().get(key).cloned()
    }

    fn get_by_id(&self, _id: RegistryId) -> Result<Option<Arc<Tag<T>>>, RegistryError> {
        Err(self.unsupported("get_by_id"))
    }

    fn key_of(&self, value: &Tag<T>) -> Option<ResourceKey> {
        self.index
            .snapshot()
            .get(&value.key)
            .filter(|tag| identity(&***tag) == identity(value))
            .map(|tag| tag.key.clone())
    }

    fn id_of(&self, _value: &Tag<T>) -> Result<Option<RegistryId>, RegistryError> {
        Err(self.unsupported("id_of"))
    }

    fn entries(&self) -> Vec<(ResourceKey, Arc<Tag<T>>)> {
        self.index
            .snapshot()
            .tags()
            .map(|tag| (tag.key.clone(), Arc::clone(tag)))
            .collect()
    }

    fn lifecycle(&self) -> Lifecycle {
        self.index.snapshot().lifecycle
    }

    fn entry_lifecycle(&self, key: &ResourceKey) -> Option<Lifecycle> {
        let snapshot = self.index.snapshot();
        let &i = snapshot.by_key.get(key)?;
        Some(snapshot.tags[i].lifecycle)
    }

    fn register(
        &mut self,
        key: ResourceKey,
        _value: Arc<Tag<T>>,
        _lifecycle: Lifecycle,
    ) -> Result<Option<Arc<Tag<T>>>, RegistryError> {
        debug!(registry = %self.registry_type, key = %key, "Ignoring direct registration into a tag view");
        Ok(None)
    }

    fn register_or_override(
        &mut self,
        _id: Option<RegistryId>,
        key: ResourceKey,
        value: Arc<Tag<T>>,
        lifecycle: Lifecycle,
    ) -> Result<Option<Arc<Tag<T>>>, RegistryError> {
        self.register(key, value, lifecycle)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<T: ?Sized + 'static> Debug for TagRegistry<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagRegistry")
            .field("registry_type", &self.registry_type)
            .field("tags", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct Block;

    fn key(path: &str) -> ResourceKey {
        ResourceKey::ks(path).unwrap()
    }

    fn blocks() -> RegistryType<Block> {
        RegistryType::new(ResourceKey::ks_const("r"), ResourceKey::ks_const("blocks"))
    }

    fn block_tags() -> TagRegistry<Block> {
        TagRegistry::new(
            RegistryType::new(ResourceKey::ks_const("r"), ResourceKey::ks_const("tags/blocks")),
            TagIndexHandle::new(blocks()),
        )
    }

    fn sample_index() -> TagIndex<Block> {
        let mut builder = TagIndex::builder(blocks());
        builder
            .add(key("logs"), [key("oak_log"), key("birch_log")], Lifecycle::Stable)
            .add(key("flammable"), [key("oak_log")], Lifecycle::Experimental)
            .add(key("logs"), [key("spruce_log")], Lifecycle::deprecated(3));
        builder.build()
    }

    #[test]
    fn builder_merges_repeated_tags() {
        let index = sample_index();
        assert_eq!(index.len(), 2);
        let logs = index.get(&key("logs")).unwrap();
        assert_eq!(
            logs.members(),
            vec![&key("birch_log"), &key("oak_log"), &key("spruce_log")]
        );
        assert_eq!(index.lifecycle, Lifecycle::Experimental);
        let containing: Vec<_> = index
            .tags_containing(&key("oak_log"))
            .map(|tag| tag.key().clone())
            .collect();
        assert_eq!(containing, vec![key("logs"), key("flammable")]);
    }

    #[test]
    fn view_follows_published_index() {
        let mut tags = block_tags();
        assert!(tags.is_empty());
        assert!(tags.is_dynamic());

        tags.index().publish(sample_index());
        assert_eq!(tags.len(), 2);
        assert!(tags.is_member(&key("logs"), &key("spruce_log")));
        assert!(!tags.is_member(&key("flammable"), &key("spruce_log")));
        assert_eq!(tags.entry_lifecycle(&key("logs")), Some(Lifecycle::deprecated(3)));
        assert_eq!(tags.tags_containing(&key("birch_log")).len(), 1);

        let logs = tags.require(&key("logs")).unwrap();
        assert_eq!(tags.key_of(&logs), Some(key("logs")));

        // Registration goes through the index, not the view.
        let mut stray = TagIndex::builder(blocks());
        stray.add(key("logs"), [], Lifecycle::Stable);
        let stray_logs = Arc::clone(stray.build().get(&key("logs")).unwrap());
        assert_eq!(tags.key_of(&stray_logs), None);
        assert!(tags
            .register(key("planks"), stray_logs, Lifecycle::Stable)
            .unwrap()
            .is_none());
        assert_eq!(tags.get(&key("planks")).map(|t| t.len()), None);

        tags.index().publish(TagIndex::empty(blocks()));
        assert!(tags.get(&key("logs")).is_none());
        // Snapshots held by callers stay valid.
        assert_eq!(logs.len(), 3);
    }

    #[test]
    fn ids_are_unsupported() {
        let tags = block_tags();
        tags.index().publish(sample_index());
        let logs = tags.get(&key("logs")).unwrap();
        assert!(matches!(tags.get_by_id(RegistryId(0)), Err(RegistryError::Unsupported { .. })));
        assert!(matches!(tags.id_of(&logs), Err(RegistryError::Unsupported { .. })));
        assert_eq!(tags.probe_id(&logs), None);
    }
}
