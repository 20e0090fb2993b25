//! Deferred references between records.

use recordkit_engine::RecordId;

use crate::record::Record;

/// A reference to another record that may not be loaded yet.
///
/// Holding a row's id is enough for identity checks and foreign-key style
/// bookkeeping. The referenced record itself is only fetched when a
/// repository resolves the reference, at which point the variant flips to
/// [`Lazy::Loaded`].
#[derive(Debug, Clone, Default)]
pub enum Lazy<T: Record> {
    /// No reference at all.
    #[default]
    Absent,
    /// A known id whose row has not been fetched.
    Unloaded(RecordId),
    /// A fully fetched record.
    Loaded(Box<T>),
}

impl<T: Record> Lazy<T> {
    /// Builds an unloaded reference from an optional id.
    pub fn from_id(id: Option<RecordId>) -> Self {
        match id {
            Some(id) => Lazy::Unloaded(id),
            None => Lazy::Absent,
        }
    }

    /// The referenced id, available without fetching the row.
    pub fn id(&self) -> Option<RecordId> {
        match self {
            Lazy::Absent => None,
            Lazy::Unloaded(id) => Some(*id),
            Lazy::Loaded(record) => record.id(),
        }
    }

    /// Whether the referenced record is in memory.
    pub fn is_loaded(&self) -> bool {
        matches!(self, Lazy::Loaded(_))
    }

    /// The record, if it has been loaded.
    pub fn get(&self) -> Option<&T> {
        match self {
            Lazy::Loaded(record) => Some(record),
            _ => None,
        }
    }

    /// Replaces the reference with a loaded record.
    pub fn set(&mut self, record: T) {
        *self = Lazy::Loaded(Box::new(record));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Meta;
    use crate::registry::FieldRegistry;
    use std::sync::OnceLock;

    #[derive(Debug, Clone, Default)]
    struct Tag {
        meta: Meta,
        label: String,
    }

    impl Record for Tag {
        const ENTITY: &'static str = "tag";

        fn meta(&self) -> &Meta {
            &self.meta
        }

        fn meta_mut(&mut self) -> &mut Meta {
            &mut self.meta
        }

        fn registry() -> &'static FieldRegistry<Self> {
            static REGISTRY: OnceLock<FieldRegistry<Tag>> = OnceLock::new();
            REGISTRY.get_or_init(|| {
                FieldRegistry::builder("tag")
                    .field(
                        "label",
                        |t: &Tag| t.label.clone(),
                        |t, v: String| t.label = v,
                    )
                    .build()
            })
        }
    }

    #[test]
    fn default_is_absent() {
        let lazy: Lazy<Tag> = Lazy::default();
        assert!(lazy.id().is_none());
        assert!(!lazy.is_loaded());
        assert!(lazy.get().is_none());
    }

    #[test]
    fn id_available_without_loading() {
        let lazy: Lazy<Tag> = Lazy::from_id(Some(RecordId::new(42)));
        assert_eq!(lazy.id(), Some(RecordId::new(42)));
        assert!(!lazy.is_loaded());
        assert!(lazy.get().is_none());
    }

    #[test]
    fn loaded_exposes_record_and_its_id() {
        let mut tag = Tag::default();
        tag.meta.id = Some(RecordId::new(7));
        tag.label = "urgent".to_owned();

        let mut lazy = Lazy::Absent;
        lazy.set(tag);
        assert!(lazy.is_loaded());
        assert_eq!(lazy.id(), Some(RecordId::new(7)));
        assert_eq!(lazy.get().map(|t| t.label.as_str()), Some("urgent"));
    }

    #[test]
    fn from_none_is_absent() {
        let lazy: Lazy<Tag> = Lazy::from_id(None);
        assert!(matches!(lazy, Lazy::Absent));
    }
}
