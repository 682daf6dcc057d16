//! Class sources for the runtime's class loader

use indexmap::IndexMap;
use jade_base::{
    class::ClassFileData, loader::ClassSource, package::Packages, LoadClassFileError,
};

mod bootstrap;
mod util;

pub use bootstrap::{BootstrapClassSource, BOOTSTRAP_LOCATION};
pub use util::MultiClassSource;

/// Classes that are already in memory, such as ones built by an embedder or a test
#[derive(Debug, Default, Clone)]
pub struct MemoryClassSource {
    classes: IndexMap<String, ClassFileData>,
}
impl MemoryClassSource {
    #[must_use]
    pub fn new() -> MemoryClassSource {
        MemoryClassSource::default()
    }

    pub fn from_classes(classes: impl IntoIterator<Item = ClassFileData>) -> MemoryClassSource {
        let mut source = MemoryClassSource::new();
        for class in classes {
            source.insert(class);
        }
        source
    }

    /// Add a class, replacing any earlier one with the same name
    pub fn insert(&mut self, class: ClassFileData) -> Option<ClassFileData> {
        let previous = self.classes.insert(class.name.clone(), class);
        if let Some(previous) = &previous {
            tracing::warn!("replaced in-memory class {}", previous.name);
        }
        previous
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
impl ClassSource for MemoryClassSource {
    fn find_class(&self, name: &str) -> Result<ClassFileData, LoadClassFileError> {
        if name.is_empty() {
            return Err(LoadClassFileError::EmptyName);
        }

        self.classes
            .get(name)
            .cloned()
            .ok_or_else(|| LoadClassFileError::Nonexistent(name.to_owned()))
    }

    fn available_packages(&self) -> Packages {
        let mut packages = Packages::new();
        for name in self.classes.keys() {
            packages.add_for_class(name, None);
        }
        packages
    }
}

#[cfg(test)]
mod tests {
    use jade_base::{
        class::ClassFileData, loader::ClassSource, ClassAccessFlags, LoadClassFileError,
    };

    use super::MemoryClassSource;

    fn class(name: &str) -> ClassFileData {
        ClassFileData::new(name, ClassAccessFlags::PUBLIC, Some("java/lang/Object"))
    }

    #[test]
    fn test_memory_source() {
        let mut source = MemoryClassSource::from_classes([class("a/b/First"), class("Second")]);
        assert_eq!(source.len(), 2);
        assert_eq!(source.find_class("a/b/First").unwrap().name, "a/b/First");
        assert!(matches!(
            source.find_class("Third"),
            Err(LoadClassFileError::Nonexistent(name)) if name == "Third"
        ));
        assert!(matches!(source.find_class(""), Err(LoadClassFileError::EmptyName)));

        assert!(source.insert(class("Second")).is_some());
        assert_eq!(source.len(), 2);

        let packages = source.available_packages();
        assert_eq!(packages.names().collect::<Vec<_>>(), ["a/b"]);
    }
}
