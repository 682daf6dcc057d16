use jade_base::{
    class::ClassFileData, loader::ClassSource, package::Packages, LoadClassFileError,
};

/// A source that checks each of its sources in order for the class.
/// It tries to be a bit smart about which error it returns if none of them have it: a source
/// failing in some way other than not having the class is more interesting than the
/// class being absent.
#[derive(Default)]
pub struct MultiClassSource {
    sources: Vec<Box<dyn ClassSource + Send + Sync>>,
}
impl MultiClassSource {
    #[must_use]
    pub fn new() -> MultiClassSource {
        MultiClassSource::default()
    }

    /// Add a source, checked after all the ones added before it
    #[must_use]
    pub fn with_source(mut self, source: impl ClassSource + Send + Sync + 'static) -> MultiClassSource {
        self.push(source);
        self
    }

    pub fn push(&mut self, source: impl ClassSource + Send + Sync + 'static) {
        self.sources.push(Box::new(source));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}
impl ClassSource for MultiClassSource {
    fn find_class(&self, name: &str) -> Result<ClassFileData, LoadClassFileError> {
        let mut not_found = None;
        for source in &self.sources {
            match source.find_class(name) {
                Ok(data) => return Ok(data),
                // We don't ignore these errors, they're indicative of a notable problem
                // with that source
                Err(err) if !err.is_not_found() => return Err(err),
                Err(err) => {
                    not_found.get_or_insert(err);
                }
            }
        }

        Err(not_found.unwrap_or_else(|| LoadClassFileError::Nonexistent(name.to_owned())))
    }

    fn available_packages(&self) -> Packages {
        let mut packages = Packages::new();
        for source in &self.sources {
            packages.extend(&source.available_packages());
        }
        packages
    }

    fn package_location(&self, name: &str) -> Option<String> {
        self.sources
            .iter()
            .find_map(|source| source.package_location(name))
    }
}

#[cfg(test)]
mod tests {
    use jade_base::{
        class::ClassFileData, loader::ClassSource, package::Packages, ClassAccessFlags,
        LoadClassFileError,
    };

    use crate::MemoryClassSource;

    use super::MultiClassSource;

    struct BrokenSource;
    impl ClassSource for BrokenSource {
        fn find_class(&self, name: &str) -> Result<ClassFileData, LoadClassFileError> {
            Err(LoadClassFileError::Malformed {
                name: name.to_owned(),
                reason: "truncated".to_owned(),
            })
        }

        fn available_packages(&self) -> Packages {
            let mut packages = Packages::new();
            packages.add("broken", Some("somewhere"));
            packages
        }
    }

    fn class(name: &str, flags: ClassAccessFlags) -> ClassFileData {
        ClassFileData::new(name, flags, Some("java/lang/Object"))
    }

    #[test]
    fn test_first_source_wins() {
        let first = MemoryClassSource::from_classes([class("p/A", ClassAccessFlags::PUBLIC)]);
        let second = MemoryClassSource::from_classes([
            class("p/A", ClassAccessFlags::PUBLIC | ClassAccessFlags::FINAL),
            class("q/B", ClassAccessFlags::PUBLIC),
        ]);
        let source = MultiClassSource::new().with_source(first).with_source(second);

        assert_eq!(source.find_class("p/A").unwrap().access_flags, ClassAccessFlags::PUBLIC);
        assert_eq!(source.find_class("q/B").unwrap().name, "q/B");
        assert!(source.find_class("r/C").unwrap_err().is_not_found());
        assert_eq!(
            source.available_packages().names().collect::<Vec<_>>(),
            ["p", "q"]
        );
    }

    #[test]
    fn test_errors_stop_search() {
        let memory = MemoryClassSource::from_classes([class("p/A", ClassAccessFlags::PUBLIC)]);
        let source = MultiClassSource::new().with_source(BrokenSource).with_source(memory);

        assert!(matches!(
            source.find_class("p/A"),
            Err(LoadClassFileError::Malformed { .. })
        ));
        assert_eq!(source.package_location("broken").as_deref(), Some("somewhere"));
        assert_eq!(source.package_location("p"), None);
    }
}
