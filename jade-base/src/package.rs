use indexmap::IndexMap;

/// The packages known to a class source, and where each was found
#[derive(Debug, Clone, Default)]
pub struct Packages {
    /// `java/lang` -> location it was loaded from, if there is one
    packages: IndexMap<String, Option<String>>,
}
impl Packages {
    #[must_use]
    pub fn new() -> Packages {
        Packages::default()
    }

    /// Register the package if it is not already known.
    /// An already known package keeps its first location.
    pub fn add(&mut self, name: &str, location: Option<&str>) {
        if !self.packages.contains_key(name) {
            self.packages
                .insert(name.to_owned(), location.map(str::to_owned));
        }
    }

    /// Register the package containing a class
    pub fn add_for_class(&mut self, class_name: &str, location: Option<&str>) {
        if let Some(package) = crate::util::access_path_initial_part(class_name) {
            self.add(package, location);
        }
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    #[must_use]
    pub fn location(&self, name: &str) -> Option<&str> {
        self.packages.get(name).and_then(Option::as_deref)
    }

    /// Package names in the order they were registered
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    pub fn extend(&mut self, other: &Packages) {
        for (name, location) in &other.packages {
            self.add(name, location.as_deref());
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}
