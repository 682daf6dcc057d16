use std::fmt;

use crate::{class::ClassFileData, package::Packages};

#[derive(Debug)]
#[non_exhaustive]
pub enum LoadClassFileError {
    /// The class name given was empty
    EmptyName,
    /// No class with that name exists in the source
    Nonexistent(String),
    /// The class existed but was malformed
    Malformed { name: String, reason: String },
    /// The source said it had the class but gave back one with a different name
    WrongName { expected: String, found: String },
    /// Some error from the implementer that is not otherwise representable
    OpaqueError(Box<dyn std::error::Error + Send + Sync>),
}
impl LoadClassFileError {
    /// Whether this is just the class not being found, which lets a chain of sources try the
    /// next one.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, LoadClassFileError::Nonexistent(_))
    }
}
impl fmt::Display for LoadClassFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadClassFileError::EmptyName => f.write_str("empty class name"),
            LoadClassFileError::Nonexistent(name) => write!(f, "class not found: {}", name),
            LoadClassFileError::Malformed { name, reason } => {
                write!(f, "malformed class {}: {}", name, reason)
            }
            LoadClassFileError::WrongName { expected, found } => {
                write!(f, "expected class {} but found {}", expected, found)
            }
            LoadClassFileError::OpaqueError(err) => write!(f, "{}", err),
        }
    }
}
impl std::error::Error for LoadClassFileError {}

/// Somewhere that class data can be found.
/// This does no memoization, the runtime's class loader does that.
pub trait ClassSource {
    /// Get the data for a class by its name, `java/lang/Object`
    fn find_class(&self, name: &str) -> Result<ClassFileData, LoadClassFileError>;

    /// The packages that this source can provide classes from
    fn available_packages(&self) -> Packages;

    /// Where a package is loaded from, if the source knows
    fn package_location(&self, name: &str) -> Option<String> {
        self.available_packages().location(name).map(str::to_owned)
    }
}
impl<T: ClassSource + ?Sized> ClassSource for &T {
    fn find_class(&self, name: &str) -> Result<ClassFileData, LoadClassFileError> {
        (**self).find_class(name)
    }

    fn available_packages(&self) -> Packages {
        (**self).available_packages()
    }

    fn package_location(&self, name: &str) -> Option<String> {
        (**self).package_location(name)
    }
}
impl<T: ClassSource + ?Sized> ClassSource for Box<T> {
    fn find_class(&self, name: &str) -> Result<ClassFileData, LoadClassFileError> {
        (**self).find_class(name)
    }

    fn available_packages(&self) -> Packages {
        (**self).available_packages()
    }

    fn package_location(&self, name: &str) -> Option<String> {
        (**self).package_location(name)
    }
}
