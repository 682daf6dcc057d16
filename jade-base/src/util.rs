/// Note: This will work fine for path to a class as well
#[must_use]
pub fn access_path_iter(package: &str) -> impl DoubleEndedIterator<Item = &str> + Clone {
    package.split('/')
}

/// Return with only the initial parts
/// `java/lang/Object` -> `java/lang`
#[must_use]
pub fn access_path_initial_part(path: &str) -> Option<&str> {
    // If there is no slash then this is likely a lone class name
    // and so there is no package
    path.rfind('/').map(|last| &path[..last])
}

// We wrap this because the alternative hasher is not generic
// and Rust doesn't allow unused generics.
// But this allows us to have that.
pub trait HashWrapperTrait<T> {
    type HashMapHasher: Default + std::hash::BuildHasher;
}
pub struct HashWrapper;
#[cfg(feature = "implementation-cheaper-map-hashing")]
impl<T: nohash_hasher::IsEnabled> HashWrapperTrait<T> for HashWrapper {
    type HashMapHasher = nohash_hasher::BuildNoHashHasher<T>;
}
#[cfg(not(feature = "implementation-cheaper-map-hashing"))]
impl<T> HashWrapperTrait<T> for HashWrapper {
    type HashMapHasher = std::collections::hash_map::RandomState;
}

#[cfg(test)]
mod tests {
    use super::{access_path_initial_part, access_path_iter};

    #[test]
    fn test_access_paths() {
        assert_eq!(access_path_initial_part("java/lang/Object"), Some("java/lang"));
        assert_eq!(access_path_initial_part("Main"), None);
        assert_eq!(
            access_path_iter("java/lang/Object").collect::<Vec<_>>(),
            ["java", "lang", "Object"]
        );
    }
}
