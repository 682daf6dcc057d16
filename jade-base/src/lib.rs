#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::similar_names)]
// This would be nice to re-enable eventually, but not while in active dev
#![allow(clippy::missing_errors_doc)]
// Shadowing is nice.
#![allow(clippy::shadow_unrelated)]
// Not awful, but it highlights entire function.
#![allow(clippy::unnecessary_wraps)]
// Cool idea but highlights entire function and is too aggressive.
#![allow(clippy::option_if_let_else)]
#![allow(clippy::missing_panics_doc)]
// This is nice to have for cases where we might want to rely on it not returning anything.
#![allow(clippy::semicolon_if_nothing_returned)]
#![allow(clippy::unused_self)]
#![allow(clippy::enum_variant_names)]
#![allow(clippy::too_many_lines)]

pub mod class;
pub mod code;
pub mod constant_pool;
pub mod descriptor;
pub mod id;
pub mod loader;
pub mod package;
pub mod util;

pub use class::{
    ClassAccessFlags, ClassFileData, FieldAccessFlags, FieldInfo, MethodAccessFlags, MethodInfo,
};
pub use loader::{ClassSource, LoadClassFileError};

/// Name of the class every other class descends from
pub const OBJECT_CLASS_NAME: &str = "java/lang/Object";
