//! The runtime's class loader: memoizes linked classes per name on top of a class source.

use std::{collections::HashMap, sync::Arc};

use jade_base::{package::Packages, ClassFileData, ClassSource, LoadClassFileError};
use parking_lot::{Condvar, Mutex};

use crate::{
    class::Class,
    link::{self, LinkError},
};

/// Loads classes by name. Implementations must give back the same `Class` for every request of
/// a name, and must only load it once even when asked from several threads at the same time.
pub trait ClassLoader: Send + Sync {
    /// Get the class, loading and linking it if needed
    fn load_class(&self, name: &str) -> Result<Arc<Class>, LinkError>;

    /// Get the class only if it has already been loaded
    fn loaded_class(&self, name: &str) -> Option<Arc<Class>>;

    fn available_packages(&self) -> Packages;

    fn package_location(&self, name: &str) -> Option<String>;

    /// Link a class from metadata given directly, rather than found through the source
    fn define_class(&self, data: ClassFileData) -> Result<Arc<Class>, LinkError>;
}

#[derive(Debug)]
enum LoadState {
    /// Some host thread is loading it right now
    Loading(std::thread::ThreadId),
    Loaded(Arc<Class>),
    /// Failures are remembered so that every later request sees the same error
    Failed(LinkError),
}

#[derive(Debug, Default)]
struct LoaderTable {
    classes: HashMap<String, LoadState>,
    /// What each blocked thread is waiting on
    waiting: HashMap<std::thread::ThreadId, String>,
}
impl LoaderTable {
    /// Whether `me` waiting on a load by `owner` would complete a cycle of threads waiting on
    /// each other
    fn would_deadlock(&self, me: std::thread::ThreadId, owner: std::thread::ThreadId) -> bool {
        let mut current = owner;
        // Each step follows a distinct waiting thread, so the chain is at most this long
        for _ in 0..=self.waiting.len() {
            if current == me {
                return true;
            }

            let next = self
                .waiting
                .get(&current)
                .and_then(|name| self.classes.get(name));
            match next {
                Some(LoadState::Loading(next)) => current = *next,
                _ => return false,
            }
        }
        false
    }
}

fn source_error(name: &str, err: LoadClassFileError) -> LinkError {
    match err {
        LoadClassFileError::Nonexistent(_) | LoadClassFileError::EmptyName => {
            LinkError::NotFound(name.to_owned())
        }
        LoadClassFileError::Malformed { reason, .. } => LinkError::ClassFormat {
            class: name.to_owned(),
            reason,
        },
        LoadClassFileError::WrongName { expected, found } => LinkError::ClassFormat {
            class: name.to_owned(),
            reason: format!("expected class {} but found {}", expected, found),
        },
        err => LinkError::Source {
            class: name.to_owned(),
            message: err.to_string(),
        },
    }
}

/// A [`ClassLoader`] over a [`ClassSource`].
/// Names starting with `[` are array classes, built from their component.
pub struct SyncedClassLoader<S> {
    source: S,
    table: Mutex<LoaderTable>,
    /// Signalled whenever a load finishes
    changed: Condvar,
}
impl<S: ClassSource + Send + Sync> SyncedClassLoader<S> {
    pub fn new(source: S) -> SyncedClassLoader<S> {
        SyncedClassLoader {
            source,
            table: Mutex::new(LoaderTable::default()),
            changed: Condvar::new(),
        }
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Claim the name for loading by this thread.
    /// Returns the finished result instead if there is one, waiting for another thread's load
    /// if it is in progress.
    fn claim(&self, name: &str) -> Option<Result<Arc<Class>, LinkError>> {
        let me = std::thread::current().id();
        let mut table = self.table.lock();
        loop {
            match table.classes.get(name) {
                Some(LoadState::Loaded(class)) => return Some(Ok(Arc::clone(class))),
                Some(LoadState::Failed(err)) => return Some(Err(err.clone())),
                Some(LoadState::Loading(owner)) => {
                    let owner = *owner;
                    if table.would_deadlock(me, owner) {
                        return Some(Err(LinkError::ClassCircularity(name.to_owned())));
                    }

                    table.waiting.insert(me, name.to_owned());
                    self.changed.wait(&mut table);
                    table.waiting.remove(&me);
                }
                None => break,
            }
        }

        table
            .classes
            .insert(name.to_owned(), LoadState::Loading(me));
        None
    }

    fn finish(&self, name: &str, result: &Result<Arc<Class>, LinkError>) {
        let state = match result {
            Ok(class) => LoadState::Loaded(Arc::clone(class)),
            Err(err) => LoadState::Failed(err.clone()),
        };

        let mut table = self.table.lock();
        table.classes.insert(name.to_owned(), state);
        self.changed.notify_all();
    }

    fn build(&self, name: &str) -> Result<Arc<Class>, LinkError> {
        if name.starts_with('[') {
            return link::link_array_class(name, self).map(Arc::new);
        }

        let data = self
            .source
            .find_class(name)
            .map_err(|err| source_error(name, err))?;
        if data.name != name {
            return Err(source_error(
                name,
                LoadClassFileError::WrongName {
                    expected: name.to_owned(),
                    found: data.name,
                },
            ));
        }

        link::link_class(data, self).map(Arc::new)
    }
}
impl<S: ClassSource + Send + Sync> ClassLoader for SyncedClassLoader<S> {
    fn load_class(&self, name: &str) -> Result<Arc<Class>, LinkError> {
        if let Some(done) = self.claim(name) {
            return done;
        }

        let result = self.build(name);
        if let Err(err) = &result {
            tracing::debug!("failed to load {}: {}", name, err);
        }
        self.finish(name, &result);
        result
    }

    fn loaded_class(&self, name: &str) -> Option<Arc<Class>> {
        match self.table.lock().classes.get(name) {
            Some(LoadState::Loaded(class)) => Some(Arc::clone(class)),
            _ => None,
        }
    }

    fn available_packages(&self) -> Packages {
        self.source.available_packages()
    }

    fn package_location(&self, name: &str) -> Option<String> {
        self.source.package_location(name)
    }

    fn define_class(&self, data: ClassFileData) -> Result<Arc<Class>, LinkError> {
        let name = data.name.clone();
        {
            let mut table = self.table.lock();
            match table.classes.get(&name) {
                None | Some(LoadState::Failed(LinkError::NotFound(_))) => {}
                Some(_) => return Err(LinkError::DuplicateClass(name)),
            }
            table.classes.insert(
                name.clone(),
                LoadState::Loading(std::thread::current().id()),
            );
        }

        tracing::debug!("defining {}", name);
        let result = link::link_class(data, self).map(Arc::new);
        self.finish(&name, &result);
        result
    }
}
