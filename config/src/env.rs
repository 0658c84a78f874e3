//! Reading configuration overrides from the environment.

use std::{
    borrow::Cow,
    cell::RefCell,
    collections::{HashMap, HashSet},
    ops::Sub,
};

/// Source of environment variables.
///
/// Production code reads the process environment through [`std_env`],
/// tests use [`TestEnv`].
pub trait ReadEnv {
    /// Get the value of `key`, if set
    fn read_env(&self, key: &str) -> Option<Cow<'_, str>>;
}

impl<F> ReadEnv for F
where
    F: Fn(&str) -> Option<Cow<'static, str>>,
{
    fn read_env(&self, key: &str) -> Option<Cow<'_, str>> {
        self(key)
    }
}

/// Read a variable from the process environment.
pub fn std_env(key: &str) -> Option<Cow<'static, str>> {
    match std::env::var(key) {
        Ok(value) => Some(Cow::from(value)),
        Err(std::env::VarError::NotPresent) => None,
        Err(_) => {
            tracing::error!(
                "Found non-unicode characters in env var `{}`, ignoring",
                key
            );
            None
        }
    }
}

/// An implementation of [`ReadEnv`] for testing convenience.
#[derive(Default)]
pub struct TestEnv {
    map: HashMap<String, String>,
    visited: RefCell<HashSet<String>>,
}

impl TestEnv {
    /// Create new empty environment
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key-value pair
    #[must_use]
    pub fn set(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.map
            .insert(key.as_ref().to_string(), value.as_ref().to_string());
        self
    }

    /// Get a set of keys not visited yet by [`ReadEnv::read_env`]
    pub fn unvisited(&self) -> HashSet<String> {
        let all_keys: HashSet<_> = self.map.keys().map(ToOwned::to_owned).collect();
        let visited: HashSet<_> = self.visited.borrow().clone();
        all_keys.sub(&visited)
    }
}

impl ReadEnv for TestEnv {
    fn read_env(&self, key: &str) -> Option<Cow<'_, str>> {
        self.visited.borrow_mut().insert(key.to_string());
        self.map.get(key).map(Cow::from)
    }
}
