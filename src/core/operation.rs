//! Global operation catalog
//!
//! Every operation an adapter can perform is registered exactly once under a
//! name of the form `<Trait>.<Operation>`. Operations compare by their
//! registered identity, so two distinct operations with the same name can
//! never exist.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use parking_lot::RwLock;

use crate::error::{HarnessError, Result};

/// A registered, immutable operation name
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Operation {
    id: u32,
    name: &'static str,
}

#[derive(Default)]
struct Catalog {
    by_name: HashMap<&'static str, Operation>,
}

impl Catalog {
    fn insert(&mut self, name: &'static str) -> Operation {
        let op = Operation {
            id: self.by_name.len() as u32,
            name,
        };
        self.by_name.insert(name, op);
        op
    }
}

static CATALOG: LazyLock<RwLock<Catalog>> = LazyLock::new(|| RwLock::new(Catalog::default()));

impl Operation {
    /// Register a new operation
    ///
    /// Fails if an operation with the same name is already registered.
    pub fn register(name: &str) -> Result<Operation> {
        let mut catalog = CATALOG.write();
        if catalog.by_name.contains_key(name) {
            return Err(HarnessError::DuplicateOperation(name.to_string()));
        }
        // Names live as long as the catalog, which is the whole process.
        let name: &'static str = Box::leak(name.to_string().into_boxed_str());
        Ok(catalog.insert(name))
    }

    /// Resolve a built-in operation, registering it on first use
    pub(crate) fn builtin(name: &'static str) -> Operation {
        if let Some(op) = CATALOG.read().by_name.get(name) {
            return *op;
        }
        let mut catalog = CATALOG.write();
        match catalog.by_name.get(name) {
            Some(op) => *op,
            None => catalog.insert(name),
        }
    }

    /// Look up a registered operation by name
    pub fn by_name(name: &str) -> Option<Operation> {
        CATALOG.read().by_name.get(name).copied()
    }

    /// The registered name
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Registration order of this operation within the process
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Operation({})", self.name)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let op = Operation::register("CatalogTest.Lookup").unwrap();
        assert_eq!(op.name(), "CatalogTest.Lookup");
        assert_eq!(Operation::by_name("CatalogTest.Lookup"), Some(op));
        assert_eq!(Operation::by_name("CatalogTest.Missing"), None);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        Operation::register("CatalogTest.Duplicate").unwrap();
        let result = Operation::register("CatalogTest.Duplicate");
        assert!(matches!(result, Err(HarnessError::DuplicateOperation(name)) if name == "CatalogTest.Duplicate"));
    }

    #[test]
    fn test_builtin_is_idempotent() {
        let a = Operation::builtin("CatalogTest.Builtin");
        let b = Operation::builtin("CatalogTest.Builtin");
        assert_eq!(a, b);
        assert_eq!(a.id(), b.id());
        // A builtin name is taken for user registration too
        assert!(Operation::register("CatalogTest.Builtin").is_err());
    }

    #[test]
    fn test_distinct_operations_differ() {
        let a = Operation::register("CatalogTest.A").unwrap();
        let b = Operation::register("CatalogTest.B").unwrap();
        assert_ne!(a, b);
        assert_ne!(a.id(), b.id());
    }
}
