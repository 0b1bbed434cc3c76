//! The type registry the codec consults when decoding typed records.
//!
//! The registry is populated once at startup and read-only afterwards;
//! share it behind an `Arc` and concurrent readers need no locking.

use std::collections::HashMap;

use crate::error::{CodecError, Result};
use crate::value::TypedRecord;

/// Declaration of one record type: its tag and its closed field set.
#[derive(Debug, Clone)]
pub struct TypeSpec {
    pub type_tag: String,
    pub fields: Vec<String>,
}

impl TypeSpec {
    pub fn new(
        type_tag: impl Into<String>,
        fields: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        TypeSpec {
            type_tag: type_tag.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn declares(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }
}

/// Maps a type tag to its record declaration.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    specs: HashMap<String, TypeSpec>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        TypeRegistry::default()
    }

    /// Register a record type. Later registrations for the same tag win.
    pub fn register(&mut self, spec: TypeSpec) {
        self.specs.insert(spec.type_tag.clone(), spec);
    }

    pub fn spec(&self, type_tag: &str) -> Option<&TypeSpec> {
        self.specs.get(type_tag)
    }

    pub fn is_registered(&self, type_tag: &str) -> bool {
        self.specs.contains_key(type_tag)
    }

    /// Construct an empty record for a registered tag.
    pub fn construct(&self, type_tag: &str) -> Result<TypedRecord> {
        if !self.is_registered(type_tag) {
            return Err(CodecError::UnknownTypeTag(type_tag.to_owned()));
        }
        Ok(TypedRecord::new(type_tag))
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construct_requires_registration() {
        let mut reg = TypeRegistry::new();
        reg.register(TypeSpec::new("Resource", ["name", "lcstate"]));

        assert!(reg.construct("Resource").is_ok());
        let err = reg.construct("Bogus").unwrap_err();
        assert!(matches!(err, CodecError::UnknownTypeTag(t) if t == "Bogus"));
    }

    #[test]
    fn later_registration_wins() {
        let mut reg = TypeRegistry::new();
        reg.register(TypeSpec::new("Resource", ["a"]));
        reg.register(TypeSpec::new("Resource", ["a", "b"]));
        assert_eq!(reg.spec("Resource").unwrap().fields.len(), 2);
        assert_eq!(reg.len(), 1);
    }
}
