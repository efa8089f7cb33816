//! Interned names for signals, memories, modules, and instances.

use lasso::Rodeo;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// An interned name: a `u32` key into a [`NameTable`].
///
/// Equality and hashing are O(1). An `Ident` is only meaningful together with
/// the table that produced it.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Ident(u32);

impl Ident {
    /// Creates an `Ident` from a raw `u32` index.
    pub fn from_raw(index: u32) -> Self {
        Self(index)
    }

    /// Returns the raw `u32` index of this identifier.
    pub fn as_raw(self) -> u32 {
        self.0
    }
}

// SAFETY: `Ident` wraps a `u32`; `try_from_usize` rejects values that don't fit.
unsafe impl lasso::Key for Ident {
    fn into_usize(self) -> usize {
        self.0 as usize
    }

    fn try_from_usize(int: usize) -> Option<Self> {
        u32::try_from(int).ok().map(Ident)
    }
}

/// String table owned by a design, backed by [`lasso::Rodeo`].
///
/// Keys are handed out densely in insertion order, so cloning or
/// deserializing a table re-interns the strings in order and every existing
/// [`Ident`] stays valid. Serializes as the ordered list of strings.
pub struct NameTable {
    rodeo: Rodeo<Ident>,
}

impl NameTable {
    /// Creates a new empty table.
    pub fn new() -> Self {
        Self {
            rodeo: Rodeo::new(),
        }
    }

    /// Interns a string, returning the existing key if it is already present.
    pub fn intern(&mut self, s: &str) -> Ident {
        self.rodeo.get_or_intern(s)
    }

    /// Looks up a string without interning it.
    pub fn get(&self, s: &str) -> Option<Ident> {
        self.rodeo.get(s)
    }

    /// Resolves a key, or returns `None` for a key from another table.
    pub fn try_resolve(&self, ident: Ident) -> Option<&str> {
        self.rodeo.try_resolve(&ident)
    }

    /// Resolves a key back to its string.
    ///
    /// Keys from another table resolve to `"<unknown>"`.
    pub fn resolve(&self, ident: Ident) -> &str {
        self.try_resolve(ident).unwrap_or("<unknown>")
    }

    /// Returns the number of interned strings.
    pub fn len(&self) -> usize {
        self.rodeo.len()
    }

    /// Returns `true` if nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.rodeo.is_empty()
    }

    /// Iterates over interned strings in key order.
    pub fn strings(&self) -> impl Iterator<Item = &str> {
        self.rodeo.strings()
    }

    fn from_strings<'a>(strings: impl IntoIterator<Item = &'a str>) -> Self {
        let mut table = Self::new();
        for s in strings {
            table.intern(s);
        }
        table
    }
}

impl Default for NameTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for NameTable {
    fn clone(&self) -> Self {
        Self::from_strings(self.strings())
    }
}

impl fmt::Debug for NameTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.strings()).finish()
    }
}

impl Serialize for NameTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.strings())
    }
}

impl<'de> Deserialize<'de> for NameTable {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let strings = Vec::<String>::deserialize(deserializer)?;
        Ok(Self::from_strings(strings.iter().map(String::as_str)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_resolve_roundtrip() {
        let mut names = NameTable::new();
        let id = names.intern("count");
        assert_eq!(names.resolve(id), "count");
    }

    #[test]
    fn same_string_same_ident() {
        let mut names = NameTable::new();
        let a = names.intern("clk");
        let b = names.intern("clk");
        assert_eq!(a, b);
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn get_does_not_intern() {
        let mut names = NameTable::new();
        assert!(names.get("missing").is_none());
        let id = names.intern("present");
        assert_eq!(names.get("present"), Some(id));
        assert_eq!(names.len(), 1);
    }

    #[test]
    fn foreign_ident_resolves_to_placeholder() {
        let names = NameTable::new();
        assert_eq!(names.resolve(Ident::from_raw(9)), "<unknown>");
    }

    #[test]
    fn clone_preserves_keys() {
        let mut names = NameTable::new();
        let a = names.intern("a");
        let b = names.intern("u1.b");
        let copy = names.clone();
        assert_eq!(copy.resolve(a), "a");
        assert_eq!(copy.resolve(b), "u1.b");
        assert_eq!(copy.get("u1.b"), Some(b));
    }

    #[test]
    fn serde_roundtrip_preserves_keys() {
        let mut names = NameTable::new();
        let x = names.intern("x");
        let y = names.intern("y");
        let json = serde_json::to_string(&names).unwrap();
        assert_eq!(json, r#"["x","y"]"#);
        let back: NameTable = serde_json::from_str(&json).unwrap();
        assert_eq!(back.resolve(x), "x");
        assert_eq!(back.resolve(y), "y");
    }

    #[test]
    fn ident_serde_roundtrip() {
        let id = Ident(42);
        let json = serde_json::to_string(&id).unwrap();
        let back: Ident = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
