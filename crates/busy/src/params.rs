//! The process-wide parameter table.
//!
//! Keys are dotted qualified names rooted at the top-level module
//! (`sub.sub.param`). Values arrive stringly typed and are re-lexed against
//! the declared type when the corresponding `param` declaration is
//! evaluated. Entries seeded by a submodule instantiation skip the
//! visibility check; entries supplied from outside require a fully public
//! owner chain. Consumed entries are removed; whatever is left after the
//! top-level parse is an error.

use ahash::AHashMap;

#[derive(Debug, Clone)]
pub struct ParamEntry {
    pub value: String,
    /// Set by a `submod m (p = …)` binding rather than from outside.
    pub seeded: bool,
}

#[derive(Debug, Default)]
pub struct ParamTable {
    entries: AHashMap<String, ParamEntry>,
}

impl ParamTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a value supplied from outside (command line or API).
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), ParamEntry { value: value.into(), seeded: false });
    }

    /// Installs a submodule-binding value unless an outer value already
    /// shadows it; returns `true` when shadowed.
    pub fn seed(&mut self, key: &str, value: impl Into<String>) -> bool {
        if self.entries.contains_key(key) {
            return true;
        }
        self.entries.insert(key.to_string(), ParamEntry { value: value.into(), seeded: true });
        false
    }

    /// Removes and returns the entry for a `param` declaration.
    pub fn take(&mut self, key: &str) -> Option<ParamEntry> {
        self.entries.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remaining keys, for the unused-parameter diagnostic.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outer_value_shadows_seed() {
        let mut table = ParamTable::new();
        table.set("sub.p", "1");
        assert!(table.seed("sub.p", "2"));
        assert_eq!(table.take("sub.p").unwrap().value, "1");
        assert!(table.is_empty());
    }

    #[test]
    fn seeded_entries_are_marked() {
        let mut table = ParamTable::new();
        assert!(!table.seed("sub.q", "true"));
        let entry = table.take("sub.q").unwrap();
        assert!(entry.seeded);
        assert_eq!(entry.value, "true");
    }
}
