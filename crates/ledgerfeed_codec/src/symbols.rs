//! Symbol tables.

use crate::error::{CodecError, CodecResult};
use std::collections::HashMap;

/// Text of the system symbols, in symbol-ID order starting at 1.
pub const SYSTEM_SYMBOLS: [&str; 9] = [
    "$ion",
    "$ion_1_0",
    "$ion_symbol_table",
    "name",
    "version",
    "imports",
    "symbols",
    "max_id",
    "$ion_shared_symbol_table",
];

/// Symbol ID of `$ion_symbol_table`.
pub const SID_ION_SYMBOL_TABLE: u64 = 3;
/// Symbol ID of `imports`.
pub const SID_IMPORTS: u64 = 6;
/// Symbol ID of `symbols`.
pub const SID_SYMBOLS: u64 = 7;

/// The active mapping between symbol IDs and symbol text.
///
/// Slot 0 is the reserved symbol with no text. Local symbols declared with
/// non-string entries occupy an ID but have no text either.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    symbols: Vec<Option<String>>,
    index: HashMap<String, u64>,
}

impl SymbolTable {
    /// Creates a table containing only the system symbols.
    pub fn system() -> Self {
        let mut table = Self {
            symbols: vec![None],
            index: HashMap::new(),
        };
        for text in SYSTEM_SYMBOLS {
            table.push(Some(text.to_string()));
        }
        table
    }

    /// Returns the highest assigned symbol ID.
    pub fn max_id(&self) -> u64 {
        self.symbols.len() as u64 - 1
    }

    /// Resolves a symbol ID to its text.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownSymbol`] for IDs beyond the table or
    /// slots without text.
    pub fn resolve(&self, sid: u64) -> CodecResult<&str> {
        usize::try_from(sid)
            .ok()
            .and_then(|i| self.symbols.get(i))
            .and_then(|slot| slot.as_deref())
            .ok_or(CodecError::UnknownSymbol { sid })
    }

    /// Looks up the lowest ID assigned to the given text.
    pub fn lookup(&self, text: &str) -> Option<u64> {
        self.index.get(text).copied()
    }

    /// Returns the ID for the text, appending a new symbol if needed.
    pub fn intern(&mut self, text: &str) -> u64 {
        match self.lookup(text) {
            Some(sid) => sid,
            None => self.push(Some(text.to_string())),
        }
    }

    /// Appends declared symbols (as found in a local symbol table).
    pub fn extend(&mut self, declared: impl IntoIterator<Item = Option<String>>) {
        for symbol in declared {
            self.push(symbol);
        }
    }

    /// Returns true if the ID is a system symbol.
    pub fn is_system(sid: u64) -> bool {
        (1..=SYSTEM_SYMBOLS.len() as u64).contains(&sid)
    }

    fn push(&mut self, symbol: Option<String>) -> u64 {
        let sid = self.symbols.len() as u64;
        if let Some(text) = &symbol {
            self.index.entry(text.clone()).or_insert(sid);
        }
        self.symbols.push(symbol);
        sid
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::system()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_symbols_resolve() {
        let table = SymbolTable::system();
        assert_eq!(table.max_id(), 9);
        assert_eq!(table.resolve(3).unwrap(), "$ion_symbol_table");
        assert_eq!(table.resolve(7).unwrap(), "symbols");
        assert_eq!(table.lookup("imports"), Some(SID_IMPORTS));
    }

    #[test]
    fn symbol_zero_has_no_text() {
        let table = SymbolTable::system();
        assert!(matches!(
            table.resolve(0),
            Err(CodecError::UnknownSymbol { sid: 0 })
        ));
        assert!(table.resolve(10).is_err());
    }

    #[test]
    fn local_symbols_extend_ids() {
        let mut table = SymbolTable::system();
        table.extend([Some("recordType".to_string()), None, Some("payload".into())]);

        assert_eq!(table.resolve(10).unwrap(), "recordType");
        assert!(table.resolve(11).is_err());
        assert_eq!(table.resolve(12).unwrap(), "payload");
    }

    #[test]
    fn intern_reuses_existing_ids() {
        let mut table = SymbolTable::system();
        let a = table.intern("alpha");
        let b = table.intern("alpha");
        assert_eq!(a, b);
        assert_eq!(table.intern("name"), 4);
        assert!(SymbolTable::is_system(4));
        assert!(!SymbolTable::is_system(a));
    }
}
