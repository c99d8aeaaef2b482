use super::MethodStore;

/// Raw call stack as captured by the runtime, innermost frame first
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct AddressStack {
    frames: Vec<u64>,
}

impl AddressStack {
    #[must_use]
    pub fn new(frames: Vec<u64>) -> Self {
        Self { frames }
    }

    /// Innermost frame first
    #[must_use]
    pub fn frames(&self) -> &[u64] {
        &self.frames
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Resolve every frame, innermost first
    #[must_use]
    pub fn symbolize(&self, methods: &MethodStore) -> Vec<SymbolicFrame> {
        self.frames
            .iter()
            .map(|&address| SymbolicFrame { address, symbol: methods.resolve(address).to_string() })
            .collect()
    }
}

impl From<Vec<u64>> for AddressStack {
    fn from(frames: Vec<u64>) -> Self {
        Self::new(frames)
    }
}

/// A resolved frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolicFrame {
    pub address: u64,
    pub symbol: String,
}

impl SymbolicFrame {
    #[must_use]
    pub fn new(address: u64, symbol: impl Into<String>) -> Self {
        Self { address, symbol: symbol.into() }
    }

    /// Symbol, or the hex address when resolution produced nothing
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.symbol.is_empty() {
            format!("0x{:x}", self.address)
        } else {
            self.symbol.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbolize_keeps_order() {
        let mut methods = MethodStore::new();
        methods.add_method(0x100, 0x10, "A", "Inner", "void  ()");
        methods.add_method(0x200, 0x10, "A", "Outer", "void  ()");
        let stack = AddressStack::new(vec![0x104, 0x208, 0x999]);
        let names: Vec<String> = stack.symbolize(&methods).into_iter().map(|f| f.symbol).collect();
        assert_eq!(names, vec!["A.Inner()", "A.Outer()", "0x999"]);
    }

    #[test]
    fn test_empty_symbol_renders_address() {
        assert_eq!(SymbolicFrame::new(0xabc, "").display_name(), "0xabc");
        assert_eq!(SymbolicFrame::new(0xabc, "Main").display_name(), "Main");
    }
}
