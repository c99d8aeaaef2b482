//! Call-stack aggregation trie
//!
//! Merges observed stacks into a prefix tree keyed by frame *symbol*, so that
//! frames at different addresses with the same display name share a node.
//!
//! ```text
//! add [Main, Run, Read]      [root] 2
//! add [Main, Run, Write]       Main      node 2
//!                                Run     node 2
//!                                  Read  leaf 1
//!                                  Write leaf 1
//! ```
//!
//! # Performance
//!
//! - `add_stack()`: O(depth × siblings), children are a small `Vec`
//! - Memory: O(distinct stack shapes), never pruned

use crate::symbolization::{AddressStack, MethodStore, SymbolicFrame};

/// Width of the count column and of one indentation step
const PADDING: usize = 5;

// =============================================================================
// RENDERER
// =============================================================================

/// Output sink for [`MergedStacks::render`]
///
/// Only `write` is required; the other hooks let a renderer style counts,
/// method names and separators differently.
pub trait StackRenderer {
    fn write(&mut self, text: &str);

    fn write_count(&mut self, text: &str) {
        self.write(text);
    }

    fn write_method(&mut self, text: &str) {
        self.write(text);
    }

    /// Between sibling subtrees
    fn write_separator(&mut self, text: &str) {
        self.write(text);
    }

    /// Line break and indentation before each frame
    fn write_frame_separator(&mut self, text: &str) {
        self.write(text);
    }
}

/// Plain text renderer
#[derive(Debug, Default)]
pub struct TextRenderer {
    out: String,
}

impl TextRenderer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.out
    }
}

impl StackRenderer for TextRenderer {
    fn write(&mut self, text: &str) {
        self.out.push_str(text);
    }
}

// =============================================================================
// TRIE
// =============================================================================

/// One merged frame; the value returned by [`MergedStacks::new`] is the root
#[derive(Debug, Clone, Default)]
pub struct MergedStacks {
    address: u64,
    symbol: String,
    /// Stacks that continued past this frame
    count_as_node: u64,
    /// Stacks that ended at this frame
    count_as_leaf: u64,
    children: Vec<MergedStacks>,
}

impl MergedStacks {
    /// Empty trie (root sentinel)
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn frame(address: u64, symbol: String) -> Self {
        Self { address, symbol, ..Self::default() }
    }

    #[must_use]
    pub fn address(&self) -> u64 {
        self.address
    }

    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    #[must_use]
    pub fn count_as_node(&self) -> u64 {
        self.count_as_node
    }

    #[must_use]
    pub fn count_as_leaf(&self) -> u64 {
        self.count_as_leaf
    }

    /// Stacks that contain this frame
    #[must_use]
    pub fn total(&self) -> u64 {
        self.count_as_node + self.count_as_leaf
    }

    /// Children in insertion order
    #[must_use]
    pub fn children(&self) -> &[MergedStacks] {
        &self.children
    }

    #[must_use]
    pub fn child(&self, symbol: &str) -> Option<&MergedStacks> {
        self.children.iter().find(|c| c.symbol == symbol)
    }

    /// Number of stacks inserted (valid on the root)
    #[must_use]
    pub fn stack_count(&self) -> u64 {
        self.count_as_node
    }

    /// Insert one stack, outermost caller first. Empty stacks are ignored.
    pub fn add_stack(&mut self, frames: &[SymbolicFrame]) {
        if frames.is_empty() {
            return;
        }
        self.count_as_node += 1;

        let mut node = self;
        for (i, frame) in frames.iter().enumerate() {
            let symbol = frame.display_name();
            let existing = node.children.iter().position(|c| c.symbol == symbol);
            let index = match existing {
                Some(index) => index,
                None => {
                    node.children.push(Self::frame(frame.address, symbol));
                    node.children.len() - 1
                }
            };

            let child = &mut node.children[index];
            if i + 1 == frames.len() {
                child.count_as_leaf += 1;
            } else {
                child.count_as_node += 1;
            }
            node = child;
        }
    }

    /// Symbolize a runtime stack (innermost first) and insert it caller-first
    pub fn add_address_stack(&mut self, stack: &AddressStack, methods: &MethodStore) {
        let mut frames = stack.symbolize(methods);
        frames.reverse();
        self.add_stack(&frames);
    }

    /// Write a frequency-ordered dump of the tree
    ///
    /// Siblings are ordered by descending [`total`](Self::total), ties in
    /// insertion order. A new indentation level only opens where the tree
    /// actually branches.
    pub fn render(&self, renderer: &mut impl StackRenderer) {
        self.render_node(renderer, true, 0);
    }

    fn render_node(&self, renderer: &mut impl StackRenderer, is_root: bool, depth: usize) {
        let indent = " ".repeat(PADDING * depth);
        let count = if is_root { self.count_as_node } else { self.total() };

        renderer.write_frame_separator(&format!("\n{indent}"));
        renderer.write_count(&format!("{count:>width$} ", width = PADDING));
        if is_root {
            renderer.write_method("[root]");
        } else {
            renderer.write_method(&self.symbol);
        }

        match self.children.as_slice() {
            [] => {}
            [only] => only.render_node(renderer, false, depth),
            children => {
                let mut ordered: Vec<&MergedStacks> = children.iter().collect();
                ordered.sort_by(|a, b| b.total().cmp(&a.total()));
                for (i, child) in ordered.into_iter().enumerate() {
                    if i > 0 {
                        let gap = " ".repeat(PADDING);
                        renderer.write_separator(&format!("\n{indent}{gap}~~~~ "));
                    }
                    child.render_node(renderer, false, depth + 1);
                }
            }
        }
    }

    /// Render into a string with [`TextRenderer`]
    #[must_use]
    pub fn render_to_string(&self) -> String {
        let mut renderer = TextRenderer::new();
        self.render(&mut renderer);
        renderer.into_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(symbols: &[&str]) -> Vec<SymbolicFrame> {
        symbols.iter().enumerate().map(|(i, s)| SymbolicFrame::new(0x1000 + i as u64, *s)).collect()
    }

    #[test]
    fn test_shared_prefix_merges() {
        let mut trie = MergedStacks::new();
        trie.add_stack(&frames(&["A", "B", "C"]));
        trie.add_stack(&frames(&["A", "B", "D"]));

        assert_eq!(trie.stack_count(), 2);
        assert_eq!(trie.children().len(), 1);
        let a = trie.child("A").unwrap();
        assert_eq!(a.count_as_node(), 2);
        let b = a.child("B").unwrap();
        assert_eq!(b.count_as_node(), 2);
        assert_eq!(b.children().len(), 2);
        assert_eq!(b.child("C").unwrap().count_as_leaf(), 1);
        assert_eq!(b.child("D").unwrap().count_as_leaf(), 1);
        assert_eq!(b.child("C").unwrap().count_as_node(), 0);
    }

    #[test]
    fn test_merge_by_symbol_not_address() {
        let mut trie = MergedStacks::new();
        trie.add_stack(&[SymbolicFrame::new(0x10, "Recurse")]);
        trie.add_stack(&[SymbolicFrame::new(0x20, "Recurse")]);
        assert_eq!(trie.children().len(), 1);
        assert_eq!(trie.children()[0].count_as_leaf(), 2);
        assert_eq!(trie.children()[0].address(), 0x10);
    }

    #[test]
    fn test_unresolved_frames_use_address() {
        let mut trie = MergedStacks::new();
        trie.add_stack(&[SymbolicFrame::new(0xbeef, "")]);
        assert!(trie.child("0xbeef").is_some());
    }

    #[test]
    fn test_empty_stack_ignored() {
        let mut trie = MergedStacks::new();
        trie.add_stack(&[]);
        assert_eq!(trie.stack_count(), 0);
        assert!(trie.children().is_empty());
    }

    #[test]
    fn test_frame_that_is_both_leaf_and_node() {
        let mut trie = MergedStacks::new();
        trie.add_stack(&frames(&["A"]));
        trie.add_stack(&frames(&["A", "B"]));
        let a = trie.child("A").unwrap();
        assert_eq!(a.count_as_leaf(), 1);
        assert_eq!(a.count_as_node(), 1);
        assert_eq!(a.total(), 2);
    }

    #[test]
    fn test_add_address_stack_reverses_runtime_order() {
        let mut methods = MethodStore::new();
        methods.add_method(0x100, 0x10, "App", "Leaf", "void  ()");
        methods.add_method(0x200, 0x10, "App", "Main", "void  ()");
        let mut trie = MergedStacks::new();
        trie.add_address_stack(&AddressStack::new(vec![0x104, 0x204]), &methods);
        let main = trie.child("App.Main()").unwrap();
        assert!(main.child("App.Leaf()").is_some());
    }

    #[test]
    fn test_render_orders_by_frequency() {
        let mut trie = MergedStacks::new();
        trie.add_stack(&frames(&["Main", "Rare"]));
        trie.add_stack(&frames(&["Main", "Hot"]));
        trie.add_stack(&frames(&["Main", "Hot"]));

        let text = trie.render_to_string();
        let expected = "\n    3 [root]\n    3 Main\n         2 Hot\n     ~~~~ \n         1 Rare";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_render_ties_keep_insertion_order() {
        let mut trie = MergedStacks::new();
        trie.add_stack(&frames(&["First"]));
        trie.add_stack(&frames(&["Second"]));
        let text = trie.render_to_string();
        let first = text.find("First").unwrap();
        let second = text.find("Second").unwrap();
        assert!(first < second);
    }

    #[derive(Default)]
    struct Recording(Vec<(&'static str, String)>);

    impl StackRenderer for Recording {
        fn write(&mut self, text: &str) {
            self.0.push(("text", text.to_string()));
        }

        fn write_count(&mut self, text: &str) {
            self.0.push(("count", text.to_string()));
        }

        fn write_method(&mut self, text: &str) {
            self.0.push(("method", text.to_string()));
        }
    }

    #[test]
    fn test_renderer_hooks_receive_parts() {
        let mut trie = MergedStacks::new();
        trie.add_stack(&frames(&["Only"]));
        let mut recording = Recording::default();
        trie.render(&mut recording);
        let methods: Vec<&str> =
            recording.0.iter().filter(|(k, _)| *k == "method").map(|(_, v)| v.as_str()).collect();
        assert_eq!(methods, vec!["[root]", "Only"]);
        assert!(recording.0.iter().any(|(k, v)| *k == "count" && v.trim() == "1"));
    }
}
