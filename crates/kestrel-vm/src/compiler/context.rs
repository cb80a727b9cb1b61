//! Compilation contexts for loops and protected regions.

use kestrel_ast::Node;

/// Loop context for break/continue resolution.
#[derive(Debug)]
pub(crate) struct LoopContext {
    pub(crate) break_label: u32,
    pub(crate) continue_label: u32,
    /// Depth of the try-context stack at loop entry; break/continue inline
    /// the finally blocks of every context deeper than this.
    pub(crate) try_depth: usize,
}

/// Active `try` statement. Normal-path exits crossing it (fallthrough,
/// return, break, continue) inline its finally body.
pub(crate) struct TryContext {
    pub(crate) finally: Option<Vec<Node>>,
}
