//! Depth-first traversal over the game-object forest
//!
//! Explicit-stack pre-order walk with early-exit control: visitors can
//! prune a subtree, abandon the current root, or halt the whole walk.

use std::sync::Arc;

use crate::entity::GameObject;

/// Visitor verdict for one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Visit this node's children next.
    Descend,
    /// Skip this node's children, keep walking the rest of the tree.
    Prune,
    /// Abandon the current root's subtree, move to the next root.
    Break,
    /// Abort the entire walk across all roots.
    Halt,
}

/// Pre-order depth-first walk over each root in `roots`.
///
/// Children are pushed in reverse sibling order so they pop left-to-right.
/// The visitor receives each node with its depth (roots are depth 0).
pub fn walk_forest<F>(roots: &[Arc<GameObject>], mut visit: F)
where
    F: FnMut(&Arc<GameObject>, usize) -> Step,
{
    'roots: for root in roots {
        let mut stack: Vec<(Arc<GameObject>, usize)> = vec![(root.clone(), 0)];
        while let Some((node, depth)) = stack.pop() {
            match visit(&node, depth) {
                Step::Descend => {
                    for child in node.children().into_iter().rev() {
                        stack.push((child, depth + 1));
                    }
                }
                Step::Prune => {}
                Step::Break => continue 'roots,
                Step::Halt => return,
            }
        }
    }
}
