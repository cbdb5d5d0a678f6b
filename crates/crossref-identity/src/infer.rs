//! Semantic type inference for nodes that arrive without a type tag.

use crossref_types::{RawNode, SemanticType};

/// Picks a type for an untyped node. `has_children` tells whether any other
/// node in the payload names this one as its parent.
pub type TypeInference = fn(node: &RawNode, has_children: bool) -> SemanticType;

const TASK_MARKERS: &[&str] = &["todo ", "todo:", "[ ]", "[x]"];

/// Default inference:
/// - a title ending in `?` is a question
/// - a checkbox or `TODO` prefix marks a task
/// - a bare URL title is a reference
/// - any other node with children is a phase, leaves are notes
pub fn infer_semantic_type(node: &RawNode, has_children: bool) -> SemanticType {
    let title = node.title.trim();
    let lower = title.to_lowercase();

    if title.ends_with('?') {
        SemanticType::Question
    } else if TASK_MARKERS.iter().any(|m| lower.starts_with(m)) {
        SemanticType::Task
    } else if lower.starts_with("http://") || lower.starts_with("https://") {
        SemanticType::Reference
    } else if has_children {
        SemanticType::Phase
    } else {
        SemanticType::Note
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inference_rules() {
        let infer = |title: &str, children| infer_semantic_type(&RawNode::new(title), children);
        assert_eq!(infer("Why does it fail?", false), SemanticType::Question);
        assert_eq!(infer("TODO: write tests", false), SemanticType::Task);
        assert_eq!(infer("[ ] buy milk", true), SemanticType::Task);
        assert_eq!(infer("https://example.org", false), SemanticType::Reference);
        assert_eq!(infer("Phase 1", true), SemanticType::Phase);
        assert_eq!(infer("Todoist export", false), SemanticType::Note);
    }
}
