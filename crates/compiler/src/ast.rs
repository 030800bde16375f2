//! Abstract syntax tree nodes and their factory operations.
//!
//! Nodes carry a token kind (or a synthetic kind such as `Glue`), up to three
//! children, and a value payload. A `Glue` node has no semantics beyond
//! sequencing its subtrees during emission.

use crate::errors::Position;
use crate::scan::TokenKind;
use crate::types::Number;

/// Value payload of an AST node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeValue {
    None,
    /// Integer literal with its width tag
    Number(Number),
    /// Identifier or function name
    Identifier(String),
}

/// Component of the abstract syntax tree built during parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ASTNode {
    pub kind: TokenKind,
    pub left: Option<Box<ASTNode>>,
    pub mid: Option<Box<ASTNode>>,
    pub right: Option<Box<ASTNode>>,
    pub value: NodeValue,
    pub position: Position,
}

impl ASTNode {
    pub fn new(
        kind: TokenKind,
        left: Option<ASTNode>,
        mid: Option<ASTNode>,
        right: Option<ASTNode>,
        value: NodeValue,
        position: Position,
    ) -> ASTNode {
        ASTNode {
            kind,
            left: left.map(Box::new),
            mid: mid.map(Box::new),
            right: right.map(Box::new),
            value,
            position,
        }
    }

    /// A terminal node with no children.
    pub fn leaf(kind: TokenKind, value: NodeValue, position: Position) -> ASTNode {
        ASTNode::new(kind, None, None, None, value, position)
    }

    /// A node with a single (left) child.
    pub fn unary(
        kind: TokenKind,
        child: Option<ASTNode>,
        value: NodeValue,
        position: Position,
    ) -> ASTNode {
        ASTNode::new(kind, child, None, None, value, position)
    }

    /// Sequence two subtrees. Either side may be absent.
    pub fn glue(left: Option<ASTNode>, right: Option<ASTNode>, position: Position) -> ASTNode {
        ASTNode::new(TokenKind::Glue, left, None, right, NodeValue::None, position)
    }

    pub fn identifier_name(&self) -> Option<&str> {
        match &self.value {
            NodeValue::Identifier(name) => Some(name),
            _ => None,
        }
    }

    pub fn number(&self) -> Option<Number> {
        match &self.value {
            NodeValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    fn height(&self) -> usize {
        let left = self.left.as_ref().map_or(0, |n| n.height());
        let right = self.right.as_ref().map_or(0, |n| n.height());
        left.max(right) + 1
    }

    fn log_current_level(&self, height: usize) {
        if height == 1 {
            match &self.value {
                NodeValue::Identifier(name) => tracing::debug!("{}:{}", self.kind, name),
                NodeValue::Number(number) => tracing::debug!("{}:{}", self.kind, number.value),
                NodeValue::None => tracing::debug!("{}", self.kind),
            }
        } else if height > 1 {
            if let Some(left) = &self.left {
                left.log_current_level(height - 1);
            }
            if let Some(right) = &self.right {
                right.log_current_level(height - 1);
            }
        }
    }

    /// Log a level-order traversal of this tree at debug level.
    pub fn log_level_order(&self) {
        tracing::debug!("---Level Order AST Traversal---");
        for level in 1..=self.height() {
            self.log_current_level(level);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NumberType;

    #[test]
    fn test_leaf_has_no_children() {
        let leaf = ASTNode::leaf(
            TokenKind::IntegerLiteral,
            NodeValue::Number(Number::int32(7)),
            Position::default(),
        );
        assert!(leaf.left.is_none() && leaf.mid.is_none() && leaf.right.is_none());
        assert_eq!(leaf.number().unwrap().value, 7);
        assert_eq!(leaf.number().unwrap().number_type, NumberType::Int32);
    }

    #[test]
    fn test_glue_sequences_subtrees() {
        let a = ASTNode::leaf(
            TokenKind::IntegerLiteral,
            NodeValue::Number(Number::int32(1)),
            Position::default(),
        );
        let b = ASTNode::leaf(
            TokenKind::IntegerLiteral,
            NodeValue::Number(Number::int32(2)),
            Position::default(),
        );
        let glue = ASTNode::glue(Some(a), Some(b), Position::default());
        assert_eq!(glue.kind, TokenKind::Glue);
        assert_eq!(glue.left.as_ref().unwrap().number().unwrap().value, 1);
        assert_eq!(glue.right.as_ref().unwrap().number().unwrap().value, 2);
    }

    #[test]
    fn test_identifier_payload() {
        let node = ASTNode::leaf(
            TokenKind::Identifier,
            NodeValue::Identifier("counter".to_string()),
            Position::default(),
        );
        assert_eq!(node.identifier_name(), Some("counter"));
        assert!(node.number().is_none());
    }
}
