//! Constant folding over literal subtrees.
//!
//! The folder mirrors the VM's primitive operator semantics exactly, so a
//! folded expression and its unfolded twin compile to programs with the same
//! observable behavior; `3+4*2` and `11` compile to identical bytecode.

use crate::value::to_int32;
use kestrel_ast::{BinaryOp, Node, NodeKind, UnaryOp};

/// Result of folding a subtree down to a literal.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Folded {
    Number(f64),
    Bool(bool),
    Str(String),
    Undefined,
    Null,
}

impl Folded {
    pub(crate) fn is_truthy(&self) -> bool {
        !matches!(self, Folded::Undefined | Folded::Null | Folded::Bool(false))
    }

    fn as_display(&self) -> String {
        match self {
            Folded::Number(n) => n.to_string(),
            Folded::Bool(b) => b.to_string(),
            Folded::Str(s) => s.clone(),
            Folded::Undefined => "undefined".to_string(),
            Folded::Null => "null".to_string(),
        }
    }
}

/// Fold a node to a literal, or `None` when it depends on runtime state.
pub(crate) fn fold(node: &Node) -> Option<Folded> {
    match &node.kind {
        NodeKind::Number(n) => Some(Folded::Number(*n)),
        NodeKind::Str(s) => Some(Folded::Str(s.clone())),
        NodeKind::Bool(b) => Some(Folded::Bool(*b)),
        NodeKind::Undefined => Some(Folded::Undefined),
        NodeKind::Null => Some(Folded::Null),
        NodeKind::Binary { op, lhs, rhs } => fold_binary(*op, lhs, rhs),
        NodeKind::Unary { op, operand } => fold_unary(*op, operand),
        NodeKind::Ternary {
            cond,
            then,
            otherwise,
        } => {
            let cond = fold(cond)?;
            if cond.is_truthy() {
                fold(then)
            } else {
                fold(otherwise)
            }
        }
        _ => None,
    }
}

fn fold_binary(op: BinaryOp, lhs: &Node, rhs: &Node) -> Option<Folded> {
    // Short-circuit operators keep their value-preserving semantics.
    if matches!(op, BinaryOp::And | BinaryOp::Or) {
        let l = fold(lhs)?;
        let take_rhs = match op {
            BinaryOp::And => l.is_truthy(),
            _ => !l.is_truthy(),
        };
        return if take_rhs { fold(rhs) } else { Some(l) };
    }

    let l = fold(lhs)?;
    let r = fold(rhs)?;

    match op {
        BinaryOp::Add => match (&l, &r) {
            (Folded::Number(a), Folded::Number(b)) => Some(Folded::Number(a + b)),
            (Folded::Str(a), other) => Some(Folded::Str(format!("{}{}", a, other.as_display()))),
            (other, Folded::Str(b)) => Some(Folded::Str(format!("{}{}", other.as_display(), b))),
            _ => None,
        },
        BinaryOp::Sub => num_op(&l, &r, |a, b| a - b),
        BinaryOp::Mul => num_op(&l, &r, |a, b| a * b),
        BinaryOp::Div => num_op(&l, &r, |a, b| a / b),
        BinaryOp::Mod => num_op(&l, &r, |a, b| a % b),
        BinaryOp::Exp => num_op(&l, &r, f64::powf),
        BinaryOp::Eq => Some(Folded::Bool(folded_eq(&l, &r))),
        BinaryOp::Neq => Some(Folded::Bool(!folded_eq(&l, &r))),
        BinaryOp::Lt => ord_op(&l, &r, |o| o == std::cmp::Ordering::Less),
        BinaryOp::Lte => ord_op(&l, &r, |o| o != std::cmp::Ordering::Greater),
        BinaryOp::Gt => ord_op(&l, &r, |o| o == std::cmp::Ordering::Greater),
        BinaryOp::Gte => ord_op(&l, &r, |o| o != std::cmp::Ordering::Less),
        BinaryOp::BitAnd => int_op(&l, &r, |a, b| a & b),
        BinaryOp::BitOr => int_op(&l, &r, |a, b| a | b),
        BinaryOp::BitXor => int_op(&l, &r, |a, b| a ^ b),
        BinaryOp::Shl => int_op(&l, &r, |a, b| a << (b & 31)),
        BinaryOp::Shr => int_op(&l, &r, |a, b| a >> (b & 31)),
        // Membership needs a runtime container.
        BinaryOp::In | BinaryOp::NotIn => None,
        BinaryOp::And | BinaryOp::Or => unreachable!(),
    }
}

fn fold_unary(op: UnaryOp, operand: &Node) -> Option<Folded> {
    let v = fold(operand)?;
    match op {
        UnaryOp::Neg => match v {
            Folded::Number(n) => Some(Folded::Number(-n)),
            _ => None,
        },
        UnaryOp::Not => Some(Folded::Bool(!v.is_truthy())),
        UnaryOp::BitNot => match v {
            Folded::Number(n) => Some(Folded::Number(!to_int32(n) as f64)),
            _ => None,
        },
    }
}

fn num_op(l: &Folded, r: &Folded, f: impl Fn(f64, f64) -> f64) -> Option<Folded> {
    match (l, r) {
        (Folded::Number(a), Folded::Number(b)) => Some(Folded::Number(f(*a, *b))),
        _ => None,
    }
}

fn int_op(l: &Folded, r: &Folded, f: impl Fn(i32, i32) -> i32) -> Option<Folded> {
    match (l, r) {
        (Folded::Number(a), Folded::Number(b)) => {
            Some(Folded::Number(f(to_int32(*a), to_int32(*b)) as f64))
        }
        _ => None,
    }
}

fn ord_op(l: &Folded, r: &Folded, f: impl Fn(std::cmp::Ordering) -> bool) -> Option<Folded> {
    match (l, r) {
        (Folded::Number(a), Folded::Number(b)) => {
            // NaN comparisons are not foldable to a total order.
            a.partial_cmp(b).map(|o| Folded::Bool(f(o)))
        }
        (Folded::Str(a), Folded::Str(b)) => Some(Folded::Bool(f(a.cmp(b)))),
        _ => None,
    }
}

fn folded_eq(l: &Folded, r: &Folded) -> bool {
    match (l, r) {
        (Folded::Number(a), Folded::Number(b)) => a == b,
        (Folded::Bool(a), Folded::Bool(b)) => a == b,
        (Folded::Str(a), Folded::Str(b)) => a == b,
        (Folded::Undefined, Folded::Undefined) => true,
        (Folded::Null, Folded::Null) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_ast::SourceRef;

    fn node(kind: NodeKind) -> Node {
        Node::new(kind, SourceRef::new("<test>", 1))
    }

    fn bin(op: BinaryOp, lhs: Node, rhs: Node) -> Node {
        node(NodeKind::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    #[test]
    fn test_fold_arithmetic() {
        let tree = bin(
            BinaryOp::Add,
            node(NodeKind::Number(3.0)),
            bin(
                BinaryOp::Mul,
                node(NodeKind::Number(4.0)),
                node(NodeKind::Number(2.0)),
            ),
        );
        assert_eq!(fold(&tree), Some(Folded::Number(11.0)));
    }

    #[test]
    fn test_fold_string_concat() {
        let tree = bin(
            BinaryOp::Add,
            node(NodeKind::Str("n=".to_string())),
            node(NodeKind::Number(3.0)),
        );
        assert_eq!(fold(&tree), Some(Folded::Str("n=3".to_string())));
    }

    #[test]
    fn test_fold_short_circuit_keeps_value() {
        let tree = bin(
            BinaryOp::Or,
            node(NodeKind::Null),
            node(NodeKind::Number(7.0)),
        );
        assert_eq!(fold(&tree), Some(Folded::Number(7.0)));

        let tree = bin(
            BinaryOp::And,
            node(NodeKind::Bool(false)),
            node(NodeKind::Number(7.0)),
        );
        assert_eq!(fold(&tree), Some(Folded::Bool(false)));
    }

    #[test]
    fn test_runtime_subtrees_do_not_fold() {
        let tree = bin(
            BinaryOp::Add,
            node(NodeKind::Number(1.0)),
            node(NodeKind::Ident("x".to_string())),
        );
        assert_eq!(fold(&tree), None);
    }
}
