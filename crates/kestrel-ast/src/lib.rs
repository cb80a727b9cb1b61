//! Expression tree consumed by the kestrel code generator.
//!
//! The parser is an external collaborator: it produces this tree and hands it
//! to `kestrel-vm`'s compiler. The node kinds form a closed algebraic variant
//! and every node carries the source file and line it came from, so the code
//! generator can attach debug positions to the instructions it emits.

use std::rc::Rc;

/// Source attribution for a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    /// File the node was parsed from.
    pub file: Rc<str>,
    /// 1-based line number.
    pub line: u32,
}

impl SourceRef {
    pub fn new(file: impl Into<Rc<str>>, line: u32) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

/// A single expression-tree node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub source: SourceRef,
}

impl Node {
    pub fn new(kind: NodeKind, source: SourceRef) -> Self {
        Self { kind, source }
    }

    /// True for kinds that produce a value when compiled in expression
    /// position (used to decide whether a trailing node becomes the program
    /// result).
    pub fn is_expression(&self) -> bool {
        !matches!(
            self.kind,
            NodeKind::VarDecl { .. }
                | NodeKind::Assign { .. }
                | NodeKind::Block(_)
                | NodeKind::If { .. }
                | NodeKind::While { .. }
                | NodeKind::DoWhile { .. }
                | NodeKind::For { .. }
                | NodeKind::Foreach { .. }
                | NodeKind::Switch { .. }
                | NodeKind::Break
                | NodeKind::Continue
                | NodeKind::Return(_)
                | NodeKind::Try { .. }
                | NodeKind::Import { .. }
                | NodeKind::Export { .. }
        )
    }
}

/// Function declaration payload, shared by statement and expression position.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    /// Declared name, if any. Named declarations in statement position also
    /// bind a local of the same name.
    pub name: Option<String>,
    pub params: Vec<String>,
    /// Trailing arguments beyond `params` are collected into the implicit
    /// `varargs` array.
    pub has_varargs: bool,
    /// Sequence (generator) semantics: calling the function returns an
    /// enumerable object instead of executing the body.
    pub is_sequence: bool,
    pub body: Vec<Node>,
}

/// `catch (var) { body }` clause of a try statement.
#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub var: String,
    pub body: Vec<Node>,
}

/// One `case value: body` arm of a switch statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub value: i32,
    pub body: Vec<Node>,
}

/// Object literal key: a plain name or a computed expression.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectKey {
    Name(String),
    Computed(Box<Node>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    // ===== Literals =====
    Number(f64),
    Str(String),
    Bool(bool),
    Undefined,
    Null,
    ArrayLiteral(Vec<Node>),
    ObjectLiteral(Vec<(ObjectKey, Node)>),

    // ===== References =====
    Ident(String),
    /// Reference to the global object itself.
    Global,

    // ===== Operators =====
    Binary {
        op: BinaryOp,
        lhs: Box<Node>,
        rhs: Box<Node>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    Ternary {
        cond: Box<Node>,
        then: Box<Node>,
        otherwise: Box<Node>,
    },

    // ===== Access =====
    Field {
        target: Box<Node>,
        name: String,
    },
    Index {
        target: Box<Node>,
        index: Box<Node>,
    },

    // ===== Calls =====
    Call {
        target: Box<Node>,
        args: Vec<Node>,
    },
    /// Method call: the receiver is evaluated once and passed as the first
    /// argument of the dispatched method.
    MethodCall {
        receiver: Box<Node>,
        name: String,
        args: Vec<Node>,
    },

    // ===== Declarations and assignment =====
    Function(FunctionDecl),
    VarDecl {
        name: String,
        init: Option<Box<Node>>,
    },
    Assign {
        target: Box<Node>,
        value: Box<Node>,
    },

    // ===== Control flow =====
    Block(Vec<Node>),
    If {
        cond: Box<Node>,
        then_branch: Vec<Node>,
        else_branch: Option<Vec<Node>>,
    },
    While {
        cond: Box<Node>,
        body: Vec<Node>,
    },
    DoWhile {
        body: Vec<Node>,
        cond: Box<Node>,
    },
    For {
        init: Option<Box<Node>>,
        cond: Option<Box<Node>>,
        step: Option<Box<Node>>,
        body: Vec<Node>,
    },
    Foreach {
        var: String,
        iterable: Box<Node>,
        body: Vec<Node>,
    },
    Switch {
        subject: Box<Node>,
        cases: Vec<SwitchCase>,
        default: Option<Vec<Node>>,
    },
    Break,
    Continue,
    Return(Option<Box<Node>>),
    Yield(Box<Node>),
    Try {
        body: Vec<Node>,
        catch: Option<CatchClause>,
        finally: Option<Vec<Node>>,
    },

    // ===== Modules =====
    Import {
        name: String,
    },
    Export {
        name: String,
        value: Box<Node>,
    },
}

/// Binary operator tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Exp,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    In,
    NotIn,
}

/// Unary operator tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}
