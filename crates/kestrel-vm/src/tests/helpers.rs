//! Node constructors and compile/execute helpers shared by the
//! integration tests.

use crate::bytecode::ProgramImage;
use crate::compiler::Compiler;
use crate::error::VmError;
use crate::value::Value;
use crate::vm::VM;
use kestrel_ast::{
    BinaryOp, CatchClause, FunctionDecl, Node, NodeKind, ObjectKey, SourceRef, SwitchCase, UnaryOp,
};
use std::rc::Rc;

pub fn src() -> SourceRef {
    SourceRef::new("<test>", 1)
}

pub fn n(kind: NodeKind) -> Node {
    Node::new(kind, src())
}

pub fn at(line: u32, kind: NodeKind) -> Node {
    Node::new(kind, SourceRef::new("<test>", line))
}

// ===== Literals =====

pub fn num(v: f64) -> Node {
    n(NodeKind::Number(v))
}

pub fn text(v: &str) -> Node {
    n(NodeKind::Str(v.to_string()))
}

pub fn boolean(v: bool) -> Node {
    n(NodeKind::Bool(v))
}

pub fn undefined() -> Node {
    n(NodeKind::Undefined)
}

pub fn null() -> Node {
    n(NodeKind::Null)
}

pub fn array(items: Vec<Node>) -> Node {
    n(NodeKind::ArrayLiteral(items))
}

pub fn object(entries: Vec<(&str, Node)>) -> Node {
    n(NodeKind::ObjectLiteral(
        entries
            .into_iter()
            .map(|(k, v)| (ObjectKey::Name(k.to_string()), v))
            .collect(),
    ))
}

// ===== References and operators =====

pub fn ident(name: &str) -> Node {
    n(NodeKind::Ident(name.to_string()))
}

pub fn bin(op: BinaryOp, lhs: Node, rhs: Node) -> Node {
    n(NodeKind::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    })
}

pub fn unary(op: UnaryOp, operand: Node) -> Node {
    n(NodeKind::Unary {
        op,
        operand: Box::new(operand),
    })
}

pub fn ternary(cond: Node, then: Node, otherwise: Node) -> Node {
    n(NodeKind::Ternary {
        cond: Box::new(cond),
        then: Box::new(then),
        otherwise: Box::new(otherwise),
    })
}

pub fn field(target: Node, name: &str) -> Node {
    n(NodeKind::Field {
        target: Box::new(target),
        name: name.to_string(),
    })
}

pub fn index(target: Node, idx: Node) -> Node {
    n(NodeKind::Index {
        target: Box::new(target),
        index: Box::new(idx),
    })
}

// ===== Statements =====

pub fn var(name: &str, init: Node) -> Node {
    n(NodeKind::VarDecl {
        name: name.to_string(),
        init: Some(Box::new(init)),
    })
}

pub fn assign(target: Node, value: Node) -> Node {
    n(NodeKind::Assign {
        target: Box::new(target),
        value: Box::new(value),
    })
}

pub fn block(body: Vec<Node>) -> Node {
    n(NodeKind::Block(body))
}

pub fn if_else(cond: Node, then_branch: Vec<Node>, else_branch: Option<Vec<Node>>) -> Node {
    n(NodeKind::If {
        cond: Box::new(cond),
        then_branch,
        else_branch,
    })
}

pub fn while_loop(cond: Node, body: Vec<Node>) -> Node {
    n(NodeKind::While {
        cond: Box::new(cond),
        body,
    })
}

pub fn for_loop(init: Node, cond: Node, step: Node, body: Vec<Node>) -> Node {
    n(NodeKind::For {
        init: Some(Box::new(init)),
        cond: Some(Box::new(cond)),
        step: Some(Box::new(step)),
        body,
    })
}

pub fn foreach(var_name: &str, iterable: Node, body: Vec<Node>) -> Node {
    n(NodeKind::Foreach {
        var: var_name.to_string(),
        iterable: Box::new(iterable),
        body,
    })
}

pub fn switch(subject: Node, cases: Vec<(i32, Vec<Node>)>, default: Option<Vec<Node>>) -> Node {
    n(NodeKind::Switch {
        subject: Box::new(subject),
        cases: cases
            .into_iter()
            .map(|(value, body)| SwitchCase { value, body })
            .collect(),
        default,
    })
}

pub fn ret(value: Node) -> Node {
    n(NodeKind::Return(Some(Box::new(value))))
}

pub fn yield_stmt(value: Node) -> Node {
    n(NodeKind::Yield(Box::new(value)))
}

pub fn try_catch(body: Vec<Node>, var_name: &str, catch_body: Vec<Node>) -> Node {
    n(NodeKind::Try {
        body,
        catch: Some(CatchClause {
            var: var_name.to_string(),
            body: catch_body,
        }),
        finally: None,
    })
}

pub fn try_full(
    body: Vec<Node>,
    catch: Option<(&str, Vec<Node>)>,
    finally: Option<Vec<Node>>,
) -> Node {
    n(NodeKind::Try {
        body,
        catch: catch.map(|(var, body)| CatchClause {
            var: var.to_string(),
            body,
        }),
        finally,
    })
}

// ===== Functions =====

pub fn func(name: Option<&str>, params: &[&str], body: Vec<Node>) -> Node {
    n(NodeKind::Function(FunctionDecl {
        name: name.map(String::from),
        params: params.iter().map(|p| p.to_string()).collect(),
        has_varargs: false,
        is_sequence: false,
        body,
    }))
}

pub fn vararg_func(params: &[&str], body: Vec<Node>) -> Node {
    n(NodeKind::Function(FunctionDecl {
        name: None,
        params: params.iter().map(|p| p.to_string()).collect(),
        has_varargs: true,
        is_sequence: false,
        body,
    }))
}

pub fn seq_func(params: &[&str], body: Vec<Node>) -> Node {
    n(NodeKind::Function(FunctionDecl {
        name: None,
        params: params.iter().map(|p| p.to_string()).collect(),
        has_varargs: false,
        is_sequence: true,
        body,
    }))
}

pub fn call(target: Node, args: Vec<Node>) -> Node {
    n(NodeKind::Call {
        target: Box::new(target),
        args,
    })
}

pub fn method(receiver: Node, name: &str, args: Vec<Node>) -> Node {
    n(NodeKind::MethodCall {
        receiver: Box::new(receiver),
        name: name.to_string(),
        args,
    })
}

// ===== Compile / execute =====

pub fn compile(nodes: &[Node]) -> ProgramImage {
    Compiler::new()
        .compile(nodes)
        .expect("test program should compile")
}

/// Compile without debug tables (byte-for-byte comparisons).
pub fn compile_plain(nodes: &[Node]) -> ProgramImage {
    let mut compiler = Compiler::new();
    compiler.set_emit_debug(false);
    compiler
        .compile(nodes)
        .expect("test program should compile")
}

pub fn execute(nodes: &[Node]) -> Result<Value, VmError> {
    let mut vm = VM::new();
    execute_with(&mut vm, nodes)
}

pub fn execute_with(vm: &mut VM, nodes: &[Node]) -> Result<Value, VmError> {
    let image = compile(nodes);
    vm.execute(Rc::new(image))
}

/// Execute and unwrap, for programs that must succeed.
pub fn eval(nodes: &[Node]) -> Value {
    execute(nodes).expect("test program should run")
}
