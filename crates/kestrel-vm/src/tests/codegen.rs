//! Code generator properties: folding, determinism, diagnostics.

use super::helpers::*;
use crate::compiler::Compiler;
use crate::error::CompileError;
use kestrel_ast::{BinaryOp, NodeKind};

#[test]
fn test_constant_folding_equivalence() {
    // 3+4*2 and 11 compile to identical bytecode.
    let folded = compile_plain(&[bin(
        BinaryOp::Add,
        num(3.0),
        bin(BinaryOp::Mul, num(4.0), num(2.0)),
    )]);
    let literal = compile_plain(&[num(11.0)]);
    assert_eq!(folded.bytecode, literal.bytecode);
    assert_eq!(folded.numbers, literal.numbers);
}

#[test]
fn test_dead_branch_elimination() {
    let with_constant_cond = compile_plain(&[
        var("r", num(0.0)),
        if_else(
            boolean(false),
            vec![assign(ident("r"), num(1.0))],
            Some(vec![assign(ident("r"), num(2.0))]),
        ),
        ident("r"),
    ]);
    let else_only = compile_plain(&[
        var("r", num(0.0)),
        block(vec![assign(ident("r"), num(2.0))]),
        ident("r"),
    ]);
    assert_eq!(with_constant_cond.bytecode, else_only.bytecode);
}

#[test]
fn test_compilation_is_deterministic() {
    let program = [
        var("o", object(vec![("x", num(1.0))])),
        var(
            "f",
            func(None, &["a"], vec![ret(bin(BinaryOp::Add, ident("a"), field(ident("o"), "x")))]),
        ),
        call(ident("f"), vec![num(2.0)]),
    ];
    let first = compile(&program);
    let second = compile(&program);
    assert_eq!(first, second);
    assert_eq!(first.to_bytes(), second.to_bytes());
}

#[test]
fn test_string_folding() {
    let folded = compile_plain(&[bin(BinaryOp::Add, text("a"), num(1.0))]);
    let literal = compile_plain(&[text("a1")]);
    assert_eq!(folded.bytecode, literal.bytecode);
    assert_eq!(folded.strings, literal.strings);
}

#[test]
fn test_break_outside_loop_is_rejected() {
    let err = Compiler::new()
        .compile(&[n(NodeKind::Break)])
        .unwrap_err();
    assert_eq!(err, CompileError::BreakOutsideLoop);
}

#[test]
fn test_continue_outside_loop_is_rejected() {
    let err = Compiler::new()
        .compile(&[n(NodeKind::Continue)])
        .unwrap_err();
    assert_eq!(err, CompileError::ContinueOutsideLoop);
}

#[test]
fn test_duplicate_declaration_is_rejected() {
    let err = Compiler::new()
        .compile(&[var("x", num(1.0)), var("x", num(2.0))])
        .unwrap_err();
    assert_eq!(err, CompileError::DuplicateDeclaration("x".to_string()));
}

#[test]
fn test_shadowing_in_inner_scope_is_allowed() {
    let program = [
        var("x", num(1.0)),
        block(vec![var("x", num(2.0))]),
        ident("x"),
    ];
    assert_eq!(eval(&program), crate::value::Value::Number(1.0));
}

#[test]
fn test_invalid_assignment_target() {
    let err = Compiler::new()
        .compile(&[assign(num(1.0), num(2.0))])
        .unwrap_err();
    assert_eq!(err, CompileError::InvalidAssignmentTarget);
}

#[test]
fn test_capture_descriptors_are_recorded() {
    // fun outer() { var a = 1; return fun () -> a } — the inner function
    // captures one upvalue sourced from an outer local.
    let program = [var(
        "outer",
        func(
            None,
            &[],
            vec![
                var("a", num(1.0)),
                ret(func(None, &[], vec![ident("a")])),
            ],
        ),
    )];
    let image = compile(&program);
    let inner = image
        .functions
        .iter()
        .find(|f| f.num_upvalues == 1)
        .expect("one function captures an upvalue");
    assert!(matches!(
        inner.captures[0],
        crate::bytecode::CaptureSource::Local(_)
    ));
}

#[test]
fn test_transitive_capture_descriptors() {
    // Innermost reads a local two levels out: the middle function carries
    // an upvalue too, and the innermost sources from it.
    let program = [var(
        "outer",
        func(
            None,
            &[],
            vec![
                var("a", num(1.0)),
                ret(func(None, &[], vec![ret(func(None, &[], vec![ident("a")]))])),
            ],
        ),
    )];
    let image = compile(&program);
    let upvalued: Vec<_> = image
        .functions
        .iter()
        .filter(|f| f.num_upvalues == 1)
        .collect();
    assert_eq!(upvalued.len(), 2);
    assert!(upvalued.iter().any(|f| matches!(
        f.captures[0],
        crate::bytecode::CaptureSource::Local(_)
    )));
    assert!(upvalued.iter().any(|f| matches!(
        f.captures[0],
        crate::bytecode::CaptureSource::Upvalue(0)
    )));
}

#[test]
fn test_sequence_flag_lands_in_the_descriptor() {
    let program = [var("mk", seq_func(&[], vec![yield_stmt(num(1.0))]))];
    let image = compile(&program);
    assert!(image.functions.iter().any(|f| f.is_sequence));
}

#[test]
fn test_import_reads_a_global() {
    let mut vm = crate::vm::VM::new();
    vm.set_global("math", crate::value::Value::Number(7.0));
    let program = [
        n(NodeKind::Import {
            name: "math".to_string(),
        }),
        ident("math"),
    ];
    assert_eq!(
        execute_with(&mut vm, &program).unwrap(),
        crate::value::Value::Number(7.0)
    );
}

#[test]
fn test_export_writes_a_global() {
    let mut vm = crate::vm::VM::new();
    let program = [n(NodeKind::Export {
        name: "answer".to_string(),
        value: Box::new(num(42.0)),
    })];
    execute_with(&mut vm, &program).unwrap();
    assert_eq!(
        vm.get_global("answer"),
        Some(crate::value::Value::Number(42.0))
    );
}
