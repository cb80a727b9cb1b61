//! Sequences: creation, suspension, resumption, completion.

use super::helpers::*;
use crate::value::Value;
use kestrel_ast::BinaryOp;

#[test]
fn test_calling_a_sequence_runs_nothing() {
    // The body would raise immediately if it executed on call.
    let program = [
        var(
            "mk",
            seq_func(&[], vec![call(ident("error"), vec![text("ran")])]),
        ),
        var("s", call(ident("mk"), vec![])),
        call(ident("typeof"), vec![ident("s")]),
    ];
    assert_eq!(eval(&program), Value::string("object"));
}

#[test]
fn test_two_yields_then_done() {
    // seq { yield 1; yield 2 } -> (true,1), (true,2), (false,_).
    let program = [
        var(
            "mk",
            seq_func(&[], vec![yield_stmt(num(1.0)), yield_stmt(num(2.0))]),
        ),
        var("s", call(ident("mk"), vec![])),
        array(vec![
            method(ident("s"), "moveNext", vec![]),
            method(ident("s"), "current", vec![]),
            method(ident("s"), "moveNext", vec![]),
            method(ident("s"), "current", vec![]),
            method(ident("s"), "moveNext", vec![]),
        ]),
    ];
    let Value::Array(results) = eval(&program) else {
        panic!("expected array");
    };
    let results = results.borrow();
    assert_eq!(
        results.as_slice(),
        &[
            Value::Boolean(true),
            Value::Number(1.0),
            Value::Boolean(true),
            Value::Number(2.0),
            Value::Boolean(false),
        ]
    );
}

#[test]
fn test_move_next_count_matches_yield_count() {
    // A sequence reaching k yields answers true exactly k times, then
    // false thereafter.
    let body = vec![
        var("i", num(0.0)),
        while_loop(
            bin(BinaryOp::Lt, ident("i"), ident("n")),
            vec![
                yield_stmt(ident("i")),
                assign(ident("i"), bin(BinaryOp::Add, ident("i"), num(1.0))),
            ],
        ),
    ];
    let program = [
        var("mk", seq_func(&["n"], body)),
        var("s", call(ident("mk"), vec![num(4.0)])),
        var("count", num(0.0)),
        while_loop(
            method(ident("s"), "moveNext", vec![]),
            vec![assign(
                ident("count"),
                bin(BinaryOp::Add, ident("count"), num(1.0)),
            )],
        ),
        // Exhausted sequences keep answering false.
        if_else(
            method(ident("s"), "moveNext", vec![]),
            vec![assign(ident("count"), num(-1.0))],
            None,
        ),
        ident("count"),
    ];
    assert_eq!(eval(&program), Value::Number(4.0));
}

#[test]
fn test_current_after_completion_is_undefined() {
    let program = [
        var("mk", seq_func(&[], vec![yield_stmt(num(1.0))])),
        var("s", call(ident("mk"), vec![])),
        method(ident("s"), "moveNext", vec![]),
        method(ident("s"), "moveNext", vec![]),
        method(ident("s"), "current", vec![]),
    ];
    assert_eq!(eval(&program), Value::Undefined);
}

#[test]
fn test_sequence_arguments_bind_on_first_move_next() {
    let program = [
        var(
            "mk",
            seq_func(
                &["a", "b"],
                vec![
                    yield_stmt(ident("a")),
                    yield_stmt(bin(BinaryOp::Add, ident("a"), ident("b"))),
                ],
            ),
        ),
        var("s", call(ident("mk"), vec![num(3.0), num(4.0)])),
        method(ident("s"), "moveNext", vec![]),
        var("first", method(ident("s"), "current", vec![])),
        method(ident("s"), "moveNext", vec![]),
        bin(
            BinaryOp::Add,
            ident("first"),
            method(ident("s"), "current", vec![]),
        ),
    ];
    assert_eq!(eval(&program), Value::Number(10.0));
}

#[test]
fn test_foreach_over_sequence() {
    let body = vec![
        yield_stmt(num(1.0)),
        yield_stmt(num(2.0)),
        yield_stmt(num(3.0)),
    ];
    let program = [
        var("mk", seq_func(&[], body)),
        var("sum", num(0.0)),
        foreach(
            "x",
            call(ident("mk"), vec![]),
            vec![assign(
                ident("sum"),
                bin(BinaryOp::Add, ident("sum"), ident("x")),
            )],
        ),
        ident("sum"),
    ];
    assert_eq!(eval(&program), Value::Number(6.0));
}

#[test]
fn test_sequence_locals_survive_suspension() {
    // State in locals and on the eval stack persists across yields.
    let body = vec![
        var("acc", num(0.0)),
        assign(ident("acc"), bin(BinaryOp::Add, ident("acc"), num(1.0))),
        yield_stmt(ident("acc")),
        assign(ident("acc"), bin(BinaryOp::Add, ident("acc"), num(10.0))),
        yield_stmt(ident("acc")),
    ];
    let program = [
        var("mk", seq_func(&[], body)),
        var("s", call(ident("mk"), vec![])),
        method(ident("s"), "moveNext", vec![]),
        method(ident("s"), "moveNext", vec![]),
        method(ident("s"), "current", vec![]),
    ];
    assert_eq!(eval(&program), Value::Number(11.0));
}

#[test]
fn test_error_inside_sequence_marks_it_done() {
    let program = [
        var(
            "mk",
            seq_func(
                &[],
                vec![yield_stmt(num(1.0)), call(ident("error"), vec![text("boom")])],
            ),
        ),
        var("s", call(ident("mk"), vec![])),
        method(ident("s"), "moveNext", vec![]),
        var("caught", text("")),
        try_catch(
            vec![method(ident("s"), "moveNext", vec![])],
            "e",
            vec![assign(ident("caught"), ident("e"))],
        ),
        // An errored sequence is exhausted.
        array(vec![ident("caught"), method(ident("s"), "moveNext", vec![])]),
    ];
    let Value::Array(results) = eval(&program) else {
        panic!("expected array");
    };
    let results = results.borrow();
    assert_eq!(results[0], Value::string("boom"));
    assert_eq!(results[1], Value::Boolean(false));
}

#[test]
fn test_suspended_sequence_holds_its_buffers() {
    use crate::vm::VM;

    let mut vm = VM::new();
    let program = [
        var(
            "mk",
            seq_func(&[], vec![yield_stmt(num(1.0)), yield_stmt(num(2.0))]),
        ),
        var("s", call(ident("mk"), vec![])),
        method(ident("s"), "moveNext", vec![]),
        assign(ident("keep"), ident("s")),
    ];
    execute_with(&mut vm, &program).unwrap();

    // The suspended frame keeps its three pooled buffers alive.
    let stats = vm.pool_stats();
    assert_eq!(stats.rented - stats.returned, 3);

    // Driving the sequence to completion returns them.
    let drain = [
        while_loop(method(ident("keep"), "moveNext", vec![]), vec![]),
        num(0.0),
    ];
    execute_with(&mut vm, &drain).unwrap();
    let stats = vm.pool_stats();
    assert_eq!(stats.rented, stats.returned);
}

#[test]
fn test_yield_in_plain_function_is_a_compile_error() {
    use crate::compiler::Compiler;
    use crate::error::CompileError;

    let program = [var("f", func(None, &[], vec![yield_stmt(num(1.0))]))];
    let err = Compiler::new().compile(&program).unwrap_err();
    assert_eq!(err, CompileError::YieldOutsideSequence);
}
