//! Exception unwinding, catch binding, finally semantics.

use super::helpers::*;
use crate::error::VmError;
use crate::value::Value;
use kestrel_ast::BinaryOp;

fn push(array_name: &str, value: Node) -> Node {
    method(ident(array_name), "add", vec![value])
}

use kestrel_ast::Node;

#[test]
fn test_catch_binds_the_raised_value() {
    // try { error("x") } catch (e) { r = e } leaves "x" in r.
    let program = [
        var("r", text("")),
        try_catch(
            vec![call(ident("error"), vec![text("x")])],
            "e",
            vec![assign(ident("r"), ident("e"))],
        ),
        ident("r"),
    ];
    assert_eq!(eval(&program), Value::string("x"));
}

#[test]
fn test_raised_object_keeps_identity() {
    let program = [
        var("payload", object(vec![("code", num(7.0))])),
        var("r", null()),
        try_catch(
            vec![call(ident("error"), vec![ident("payload")])],
            "e",
            vec![assign(ident("r"), ident("e"))],
        ),
        bin(BinaryOp::Eq, ident("r"), ident("payload")),
    ];
    assert_eq!(eval(&program), Value::Boolean(true));
}

#[test]
fn test_type_errors_are_catchable() {
    let program = [
        var("a", num(1.0)),
        var("b", text("s")),
        var("r", text("")),
        try_catch(
            vec![bin(BinaryOp::Lt, ident("a"), ident("b"))],
            "e",
            vec![assign(ident("r"), ident("e"))],
        ),
        ident("r"),
    ];
    assert!(eval(&program).to_string().contains("Type error"));
}

#[test]
fn test_uncaught_error_surfaces_to_the_embedder() {
    let program = [call(ident("error"), vec![text("boom")])];
    let err = execute(&program).unwrap_err();
    let VmError::Uncaught { value, .. } = err else {
        panic!("expected uncaught");
    };
    assert_eq!(value, Value::string("boom"));
}

#[test]
fn test_error_crosses_call_frames() {
    let program = [
        var(
            "thrower",
            func(None, &[], vec![call(ident("error"), vec![text("deep")])]),
        ),
        var(
            "middle",
            func(None, &[], vec![ret(call(ident("thrower"), vec![]))]),
        ),
        var("r", text("")),
        try_catch(
            vec![call(ident("middle"), vec![])],
            "e",
            vec![assign(ident("r"), ident("e"))],
        ),
        ident("r"),
    ];
    assert_eq!(eval(&program), Value::string("deep"));
}

#[test]
fn test_finally_runs_on_the_normal_path() {
    let program = [
        var("order", array(vec![])),
        try_full(
            vec![push("order", text("body"))],
            None,
            Some(vec![push("order", text("finally"))]),
        ),
        ident("order"),
    ];
    let Value::Array(order) = eval(&program) else {
        panic!("expected array");
    };
    let order = order.borrow();
    assert_eq!(
        order.as_slice(),
        &[Value::string("body"), Value::string("finally")]
    );
}

#[test]
fn test_finally_runs_on_the_exception_path_and_rethrows() {
    let program = [
        var("order", array(vec![])),
        try_catch(
            vec![try_full(
                vec![call(ident("error"), vec![text("x")])],
                None,
                Some(vec![push("order", text("finally"))]),
            )],
            "e",
            vec![push("order", ident("e"))],
        ),
        ident("order"),
    ];
    let Value::Array(order) = eval(&program) else {
        panic!("expected array");
    };
    let order = order.borrow();
    assert_eq!(
        order.as_slice(),
        &[Value::string("finally"), Value::string("x")]
    );
}

#[test]
fn test_catch_then_finally() {
    let program = [
        var("order", array(vec![])),
        try_full(
            vec![call(ident("error"), vec![text("x")])],
            Some(("e", vec![push("order", text("catch"))])),
            Some(vec![push("order", text("finally"))]),
        ),
        ident("order"),
    ];
    let Value::Array(order) = eval(&program) else {
        panic!("expected array");
    };
    let order = order.borrow();
    assert_eq!(
        order.as_slice(),
        &[Value::string("catch"), Value::string("finally")]
    );
}

#[test]
fn test_error_in_catch_body_still_runs_finally() {
    let program = [
        var("order", array(vec![])),
        var("r", text("")),
        try_catch(
            vec![try_full(
                vec![call(ident("error"), vec![text("first")])],
                Some(("e", vec![call(ident("error"), vec![text("second")])])),
                Some(vec![push("order", text("finally"))]),
            )],
            "e",
            vec![assign(ident("r"), ident("e"))],
        ),
        array(vec![index(ident("order"), num(0.0)), ident("r")]),
    ];
    let Value::Array(results) = eval(&program) else {
        panic!("expected array");
    };
    let results = results.borrow();
    assert_eq!(results[0], Value::string("finally"));
    assert_eq!(results[1], Value::string("second"));
}

#[test]
fn test_return_through_finally() {
    // The return value is computed first, then the finally body runs.
    let body = vec![
        try_full(
            vec![ret(num(1.0))],
            None,
            Some(vec![method(ident("log"), "add", vec![text("finally")])]),
        ),
        ret(num(2.0)),
    ];
    let program = [
        var("log", array(vec![])),
        var("f", func(None, &["log"], body)),
        var("r", call(ident("f"), vec![ident("log")])),
        array(vec![ident("r"), method(ident("log"), "len", vec![])]),
    ];
    let Value::Array(results) = eval(&program) else {
        panic!("expected array");
    };
    let results = results.borrow();
    assert_eq!(results[0], Value::Number(1.0));
    assert_eq!(results[1], Value::Number(1.0));
}

#[test]
fn test_break_through_finally() {
    let program = [
        var("order", array(vec![])),
        while_loop(
            boolean(true),
            vec![try_full(
                vec![n(kestrel_ast::NodeKind::Break)],
                None,
                Some(vec![push("order", text("finally"))]),
            )],
        ),
        method(ident("order"), "len", vec![]),
    ];
    assert_eq!(eval(&program), Value::Number(1.0));
}

#[test]
fn test_nested_try_inner_catches_first() {
    let program = [
        var("r", text("")),
        try_catch(
            vec![try_catch(
                vec![call(ident("error"), vec![text("inner")])],
                "e",
                vec![assign(ident("r"), bin(BinaryOp::Add, text("in:"), ident("e")))],
            )],
            "e",
            vec![assign(ident("r"), bin(BinaryOp::Add, text("out:"), ident("e")))],
        ),
        ident("r"),
    ];
    assert_eq!(eval(&program), Value::string("in:inner"));
}

#[test]
fn test_error_location_resolves_through_debug_info() {
    let program = [
        at(1, kestrel_ast::NodeKind::VarDecl {
            name: "a".to_string(),
            init: Some(Box::new(num(1.0))),
        }),
        at(5, kestrel_ast::NodeKind::Call {
            target: Box::new(ident("error")),
            args: vec![text("here")],
        }),
    ];
    let err = execute(&program).unwrap_err();
    let VmError::Uncaught {
        location: Some(location),
        ..
    } = err
    else {
        panic!("expected a located uncaught error");
    };
    assert_eq!(location.line, 5);
    assert_eq!(location.file.as_deref(), Some("<test>"));
}
