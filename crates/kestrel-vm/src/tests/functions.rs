//! Calls, argument binding, varargs, tail calls and host invocation.

use super::helpers::*;
use crate::error::VmError;
use crate::value::Value;
use crate::vm::{VmConfig, VM};
use kestrel_ast::BinaryOp;

#[test]
fn test_free_identifier_resolves_to_global() {
    // Compiling then executing `fun () -> x` with a global x=v yields v.
    let mut vm = VM::new();
    vm.set_global("x", Value::Number(7.0));
    let program = [call(func(None, &[], vec![ident("x")]), vec![])];
    assert_eq!(execute_with(&mut vm, &program).unwrap(), Value::Number(7.0));
}

#[test]
fn test_missing_arguments_read_undefined() {
    let program = [
        var(
            "f",
            func(None, &["a", "b"], vec![call(ident("typeof"), vec![ident("b")])]),
        ),
        call(ident("f"), vec![num(1.0)]),
    ];
    assert_eq!(eval(&program), Value::string("undefined"));
}

#[test]
fn test_excess_arguments_are_dropped() {
    let program = [
        var("f", func(None, &["a"], vec![ident("a")])),
        call(ident("f"), vec![num(1.0), num(2.0), num(3.0)]),
    ];
    assert_eq!(eval(&program), Value::Number(1.0));
}

#[test]
fn test_varargs_binding() {
    // The trailing arguments land in the implicit `varargs` array.
    let program = [
        var(
            "f",
            vararg_func(
                &["a"],
                vec![bin(
                    BinaryOp::Add,
                    method(ident("varargs"), "len", vec![]),
                    index(ident("varargs"), num(0.0)),
                )],
            ),
        ),
        call(ident("f"), vec![num(1.0), num(10.0), num(20.0)]),
    ];
    // len 2 + varargs[0] (10) = 12.
    assert_eq!(eval(&program), Value::Number(12.0));
}

#[test]
fn test_varargs_empty_when_no_extras() {
    let program = [
        var(
            "f",
            vararg_func(&["a"], vec![method(ident("varargs"), "len", vec![])]),
        ),
        call(ident("f"), vec![num(1.0)]),
    ];
    assert_eq!(eval(&program), Value::Number(0.0));
}

#[test]
fn test_tail_recursion_runs_without_stack_growth() {
    // fun f(n, acc) { return n == 0 ? acc : f(n-1, acc+n) } at n=100000,
    // far beyond the call depth limit.
    let body = ret(ternary(
        bin(BinaryOp::Eq, ident("n"), num(0.0)),
        ident("acc"),
        call(
            ident("f"),
            vec![
                bin(BinaryOp::Sub, ident("n"), num(1.0)),
                bin(BinaryOp::Add, ident("acc"), ident("n")),
            ],
        ),
    ));
    let program = [
        func(Some("f"), &["n", "acc"], vec![body]),
        call(ident("f"), vec![num(100000.0), num(0.0)]),
    ];
    assert_eq!(eval(&program), Value::Number(5000050000.0));
}

#[test]
fn test_non_tail_recursion_overflows() {
    let mut vm = VM::with_config(VmConfig {
        max_call_depth: 64,
        ..VmConfig::default()
    });
    // fun f(n) { return f(n+1) + 0 } never terminates; the +0 keeps the
    // call out of tail position.
    let body = ret(bin(
        BinaryOp::Add,
        call(ident("f"), vec![bin(BinaryOp::Add, ident("n"), num(1.0))]),
        num(0.0),
    ));
    let program = [
        func(Some("f"), &["n"], vec![body]),
        call(ident("f"), vec![num(0.0)]),
    ];
    let err = execute_with(&mut vm, &program).unwrap_err();
    assert!(err.to_string().contains("Stack overflow"));
}

#[test]
fn test_stack_overflow_is_catchable() {
    let mut vm = VM::with_config(VmConfig {
        max_call_depth: 64,
        ..VmConfig::default()
    });
    let body = ret(bin(
        BinaryOp::Add,
        call(ident("f"), vec![num(0.0)]),
        num(0.0),
    ));
    let program = [
        func(Some("f"), &["n"], vec![body]),
        var("r", text("")),
        try_catch(
            vec![call(ident("f"), vec![num(0.0)])],
            "e",
            vec![assign(ident("r"), ident("e"))],
        ),
        ident("r"),
    ];
    let result = execute_with(&mut vm, &program).unwrap();
    assert!(result.to_string().contains("Stack overflow"));
}

#[test]
fn test_method_receiver_is_first_argument() {
    let program = [
        var(
            "o",
            object(vec![
                ("v", num(7.0)),
                ("get", func(None, &["self"], vec![field(ident("self"), "v")])),
            ]),
        ),
        method(ident("o"), "get", vec![]),
    ];
    assert_eq!(eval(&program), Value::Number(7.0));
}

#[test]
fn test_method_receiver_evaluates_once() {
    // The receiver expression has a side effect; dispatch must not
    // evaluate it twice.
    let program = [
        var("count", num(0.0)),
        var(
            "o",
            object(vec![("get", func(None, &["self"], vec![num(1.0)]))]),
        ),
        var(
            "pick",
            func(
                None,
                &[],
                vec![
                    assign(ident("count"), bin(BinaryOp::Add, ident("count"), num(1.0))),
                    ret(ident("o")),
                ],
            ),
        ),
        method(call(ident("pick"), vec![]), "get", vec![]),
        ident("count"),
    ];
    assert_eq!(eval(&program), Value::Number(1.0));
}

#[test]
fn test_unknown_method_is_an_error() {
    let program = [
        var("o", object(vec![])),
        method(ident("o"), "nope", vec![]),
    ];
    let err = execute(&program).unwrap_err();
    assert!(err.to_string().contains("no method"));
}

#[test]
fn test_host_call_value() {
    let mut vm = VM::new();
    // Assigning an undeclared name writes the global object, which the
    // host can read back.
    let program = [assign(
        ident("double"),
        func(None, &["x"], vec![ret(bin(BinaryOp::Mul, ident("x"), num(2.0)))]),
    )];
    execute_with(&mut vm, &program).unwrap();
    let double = vm.get_global("double").expect("assigned to a global");
    let result = vm.call_value(&double, &[Value::Number(21.0)]).unwrap();
    assert_eq!(result, Value::Number(42.0));
}

#[test]
fn test_host_native_roundtrip() {
    let mut vm = VM::new();
    vm.register_native(
        "sum2",
        Box::new(|_vm, args| {
            let mut total = 0.0;
            for arg in args {
                if let Value::Number(n) = arg {
                    total += n;
                }
            }
            Ok(Value::Number(total))
        }),
    );
    let program = [call(ident("sum2"), vec![num(1.0), num(2.0)])];
    assert_eq!(execute_with(&mut vm, &program).unwrap(), Value::Number(3.0));
}

#[test]
fn test_native_error_wraps_as_host_fault() {
    let mut vm = VM::new();
    vm.register_native(
        "boom",
        Box::new(|_vm, _args| {
            Err(VmError::Host {
                message: "io failed".to_string(),
                source: None,
            })
        }),
    );
    let program = [
        var("r", text("")),
        try_catch(
            vec![call(ident("boom"), vec![])],
            "e",
            vec![assign(ident("r"), ident("e"))],
        ),
        ident("r"),
    ];
    let result = execute_with(&mut vm, &program).unwrap();
    assert!(result.to_string().contains("io failed"));
}

#[test]
fn test_pool_buffers_balance_after_execution() {
    let mut vm = VM::new();
    let body = ret(ternary(
        bin(BinaryOp::Eq, ident("n"), num(0.0)),
        num(0.0),
        call(ident("f"), vec![bin(BinaryOp::Sub, ident("n"), num(1.0))]),
    ));
    let program = [
        func(Some("f"), &["n"], vec![body]),
        call(ident("f"), vec![num(50.0)]),
    ];
    execute_with(&mut vm, &program).unwrap();
    let stats = vm.pool_stats();
    assert_eq!(stats.rented, stats.returned);
}

#[test]
fn test_pool_buffers_balance_after_unwinding() {
    let mut vm = VM::new();
    // Deep recursion, then a raise unwinds every frame at once.
    let body = ret(ternary(
        bin(BinaryOp::Eq, ident("n"), num(0.0)),
        call(ident("error"), vec![text("deep")]),
        bin(
            BinaryOp::Add,
            call(ident("f"), vec![bin(BinaryOp::Sub, ident("n"), num(1.0))]),
            num(0.0),
        ),
    ));
    let program = [
        func(Some("f"), &["n"], vec![body]),
        call(ident("f"), vec![num(20.0)]),
    ];
    execute_with(&mut vm, &program).unwrap_err();
    let stats = vm.pool_stats();
    assert_eq!(stats.rented, stats.returned);
}
