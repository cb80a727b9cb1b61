//! Object model: fields, prototypes, locking, arrays, meta-methods.

use super::helpers::*;
use crate::error::VmError;
use crate::value::Value;
use kestrel_ast::BinaryOp;

#[test]
fn test_object_literal_and_fields() {
    let program = [
        var("o", object(vec![("x", num(1.0)), ("y", num(2.0))])),
        assign(field(ident("o"), "y"), num(5.0)),
        bin(
            BinaryOp::Add,
            field(ident("o"), "x"),
            field(ident("o"), "y"),
        ),
    ];
    assert_eq!(eval(&program), Value::Number(6.0));
}

#[test]
fn test_missing_field_reads_undefined() {
    let program = [
        var("o", object(vec![])),
        field(ident("o"), "nothing"),
    ];
    assert_eq!(eval(&program), Value::Undefined);
}

#[test]
fn test_prototype_lookup_and_shadowing() {
    // var a = {x:1}; var b = {}; b.setPrototype(a);
    // b.x == 1; after b.x = 2: b.x == 2 and a.x still 1.
    let program = [
        var("a", object(vec![("x", num(1.0))])),
        var("b", object(vec![])),
        method(ident("b"), "setPrototype", vec![ident("a")]),
        var("before", field(ident("b"), "x")),
        assign(field(ident("b"), "x"), num(2.0)),
        array(vec![
            ident("before"),
            field(ident("b"), "x"),
            field(ident("a"), "x"),
        ]),
    ];
    let Value::Array(items) = eval(&program) else {
        panic!("expected array result");
    };
    let items = items.borrow();
    assert_eq!(items[0], Value::Number(1.0));
    assert_eq!(items[1], Value::Number(2.0));
    assert_eq!(items[2], Value::Number(1.0));
}

#[test]
fn test_get_prototype() {
    let program = [
        var("a", object(vec![])),
        var("b", object(vec![])),
        method(ident("b"), "setPrototype", vec![ident("a")]),
        bin(
            BinaryOp::Eq,
            method(ident("b"), "getPrototype", vec![]),
            ident("a"),
        ),
    ];
    assert_eq!(eval(&program), Value::Boolean(true));
}

#[test]
fn test_locked_object_rejects_new_keys() {
    let program = [
        var("o", object(vec![("x", num(1.0))])),
        method(ident("o"), "lock", vec![]),
        assign(field(ident("o"), "y"), num(2.0)),
    ];
    let err = execute(&program).unwrap_err();
    assert!(matches!(err, VmError::Uncaught { .. }));
    assert!(err.to_string().contains("locked"));
}

#[test]
fn test_locked_object_allows_updates() {
    let program = [
        var("o", object(vec![("x", num(1.0))])),
        method(ident("o"), "lock", vec![]),
        assign(field(ident("o"), "x"), num(9.0)),
        field(ident("o"), "x"),
    ];
    assert_eq!(eval(&program), Value::Number(9.0));
}

#[test]
fn test_keys_in_insertion_order() {
    let program = [
        var("o", object(vec![("b", num(1.0)), ("a", num(2.0))])),
        assign(field(ident("o"), "c"), num(3.0)),
        method(ident("o"), "keys", vec![]),
    ];
    let Value::Array(keys) = eval(&program) else {
        panic!("expected array");
    };
    let keys = keys.borrow();
    assert_eq!(
        keys.as_slice(),
        &[
            Value::string("b"),
            Value::string("a"),
            Value::string("c")
        ]
    );
}

// ===== Arrays =====

#[test]
fn test_array_read_write() {
    let program = [
        var("xs", array(vec![num(1.0), num(2.0), num(3.0)])),
        assign(index(ident("xs"), num(1.0)), num(20.0)),
        index(ident("xs"), num(1.0)),
    ];
    assert_eq!(eval(&program), Value::Number(20.0));
}

#[test]
fn test_array_out_of_range_read_is_undefined() {
    let program = [
        var("xs", array(vec![num(1.0)])),
        var("i", num(9.0)),
        index(ident("xs"), ident("i")),
    ];
    assert_eq!(eval(&program), Value::Undefined);
}

#[test]
fn test_array_write_past_end_extends() {
    // Chosen policy: writes at index >= len extend, gap filled with
    // undefined.
    let program = [
        var("xs", array(vec![num(1.0)])),
        var("i", num(3.0)),
        assign(index(ident("xs"), ident("i")), num(4.0)),
        array(vec![
            method(ident("xs"), "len", vec![]),
            index(ident("xs"), num(1.0)),
            index(ident("xs"), num(3.0)),
        ]),
    ];
    let Value::Array(items) = eval(&program) else {
        panic!("expected array");
    };
    let items = items.borrow();
    assert_eq!(items[0], Value::Number(4.0));
    assert_eq!(items[1], Value::Undefined);
    assert_eq!(items[2], Value::Number(4.0));
}

#[test]
fn test_negative_array_write_fails() {
    let program = [
        var("xs", array(vec![num(1.0)])),
        var("i", num(-1.0)),
        assign(index(ident("xs"), ident("i")), num(4.0)),
    ];
    assert!(execute(&program).is_err());
}

#[test]
fn test_array_add_and_len() {
    let program = [
        var("xs", array(vec![])),
        method(ident("xs"), "add", vec![num(1.0)]),
        method(ident("xs"), "add", vec![num(2.0)]),
        method(ident("xs"), "len", vec![]),
    ];
    assert_eq!(eval(&program), Value::Number(2.0));
}

#[test]
fn test_string_indexing() {
    let program = [
        var("s", text("abc")),
        var("i", num(1.0)),
        index(ident("s"), ident("i")),
    ];
    assert_eq!(eval(&program), Value::string("b"));

    let program = [
        var("s", text("abc")),
        var("i", num(7.0)),
        index(ident("s"), ident("i")),
    ];
    assert_eq!(eval(&program), Value::Undefined);
}

#[test]
fn test_string_len() {
    let program = [var("s", text("héllo")), method(ident("s"), "len", vec![])];
    assert_eq!(eval(&program), Value::Number(5.0));
}

// ===== Meta-methods =====

#[test]
fn test_add_meta_method() {
    // proto.__add = fun(a, b) -> 42; o + 1 dispatches through the chain.
    let program = [
        var(
            "proto",
            object(vec![("__add", func(None, &["a", "b"], vec![num(42.0)]))]),
        ),
        var("o", object(vec![])),
        method(ident("o"), "setPrototype", vec![ident("proto")]),
        bin(BinaryOp::Add, ident("o"), num(1.0)),
    ];
    assert_eq!(eval(&program), Value::Number(42.0));
}

#[test]
fn test_eq_meta_method() {
    // __eq compares the `v` fields.
    let eq_fn = func(
        None,
        &["a", "b"],
        vec![bin(
            BinaryOp::Eq,
            field(ident("a"), "v"),
            field(ident("b"), "v"),
        )],
    );
    let program = [
        var("proto", object(vec![("__eq", eq_fn)])),
        var("a", object(vec![("v", num(1.0))])),
        var("b", object(vec![("v", num(1.0))])),
        method(ident("a"), "setPrototype", vec![ident("proto")]),
        bin(BinaryOp::Eq, ident("a"), ident("b")),
    ];
    assert_eq!(eval(&program), Value::Boolean(true));
}

#[test]
fn test_index_meta_methods() {
    // __getIndex doubles the key; __setIndex records into a backing field.
    let get_fn = func(
        None,
        &["self", "k"],
        vec![bin(BinaryOp::Mul, ident("k"), num(2.0))],
    );
    let program = [
        var("proto", object(vec![("__getIndex", get_fn)])),
        var("o", object(vec![])),
        method(ident("o"), "setPrototype", vec![ident("proto")]),
        var("i", num(21.0)),
        index(ident("o"), ident("i")),
    ];
    assert_eq!(eval(&program), Value::Number(42.0));
}

#[test]
fn test_call_meta_method() {
    let call_fn = func(
        None,
        &["self", "x"],
        vec![bin(BinaryOp::Add, field(ident("self"), "base"), ident("x"))],
    );
    let program = [
        var("proto", object(vec![("__call", call_fn)])),
        var("o", object(vec![("base", num(10.0))])),
        method(ident("o"), "setPrototype", vec![ident("proto")]),
        call(ident("o"), vec![num(5.0)]),
    ];
    assert_eq!(eval(&program), Value::Number(15.0));
}

#[test]
fn test_object_keyed_by_number() {
    let program = [
        var("o", object(vec![])),
        var("k", num(2.5)),
        assign(index(ident("o"), ident("k")), text("v")),
        index(ident("o"), ident("k")),
    ];
    assert_eq!(eval(&program), Value::string("v"));
}
