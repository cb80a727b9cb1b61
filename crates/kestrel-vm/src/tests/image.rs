//! Program image properties: stream round-trips, binary serialization,
//! disassembly.

use super::helpers::*;
use crate::bytecode::ProgramImage;
use crate::bytecode_debug::disassemble_image;
use crate::opcode::{decode_stream, encode_stream};
use crate::value::Value;
use crate::vm::VM;
use kestrel_ast::BinaryOp;
use std::rc::Rc;

fn sample_program() -> Vec<Node> {
    vec![
        var("o", object(vec![("x", num(1.0))])),
        var(
            "f",
            func(
                None,
                &["a"],
                vec![ret(bin(
                    BinaryOp::Add,
                    ident("a"),
                    field(ident("o"), "x"),
                ))],
            ),
        ),
        call(ident("f"), vec![num(41.0)]),
    ]
}

use kestrel_ast::Node;

#[test]
fn test_decode_encode_round_trips_compiled_bytecode() {
    let image = compile(&sample_program());
    let decoded = decode_stream(&image.bytecode).unwrap();
    let instructions: Vec<_> = decoded.into_iter().map(|(_, ins)| ins).collect();
    assert_eq!(encode_stream(&instructions), image.bytecode);
}

#[test]
fn test_serialized_image_executes_identically() {
    let image = compile(&sample_program());
    let direct = VM::new().execute(Rc::new(image.clone())).unwrap();

    let loaded = ProgramImage::from_bytes(&image.to_bytes()).unwrap();
    assert_eq!(loaded, image);
    let reloaded = VM::new().execute(Rc::new(loaded)).unwrap();

    assert_eq!(direct, Value::Number(42.0));
    assert_eq!(reloaded, direct);
}

#[test]
fn test_debug_tables_survive_serialization() {
    let image = compile(&sample_program());
    let debug = image.debug.as_ref().expect("debug emission is on");
    assert!(!debug.positions.is_empty());
    assert!(!debug.statements.is_empty());
    assert!(!debug.scopes.is_empty());
    assert!(!debug.function_names.is_empty());

    let loaded = ProgramImage::from_bytes(&image.to_bytes()).unwrap();
    assert_eq!(loaded.debug, image.debug);
}

#[test]
fn test_debug_emission_can_be_disabled() {
    let image = compile_plain(&sample_program());
    assert!(image.debug.is_none());
    // And the stripped image still runs.
    let result = VM::new().execute(Rc::new(image)).unwrap();
    assert_eq!(result, Value::Number(42.0));
}

#[test]
fn test_disassembly_mentions_the_expected_mnemonics() {
    let image = compile(&sample_program());
    let listing = disassemble_image(&image);
    for mnemonic in ["CLOSURE", "CALL", "LD_FLD", "RET", "ENTER", "ADD"] {
        assert!(listing.contains(mnemonic), "missing {}:\n{}", mnemonic, listing);
    }
    // Constant operands render inline.
    assert!(listing.contains("\"x\""));
}

#[test]
fn test_statement_ranges_cover_the_function() {
    let image = compile(&sample_program());
    let debug = image.debug.as_ref().unwrap();
    for (start, end, _line) in &debug.statements {
        assert!(start < end);
        assert!(*end as usize <= image.bytecode.len());
    }
}

#[test]
fn test_function_table_shape() {
    let image = compile(&sample_program());
    assert_eq!(image.functions.len(), 2);
    let main = &image.functions[0];
    assert_eq!(main.entry_offset, 0);
    let inner = &image.functions[1];
    assert_eq!(inner.num_args, 1);
    assert_eq!(inner.num_upvalues, 1);
    assert_eq!(
        inner.entry_offset as usize + inner.code_len as usize,
        image.bytecode.len()
    );
}
