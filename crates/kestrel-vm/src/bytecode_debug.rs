//! Bytecode debugging utilities

use crate::bytecode::ProgramImage;
use crate::opcode::Ins;
use std::fmt::Write;

/// Render a full image disassembly.
pub fn disassemble_image(image: &ProgramImage) -> String {
    let mut out = String::new();
    for (idx, _) in image.functions.iter().enumerate() {
        disassemble_function(image, idx as u32, &mut out);
    }
    out
}

/// Render one function of an image.
pub fn disassemble_function(image: &ProgramImage, func: u32, out: &mut String) {
    let Ok(desc) = image.descriptor(func) else {
        let _ = writeln!(out, "<invalid function #{}>", func);
        return;
    };
    let name = image
        .function_name(func)
        .unwrap_or_else(|| "<anonymous>".into());

    let _ = writeln!(out, "; ===== function #{} {} =====", func, name);
    let _ = writeln!(
        out,
        "; args={} locals={} upvalues={}{}{}",
        desc.num_args,
        desc.num_locals,
        desc.num_upvalues,
        if desc.has_varargs { " varargs" } else { "" },
        if desc.is_sequence { " sequence" } else { "" },
    );
    for (i, capture) in desc.captures.iter().enumerate() {
        let _ = writeln!(out, ";   upvalue[{}] <- {:?}", i, capture);
    }
    for handler in &desc.handlers {
        let _ = writeln!(
            out,
            ";   handler {:?} [{:04x}, {:04x}) -> {:04x}",
            handler.kind, handler.start, handler.end, handler.target
        );
    }

    let start = desc.entry_offset as usize;
    let end = start + desc.code_len as usize;
    let mut at = start;
    while at < end {
        match Ins::decode(&image.bytecode, at) {
            Ok((ins, next)) => {
                let _ = writeln!(out, "{:04x}  {}", at, render(image, &ins));
                at = next;
            }
            Err(err) => {
                let _ = writeln!(out, "{:04x}  <decode error: {}>", at, err);
                return;
            }
        }
    }
}

fn render(image: &ProgramImage, ins: &Ins) -> String {
    let name = ins.opcode().name();
    match ins {
        Ins::LdNum(k) => match image.number(*k as usize) {
            Ok(n) => format!("{:<14}k{}  ; {}", name, k, n),
            Err(_) => format!("{:<14}k{}  ; ???", name, k),
        },
        Ins::LdStr(k) | Ins::LdGlobalFld(k) | Ins::LdFld(k) | Ins::StFld(k) => {
            match image.string(*k as usize) {
                Ok(s) => format!("{:<14}k{}  ; {:?}", name, k, s),
                Err(_) => format!("{:<14}k{}  ; ???", name, k),
            }
        }
        Ins::LdArrF(k) | Ins::StArrF(k) | Ins::NewArray(k) => format!("{:<14}{}", name, k),
        Ins::Jmp(t) | Ins::JmpTrue(t) | Ins::JmpFalse(t) | Ins::JmpTrueP(t) | Ins::JmpFalseP(t) => {
            format!("{:<14}{:04x}", name, t)
        }
        Ins::JmpTable {
            base,
            default,
            targets,
        } => {
            let rendered: Vec<String> = targets.iter().map(|t| format!("{:04x}", t)).collect();
            format!(
                "{:<14}base={} default={:04x} [{}]",
                name,
                base,
                default,
                rendered.join(", ")
            )
        }
        Ins::Closure(f) => {
            let fname = image
                .function_name(*f)
                .unwrap_or_else(|| "<anonymous>".into());
            format!("{:<14}#{}  ; {}", name, f, fname)
        }
        Ins::InstanceCall { name: method, argc } => match image.string(*method as usize) {
            Ok(s) => format!("{:<14}{:?} argc={}", name, s, argc),
            Err(_) => format!("{:<14}k{} argc={}", name, method, argc),
        },
        Ins::LdLocF(s) | Ins::StLocF(s) | Ins::IncF(s) | Ins::DecF(s) | Ins::CloseLoc(s) => {
            format!("{:<14}L{}", name, s)
        }
        Ins::LdArgF(s) | Ins::StArgF(s) => format!("{:<14}A{}", name, s),
        Ins::LdUpValue(s) | Ins::StUpValue(s) => format!("{:<14}U{}", name, s),
        Ins::Call(argc) | Ins::TailCall(argc) | Ins::VarArgs(argc) => {
            format!("{:<14}{}", name, argc)
        }
        Ins::Enter(n) => format!("{:<14}{}", name, n),
        _ => name.to_string(),
    }
}
