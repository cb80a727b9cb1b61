//! Instruction set definitions for the kestrel VM.
//!
//! Opcodes are a single byte and split into three bands: executable opcodes
//! in `[0, 200)`, the label pseudo-op at `200`, and debug/meta pseudo-ops
//! above `200` that are erased during linking.
//!
//! Operands follow the opcode byte inline, little-endian: `u32` for
//! constant/string/function indices and jump targets (absolute byte
//! offsets), `u16` for local/arg/upvalue slots and argument counts. The
//! opcode byte and its first operand form one unit, so hot instructions are
//! five bytes (1 byte op + 4 byte index). Pseudo-ops have encoded length 0.

use crate::error::VmError;
use std::fmt;

/// Virtual machine opcode byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    // ===== Stack shuffling =====
    Dup = 0,
    Dup2 = 1,
    Drop = 2,
    Swap = 3,
    /// Rotate the top three values so the top sinks beneath the next two:
    /// `a b c` becomes `c a b`.
    Swap1For2 = 4,

    // ===== Constants =====
    LdUndef = 10,
    LdNull = 11,
    LdTrue = 12,
    LdFalse = 13,
    /// Push number constant k.
    LdNum = 14,
    /// Push string constant k.
    LdStr = 15,

    // ===== Globals =====
    /// Push the global object.
    LdGlobal = 16,
    /// Push field k of the global object.
    LdGlobalFld = 17,

    // ===== Locals / args =====
    LdLocF = 20,
    StLocF = 21,
    LdArgF = 22,
    StArgF = 23,
    /// In-place increment of a numeric local.
    IncF = 24,
    /// In-place decrement of a numeric local.
    DecF = 25,
    /// Detach the shared upvalue cell of a local slot, syncing its value
    /// back into the raw slot. Emitted when the lexical scope that declared
    /// a captured local exits.
    CloseLoc = 26,

    // ===== Fields / indexing =====
    LdFld = 30,
    StFld = 31,
    /// Pops index and container, pushes the element.
    LdArr = 32,
    /// Pops value, index and container.
    StArr = 33,
    /// Static index into a popped container.
    LdArrF = 34,
    StArrF = 35,

    // ===== Upvalues =====
    /// Push the currently-executing function (descriptor + upvalue array).
    LdUp = 40,
    LdUpValue = 41,
    StUpValue = 42,

    // ===== Sequences =====
    /// Pop a sequence object, resume it one step, push whether it yielded.
    SeqResume = 45,
    /// Pop the yielded value and suspend the current sequence frame.
    SeqSuspend = 46,

    // ===== Constructors =====
    NewObject = 50,
    /// Pop n elements into a fresh array.
    NewArray = 51,
    /// Pop end, start and container; push the sub-range.
    Slice = 52,

    // ===== Arithmetic =====
    Add = 60,
    Sub = 61,
    Mul = 62,
    Div = 63,
    Mod = 64,
    Exp = 65,
    Neg = 66,

    // ===== Comparison =====
    Eq = 70,
    Neq = 71,
    Gt = 72,
    Gte = 73,
    Lt = 74,
    Lte = 75,

    // ===== Logical / bitwise =====
    Not = 80,
    BitLShift = 81,
    BitRShift = 82,
    BitAnd = 83,
    BitOr = 84,
    BitXor = 85,
    BitNot = 86,

    // ===== Membership =====
    In = 90,
    NotIn = 91,

    // ===== Control =====
    Jmp = 100,
    /// Pop the condition and jump when truthy.
    JmpTrue = 101,
    /// Pop the condition and jump when falsy.
    JmpFalse = 102,
    /// Peek the condition and jump when truthy (short-circuit `||`).
    JmpTrueP = 103,
    /// Peek the condition and jump when falsy (short-circuit `&&`).
    JmpFalseP = 104,
    /// Dense switch: base, count, default target, count jump targets.
    JmpTable = 105,

    // ===== Calls =====
    /// Build a closure over function k, capturing per its descriptor.
    Closure = 110,
    Call = 111,
    /// Replace the current frame instead of pushing a new one.
    TailCall = 112,
    /// Evaluate the receiver once, dispatch method k with the receiver as
    /// first argument.
    InstanceCall = 113,
    /// Function prologue: clear the frame's locals and open cells.
    Enter = 114,
    /// Pop the return value and leave the frame.
    Ret = 115,
    /// Push the trailing-argument array bound at call time.
    VarArgs = 116,

    // ===== Errors =====
    /// Pop a value and raise it.
    Throw = 120,

    // ===== Debug =====
    Breakpoint = 130,
    /// Break only if a debugger is attached and wants to stop here.
    DebugCheckpoint = 131,

    // ===== Pseudo-ops (erased during linking) =====
    Label = 200,
    MetaStatement = 201,
    MetaPos = 202,
    MetaScopeOpen = 203,
    MetaScopeClose = 204,
    MetaLocal = 205,
    MetaFuncName = 206,
}

impl OpCode {
    /// Get opcode from byte value
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(OpCode::Dup),
            1 => Some(OpCode::Dup2),
            2 => Some(OpCode::Drop),
            3 => Some(OpCode::Swap),
            4 => Some(OpCode::Swap1For2),
            10 => Some(OpCode::LdUndef),
            11 => Some(OpCode::LdNull),
            12 => Some(OpCode::LdTrue),
            13 => Some(OpCode::LdFalse),
            14 => Some(OpCode::LdNum),
            15 => Some(OpCode::LdStr),
            16 => Some(OpCode::LdGlobal),
            17 => Some(OpCode::LdGlobalFld),
            20 => Some(OpCode::LdLocF),
            21 => Some(OpCode::StLocF),
            22 => Some(OpCode::LdArgF),
            23 => Some(OpCode::StArgF),
            24 => Some(OpCode::IncF),
            25 => Some(OpCode::DecF),
            26 => Some(OpCode::CloseLoc),
            30 => Some(OpCode::LdFld),
            31 => Some(OpCode::StFld),
            32 => Some(OpCode::LdArr),
            33 => Some(OpCode::StArr),
            34 => Some(OpCode::LdArrF),
            35 => Some(OpCode::StArrF),
            40 => Some(OpCode::LdUp),
            41 => Some(OpCode::LdUpValue),
            42 => Some(OpCode::StUpValue),
            45 => Some(OpCode::SeqResume),
            46 => Some(OpCode::SeqSuspend),
            50 => Some(OpCode::NewObject),
            51 => Some(OpCode::NewArray),
            52 => Some(OpCode::Slice),
            60 => Some(OpCode::Add),
            61 => Some(OpCode::Sub),
            62 => Some(OpCode::Mul),
            63 => Some(OpCode::Div),
            64 => Some(OpCode::Mod),
            65 => Some(OpCode::Exp),
            66 => Some(OpCode::Neg),
            70 => Some(OpCode::Eq),
            71 => Some(OpCode::Neq),
            72 => Some(OpCode::Gt),
            73 => Some(OpCode::Gte),
            74 => Some(OpCode::Lt),
            75 => Some(OpCode::Lte),
            80 => Some(OpCode::Not),
            81 => Some(OpCode::BitLShift),
            82 => Some(OpCode::BitRShift),
            83 => Some(OpCode::BitAnd),
            84 => Some(OpCode::BitOr),
            85 => Some(OpCode::BitXor),
            86 => Some(OpCode::BitNot),
            90 => Some(OpCode::In),
            91 => Some(OpCode::NotIn),
            100 => Some(OpCode::Jmp),
            101 => Some(OpCode::JmpTrue),
            102 => Some(OpCode::JmpFalse),
            103 => Some(OpCode::JmpTrueP),
            104 => Some(OpCode::JmpFalseP),
            105 => Some(OpCode::JmpTable),
            110 => Some(OpCode::Closure),
            111 => Some(OpCode::Call),
            112 => Some(OpCode::TailCall),
            113 => Some(OpCode::InstanceCall),
            114 => Some(OpCode::Enter),
            115 => Some(OpCode::Ret),
            116 => Some(OpCode::VarArgs),
            120 => Some(OpCode::Throw),
            130 => Some(OpCode::Breakpoint),
            131 => Some(OpCode::DebugCheckpoint),
            200 => Some(OpCode::Label),
            201 => Some(OpCode::MetaStatement),
            202 => Some(OpCode::MetaPos),
            203 => Some(OpCode::MetaScopeOpen),
            204 => Some(OpCode::MetaScopeClose),
            205 => Some(OpCode::MetaLocal),
            206 => Some(OpCode::MetaFuncName),
            _ => None,
        }
    }

    /// Convert opcode to byte value
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Pseudo-ops never reach the linked instruction stream.
    pub fn is_pseudo(self) -> bool {
        self.as_u8() >= OpCode::Label.as_u8()
    }

    /// Get human-readable name
    pub fn name(self) -> &'static str {
        match self {
            OpCode::Dup => "DUP",
            OpCode::Dup2 => "DUP2",
            OpCode::Drop => "DROP",
            OpCode::Swap => "SWAP",
            OpCode::Swap1For2 => "SWAP_1_FOR_2",
            OpCode::LdUndef => "LD_UNDEF",
            OpCode::LdNull => "LD_NULL",
            OpCode::LdTrue => "LD_TRUE",
            OpCode::LdFalse => "LD_FALSE",
            OpCode::LdNum => "LD_NUM",
            OpCode::LdStr => "LD_STR",
            OpCode::LdGlobal => "LD_GLOBAL",
            OpCode::LdGlobalFld => "LD_GLOBAL_FLD",
            OpCode::LdLocF => "LD_LOC_F",
            OpCode::StLocF => "ST_LOC_F",
            OpCode::LdArgF => "LD_ARG_F",
            OpCode::StArgF => "ST_ARG_F",
            OpCode::IncF => "INC_F",
            OpCode::DecF => "DEC_F",
            OpCode::CloseLoc => "CLOSE_LOC",
            OpCode::LdFld => "LD_FLD",
            OpCode::StFld => "ST_FLD",
            OpCode::LdArr => "LD_ARR",
            OpCode::StArr => "ST_ARR",
            OpCode::LdArrF => "LD_ARR_F",
            OpCode::StArrF => "ST_ARR_F",
            OpCode::LdUp => "LD_UP",
            OpCode::LdUpValue => "LD_UP_VALUE",
            OpCode::StUpValue => "ST_UP_VALUE",
            OpCode::SeqResume => "SEQ_RESUME",
            OpCode::SeqSuspend => "SEQ_SUSPEND",
            OpCode::NewObject => "NEW_OBJECT",
            OpCode::NewArray => "NEW_ARRAY",
            OpCode::Slice => "SLICE",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Div => "DIV",
            OpCode::Mod => "MOD",
            OpCode::Exp => "EXP",
            OpCode::Neg => "NEG",
            OpCode::Eq => "EQ",
            OpCode::Neq => "NEQ",
            OpCode::Gt => "GT",
            OpCode::Gte => "GTE",
            OpCode::Lt => "LT",
            OpCode::Lte => "LTE",
            OpCode::Not => "NOT",
            OpCode::BitLShift => "BIT_LSHIFT",
            OpCode::BitRShift => "BIT_RSHIFT",
            OpCode::BitAnd => "BIT_AND",
            OpCode::BitOr => "BIT_OR",
            OpCode::BitXor => "BIT_XOR",
            OpCode::BitNot => "BIT_NOT",
            OpCode::In => "IN",
            OpCode::NotIn => "NOT_IN",
            OpCode::Jmp => "JMP",
            OpCode::JmpTrue => "JMP_TRUE",
            OpCode::JmpFalse => "JMP_FALSE",
            OpCode::JmpTrueP => "JMP_TRUE_P",
            OpCode::JmpFalseP => "JMP_FALSE_P",
            OpCode::JmpTable => "JMP_TABLE",
            OpCode::Closure => "CLOSURE",
            OpCode::Call => "CALL",
            OpCode::TailCall => "TAIL_CALL",
            OpCode::InstanceCall => "INSTANCE_CALL",
            OpCode::Enter => "ENTER",
            OpCode::Ret => "RET",
            OpCode::VarArgs => "VAR_ARGS",
            OpCode::Throw => "THROW",
            OpCode::Breakpoint => "BREAKPOINT",
            OpCode::DebugCheckpoint => "DEBUG_CHECKPOINT",
            OpCode::Label => "LABEL",
            OpCode::MetaStatement => "META_STATEMENT",
            OpCode::MetaPos => "META_POS",
            OpCode::MetaScopeOpen => "META_SCOPE_OPEN",
            OpCode::MetaScopeClose => "META_SCOPE_CLOSE",
            OpCode::MetaLocal => "META_LOCAL",
            OpCode::MetaFuncName => "META_FUNC_NAME",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Operand encoding/decoding utilities
pub mod encoding {
    use crate::error::VmError;

    #[inline]
    pub fn write_u16(out: &mut Vec<u8>, v: u16) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn write_u32(out: &mut Vec<u8>, v: u32) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn write_i32(out: &mut Vec<u8>, v: i32) {
        out.extend_from_slice(&v.to_le_bytes());
    }

    #[inline]
    pub fn read_u16(bytes: &[u8], at: usize) -> Result<u16, VmError> {
        let slice = bytes
            .get(at..at + 2)
            .ok_or_else(|| VmError::BadImage("truncated u16 operand".to_string()))?;
        Ok(u16::from_le_bytes([slice[0], slice[1]]))
    }

    #[inline]
    pub fn read_u32(bytes: &[u8], at: usize) -> Result<u32, VmError> {
        let slice = bytes
            .get(at..at + 4)
            .ok_or_else(|| VmError::BadImage("truncated u32 operand".to_string()))?;
        Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
    }

    #[inline]
    pub fn read_i32(bytes: &[u8], at: usize) -> Result<i32, VmError> {
        Ok(read_u32(bytes, at)? as i32)
    }
}

/// A single instruction in symbolic form.
///
/// The code generator emits these with label identifiers in the jump
/// operands; the linker assigns byte offsets, erases `Label` and the meta
/// pseudo-ops, and serializes the rest. The decoded form of a linked stream
/// uses the same type with resolved offsets.
#[derive(Debug, Clone, PartialEq)]
pub enum Ins {
    Dup,
    Dup2,
    Drop,
    Swap,
    Swap1For2,
    LdUndef,
    LdNull,
    LdTrue,
    LdFalse,
    LdNum(u32),
    LdStr(u32),
    LdGlobal,
    LdGlobalFld(u32),
    LdLocF(u16),
    StLocF(u16),
    LdArgF(u16),
    StArgF(u16),
    IncF(u16),
    DecF(u16),
    CloseLoc(u16),
    LdFld(u32),
    StFld(u32),
    LdArr,
    StArr,
    LdArrF(u32),
    StArrF(u32),
    LdUp,
    LdUpValue(u16),
    StUpValue(u16),
    SeqResume,
    SeqSuspend,
    NewObject,
    NewArray(u32),
    Slice,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Exp,
    Neg,
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Not,
    BitLShift,
    BitRShift,
    BitAnd,
    BitOr,
    BitXor,
    BitNot,
    In,
    NotIn,
    Jmp(u32),
    JmpTrue(u32),
    JmpFalse(u32),
    JmpTrueP(u32),
    JmpFalseP(u32),
    JmpTable {
        base: i32,
        default: u32,
        targets: Vec<u32>,
    },
    Closure(u32),
    Call(u16),
    TailCall(u16),
    InstanceCall {
        name: u32,
        argc: u16,
    },
    Enter(u16),
    Ret,
    VarArgs(u16),
    Throw,
    Breakpoint,
    DebugCheckpoint,
    Label(u32),
    MetaStatement(u32),
    MetaPos(u32),
    MetaScopeOpen,
    MetaScopeClose,
    MetaLocal {
        slot: u16,
        name: u32,
    },
    MetaFuncName(u32),
}

impl Ins {
    pub fn opcode(&self) -> OpCode {
        match self {
            Ins::Dup => OpCode::Dup,
            Ins::Dup2 => OpCode::Dup2,
            Ins::Drop => OpCode::Drop,
            Ins::Swap => OpCode::Swap,
            Ins::Swap1For2 => OpCode::Swap1For2,
            Ins::LdUndef => OpCode::LdUndef,
            Ins::LdNull => OpCode::LdNull,
            Ins::LdTrue => OpCode::LdTrue,
            Ins::LdFalse => OpCode::LdFalse,
            Ins::LdNum(_) => OpCode::LdNum,
            Ins::LdStr(_) => OpCode::LdStr,
            Ins::LdGlobal => OpCode::LdGlobal,
            Ins::LdGlobalFld(_) => OpCode::LdGlobalFld,
            Ins::LdLocF(_) => OpCode::LdLocF,
            Ins::StLocF(_) => OpCode::StLocF,
            Ins::LdArgF(_) => OpCode::LdArgF,
            Ins::StArgF(_) => OpCode::StArgF,
            Ins::IncF(_) => OpCode::IncF,
            Ins::DecF(_) => OpCode::DecF,
            Ins::CloseLoc(_) => OpCode::CloseLoc,
            Ins::LdFld(_) => OpCode::LdFld,
            Ins::StFld(_) => OpCode::StFld,
            Ins::LdArr => OpCode::LdArr,
            Ins::StArr => OpCode::StArr,
            Ins::LdArrF(_) => OpCode::LdArrF,
            Ins::StArrF(_) => OpCode::StArrF,
            Ins::LdUp => OpCode::LdUp,
            Ins::LdUpValue(_) => OpCode::LdUpValue,
            Ins::StUpValue(_) => OpCode::StUpValue,
            Ins::SeqResume => OpCode::SeqResume,
            Ins::SeqSuspend => OpCode::SeqSuspend,
            Ins::NewObject => OpCode::NewObject,
            Ins::NewArray(_) => OpCode::NewArray,
            Ins::Slice => OpCode::Slice,
            Ins::Add => OpCode::Add,
            Ins::Sub => OpCode::Sub,
            Ins::Mul => OpCode::Mul,
            Ins::Div => OpCode::Div,
            Ins::Mod => OpCode::Mod,
            Ins::Exp => OpCode::Exp,
            Ins::Neg => OpCode::Neg,
            Ins::Eq => OpCode::Eq,
            Ins::Neq => OpCode::Neq,
            Ins::Gt => OpCode::Gt,
            Ins::Gte => OpCode::Gte,
            Ins::Lt => OpCode::Lt,
            Ins::Lte => OpCode::Lte,
            Ins::Not => OpCode::Not,
            Ins::BitLShift => OpCode::BitLShift,
            Ins::BitRShift => OpCode::BitRShift,
            Ins::BitAnd => OpCode::BitAnd,
            Ins::BitOr => OpCode::BitOr,
            Ins::BitXor => OpCode::BitXor,
            Ins::BitNot => OpCode::BitNot,
            Ins::In => OpCode::In,
            Ins::NotIn => OpCode::NotIn,
            Ins::Jmp(_) => OpCode::Jmp,
            Ins::JmpTrue(_) => OpCode::JmpTrue,
            Ins::JmpFalse(_) => OpCode::JmpFalse,
            Ins::JmpTrueP(_) => OpCode::JmpTrueP,
            Ins::JmpFalseP(_) => OpCode::JmpFalseP,
            Ins::JmpTable { .. } => OpCode::JmpTable,
            Ins::Closure(_) => OpCode::Closure,
            Ins::Call(_) => OpCode::Call,
            Ins::TailCall(_) => OpCode::TailCall,
            Ins::InstanceCall { .. } => OpCode::InstanceCall,
            Ins::Enter(_) => OpCode::Enter,
            Ins::Ret => OpCode::Ret,
            Ins::VarArgs(_) => OpCode::VarArgs,
            Ins::Throw => OpCode::Throw,
            Ins::Breakpoint => OpCode::Breakpoint,
            Ins::DebugCheckpoint => OpCode::DebugCheckpoint,
            Ins::Label(_) => OpCode::Label,
            Ins::MetaStatement(_) => OpCode::MetaStatement,
            Ins::MetaPos(_) => OpCode::MetaPos,
            Ins::MetaScopeOpen => OpCode::MetaScopeOpen,
            Ins::MetaScopeClose => OpCode::MetaScopeClose,
            Ins::MetaLocal { .. } => OpCode::MetaLocal,
            Ins::MetaFuncName(_) => OpCode::MetaFuncName,
        }
    }

    pub fn is_pseudo(&self) -> bool {
        self.opcode().is_pseudo()
    }

    /// Encoded length in bytes. Pseudo-ops are erased, length 0.
    pub fn encoded_len(&self) -> usize {
        if self.is_pseudo() {
            return 0;
        }
        match self {
            Ins::LdNum(_)
            | Ins::LdStr(_)
            | Ins::LdGlobalFld(_)
            | Ins::LdFld(_)
            | Ins::StFld(_)
            | Ins::LdArrF(_)
            | Ins::StArrF(_)
            | Ins::NewArray(_)
            | Ins::Jmp(_)
            | Ins::JmpTrue(_)
            | Ins::JmpFalse(_)
            | Ins::JmpTrueP(_)
            | Ins::JmpFalseP(_)
            | Ins::Closure(_) => 5,
            Ins::LdLocF(_)
            | Ins::StLocF(_)
            | Ins::LdArgF(_)
            | Ins::StArgF(_)
            | Ins::IncF(_)
            | Ins::DecF(_)
            | Ins::CloseLoc(_)
            | Ins::LdUpValue(_)
            | Ins::StUpValue(_)
            | Ins::Call(_)
            | Ins::TailCall(_)
            | Ins::Enter(_)
            | Ins::VarArgs(_) => 3,
            Ins::InstanceCall { .. } => 7,
            Ins::JmpTable { targets, .. } => 13 + 4 * targets.len(),
            _ => 1,
        }
    }

    /// Append the encoded form. Pseudo-ops encode to nothing.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        use encoding::*;

        if self.is_pseudo() {
            return;
        }
        out.push(self.opcode().as_u8());
        match self {
            Ins::LdNum(k)
            | Ins::LdStr(k)
            | Ins::LdGlobalFld(k)
            | Ins::LdFld(k)
            | Ins::StFld(k)
            | Ins::LdArrF(k)
            | Ins::StArrF(k)
            | Ins::NewArray(k)
            | Ins::Jmp(k)
            | Ins::JmpTrue(k)
            | Ins::JmpFalse(k)
            | Ins::JmpTrueP(k)
            | Ins::JmpFalseP(k)
            | Ins::Closure(k) => write_u32(out, *k),
            Ins::LdLocF(s)
            | Ins::StLocF(s)
            | Ins::LdArgF(s)
            | Ins::StArgF(s)
            | Ins::IncF(s)
            | Ins::DecF(s)
            | Ins::CloseLoc(s)
            | Ins::LdUpValue(s)
            | Ins::StUpValue(s)
            | Ins::Call(s)
            | Ins::TailCall(s)
            | Ins::Enter(s)
            | Ins::VarArgs(s) => write_u16(out, *s),
            Ins::InstanceCall { name, argc } => {
                write_u32(out, *name);
                write_u16(out, *argc);
            }
            Ins::JmpTable {
                base,
                default,
                targets,
            } => {
                write_i32(out, *base);
                write_u32(out, targets.len() as u32);
                write_u32(out, *default);
                for target in targets {
                    write_u32(out, *target);
                }
            }
            _ => {}
        }
    }

    /// Decode one instruction at `at`, returning it with the offset of the
    /// next one.
    pub fn decode(bytes: &[u8], at: usize) -> Result<(Ins, usize), VmError> {
        use encoding::*;

        let byte = *bytes
            .get(at)
            .ok_or_else(|| VmError::BadImage("truncated instruction stream".to_string()))?;
        let opcode = OpCode::from_u8(byte).ok_or(VmError::InvalidOpcode(byte))?;
        let operands = at + 1;

        let ins = match opcode {
            OpCode::Dup => Ins::Dup,
            OpCode::Dup2 => Ins::Dup2,
            OpCode::Drop => Ins::Drop,
            OpCode::Swap => Ins::Swap,
            OpCode::Swap1For2 => Ins::Swap1For2,
            OpCode::LdUndef => Ins::LdUndef,
            OpCode::LdNull => Ins::LdNull,
            OpCode::LdTrue => Ins::LdTrue,
            OpCode::LdFalse => Ins::LdFalse,
            OpCode::LdNum => Ins::LdNum(read_u32(bytes, operands)?),
            OpCode::LdStr => Ins::LdStr(read_u32(bytes, operands)?),
            OpCode::LdGlobal => Ins::LdGlobal,
            OpCode::LdGlobalFld => Ins::LdGlobalFld(read_u32(bytes, operands)?),
            OpCode::LdLocF => Ins::LdLocF(read_u16(bytes, operands)?),
            OpCode::StLocF => Ins::StLocF(read_u16(bytes, operands)?),
            OpCode::LdArgF => Ins::LdArgF(read_u16(bytes, operands)?),
            OpCode::StArgF => Ins::StArgF(read_u16(bytes, operands)?),
            OpCode::IncF => Ins::IncF(read_u16(bytes, operands)?),
            OpCode::DecF => Ins::DecF(read_u16(bytes, operands)?),
            OpCode::CloseLoc => Ins::CloseLoc(read_u16(bytes, operands)?),
            OpCode::LdFld => Ins::LdFld(read_u32(bytes, operands)?),
            OpCode::StFld => Ins::StFld(read_u32(bytes, operands)?),
            OpCode::LdArr => Ins::LdArr,
            OpCode::StArr => Ins::StArr,
            OpCode::LdArrF => Ins::LdArrF(read_u32(bytes, operands)?),
            OpCode::StArrF => Ins::StArrF(read_u32(bytes, operands)?),
            OpCode::LdUp => Ins::LdUp,
            OpCode::LdUpValue => Ins::LdUpValue(read_u16(bytes, operands)?),
            OpCode::StUpValue => Ins::StUpValue(read_u16(bytes, operands)?),
            OpCode::SeqResume => Ins::SeqResume,
            OpCode::SeqSuspend => Ins::SeqSuspend,
            OpCode::NewObject => Ins::NewObject,
            OpCode::NewArray => Ins::NewArray(read_u32(bytes, operands)?),
            OpCode::Slice => Ins::Slice,
            OpCode::Add => Ins::Add,
            OpCode::Sub => Ins::Sub,
            OpCode::Mul => Ins::Mul,
            OpCode::Div => Ins::Div,
            OpCode::Mod => Ins::Mod,
            OpCode::Exp => Ins::Exp,
            OpCode::Neg => Ins::Neg,
            OpCode::Eq => Ins::Eq,
            OpCode::Neq => Ins::Neq,
            OpCode::Gt => Ins::Gt,
            OpCode::Gte => Ins::Gte,
            OpCode::Lt => Ins::Lt,
            OpCode::Lte => Ins::Lte,
            OpCode::Not => Ins::Not,
            OpCode::BitLShift => Ins::BitLShift,
            OpCode::BitRShift => Ins::BitRShift,
            OpCode::BitAnd => Ins::BitAnd,
            OpCode::BitOr => Ins::BitOr,
            OpCode::BitXor => Ins::BitXor,
            OpCode::BitNot => Ins::BitNot,
            OpCode::In => Ins::In,
            OpCode::NotIn => Ins::NotIn,
            OpCode::Jmp => Ins::Jmp(read_u32(bytes, operands)?),
            OpCode::JmpTrue => Ins::JmpTrue(read_u32(bytes, operands)?),
            OpCode::JmpFalse => Ins::JmpFalse(read_u32(bytes, operands)?),
            OpCode::JmpTrueP => Ins::JmpTrueP(read_u32(bytes, operands)?),
            OpCode::JmpFalseP => Ins::JmpFalseP(read_u32(bytes, operands)?),
            OpCode::JmpTable => {
                let base = read_i32(bytes, operands)?;
                let count = read_u32(bytes, operands + 4)? as usize;
                let default = read_u32(bytes, operands + 8)?;
                let mut targets = Vec::with_capacity(count);
                for i in 0..count {
                    targets.push(read_u32(bytes, operands + 12 + 4 * i)?);
                }
                Ins::JmpTable {
                    base,
                    default,
                    targets,
                }
            }
            OpCode::Closure => Ins::Closure(read_u32(bytes, operands)?),
            OpCode::Call => Ins::Call(read_u16(bytes, operands)?),
            OpCode::TailCall => Ins::TailCall(read_u16(bytes, operands)?),
            OpCode::InstanceCall => Ins::InstanceCall {
                name: read_u32(bytes, operands)?,
                argc: read_u16(bytes, operands + 4)?,
            },
            OpCode::Enter => Ins::Enter(read_u16(bytes, operands)?),
            OpCode::Ret => Ins::Ret,
            OpCode::VarArgs => Ins::VarArgs(read_u16(bytes, operands)?),
            OpCode::Throw => Ins::Throw,
            OpCode::Breakpoint => Ins::Breakpoint,
            OpCode::DebugCheckpoint => Ins::DebugCheckpoint,
            // Pseudo-ops are erased during linking and never decoded.
            OpCode::Label
            | OpCode::MetaStatement
            | OpCode::MetaPos
            | OpCode::MetaScopeOpen
            | OpCode::MetaScopeClose
            | OpCode::MetaLocal
            | OpCode::MetaFuncName => return Err(VmError::InvalidOpcode(byte)),
        };

        let len = ins.encoded_len();
        Ok((ins, at + len))
    }
}

/// Decode a full linked instruction stream into `(offset, instruction)`
/// pairs.
pub fn decode_stream(bytes: &[u8]) -> Result<Vec<(usize, Ins)>, VmError> {
    let mut out = Vec::new();
    let mut at = 0;
    while at < bytes.len() {
        let (ins, next) = Ins::decode(bytes, at)?;
        out.push((at, ins));
        at = next;
    }
    Ok(out)
}

/// Re-encode a decoded stream; `decode` then `encode` round-trips.
pub fn encode_stream(instructions: &[Ins]) -> Vec<u8> {
    let mut out = Vec::new();
    for ins in instructions {
        ins.encode_into(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_conversion() {
        assert_eq!(OpCode::Add.as_u8(), 60);
        assert_eq!(OpCode::from_u8(60), Some(OpCode::Add));
        assert_eq!(OpCode::from_u8(200), Some(OpCode::Label));
        assert_eq!(OpCode::from_u8(199), None);
    }

    #[test]
    fn test_bands() {
        assert!(!OpCode::Throw.is_pseudo());
        assert!(!OpCode::DebugCheckpoint.is_pseudo());
        assert!(OpCode::Label.is_pseudo());
        assert!(OpCode::MetaFuncName.is_pseudo());
    }

    #[test]
    fn test_encoded_lengths() {
        assert_eq!(Ins::Ret.encoded_len(), 1);
        assert_eq!(Ins::LdNum(7).encoded_len(), 5);
        assert_eq!(Ins::StLocF(3).encoded_len(), 3);
        assert_eq!(Ins::InstanceCall { name: 0, argc: 2 }.encoded_len(), 7);
        assert_eq!(Ins::Label(9).encoded_len(), 0);
        assert_eq!(Ins::MetaPos(10).encoded_len(), 0);
        assert_eq!(
            Ins::JmpTable {
                base: -1,
                default: 0,
                targets: vec![0, 0, 0],
            }
            .encoded_len(),
            25
        );
    }

    #[test]
    fn test_stream_round_trip() {
        let program = vec![
            Ins::Enter(2),
            Ins::LdNum(0),
            Ins::StLocF(0),
            Ins::LdLocF(0),
            Ins::LdNum(1),
            Ins::Add,
            Ins::JmpFalse(21),
            Ins::InstanceCall { name: 4, argc: 1 },
            Ins::JmpTable {
                base: -2,
                default: 21,
                targets: vec![21, 22],
            },
            Ins::Ret,
        ];

        let bytes = encode_stream(&program);
        let decoded = decode_stream(&bytes).unwrap();
        let instructions: Vec<Ins> = decoded.into_iter().map(|(_, ins)| ins).collect();
        assert_eq!(instructions, program);
        assert_eq!(encode_stream(&instructions), bytes);
    }

    #[test]
    fn test_pseudo_ops_encode_to_nothing() {
        let bytes = encode_stream(&[
            Ins::Label(3),
            Ins::MetaStatement(1),
            Ins::LdTrue,
            Ins::MetaScopeOpen,
        ]);
        assert_eq!(bytes, vec![OpCode::LdTrue.as_u8()]);
    }

    #[test]
    fn test_decode_rejects_unknown_opcode() {
        assert!(matches!(
            Ins::decode(&[199], 0),
            Err(VmError::InvalidOpcode(199))
        ));
    }
}
