//! Stack-machine instruction set.
//!
//! Every instruction is a fixed-size record. Which fields an opcode reads is
//! listed on the opcode itself; unused fields are zero / `Constant::Nil` /
//! `None`.
//!
//! Stack notation below: `[a b] -> [c]` means the instruction pops `a` and
//! `b` (with `b` on top) and pushes `c`. Local slots are not part of the
//! value stack.
//!
//! Open value counts: an expression producing a variable number of values
//! (a call with open results or `...`) pushes the values followed by their
//! count as an integer. A consumer whose count operand is `-(fixed + 1)`
//! pops that count and works on `fixed + count` values.
use crate::proto::Constant;
use lunette_core::string::StringId;
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Nop = 0,
    /// Pop `num_val` values.
    Pop,
    /// Push a copy of the value `num_val` places below the top.
    Copy,
    /// Swap the two topmost values.
    Swap,
    /// Push `value`.
    Literal,
    /// Instantiate child proto `num_val` as a closure and push it.
    Closure,
    /// Push a new table. `num_val`/`num_val2` are array/hash size hints.
    NewTable,
    /// `[t k v] -> [t]`, raw `t[k] = v`.
    TblInitN,
    /// `[t v1..vn] -> [t]`, raw `t[num_val + i] = vi`. `num_val2` is the count.
    TblInitI,
    /// Push local slot `num_val`.
    Local,
    /// Pop into local slot `num_val`.
    StoreLcl,
    /// Push upvalue `num_val`.
    UpValue,
    /// Pop into upvalue `num_val`.
    StoreUpv,
    /// Push the globals table.
    Env,
    /// `[o k] -> [o[k]]`.
    Index,
    /// `[o] -> [o[value]]`.
    IndexN,
    /// Pop `v`; then set `o[k] = v` where `k` is `num_val` places below the
    /// new top and `o` just under it.
    IndexSet,
    /// Pop `v`; then set `o[value] = v` where `o` is `num_val` places below
    /// the new top.
    IndexSetN,
    /// `[o] -> [o[value] o]` (method lookup).
    Method,
    /// `[f args..] -> [results..]`. `num_val` argument count, `num_val2`
    /// result count (`-1` for open).
    Call,
    /// Same as `Call` for a callee produced by `Method`.
    ThisCall,
    /// Call and return its results from the current function.
    TailCall,
    /// Return `num_val` values from the top of the stack.
    Ret,
    /// Jump to `num_val`.
    Jump,
    /// Pop; jump to `num_val` if falsy.
    Jf,
    /// Pop; jump to `num_val` if nil.
    JNil,
    /// If the top is truthy jump to `num_val` keeping it, else pop it.
    JtOrPop,
    /// If the top is falsy jump to `num_val` keeping it, else pop it.
    JfOrPop,
    /// Close upvalues and to-be-closed values from slot `num_val` up and
    /// clear slots `num_val..=num_val2`.
    Clean,
    /// Register slot `num_val` as to-be-closed.
    Tbc,
    /// `[start limit step] ->`. Set up numeric loop state at slots
    /// `num_val..num_val+4`; jump to `num_val2` if the loop does not run.
    ForPrep,
    /// Advance the numeric loop at slot `num_val`; jump to `num_val2` while
    /// it continues.
    ForLoop,
    /// Push `num_val` varargs (padded with nil), or all of them plus their
    /// count when `num_val` is `-1`.
    VarArgs,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Power,
    FloorDiv,
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    Concat,
    Eq,
    Less,
    LessEq,
    Not,
    Neg,
    Len,
    BitNot,
}

impl OpCode {
    pub const COUNT: u8 = OpCode::BitNot as u8 + 1;

    pub fn from_u8(b: u8) -> Option<OpCode> {
        if b < Self::COUNT {
            // SAFETY: OpCode is repr(u8) with contiguous discriminants from 0.
            Some(unsafe { std::mem::transmute::<u8, OpCode>(b) })
        } else {
            None
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OpCode::Nop => "NOP",
            OpCode::Pop => "POP",
            OpCode::Copy => "COPY",
            OpCode::Swap => "SWAP",
            OpCode::Literal => "LITERAL",
            OpCode::Closure => "CLOSURE",
            OpCode::NewTable => "NEWTABLE",
            OpCode::TblInitN => "TBLINITN",
            OpCode::TblInitI => "TBLINITI",
            OpCode::Local => "LOCAL",
            OpCode::StoreLcl => "STORELCL",
            OpCode::UpValue => "UPVALUE",
            OpCode::StoreUpv => "STOREUPV",
            OpCode::Env => "ENV",
            OpCode::Index => "INDEX",
            OpCode::IndexN => "INDEXN",
            OpCode::IndexSet => "INDEXSET",
            OpCode::IndexSetN => "INDEXSETN",
            OpCode::Method => "METHOD",
            OpCode::Call => "CALL",
            OpCode::ThisCall => "THISCALL",
            OpCode::TailCall => "TAILCALL",
            OpCode::Ret => "RET",
            OpCode::Jump => "JUMP",
            OpCode::Jf => "JF",
            OpCode::JNil => "JNIL",
            OpCode::JtOrPop => "JTORPOP",
            OpCode::JfOrPop => "JFORPOP",
            OpCode::Clean => "CLEAN",
            OpCode::Tbc => "TBC",
            OpCode::ForPrep => "FORPREP",
            OpCode::ForLoop => "FORLOOP",
            OpCode::VarArgs => "VARARGS",
            OpCode::Add => "ADD",
            OpCode::Sub => "SUB",
            OpCode::Mul => "MUL",
            OpCode::Div => "DIV",
            OpCode::Mod => "MOD",
            OpCode::Power => "POWER",
            OpCode::FloorDiv => "FLOORDIV",
            OpCode::BitAnd => "BAND",
            OpCode::BitOr => "BOR",
            OpCode::BitXor => "BXOR",
            OpCode::ShiftLeft => "SHL",
            OpCode::ShiftRight => "SHR",
            OpCode::Concat => "CONCAT",
            OpCode::Eq => "EQ",
            OpCode::Less => "LESS",
            OpCode::LessEq => "LESSEQ",
            OpCode::Not => "NOT",
            OpCode::Neg => "NEG",
            OpCode::Len => "LEN",
            OpCode::BitNot => "BNOT",
        }
    }

    /// Opcodes whose `num_val` is a code address.
    pub fn is_jump(self) -> bool {
        matches!(
            self,
            OpCode::Jump | OpCode::Jf | OpCode::JNil | OpCode::JtOrPop | OpCode::JfOrPop
        )
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a named operand refers to; used to word runtime errors
/// ("attempt to call a nil value (global 'f')").
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SymbolKind {
    Local = 0,
    Upvalue,
    Global,
    Field,
    Method,
    Constant,
}

impl SymbolKind {
    pub fn from_u8(b: u8) -> Option<SymbolKind> {
        Some(match b {
            0 => SymbolKind::Local,
            1 => SymbolKind::Upvalue,
            2 => SymbolKind::Global,
            3 => SymbolKind::Field,
            4 => SymbolKind::Method,
            5 => SymbolKind::Constant,
            _ => return None,
        })
    }

    pub fn describe(self) -> &'static str {
        match self {
            SymbolKind::Local => "local",
            SymbolKind::Upvalue => "upvalue",
            SymbolKind::Global => "global",
            SymbolKind::Field => "field",
            SymbolKind::Method => "method",
            SymbolKind::Constant => "constant",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SymbolName {
    pub kind: SymbolKind,
    pub name: StringId,
}

/// A single instruction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Instruction {
    pub op: OpCode,
    pub num_val: i32,
    pub num_val2: i32,
    pub value: Constant,
    pub symbol: Option<SymbolName>,
}

impl Instruction {
    pub fn new(op: OpCode) -> Self {
        Instruction {
            op,
            num_val: 0,
            num_val2: 0,
            value: Constant::Nil,
            symbol: None,
        }
    }

    pub fn with_num(op: OpCode, num_val: i32) -> Self {
        Instruction {
            num_val,
            ..Self::new(op)
        }
    }

    pub fn with_nums(op: OpCode, num_val: i32, num_val2: i32) -> Self {
        Instruction {
            num_val,
            num_val2,
            ..Self::new(op)
        }
    }

    pub fn with_value(op: OpCode, value: Constant) -> Self {
        Instruction {
            value,
            ..Self::new(op)
        }
    }

    pub fn symbol(mut self, kind: SymbolKind, name: StringId) -> Self {
        self.symbol = Some(SymbolName { kind, name });
        self
    }
}

/// Encode an open count (`fixed` values plus a trailing multi-value).
pub fn open_count(fixed: usize) -> i32 {
    -(fixed as i32 + 1)
}

/// Decode a count operand: `Ok(n)` for a fixed count, `Err(fixed)` for an
/// open one.
pub fn decode_count(num: i32) -> Result<usize, usize> {
    if num >= 0 {
        Ok(num as usize)
    } else {
        Err((!num) as usize)
    }
}
