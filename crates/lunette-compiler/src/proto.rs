/// Function prototype: compiled bytecode, nested prototypes and debug info.
use crate::opcode::Instruction;
use lunette_core::string::StringId;

/// An inline literal carried by an instruction.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub enum Constant {
    #[default]
    Nil,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(StringId),
}

impl Constant {
    pub fn as_string_id(self) -> Option<StringId> {
        match self {
            Constant::String(id) => Some(id),
            _ => None,
        }
    }
}

/// Description of an upvalue.
#[derive(Clone, Debug, PartialEq)]
pub struct UpvalDesc {
    pub name: StringId,
    /// True if captured from the enclosing function's locals, false if it is
    /// one of the enclosing function's upvalues.
    pub in_stack: bool,
    /// Local slot when `in_stack`, upvalue index in the parent otherwise.
    pub index: u16,
}

/// A compiled function prototype.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Proto {
    pub code: Vec<Instruction>,
    /// Source line of each instruction, parallel to `code`.
    pub lines: Vec<u32>,
    /// Nested function prototypes, referenced by `Closure`.
    pub protos: Vec<Proto>,
    pub upvalues: Vec<UpvalDesc>,
    pub num_params: u16,
    pub is_vararg: bool,
    /// Local slots needed by the function.
    pub max_slots: u16,
    /// Chunk name as shown in messages (`test.lua`, `[string "..."]`).
    pub source: String,
    /// Function name for tracebacks (`main chunk`, `function 'f'`).
    pub name: String,
    pub line_defined: u32,
    pub last_line: u32,
}

impl Proto {
    pub fn new(source: impl Into<String>) -> Self {
        Proto {
            source: source.into(),
            ..Proto::default()
        }
    }

    /// Append an instruction at the given source line, returning its pc.
    pub fn emit(&mut self, inst: Instruction, line: u32) -> usize {
        let pc = self.code.len();
        self.code.push(inst);
        self.lines.push(line);
        pc
    }

    pub fn get_line(&self, pc: usize) -> u32 {
        self.lines.get(pc).copied().unwrap_or(self.line_defined)
    }

    pub fn code_len(&self) -> usize {
        self.code.len()
    }

    /// Mutable access to an instruction for backpatching.
    pub fn get_mut(&mut self, pc: usize) -> &mut Instruction {
        &mut self.code[pc]
    }

    /// Visit every string this proto and its children reference.
    pub fn for_each_string(&self, f: &mut impl FnMut(StringId)) {
        for inst in &self.code {
            if let Constant::String(id) = inst.value {
                f(id);
            }
            if let Some(sym) = inst.symbol {
                f(sym.name);
            }
        }
        for up in &self.upvalues {
            f(up.name);
        }
        for child in &self.protos {
            child.for_each_string(f);
        }
    }

    /// Total number of prototypes in this tree, including `self`.
    pub fn count_protos(&self) -> usize {
        1 + self.protos.iter().map(Proto::count_protos).sum::<usize>()
    }
}
