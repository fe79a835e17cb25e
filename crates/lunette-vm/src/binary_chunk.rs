//! Binary chunk serialization (dump) and deserialization (undump).
//!
//! Layout: a fixed header (signature, format version, flags, and an integer
//! and a float probe that pin down byte order and number encoding), then
//! the main function record. A function record holds its debug names, line
//! range, parameter shape, instructions, line table, upvalue descriptors and
//! nested function records, in that order.
//!
//! Sizes and small counts use the same big-endian 7-bit varint as PUC Lua
//! (high bit set on the last byte, value stored plus one so zero means
//! "absent"). Instruction operands and numbers are fixed-width little
//! endian.
//!
//! Undump checks every operand it can check statically (opcodes, symbol
//! kinds, jump targets, slot numbers, child and upvalue indices) so a loaded
//! chunk cannot index outside its own frame or proto tree. Operand-stack
//! depth is not re-verified.

use lunette_compiler::opcode::{Instruction, OpCode, SymbolKind, SymbolName};
use lunette_compiler::proto::{Constant, Proto, UpvalDesc};
use lunette_core::string::StringInterner;
use thiserror::Error;

pub const SIGNATURE: &[u8; 4] = b"\x1bLNT";
const FORMAT_VERSION: u8 = 1;
const FLAG_STRIPPED: u8 = 1;
const PROBE_INT: i64 = 0x5678;
const PROBE_NUM: f64 = 370.5;

// Constant tags
const TAG_NIL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 0x11;
const TAG_INT: u8 = 3;
const TAG_FLOAT: u8 = 0x13;
const TAG_STRING: u8 = 4;
const NO_SYMBOL: u8 = 0xff;

/// True if `data` starts with the binary chunk signature.
pub fn is_binary_chunk(data: &[u8]) -> bool {
    data.starts_with(SIGNATURE)
}

// ---- Dumper ----

/// Serialize a Proto and all its children. `strip` drops source names,
/// line tables and operand names.
#[tracing::instrument(level = "trace", skip_all, fields(strip))]
pub fn dump(proto: &Proto, strings: &StringInterner, strip: bool) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(SIGNATURE);
    out.push(FORMAT_VERSION);
    out.push(if strip { FLAG_STRIPPED } else { 0 });
    out.extend_from_slice(&PROBE_INT.to_le_bytes());
    out.extend_from_slice(&PROBE_NUM.to_le_bytes());
    write_function(&mut out, proto, strings, strip, None);
    out
}

fn write_size(out: &mut Vec<u8>, n: usize) {
    let mut n = n + 1;
    let mut buf = [0u8; 10];
    let mut i = 0;
    loop {
        buf[i] = (n & 0x7f) as u8;
        n >>= 7;
        i += 1;
        if n == 0 {
            break;
        }
    }
    for j in (1..i).rev() {
        out.push(buf[j]);
    }
    out.push(buf[0] | 0x80);
}

fn write_string(out: &mut Vec<u8>, s: Option<&[u8]>) {
    match s {
        None => write_size(out, 0),
        Some(bytes) => {
            write_size(out, bytes.len() + 1);
            out.extend_from_slice(bytes);
        }
    }
}

fn write_instruction(out: &mut Vec<u8>, inst: &Instruction, strings: &StringInterner, strip: bool) {
    out.push(inst.op as u8);
    out.extend_from_slice(&inst.num_val.to_le_bytes());
    out.extend_from_slice(&inst.num_val2.to_le_bytes());
    match inst.value {
        Constant::Nil => out.push(TAG_NIL),
        Constant::Boolean(false) => out.push(TAG_FALSE),
        Constant::Boolean(true) => out.push(TAG_TRUE),
        Constant::Integer(i) => {
            out.push(TAG_INT);
            out.extend_from_slice(&i.to_le_bytes());
        }
        Constant::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.to_le_bytes());
        }
        Constant::String(id) => {
            out.push(TAG_STRING);
            write_string(out, Some(strings.get_bytes(id)));
        }
    }
    match inst.symbol {
        Some(sym) if !strip => {
            out.push(sym.kind as u8);
            write_string(out, Some(strings.get_bytes(sym.name)));
        }
        _ => out.push(NO_SYMBOL),
    }
}

fn write_function(
    out: &mut Vec<u8>,
    proto: &Proto,
    strings: &StringInterner,
    strip: bool,
    parent_source: Option<&str>,
) {
    if strip || parent_source == Some(proto.source.as_str()) {
        write_string(out, None);
    } else {
        write_string(out, Some(proto.source.as_bytes()));
    }
    write_string(out, (!strip).then_some(proto.name.as_bytes()));
    write_size(out, proto.line_defined as usize);
    write_size(out, proto.last_line as usize);
    write_size(out, proto.num_params as usize);
    out.push(u8::from(proto.is_vararg));
    write_size(out, proto.max_slots as usize);

    write_size(out, proto.code.len());
    for inst in &proto.code {
        write_instruction(out, inst, strings, strip);
    }

    if strip {
        write_size(out, 0);
    } else {
        write_size(out, proto.lines.len());
        for &line in &proto.lines {
            write_size(out, line as usize);
        }
    }

    // Upvalue names are kept even when stripped: `_ENV` is found by name.
    write_size(out, proto.upvalues.len());
    for uv in &proto.upvalues {
        out.push(u8::from(uv.in_stack));
        write_size(out, uv.index as usize);
        write_string(out, Some(strings.get_bytes(uv.name)));
    }

    write_size(out, proto.protos.len());
    for child in &proto.protos {
        write_function(out, child, strings, strip, Some(&proto.source));
    }
}

// ---- Undumper ----

#[derive(Clone, Debug, PartialEq, Error)]
pub enum UndumpError {
    #[error("not a binary chunk")]
    NotBinary,
    #[error("version mismatch (chunk format {found}, expected {FORMAT_VERSION})")]
    Version { found: u8 },
    #[error("format mismatch ({0})")]
    Format(&'static str),
    #[error("truncated binary chunk")]
    Truncated,
    #[error("malformed binary chunk: {0}")]
    Malformed(String),
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn read_byte(&mut self) -> Result<u8, UndumpError> {
        let b = *self.data.get(self.pos).ok_or(UndumpError::Truncated)?;
        self.pos += 1;
        Ok(b)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], UndumpError> {
        if n > self.remaining() {
            return Err(UndumpError::Truncated);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], UndumpError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.read_bytes(N)?);
        Ok(buf)
    }

    fn read_i32(&mut self) -> Result<i32, UndumpError> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    fn read_i64(&mut self) -> Result<i64, UndumpError> {
        Ok(i64::from_le_bytes(self.read_array()?))
    }

    fn read_f64(&mut self) -> Result<f64, UndumpError> {
        Ok(f64::from_le_bytes(self.read_array()?))
    }

    fn read_size(&mut self) -> Result<usize, UndumpError> {
        let mut n: usize = 0;
        loop {
            let b = self.read_byte()?;
            n = n
                .checked_mul(128)
                .ok_or_else(|| UndumpError::Malformed("size overflow".into()))?
                | (b & 0x7f) as usize;
            if b & 0x80 != 0 {
                break;
            }
        }
        n.checked_sub(1)
            .ok_or_else(|| UndumpError::Malformed("zero size".into()))
    }

    /// A count of items that each take at least one byte.
    fn read_count(&mut self) -> Result<usize, UndumpError> {
        let n = self.read_size()?;
        if n > self.remaining() {
            return Err(UndumpError::Truncated);
        }
        Ok(n)
    }

    fn read_u16(&mut self, what: &str) -> Result<u16, UndumpError> {
        let n = self.read_size()?;
        u16::try_from(n).map_err(|_| UndumpError::Malformed(format!("{what} out of range")))
    }

    fn read_u32(&mut self, what: &str) -> Result<u32, UndumpError> {
        let n = self.read_size()?;
        u32::try_from(n).map_err(|_| UndumpError::Malformed(format!("{what} out of range")))
    }

    fn read_string(&mut self) -> Result<Option<&'a [u8]>, UndumpError> {
        match self.read_size()? {
            0 => Ok(None),
            size => self.read_bytes(size - 1).map(Some),
        }
    }
}

/// Deserialize a binary chunk into a Proto tree.
#[tracing::instrument(level = "trace", skip_all, fields(len = data.len()))]
pub fn undump(data: &[u8], strings: &mut StringInterner) -> Result<Proto, UndumpError> {
    let mut reader = Reader::new(data);
    if reader.read_bytes(SIGNATURE.len()).ok() != Some(&SIGNATURE[..]) {
        return Err(UndumpError::NotBinary);
    }
    let version = reader.read_byte()?;
    if version != FORMAT_VERSION {
        return Err(UndumpError::Version { found: version });
    }
    let flags = reader.read_byte()?;
    if flags & !FLAG_STRIPPED != 0 {
        return Err(UndumpError::Format("unknown flags"));
    }
    if reader.read_i64()? != PROBE_INT {
        return Err(UndumpError::Format("integer format"));
    }
    if reader.read_f64()? != PROBE_NUM {
        return Err(UndumpError::Format("float format"));
    }
    let proto = read_function(&mut reader, strings, "?", None, 0)?;
    if reader.remaining() != 0 {
        return Err(UndumpError::Malformed("trailing bytes".into()));
    }
    Ok(proto)
}

fn read_constant(reader: &mut Reader, strings: &mut StringInterner) -> Result<Constant, UndumpError> {
    Ok(match reader.read_byte()? {
        TAG_NIL => Constant::Nil,
        TAG_FALSE => Constant::Boolean(false),
        TAG_TRUE => Constant::Boolean(true),
        TAG_INT => Constant::Integer(reader.read_i64()?),
        TAG_FLOAT => Constant::Float(reader.read_f64()?),
        TAG_STRING => {
            let bytes = reader
                .read_string()?
                .ok_or_else(|| UndumpError::Malformed("missing string constant".into()))?;
            Constant::String(strings.intern(bytes))
        }
        tag => return Err(UndumpError::Malformed(format!("bad constant tag {tag}"))),
    })
}

fn read_instruction(reader: &mut Reader, strings: &mut StringInterner) -> Result<Instruction, UndumpError> {
    let op_byte = reader.read_byte()?;
    let op = OpCode::from_u8(op_byte)
        .ok_or_else(|| UndumpError::Malformed(format!("bad opcode {op_byte}")))?;
    let num_val = reader.read_i32()?;
    let num_val2 = reader.read_i32()?;
    let value = read_constant(reader, strings)?;
    let symbol = match reader.read_byte()? {
        NO_SYMBOL => None,
        k => {
            let kind = SymbolKind::from_u8(k)
                .ok_or_else(|| UndumpError::Malformed(format!("bad symbol kind {k}")))?;
            let name = reader
                .read_string()?
                .ok_or_else(|| UndumpError::Malformed("missing symbol name".into()))?;
            Some(SymbolName {
                kind,
                name: strings.intern(name),
            })
        }
    };
    Ok(Instruction {
        op,
        num_val,
        num_val2,
        value,
        symbol,
    })
}

/// Deepest function nesting a chunk may carry, as for source chunks.
const MAX_NESTING: usize = 200;
/// Largest fixed result count a call or `...` may ask for.
const MAX_WANTED: i64 = u16::MAX as i64;

/// Where an upvalue of this function comes from in its parent.
struct ParentShape {
    max_slots: usize,
    upvalues: usize,
}

fn read_function(
    reader: &mut Reader,
    strings: &mut StringInterner,
    parent_source: &str,
    parent: Option<ParentShape>,
    depth: usize,
) -> Result<Proto, UndumpError> {
    if depth > MAX_NESTING {
        return Err(UndumpError::Malformed("functions nested too deeply".into()));
    }
    let source = match reader.read_string()? {
        Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        None => parent_source.to_string(),
    };
    let mut proto = Proto::new(source);
    proto.name = match reader.read_string()? {
        Some(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        None => "?".to_string(),
    };
    proto.line_defined = reader.read_u32("line")?;
    proto.last_line = reader.read_u32("line")?;
    proto.num_params = reader.read_u16("parameter count")?;
    proto.is_vararg = match reader.read_byte()? {
        0 => false,
        1 => true,
        b => return Err(UndumpError::Malformed(format!("bad vararg flag {b}"))),
    };
    proto.max_slots = reader.read_u16("slot count")?;
    if proto.num_params > proto.max_slots {
        return Err(UndumpError::Malformed("more parameters than slots".into()));
    }

    let ncode = reader.read_count()?;
    proto.code.reserve(ncode);
    for _ in 0..ncode {
        proto.code.push(read_instruction(reader, strings)?);
    }

    let nlines = reader.read_count()?;
    if nlines != 0 && nlines != ncode {
        return Err(UndumpError::Malformed("line table does not match code".into()));
    }
    for _ in 0..nlines {
        proto.lines.push(reader.read_u32("line")?);
    }

    let nups = reader.read_count()?;
    for _ in 0..nups {
        let in_stack = reader.read_byte()? != 0;
        let index = reader.read_u16("upvalue index")?;
        if let Some(shape) = &parent {
            let bound = if in_stack { shape.max_slots } else { shape.upvalues };
            if index as usize >= bound {
                return Err(UndumpError::Malformed(format!("upvalue {index} out of range")));
            }
        }
        let name = reader.read_string()?.unwrap_or(b"?");
        proto.upvalues.push(UpvalDesc {
            name: strings.intern(name),
            in_stack,
            index,
        });
    }

    let nchildren = reader.read_count()?;
    let source = proto.source.clone();
    for _ in 0..nchildren {
        let shape = ParentShape {
            max_slots: proto.max_slots as usize,
            upvalues: proto.upvalues.len(),
        };
        let child = read_function(reader, strings, &source, Some(shape), depth + 1)?;
        proto.protos.push(child);
    }

    validate_operands(&proto)?;
    Ok(proto)
}

/// Static operand checks for one function body.
fn validate_operands(proto: &Proto) -> Result<(), UndumpError> {
    let code_len = proto.code.len() as i64;
    let slots = i64::from(proto.max_slots);
    let bad = |pc: usize, what: &str| {
        Err(UndumpError::Malformed(format!(
            "instruction {pc} ({}): {what}",
            proto.code[pc].op
        )))
    };
    for (pc, inst) in proto.code.iter().enumerate() {
        let a = i64::from(inst.num_val);
        let b = i64::from(inst.num_val2);
        let ok = match inst.op {
            op if op.is_jump() => (0..=code_len).contains(&a),
            OpCode::ForPrep => a >= 0 && a + 3 < slots && (0..=code_len).contains(&b),
            OpCode::ForLoop => a >= 0 && a + 3 < slots && (0..code_len).contains(&b),
            OpCode::Local | OpCode::StoreLcl | OpCode::Tbc => (0..slots).contains(&a),
            OpCode::Clean => (0..slots).contains(&a) && (a..slots).contains(&b),
            OpCode::UpValue | OpCode::StoreUpv => (0..proto.upvalues.len() as i64).contains(&a),
            OpCode::Closure => (0..proto.protos.len() as i64).contains(&a),
            OpCode::Pop | OpCode::Copy | OpCode::IndexSet | OpCode::IndexSetN | OpCode::TblInitN => a >= 0,
            OpCode::Call | OpCode::ThisCall | OpCode::TailCall => (-1..=MAX_WANTED).contains(&b),
            OpCode::VarArgs => (-1..=MAX_WANTED).contains(&a) && proto.is_vararg,
            _ => true,
        };
        if !ok {
            return bad(pc, "operand out of range");
        }
    }
    Ok(())
}
