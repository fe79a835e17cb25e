/// Bytecode listing, one instruction per line, nested functions indented.
use crate::opcode::{Instruction, OpCode};
use crate::proto::{Constant, Proto};
use lunette_core::string::StringInterner;
use std::fmt::Write;

/// Disassemble a prototype and all of its children.
pub fn disassemble(proto: &Proto, strings: &StringInterner) -> String {
    let mut out = String::new();
    disassemble_proto(&mut out, proto, strings, 0);
    out
}

fn disassemble_proto(out: &mut String, proto: &Proto, strings: &StringInterner, level: usize) {
    let indent = "  ".repeat(level);
    let vararg = if proto.is_vararg { "+" } else { "" };
    let _ = writeln!(
        out,
        "{indent}function {} <{}:{},{}> ({}{vararg} params, {} slots, {} upvalues, {} functions)",
        proto.name,
        proto.source,
        proto.line_defined,
        proto.last_line,
        proto.num_params,
        proto.max_slots,
        proto.upvalues.len(),
        proto.protos.len(),
    );

    for (pc, inst) in proto.code.iter().enumerate() {
        let line = proto.get_line(pc);
        let _ = write!(out, "{indent}\t{pc}\t[{line}]\t");
        disasm_instruction(out, inst, strings);
        let _ = writeln!(out);
    }

    if !proto.upvalues.is_empty() {
        let _ = writeln!(out, "{indent}upvalues ({}):", proto.upvalues.len());
        for (i, up) in proto.upvalues.iter().enumerate() {
            let _ = writeln!(
                out,
                "{indent}\t{i}\t{}\t{}\t{}",
                strings.get_str(up.name),
                u8::from(up.in_stack),
                up.index
            );
        }
    }

    for child in &proto.protos {
        let _ = writeln!(out);
        disassemble_proto(out, child, strings, level + 1);
    }
}

fn disasm_instruction(out: &mut String, inst: &Instruction, strings: &StringInterner) {
    let _ = write!(out, "{:<10}", inst.op.name());
    match inst.op {
        OpCode::Nop | OpCode::Swap | OpCode::Env | OpCode::Index => {}
        OpCode::Literal | OpCode::IndexN | OpCode::Method => {
            let _ = write!(out, "{}", constant_text(&inst.value, strings));
        }
        OpCode::IndexSetN => {
            let _ = write!(out, "{} {}", inst.num_val, constant_text(&inst.value, strings));
        }
        OpCode::Call
        | OpCode::ThisCall
        | OpCode::TailCall
        | OpCode::Clean
        | OpCode::ForPrep
        | OpCode::ForLoop
        | OpCode::NewTable
        | OpCode::TblInitI => {
            let _ = write!(out, "{} {}", inst.num_val, inst.num_val2);
        }
        _ => {
            let _ = write!(out, "{}", inst.num_val);
        }
    }
    if let Some(sym) = inst.symbol {
        let _ = write!(out, "\t; {} '{}'", sym.kind.describe(), strings.get_str(sym.name));
    }
}

fn constant_text(value: &Constant, strings: &StringInterner) -> String {
    match value {
        Constant::Nil => "nil".to_string(),
        Constant::Boolean(b) => b.to_string(),
        Constant::Integer(i) => i.to_string(),
        Constant::Float(f) => format!("{f:?}"),
        Constant::String(id) => format!("{:?}", strings.get_str(*id)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CompileOptions;

    #[test]
    fn test_listing_names_operands() {
        let mut strings = StringInterner::new();
        let proto = crate::compile(
            b"local t = {} print(t.x)",
            &CompileOptions::new("=test"),
            &mut strings,
        )
        .unwrap();
        let text = disassemble(&proto, &strings);
        assert!(text.contains("function main chunk <test:0,"));
        assert!(text.contains("INDEXN"));
        assert!(text.contains("\"x\""));
        assert!(text.contains("; global 'print'"));
        assert!(text.contains("upvalues (1):"));
    }
}
