use super::helpers::*;
use lunette_compiler::opcode::OpCode;

#[test]
fn e2e_numeric_for_uses_loop_opcodes() {
    let (p, _) = compile_str("local s = 0 for i = 1, 10 do s = s + i end return s");
    assert_eq!(count_opcode(&p, OpCode::ForPrep), 1);
    assert_eq!(count_opcode(&p, OpCode::ForLoop), 1);
    let prep = p.code.iter().find(|i| i.op == OpCode::ForPrep).unwrap();
    assert_eq!(prep.num_val2 as usize, p.code.iter().position(|i| i.op == OpCode::ForLoop).unwrap() + 1);
}

#[test]
fn e2e_generic_for_registers_closing_value() {
    let (p, _) = compile_str("for k, v in pairs({}) do end");
    assert!(has_opcode(&p, OpCode::Tbc));
    assert!(has_opcode(&p, OpCode::JNil));
    assert!(has_opcode(&p, OpCode::Clean));
}

#[test]
fn e2e_multiple_assignment_stores_each_target() {
    let (p, _) = compile_str("local a, b = 1, 2; a, b = b, a");
    assert_eq!(count_opcode(&p, OpCode::StoreLcl), 4);
}

#[test]
fn e2e_field_assignment() {
    let (p, _) = compile_str("local t = {} t.x, t[1] = 1, 2");
    assert!(has_opcode(&p, OpCode::IndexSetN));
    assert!(has_opcode(&p, OpCode::IndexSet));
    // both table prefixes plus the key are dropped afterwards
    let pop = p.code.iter().rev().find(|i| i.op == OpCode::Pop).unwrap();
    assert_eq!(pop.num_val, 3);
}

#[test]
fn e2e_method_definition_adds_self() {
    let (p, _) = compile_str("local t = {} function t:m(a) return self, a end");
    assert_eq!(p.protos[0].num_params, 2);
    assert_eq!(p.protos[0].name, "t:m");
}

#[test]
fn e2e_to_be_closed_local() {
    let (p, _) = compile_str("do local x <close> = nil end");
    assert!(has_opcode(&p, OpCode::Tbc));
    assert!(has_opcode(&p, OpCode::Clean));
}

#[test]
fn e2e_repeat_sees_body_locals() {
    let (p, _) = compile_str("local i = 0 repeat local j = i; i = i + 1 until j >= 3");
    assert!(has_opcode(&p, OpCode::Jf));
}

#[test]
fn e2e_return_open_results() {
    let (p, _) = compile_str("local function f() end return 1, f()");
    let ret = p.code.iter().find(|i| i.op == OpCode::Ret).unwrap();
    assert_eq!(ret.num_val, lunette_compiler::opcode::open_count(1));
}

#[test]
fn e2e_dynamic_expression_uses_default_env() {
    let mut strings = lunette_core::string::StringInterner::new();
    let mut options = lunette_compiler::CompileOptions::new("=expr");
    options.dynamic_expression = true;
    let p = lunette_compiler::compile(b"x + 1", &options, &mut strings).unwrap();
    assert!(has_opcode(&p, OpCode::Env));
    assert!(p.upvalues.is_empty());
}
