use super::helpers::*;
use lunette::{LuaError, Proto, Script, Value};
use lunette_compiler::opcode::{Instruction, OpCode};
use lunette_vm::binary_chunk;
use proptest::prelude::*;

/// Run `source` directly and through dump/undump; both result lists,
/// rendered with `tostring`.
fn both_ways(source: &str, strip: bool) -> (Vec<String>, Vec<String>) {
    let (mut script, _) = script_with_output();
    let f = script.load(source.as_bytes(), "=rt").unwrap();
    let bytes = script.dump(f, strip).unwrap();
    let direct = script.call(f, &[]).unwrap();
    let direct = render(&mut script, &direct);

    let (mut fresh, _) = script_with_output();
    let g = fresh.undump(&bytes, "=rt").unwrap();
    let reloaded = fresh.call(g, &[]).unwrap();
    (direct, render(&mut fresh, &reloaded))
}

fn render(script: &mut Script, values: &[Value]) -> Vec<String> {
    values
        .iter()
        .map(|&v| script.to_display_string(v).unwrap())
        .collect()
}

#[test]
fn test_roundtrip_program_with_closures_and_loops() {
    let src = "local function make(k)
                  return function(x) return x * k end
               end
               local acc, t = 0, {}
               for i = 1, 10 do t[#t + 1] = make(i)(i) end
               for _, v in ipairs(t) do acc = acc + v end
               local s = ''
               for w = 1, 3 do s = s .. string.char(96 + w) end
               return acc, s, 7 // 2, 7 / 2, 0x1.fp3, math.maxinteger";
    let (direct, reloaded) = both_ways(src, false);
    assert_eq!(direct, reloaded);
    assert_eq!(direct, vec!["385", "abc", "3", "3.5", "15.5", "9223372036854775807"]);
}

#[test]
fn test_roundtrip_stripped_keeps_behaviour() {
    let src = "local t <close> = nil
               local r = {}
               for i = 1, 3 do
                  for j = 1, 3 do r[#r + 1] = i .. '-' .. j break end
               end
               goto skip
               r = nil
               ::skip::
               return table.concat(r, ',')";
    let (direct, reloaded) = both_ways(src, true);
    assert_eq!(direct, reloaded);
    assert_eq!(direct, vec!["1-1,2-1,3-1"]);
}

#[test]
fn test_roundtrip_coroutines() {
    let src = "local co = coroutine.wrap(function(a) local b = coroutine.yield(a * 2) return a + b end)
               return co(5), co(10)";
    let (direct, reloaded) = both_ways(src, false);
    assert_eq!(direct, reloaded);
    assert_eq!(direct, vec!["10", "15"]);
}

#[test]
fn test_stripped_chunk_loses_line_info() {
    let (mut script, _) = script_with_output();
    let f = script.load(b"local x = nil\nreturn x.y", "=lines").unwrap();
    let full = script.dump(f, false).unwrap();
    let stripped = script.dump(f, true).unwrap();
    assert!(stripped.len() < full.len());

    let g = script.undump(&full, "=lines").unwrap();
    let err = script.call(g, &[]).unwrap_err().to_string();
    assert!(err.starts_with("lines:2:"), "{err}");
}

#[test]
fn test_load_accepts_binary_chunks_from_lua() {
    let (mut script, _) = script_with_output();
    let f = script.load(b"return ...", "=echo").unwrap();
    let bytes = script.dump(f, false).unwrap();
    let blob = script.vm_mut().strings.intern(&bytes);
    script.set_global("blob", Value::String(blob));
    run_in(&mut script, "local g = load(blob) return g(3)", Value::Integer(3));

    let err = script.do_string("return load(blob, 'b', 't')", "=m").unwrap();
    assert_eq!(err[0], Value::Nil);
    let msg = script.to_display_string(err[1]).unwrap();
    assert!(msg.contains("attempt to load a binary chunk"), "{msg}");
}

fn run_in(script: &mut Script, src: &str, expected: Value) {
    let results = script.do_string(src, "=run").unwrap();
    assert_eq!(results[0], expected);
}

#[test]
fn test_corrupted_chunks_are_rejected() {
    let (mut script, _) = script_with_output();
    let f = script.load(b"return 1 + 2", "=c").unwrap();
    let bytes = script.dump(f, false).unwrap();
    for cut in [4, bytes.len() / 2, bytes.len() - 1] {
        assert!(script.undump(&bytes[..cut], "=c").is_err(), "cut at {cut}");
    }
    let mut wrong_version = bytes.clone();
    wrong_version[4] = 0x7f;
    assert!(script.undump(&wrong_version, "=c").is_err());
}

#[test]
fn test_unbalanced_chunk_fails_without_crashing() {
    let (mut script, _) = script_with_output();
    let mut proto = script
        .compile(
            "local t = {} for i = 1, 10 do t[i] = function() return i end end return t[3]()",
            "=loop",
        )
        .unwrap();
    proto.code[0] = Instruction::with_num(OpCode::Pop, 1000);
    let f = script.load_proto(proto);
    let bytes = script.dump(f, false).unwrap();

    let g = script.undump(&bytes, "=loop").unwrap();
    match script.call(g, &[]) {
        Err(LuaError::Runtime { message, .. }) => {
            assert!(message.contains("malformed bytecode"), "{message}")
        }
        other => panic!("expected a runtime error, got {other:?}"),
    }

    // The same chunk loaded from Lua fails inside pcall and leaves the
    // caller's frame intact.
    let id = script.vm_mut().strings.intern(&bytes);
    script.set_global("bad_chunk", Value::String(id));
    let results = script
        .do_string(
            "local before = 'kept'
             local ok = pcall(load(bad_chunk, '=bad', 'b'))
             return ok, before",
            "=host",
        )
        .unwrap();
    assert_bool(&results, 0, false);
    assert_str(&results, 1, "kept", &script);
}

/// Every jump in the tree moves forward and there are no numeric loops, so
/// a mutated chunk always runs to completion.
fn straight_line(proto: &Proto) -> bool {
    let forward = proto.code.iter().enumerate().all(|(pc, inst)| {
        !matches!(inst.op, OpCode::ForPrep | OpCode::ForLoop)
            && (!inst.op.is_jump() || inst.num_val as usize > pc)
    });
    forward && proto.protos.iter().all(straight_line)
}

#[test]
fn test_mutated_chunks_never_crash() {
    let src = "local t = {10, 20, x = 'a'}
               local function add(a, b, ...) return a + b + select('#', ...) end
               local f = function() return t[1], t.x end
               local a, b = f()
               return add(a, 5, 1, 2), b, #t";
    let (mut script, _) = script_with_output();
    let f = script.load(src.as_bytes(), "=mut").unwrap();
    let bytes = script.dump(f, false).unwrap();
    let mut ran = 0;
    for pos in 0..bytes.len() {
        for delta in [1u8, 27, 47, 128] {
            let mut mutated = bytes.clone();
            mutated[pos] = mutated[pos].wrapping_add(delta);
            let Ok(proto) = binary_chunk::undump(&mutated, &mut script.vm_mut().strings) else {
                continue;
            };
            if !straight_line(&proto) {
                continue;
            }
            let g = script.load_proto(proto);
            let _ = script.call(g, &[]);
            ran += 1;
        }
    }
    assert!(ran > 0);
}

fn arith_expr() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        (-50i64..50).prop_map(|n| format!("({n})")),
        (1u32..20).prop_map(|n| format!("{n}.5")),
        Just("x".to_string()),
    ];
    leaf.prop_recursive(4, 24, 2, |inner| {
        (inner.clone(), prop_oneof![Just("+"), Just("-"), Just("*")], inner)
            .prop_map(|(a, op, b)| format!("({a} {op} {b})"))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_dump_roundtrip_preserves_results(expr in arith_expr(), x in -20i64..20, strip in any::<bool>()) {
        let src = format!("local x = {x} local f = function() return {expr} end return f(), tostring({expr})");
        let (direct, reloaded) = both_ways(&src, strip);
        prop_assert_eq!(direct, reloaded);
    }
}
