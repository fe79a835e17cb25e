use super::helpers::*;

#[test]
fn e2e_error_carries_chunk_and_position() {
    let err = compile_str_err("local x = = 1");
    assert!(err.starts_with("test:(1,"), "{err}");
    assert!(err.ends_with("unexpected symbol near '='"), "{err}");
}

#[test]
fn e2e_error_unterminated_string() {
    let err = compile_str_err("local x = \"hello");
    assert!(err.contains("unfinished string"), "{err}");
}

#[test]
fn e2e_error_break_outside_loop() {
    let err = compile_str_err("break");
    assert!(err.contains("<break> at line 1 not inside a loop"), "{err}");
}

#[test]
fn e2e_error_break_inside_nested_function() {
    let err = compile_str_err("while true do local f = function() break end end");
    assert!(err.contains("not inside a loop"), "{err}");
}

#[test]
fn e2e_error_duplicate_label() {
    let err = compile_str_err("::x:: ::x::");
    assert!(err.contains("label 'x' already defined on line 1"), "{err}");
}

#[test]
fn e2e_error_goto_into_local_scope() {
    let err = compile_str_err("goto f; local a; ::f:: print(a)");
    assert!(err.contains("jumps into the scope of local 'a'"), "{err}");
}

#[test]
fn e2e_error_missing_label() {
    let err = compile_str_err("do goto nowhere end");
    assert!(err.contains("no visible label 'nowhere' for <goto>"), "{err}");
}

#[test]
fn e2e_error_vararg_outside() {
    let err = compile_str_err("function f() return ... end");
    assert!(err.contains("cannot use '...' outside a vararg function"), "{err}");
}

#[test]
fn e2e_error_expression_not_statement() {
    let err = compile_str_err("42");
    assert!(err.contains("unexpected symbol"), "{err}");
    let err = compile_str_err("x");
    assert!(err.contains("syntax error"), "{err}");
}

#[test]
fn e2e_error_const_assignment() {
    let err = compile_str_err("local x <const> = 1; x = 2");
    assert!(err.contains("attempt to assign to const variable 'x'"), "{err}");
}

#[test]
fn e2e_error_unclosed_block_mentions_opener() {
    let err = compile_str_err("while true do\n\nlocal x = 1\n");
    assert!(err.contains("'end' expected (to close 'while' at line 1)"), "{err}");
}

#[test]
fn e2e_error_deep_parentheses() {
    let err = on_large_stack(|| {
        let src = format!("return {}1{}", "(".repeat(10_000), ")".repeat(10_000));
        compile_str_err(&src)
    });
    assert!(err.ends_with("chunk has too many C levels near '('"), "{err}");
}

#[test]
fn e2e_error_deep_blocks_and_chains() {
    on_large_stack(|| {
        let err = compile_str_err(&format!("{}{}", "do ".repeat(500), "end ".repeat(500)));
        assert!(err.contains("chunk has too many C levels"), "{err}");
        let err = compile_str_err(&format!("return 1{}", " + 1".repeat(500)));
        assert!(err.contains("chunk has too many C levels"), "{err}");
        let err = compile_str_err(&format!("return t{}", ".x".repeat(500)));
        assert!(err.contains("chunk has too many C levels"), "{err}");
        let err = compile_str_err(&format!("return {}", "{".repeat(500)));
        assert!(err.contains("chunk has too many C levels"), "{err}");
    });
}

#[test]
fn e2e_moderate_nesting_compiles() {
    on_large_stack(|| {
        compile_str(&format!("return {}1{}", "(".repeat(150), ")".repeat(150)));
        compile_str(&format!("{}{}", "do ".repeat(150), "end ".repeat(150)));
        compile_str(&format!("return 1{}", " + 1".repeat(150)));
    });
}
