use super::helpers::*;

// ---- Numbers ----

#[test]
fn test_hex_float_with_exponent() {
    let results = run_lua("return 0x1.fp3, 0xA.8p0, 0x.1p4");
    assert_float(&results, 0, 15.5);
    assert_float(&results, 1, 10.5);
    assert_float(&results, 2, 1.0);
}

#[test]
fn test_malformed_hex_names_the_character() {
    let err = compile_err("return 0x1G");
    assert!(err.contains("malformed number near '0x1G'"), "{err}");
}

#[test]
fn test_integer_and_float_literals() {
    let results = run_lua("return 0xff, 1e2, 3., .5, 0xffffffffffffffff, 9223372036854775807");
    assert_int(&results, 0, 255);
    assert_float(&results, 1, 100.0);
    assert_float(&results, 2, 3.0);
    assert_float(&results, 3, 0.5);
    assert_int(&results, 4, -1);
    assert_int(&results, 5, i64::MAX);
}

#[test]
fn test_decimal_overflow_becomes_float() {
    run_check_strings("return math.type(9223372036854775808)", &["float"]);
}

#[test]
fn test_number_rendering() {
    run_check_strings(
        "return 1, 1.0, -0.0, 1e100, 2^63, 10 // 3, 10 / 2",
        &["1", "1.0", "-0.0", "1e+100", "9.2233720368548e+18", "3", "5.0"],
    );
}

// ---- Strings ----

#[test]
fn test_decimal_escape_too_large() {
    let err = compile_err(r#"return "\400""#);
    assert!(err.contains("decimal escape too large"), "{err}");
}

#[test]
fn test_escapes() {
    let (results, script) = run_lua_in(r#"return "\65\x42\u{43}", "a\z
                    b", 'tab\tend'"#);
    assert_str(&results, 0, "ABC", &script);
    assert_str(&results, 1, "ab", &script);
    assert_str(&results, 2, "tab\tend", &script);
}

#[test]
fn test_long_brackets() {
    let (results, script) = run_lua_in("return [==[a]]b]==], [[\nskip first newline]]");
    assert_str(&results, 0, "a]]b", &script);
    assert_str(&results, 1, "skip first newline", &script);
}

#[test]
fn test_unfinished_string_is_premature() {
    let mut script = lunette::Script::new();
    match script.compile("x = 'abc", "=test") {
        Err(lunette::LuaError::Syntax(e)) => assert!(e.premature_end),
        other => panic!("unexpected {other:?}"),
    }
    match script.compile("x = 'abc\n'", "=test") {
        Err(lunette::LuaError::Syntax(e)) => assert!(!e.premature_end),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_syntax_error_location_format() {
    let err = compile_err("local x = = 1");
    assert!(err.starts_with("test:(1,"), "{err}");
    assert!(err.contains("unexpected symbol near '='"), "{err}");
}

#[test]
fn test_shebang_is_skipped_by_loader() {
    let source = b"#!/usr/bin/env lunette\nreturn 7";
    let mut script = lunette::Script::new();
    let f = script.load(lunette::strip_shebang(source), "=s").unwrap();
    assert_eq!(script.call(f, &[]).unwrap(), vec![lunette::Value::Integer(7)]);
}
