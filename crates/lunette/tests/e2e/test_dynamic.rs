use super::helpers::*;
use lunette::{LuaError, Value};

#[test]
fn test_expression_reads_globals() {
    let (mut script, _) = script_with_output();
    script.do_string("config = {width = 80, scale = 1.5}", "=setup").unwrap();
    let v = script.eval("config.width * config.scale").unwrap();
    assert_eq!(v, Value::Float(120.0));
}

#[test]
fn test_expression_calls_functions() {
    let (mut script, _) = script_with_output();
    script.do_string("function greet(n) return 'hi ' .. n end", "=setup").unwrap();
    let v = script.eval("greet('there'):upper()").unwrap();
    assert_eq!(script.to_display_string(v).unwrap(), "HI THERE");
}

#[test]
fn test_expression_returns_first_value_only() {
    let (mut script, _) = script_with_output();
    script.do_string("function pair() return 1, 2 end", "=setup").unwrap();
    assert_eq!(script.eval("pair()").unwrap(), Value::Integer(1));
}

#[test]
fn test_reused_expression_tracks_changes() {
    let (mut script, _) = script_with_output();
    let expr = script.create_dynamic_expression("(n or 0) + 1").unwrap();
    assert_eq!(script.evaluate(&expr).unwrap(), Value::Integer(1));
    script.do_string("n = 41", "=set").unwrap();
    assert_eq!(script.evaluate(&expr).unwrap(), Value::Integer(42));
    script.release_expression(expr);
}

#[test]
fn test_statements_are_not_expressions() {
    let (mut script, _) = script_with_output();
    for src in ["x = 1", "local y = 2", "return 3", "1 +"] {
        let err = script.create_dynamic_expression(src).unwrap_err();
        assert!(matches!(err, LuaError::Dynamic(_)), "{src}: {err}");
    }
}

#[test]
fn test_runtime_failure_is_dynamic() {
    let (mut script, _) = script_with_output();
    let err = script.eval("missing.field").unwrap_err();
    let text = err.to_string();
    assert!(text.starts_with("<dynamic>: "), "{text}");
    assert!(text.contains("attempt to index a nil value"), "{text}");
}

#[test]
fn test_expression_does_not_leak_into_globals() {
    let (mut script, _) = script_with_output();
    script.eval("function() return 1 end").unwrap();
    assert_eq!(script.get_global("_ENV"), Value::Nil);
}
