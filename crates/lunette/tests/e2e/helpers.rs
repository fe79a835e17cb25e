#![allow(dead_code)]

use lunette::{LuaError, LuaVersion, Script, ScriptOptions, Value};
use std::cell::RefCell;
use std::rc::Rc;

/// A script whose `print` output is collected instead of written to stdout.
pub fn script_with_output() -> (Script, Rc<RefCell<Vec<String>>>) {
    let out = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&out);
    let options = ScriptOptions::default()
        .with_print(Rc::new(move |line: &str| sink.borrow_mut().push(line.to_string())));
    (Script::with_options(options), out)
}

/// Compile and execute Lua source, returning the results and the script
/// that owns them.
pub fn run_lua_in(source: &str) -> (Vec<Value>, Script) {
    let (mut script, _) = script_with_output();
    let results = script
        .do_string(source, "=test")
        .unwrap_or_else(|e| panic!("error: {e}"));
    (results, script)
}

/// Compile and execute Lua source, returning result values.
pub fn run_lua(source: &str) -> Vec<Value> {
    run_lua_in(source).0
}

/// Compile and execute Lua source, expecting a runtime error.
pub fn run_lua_err(source: &str) -> String {
    let (mut script, _) = script_with_output();
    match script.do_string(source, "=test") {
        Err(e) => e.to_string(),
        Ok(vals) => panic!("expected error, got {} results: {:?}", vals.len(), vals),
    }
}

/// Compile under `version`, expecting a syntax error.
pub fn compile_err_with(source: &str, version: LuaVersion) -> String {
    let mut script = Script::with_options(ScriptOptions::default().with_version(version));
    match script.compile(source, "=test") {
        Err(LuaError::Syntax(e)) => e.to_string(),
        Err(other) => panic!("expected syntax error, got {other}"),
        Ok(_) => panic!("expected syntax error, source compiled"),
    }
}

/// Compile with the default dialect, expecting a syntax error.
pub fn compile_err(source: &str) -> String {
    compile_err_with(source, LuaVersion::default())
}

/// Check that results[idx] is an integer with the expected value.
pub fn assert_int(results: &[Value], idx: usize, expected: i64) {
    match results[idx] {
        Value::Integer(got) => assert_eq!(got, expected, "result[{idx}] = {got}, expected {expected}"),
        other => panic!("result[{idx}] = {other:?}, expected integer {expected}"),
    }
}

/// Check that results[idx] is a float with the expected value.
pub fn assert_float(results: &[Value], idx: usize, expected: f64) {
    match results[idx] {
        Value::Float(got) => assert!(
            (got - expected).abs() < 1e-10,
            "result[{idx}] = {got}, expected {expected}"
        ),
        other => panic!("result[{idx}] = {other:?}, expected float {expected}"),
    }
}

/// Check that results[idx] is a boolean with the expected value.
pub fn assert_bool(results: &[Value], idx: usize, expected: bool) {
    match results[idx] {
        Value::Boolean(got) => assert_eq!(got, expected, "result[{idx}] = {got}, expected {expected}"),
        other => panic!("result[{idx}] = {other:?}, expected bool {expected}"),
    }
}

/// Check that results[idx] is nil.
pub fn assert_nil(results: &[Value], idx: usize) {
    assert_eq!(results[idx], Value::Nil, "result[{idx}] = {:?}, expected nil", results[idx]);
}

/// Check that results[idx] is a string with the expected value.
pub fn assert_str(results: &[Value], idx: usize, expected: &str, script: &Script) {
    let Value::String(id) = results[idx] else {
        panic!("result[{idx}] = {:?}, expected string \"{expected}\"", results[idx]);
    };
    let got = script.vm().strings.get_str(id);
    assert_eq!(got, expected, "result[{idx}] = \"{got}\", expected \"{expected}\"");
}

/// Run Lua source and check results against expected integer values.
pub fn run_check_ints(source: &str, expected: &[i64]) {
    let results = run_lua(source);
    assert_eq!(
        results.len(),
        expected.len(),
        "expected {} results, got {}: {:?}",
        expected.len(),
        results.len(),
        results
    );
    for (i, &exp) in expected.iter().enumerate() {
        assert_int(&results, i, exp);
    }
}

/// Run Lua source and compare every result, rendered with `tostring`.
pub fn run_check_strings(source: &str, expected: &[&str]) {
    let (results, mut script) = run_lua_in(source);
    let got: Vec<String> = results
        .iter()
        .map(|&v| script.to_display_string(v).unwrap_or_else(|e| panic!("tostring: {e}")))
        .collect();
    assert_eq!(got, expected);
}

/// Run `f` on a thread with a main-thread sized stack.
pub fn on_large_stack<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
    std::thread::Builder::new()
        .stack_size(8 << 20)
        .spawn(f)
        .expect("spawn test thread")
        .join()
        .unwrap_or_else(|e| std::panic::resume_unwind(e))
}
