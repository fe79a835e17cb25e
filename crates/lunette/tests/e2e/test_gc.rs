use super::helpers::*;
use lunette::{Script, ScriptOptions, Value};

#[test]
fn test_collect_reclaims_garbage() {
    run_check_strings(
        "local before = collectgarbage('count')
         do
            local big = {}
            for i = 1, 10000 do big[i] = {i} end
         end
         local peak = collectgarbage('count')
         collectgarbage('collect')
         local after = collectgarbage('count')
         return peak > before, after < peak",
        &["true", "true"],
    );
}

#[test]
fn test_live_data_survives_automatic_collection() {
    let options = ScriptOptions::default().with_gc_step_threshold(64);
    let mut script = Script::with_options(options);
    let results = script
        .do_string(
            "local keep = {}
             for i = 1, 2000 do
                keep[i] = {value = 'item' .. i}
                local junk = {i, i + 1, tostring(i)}
             end
             local n = 0
             for i = 1, 2000 do
                if keep[i].value == 'item' .. i then n = n + 1 end
             end
             return n",
            "=gc",
        )
        .unwrap();
    assert_eq!(results, vec![Value::Integer(2000)]);
}

#[test]
fn test_closures_and_coroutines_survive_collection() {
    run_check_ints(
        "local function make()
            local hidden = {n = 41}
            return function() hidden.n = hidden.n + 1 return hidden.n end
         end
         local f = make()
         local co = coroutine.wrap(function() local t = {5} coroutine.yield(1) return t[1] end)
         co()
         collectgarbage()
         collectgarbage()
         return f(), co()",
        &[42, 5],
    );
}

#[test]
fn test_host_pinned_values() {
    let (mut script, _) = script_with_output();
    let t = script.do_string("return {tag = 'kept'}", "=t").unwrap()[0];
    let key = script.vm_mut().pin(t);
    script.collect_garbage();
    let restored = script.vm().pinned(key);
    script.set_global("restored", restored);
    let v = script.do_string("return restored.tag", "=t").unwrap();
    assert_eq!(script.to_display_string(v[0]).unwrap(), "kept");
    script.vm_mut().unpin(key);
}

#[test]
fn test_collectgarbage_options() {
    run_check_strings(
        "return type(collectgarbage('count')), collectgarbage('isrunning'), (pcall(collectgarbage, 'bogus'))",
        &["number", "true", "false"],
    );
}
