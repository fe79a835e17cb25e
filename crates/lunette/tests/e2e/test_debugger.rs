use super::helpers::*;
use lunette::{Debugger, DebuggerAction, LuaError, PauseInfo, PauseReason, Value, Vm};
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Default)]
struct Log {
    pauses: Vec<(PauseReason, u32, Vec<String>)>,
    errors: Vec<String>,
    globals_seen: Vec<Value>,
}

/// Answers every pause with the next queued action, then `Run`.
struct Scripted {
    log: Rc<RefCell<Log>>,
    actions: Vec<DebuggerAction>,
    break_on_error: bool,
}

impl Debugger for Scripted {
    fn on_pause(&mut self, vm: &Vm, pause: &PauseInfo) -> DebuggerAction {
        let frames = pause.call_stack.iter().map(|f| f.function.clone()).collect();
        let mut log = self.log.borrow_mut();
        log.pauses.push((pause.reason, pause.location.line, frames));
        log.globals_seen.push(vm.get_global("counter"));
        if self.actions.is_empty() {
            DebuggerAction::Run
        } else {
            self.actions.remove(0)
        }
    }

    fn pause_on_error(&self) -> bool {
        self.break_on_error
    }

    fn on_error(&mut self, _vm: &Vm, error: &LuaError) {
        self.log.borrow_mut().errors.push(error.to_string());
    }
}

const PROGRAM: &str = "counter = 0
local function bump(n)
  counter = counter + n
  return counter
end
for i = 1, 3 do
  bump(i)
end
return counter
";

fn debug_run(actions: Vec<DebuggerAction>, breakpoints: &[u32]) -> Log {
    let log = Rc::new(RefCell::new(Log::default()));
    let (mut script, _) = script_with_output();
    let svc = script.attach_debugger(Box::new(Scripted {
        log: Rc::clone(&log),
        actions,
        break_on_error: false,
    }));
    for &line in breakpoints {
        svc.set_breakpoint("prog", line);
    }
    let result = script.do_string(PROGRAM, "=prog").unwrap();
    assert_eq!(result, vec![Value::Integer(6)]);
    script.detach_debugger();
    Rc::try_unwrap(log).ok().expect("single owner").into_inner()
}

#[test]
fn test_breakpoint_inside_function_sees_state() {
    let log = debug_run(Vec::new(), &[3]);
    assert_eq!(log.pauses.len(), 3);
    assert!(log.pauses.iter().all(|p| p.0 == PauseReason::Breakpoint && p.1 == 3));
    assert_eq!(
        log.globals_seen,
        vec![Value::Integer(0), Value::Integer(1), Value::Integer(3)]
    );
}

#[test]
fn test_call_stack_snapshot_names_frames() {
    let log = debug_run(Vec::new(), &[3]);
    let frames = &log.pauses[0].2;
    assert_eq!(frames.len(), 2);
    assert!(frames[0].contains("bump"), "{frames:?}");
}

#[test]
fn test_step_over_walks_the_loop() {
    let log = debug_run(vec![DebuggerAction::StepOver; 3], &[6]);
    let lines: Vec<u32> = log.pauses.iter().map(|p| p.1).collect();
    assert_eq!(&lines[..4], &[6, 7, 6, 7]);
    assert!(log.pauses[1..].iter().all(|p| p.2.len() == 1));
}

#[test]
fn test_step_in_then_out() {
    let log = debug_run(vec![DebuggerAction::StepIn, DebuggerAction::StepOut], &[7]);
    assert_eq!(log.pauses[1].0, PauseReason::Step);
    assert_eq!(log.pauses[1].1, 3);
    assert_eq!(log.pauses[2].2.len(), 1);
}

#[test]
fn test_breakpoints_can_be_cleared_while_attached() {
    let log = Rc::new(RefCell::new(Log::default()));
    let (mut script, _) = script_with_output();
    script
        .attach_debugger(Box::new(Scripted {
            log: Rc::clone(&log),
            actions: Vec::new(),
            break_on_error: false,
        }))
        .set_breakpoint("prog", 3);
    script.do_string(PROGRAM, "=prog").unwrap();
    assert_eq!(log.borrow().pauses.len(), 3);

    let svc = script.debug_service().expect("attached");
    assert!(svc.clear_breakpoint("prog", 3));
    script.do_string(PROGRAM, "=prog").unwrap();
    assert_eq!(log.borrow().pauses.len(), 3);
}

#[test]
fn test_error_is_reported_to_debugger() {
    let log = Rc::new(RefCell::new(Log::default()));
    let (mut script, _) = script_with_output();
    script.attach_debugger(Box::new(Scripted {
        log: Rc::clone(&log),
        actions: Vec::new(),
        break_on_error: true,
    }));
    let err = script.do_string("local t = nil\nreturn t.x", "=bad").unwrap_err();
    assert_eq!(log.borrow().errors, vec![err.to_string()]);
    // Errors caught by pcall are not reported.
    script.do_string("pcall(error, 'quiet')", "=ok").unwrap();
    assert_eq!(log.borrow().errors.len(), 1);
}
