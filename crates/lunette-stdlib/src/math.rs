//! Math library.

use crate::{register_lib, set_field, LibResult};
use lunette_core::number::{float_floor_to_integer, float_to_integer};
use lunette_core::value::Value;
use lunette_vm::coerce;
use lunette_vm::dispatch;
use lunette_vm::{CallbackResult, ExecutionContext, Vm};
use std::cell::Cell;
use std::rc::Rc;

pub fn register(vm: &mut Vm) {
    let lib = register_lib(
        vm,
        "math",
        &[
            ("abs", math_abs),
            ("ceil", math_ceil),
            ("floor", math_floor),
            ("sqrt", math_sqrt),
            ("sin", math_sin),
            ("cos", math_cos),
            ("tan", math_tan),
            ("asin", math_asin),
            ("acos", math_acos),
            ("atan", math_atan),
            ("exp", math_exp),
            ("log", math_log),
            ("deg", math_deg),
            ("rad", math_rad),
            ("fmod", math_fmod),
            ("modf", math_modf),
            ("max", math_max),
            ("min", math_min),
            ("tointeger", math_tointeger),
            ("type", math_type),
            ("ult", math_ult),
        ],
    );
    set_field(vm, lib, "pi", Value::Float(std::f64::consts::PI));
    set_field(vm, lib, "huge", Value::Float(f64::INFINITY));
    set_field(vm, lib, "maxinteger", Value::Integer(i64::MAX));
    set_field(vm, lib, "mininteger", Value::Integer(i64::MIN));

    // Generator state is per VM.
    let state = Rc::new(Cell::new(0x2545_f491_4f6c_dd1d_u64));
    let rng = Rc::clone(&state);
    vm.set_function(lib, "random", move |ctx, args| math_random(ctx, args, &rng));
    vm.set_function(lib, "randomseed", move |ctx, args| {
        let seed = match args.first() {
            None | Some(Value::Nil) => std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map_or(0, |d| d.as_nanos() as u64),
            Some(_) => ctx.check_integer(&args, 0)? as u64,
        };
        state.set(seed);
        Ok(CallbackResult::none())
    });
}

/// SplitMix64 step.
fn next_random(state: &Cell<u64>) -> u64 {
    let s = state.get().wrapping_add(0x9e37_79b9_7f4a_7c15);
    state.set(s);
    let mut z = s;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

fn int_or_float(f: f64) -> Value {
    float_to_integer(f).map_or(Value::Float(f), Value::Integer)
}

fn unary(ctx: &mut ExecutionContext<'_>, args: &[Value], op: fn(f64) -> f64) -> LibResult {
    let x = ctx.check_number(args, 0)?;
    Ok(CallbackResult::one(Value::Float(op(x))))
}

fn math_abs(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let v = match ctx.check_numeric(&args, 0)? {
        Value::Integer(i) => Value::Integer(i.wrapping_abs()),
        Value::Float(f) => Value::Float(f.abs()),
        other => other,
    };
    Ok(CallbackResult::one(v))
}

fn math_floor(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let v = match ctx.check_numeric(&args, 0)? {
        Value::Float(f) => float_floor_to_integer(f).map_or(Value::Float(f.floor()), Value::Integer),
        other => other,
    };
    Ok(CallbackResult::one(v))
}

fn math_ceil(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let v = match ctx.check_numeric(&args, 0)? {
        Value::Float(f) => int_or_float(f.ceil()),
        other => other,
    };
    Ok(CallbackResult::one(v))
}

fn math_sqrt(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    unary(ctx, &args, f64::sqrt)
}

fn math_sin(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    unary(ctx, &args, f64::sin)
}

fn math_cos(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    unary(ctx, &args, f64::cos)
}

fn math_tan(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    unary(ctx, &args, f64::tan)
}

fn math_asin(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    unary(ctx, &args, f64::asin)
}

fn math_acos(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    unary(ctx, &args, f64::acos)
}

fn math_exp(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    unary(ctx, &args, f64::exp)
}

fn math_deg(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    unary(ctx, &args, f64::to_degrees)
}

fn math_rad(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    unary(ctx, &args, f64::to_radians)
}

fn math_atan(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let y = ctx.check_number(&args, 0)?;
    let x = match args.get(1) {
        None | Some(Value::Nil) => 1.0,
        Some(_) => ctx.check_number(&args, 1)?,
    };
    Ok(CallbackResult::one(Value::Float(y.atan2(x))))
}

fn math_log(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let x = ctx.check_number(&args, 0)?;
    let r = match args.get(1) {
        None | Some(Value::Nil) => x.ln(),
        Some(_) => match ctx.check_number(&args, 1)? {
            b if b == 2.0 => x.log2(),
            b if b == 10.0 => x.log10(),
            b => x.ln() / b.ln(),
        },
    };
    Ok(CallbackResult::one(Value::Float(r)))
}

fn math_fmod(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let a = ctx.check_numeric(&args, 0)?;
    let b = ctx.check_numeric(&args, 1)?;
    let r = match (a, b) {
        (Value::Integer(m), Value::Integer(d)) => match d {
            0 => return Err(ctx.arg_error(1, "zero")),
            -1 => Value::Integer(0),
            _ => Value::Integer(m % d),
        },
        _ => {
            let x = ctx.check_number(&args, 0)?;
            let y = ctx.check_number(&args, 1)?;
            Value::Float(x % y)
        }
    };
    Ok(CallbackResult::one(r))
}

fn math_modf(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    if let Value::Integer(i) = ctx.check_numeric(&args, 0)? {
        return Ok(vec![Value::Integer(i), Value::Float(0.0)].into());
    }
    let x = ctx.check_number(&args, 0)?;
    let int_part = x.trunc();
    let frac = if x.is_infinite() { 0.0 } else { x - int_part };
    Ok(vec![Value::Float(int_part), Value::Float(frac)].into())
}

fn extremum(ctx: &mut ExecutionContext<'_>, args: &[Value], want_max: bool) -> LibResult {
    let mut best = ctx.check_numeric(args, 0)?;
    for i in 1..args.len() {
        let v = ctx.check_numeric(args, i)?;
        let better = if want_max {
            dispatch::less_than(ctx.vm, best, v, false)?
        } else {
            dispatch::less_than(ctx.vm, v, best, false)?
        };
        if better {
            best = v;
        }
    }
    Ok(CallbackResult::one(best))
}

fn math_max(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    extremum(ctx, &args, true)
}

fn math_min(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    extremum(ctx, &args, false)
}

fn math_tointeger(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let v = ctx.check_any(&args, 0)?;
    let n = coerce::to_integer(v, &ctx.vm.strings).map_or(Value::Nil, Value::Integer);
    Ok(CallbackResult::one(n))
}

fn math_type(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let name = match ctx.check_any(&args, 0)? {
        Value::Integer(_) => "integer",
        Value::Float(_) => "float",
        _ => return Ok(CallbackResult::one(Value::Nil)),
    };
    Ok(CallbackResult::one(ctx.intern(name)))
}

fn math_ult(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let a = ctx.check_integer(&args, 0)?;
    let b = ctx.check_integer(&args, 1)?;
    Ok(CallbackResult::one(Value::Boolean((a as u64) < (b as u64))))
}

fn math_random(ctx: &mut ExecutionContext<'_>, args: Vec<Value>, state: &Cell<u64>) -> LibResult {
    let r = next_random(state);
    let (low, up) = match args.len() {
        0 => {
            // 53 random bits scaled into [0, 1).
            let f = (r >> 11) as f64 * (1.0 / (1u64 << 53) as f64);
            return Ok(CallbackResult::one(Value::Float(f)));
        }
        1 => (1, ctx.check_integer(&args, 0)?),
        2 => (ctx.check_integer(&args, 0)?, ctx.check_integer(&args, 1)?),
        _ => return Err(ctx.error("wrong number of arguments")),
    };
    if low > up {
        return Err(ctx.arg_error(args.len() - 1, "interval is empty"));
    }
    let span = (up as u64).wrapping_sub(low as u64);
    let offset = if span == u64::MAX { r } else { r % (span + 1) };
    Ok(CallbackResult::one(Value::Integer((low as u64).wrapping_add(offset) as i64)))
}

#[cfg(test)]
mod tests {
    use crate::test_util::{run, run_err, run_strings};
    use lunette_core::value::Value;

    #[test]
    fn test_floor_ceil_keep_integers() {
        assert_eq!(
            run("return math.floor(3.7), math.ceil(3.2), math.floor(-3.5), math.floor(5)"),
            vec![Value::Integer(3), Value::Integer(4), Value::Integer(-4), Value::Integer(5)]
        );
        assert_eq!(run("return math.floor(1e300)"), vec![Value::Float(1e300)]);
    }

    #[test]
    fn test_max_min_keep_type() {
        assert_eq!(
            run("return math.max(1, 2.5, 2), math.min(3, 1, 2)"),
            vec![Value::Float(2.5), Value::Integer(1)]
        );
        assert!(run_err("return math.max()").contains("bad argument #1 to 'max' (number expected, got no value)"));
    }

    #[test]
    fn test_fmod() {
        assert_eq!(
            run("return math.fmod(7, 3), math.fmod(-7, 3), math.fmod(7.5, 2)"),
            vec![Value::Integer(1), Value::Integer(-1), Value::Float(1.5)]
        );
        assert!(run_err("return math.fmod(1, 0)").contains("bad argument #2 to 'fmod' (zero)"));
    }

    #[test]
    fn test_tointeger_and_type() {
        assert_eq!(
            run("return math.tointeger(3.0), math.tointeger(3.5), math.tointeger('8')"),
            vec![Value::Integer(3), Value::Nil, Value::Integer(8)]
        );
        assert_eq!(
            run_strings("return math.type(1), math.type(1.0), math.type('1')"),
            vec!["integer", "float", "nil"]
        );
    }

    #[test]
    fn test_constants() {
        assert_eq!(
            run("return math.maxinteger + 1 == math.mininteger, math.huge > 1e308, math.pi"),
            vec![Value::Boolean(true), Value::Boolean(true), Value::Float(std::f64::consts::PI)]
        );
    }

    #[test]
    fn test_random_ranges() {
        let src = "math.randomseed(42) for i = 1, 200 do \
                   local a, b = math.random(3), math.random(-2, 2) \
                   if a < 1 or a > 3 or b < -2 or b > 2 then return false end \
                   local f = math.random() if f < 0 or f >= 1 then return false end end return true";
        assert_eq!(run(src), vec![Value::Boolean(true)]);
        assert!(run_err("return math.random(2, 1)").contains("interval is empty"));
    }
}
