//! Table library.

use crate::base_lib::unpack_values;
use crate::{register_lib, set_field, LibResult};
use lunette_core::value::Value;
use lunette_vm::dispatch;
use lunette_vm::{CallbackResult, ExecutionContext, LuaError, Vm};

pub fn register(vm: &mut Vm) {
    register_lib(
        vm,
        "table",
        &[
            ("insert", table_insert),
            ("remove", table_remove),
            ("concat", table_concat),
            ("pack", table_pack),
            ("unpack", table_unpack),
            ("move", table_move),
            ("sort", table_sort),
        ],
    );
}

/// table.insert(t, [pos,] value)
fn table_insert(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let t = ctx.check_table(&args, 0)?;
    let len = ctx.vm.gc.get_table(t).length();
    match args.len() {
        2 => ctx.vm.gc.get_table_mut(t).raw_seti(len + 1, args[1]),
        3 => {
            let pos = ctx.check_integer(&args, 1)?;
            // Unsigned compare folds the `pos < 1` check in.
            if (pos as u64).wrapping_sub(1) >= (len as u64).wrapping_add(1) {
                return Err(ctx.arg_error(1, "position out of bounds"));
            }
            ctx.vm.gc.get_table_mut(t).insert(pos, args[2]);
        }
        _ => return Err(ctx.error("wrong number of arguments to 'insert'")),
    }
    Ok(CallbackResult::none())
}

/// table.remove(t [, pos])
fn table_remove(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let t = ctx.check_table(&args, 0)?;
    let len = ctx.vm.gc.get_table(t).length();
    let pos = ctx.opt_integer(&args, 1, len)?;
    if pos != len && (pos as u64).wrapping_sub(1) > len as u64 {
        return Err(ctx.arg_error(1, "position out of bounds"));
    }
    Ok(CallbackResult::one(ctx.vm.gc.get_table_mut(t).remove(pos)))
}

/// table.concat(t [, sep [, i [, j]]])
fn table_concat(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let t = ctx.check_table(&args, 0)?;
    let sep = match args.get(1) {
        None | Some(Value::Nil) => Vec::new(),
        Some(_) => {
            let id = ctx.check_string(&args, 1)?;
            ctx.vm.strings.get_bytes(id).to_vec()
        }
    };
    let i = ctx.opt_integer(&args, 2, 1)?;
    let j = match args.get(3) {
        None | Some(Value::Nil) => ctx.vm.gc.get_table(t).length(),
        Some(_) => ctx.check_integer(&args, 3)?,
    };

    let mut out = Vec::new();
    let mut k = i;
    while k <= j {
        let v = ctx.vm.gc.get_table(t).raw_geti(k);
        let piece = match v {
            Value::String(_) | Value::Integer(_) | Value::Float(_) => ctx.check_string(&[v], 0)?,
            _ => {
                return Err(ctx.error(format!("invalid value (at index {k}) in table for 'concat'")));
            }
        };
        out.extend_from_slice(ctx.vm.strings.get_bytes(piece));
        if k == j {
            break;
        }
        out.extend_from_slice(&sep);
        k += 1;
    }
    let id = ctx.vm.strings.intern(&out);
    Ok(CallbackResult::one(Value::String(id)))
}

/// table.pack(...)
fn table_pack(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let t = ctx.vm.gc.alloc_table(args.len(), 1);
    let n = args.len() as i64;
    for (i, v) in args.into_iter().enumerate() {
        ctx.vm.gc.get_table_mut(t).raw_seti(i as i64 + 1, v);
    }
    set_field(ctx.vm, t, "n", Value::Integer(n));
    Ok(CallbackResult::one(Value::Table(t)))
}

/// table.unpack(t [, i [, j]])
fn table_unpack(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    Ok(unpack_values(ctx, &args)?.into())
}

/// table.move(a1, f, e, t [, a2])
fn table_move(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let src = ctx.check_table(&args, 0)?;
    let f = ctx.check_integer(&args, 1)?;
    let e = ctx.check_integer(&args, 2)?;
    let dest_start = ctx.check_integer(&args, 3)?;
    let dest = match args.get(4) {
        None | Some(Value::Nil) => src,
        Some(_) => ctx.check_table(&args, 4)?,
    };
    if e >= f {
        if f <= 0 && e >= i64::MAX + f {
            return Err(ctx.arg_error(2, "too many elements to move"));
        }
        let count = e - f;
        if dest_start > i64::MAX - count {
            return Err(ctx.arg_error(3, "destination wrap around"));
        }
        let copy = |ctx: &mut ExecutionContext<'_>, i: i64| {
            let v = ctx.vm.gc.get_table(src).raw_geti(f + i);
            ctx.vm.gc.get_table_mut(dest).raw_seti(dest_start + i, v);
        };
        if dest_start > e || dest_start <= f || src != dest {
            for i in 0..=count {
                copy(ctx, i);
            }
        } else {
            for i in (0..=count).rev() {
                copy(ctx, i);
            }
        }
    }
    Ok(CallbackResult::one(Value::Table(dest)))
}

// ---- Sorting ----

/// table.sort(t [, comp])
fn table_sort(ctx: &mut ExecutionContext<'_>, args: Vec<Value>) -> LibResult {
    let t = ctx.check_table(&args, 0)?;
    let comp = match args.get(1) {
        None | Some(Value::Nil) => None,
        Some(&f) if f.is_function() => Some(f),
        Some(_) => return Err(ctx.type_error(&args, 1, "function")),
    };
    let len = ctx.vm.gc.get_table(t).length();
    if len > i64::from(i32::MAX) {
        return Err(ctx.arg_error(0, "array too big"));
    }
    let mut items: Vec<Value> = {
        let table = ctx.vm.gc.get_table(t);
        (1..=len).map(|i| table.raw_geti(i)).collect()
    };
    // The values stay reachable through `t` while comparators run.
    merge_sort(&mut items, &mut |a, b| match comp {
        Some(f) => Ok(ctx.call(f, &[a, b])?.first().is_some_and(|v| v.is_truthy())),
        None => dispatch::less_than(ctx.vm, a, b, false),
    })?;
    let table = ctx.vm.gc.get_table_mut(t);
    for (i, v) in items.into_iter().enumerate() {
        table.raw_seti(i as i64 + 1, v);
    }
    Ok(CallbackResult::none())
}

/// Stable merge sort with a fallible comparator.
fn merge_sort<F>(items: &mut Vec<Value>, less: &mut F) -> Result<(), LuaError>
where
    F: FnMut(Value, Value) -> Result<bool, LuaError>,
{
    if items.len() <= 1 {
        return Ok(());
    }
    let mut right = items.split_off(items.len() / 2);
    merge_sort(items, less)?;
    merge_sort(&mut right, less)?;
    let left = std::mem::take(items);
    items.reserve(left.len() + right.len());
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        if less(right[j], left[i])? {
            items.push(right[j]);
            j += 1;
        } else {
            items.push(left[i]);
            i += 1;
        }
    }
    items.extend_from_slice(&left[i..]);
    items.extend_from_slice(&right[j..]);
    Ok(())
}
