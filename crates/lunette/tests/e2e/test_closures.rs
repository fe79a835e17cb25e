use super::helpers::*;

// ---- Captures ----

#[test]
fn test_closure_counter() {
    run_check_ints(
        "local function counter()
            local n = 0
            return function()
                n = n + 1
                return n
            end
         end
         local c = counter()
         c()
         c()
         return c()",
        &[3],
    );
}

#[test]
fn test_counters_are_independent() {
    run_check_ints(
        "local function counter()
            local n = 0
            return function() n = n + 1 return n end
         end
         local a, b = counter(), counter()
         a() a()
         return a(), b()",
        &[3, 1],
    );
}

#[test]
fn test_shared_upvalue_between_closures() {
    run_check_ints(
        "local x = 0
         local function inc() x = x + 1 end
         local function get() return x end
         inc() inc() inc()
         return get(), x",
        &[3, 3],
    );
}

#[test]
fn test_each_iteration_gets_a_fresh_local() {
    run_check_ints(
        "local fs = {}
         for i = 1, 3 do fs[i] = function() return i end end
         return fs[1](), fs[2](), fs[3]()",
        &[1, 2, 3],
    );
}

#[test]
fn test_while_body_locals_are_fresh() {
    run_check_ints(
        "local fs, i = {}, 0
         while i < 3 do
            i = i + 1
            local j = i * 10
            fs[i] = function() return j end
         end
         return fs[1](), fs[3]()",
        &[10, 30],
    );
}

#[test]
fn test_upvalue_through_two_levels() {
    run_check_ints(
        "local function outer()
            local v = 1
            return function()
                return function() v = v + 1 return v end
            end
         end
         local f = outer()()
         f()
         return f()",
        &[3],
    );
}

#[test]
fn test_recursive_local_function() {
    run_check_ints(
        "local function fact(n) if n <= 1 then return 1 end return n * fact(n - 1) end
         return fact(10)",
        &[3628800],
    );
}

// ---- Varargs ----

#[test]
fn test_varargs_in_table_and_select() {
    run_check_ints(
        "local function f(...)
            local t = {...}
            return #t, select('#', ...), (select(2, ...))
         end
         return f(5, 6, 7)",
        &[3, 3, 6],
    );
}

#[test]
fn test_method_definition_and_self() {
    run_check_ints(
        "local Account = {}
         Account.__index = Account
         function Account.new(b) return setmetatable({balance = b}, Account) end
         function Account:deposit(v) self.balance = self.balance + v end
         local a = Account.new(100)
         a:deposit(50)
         return a.balance",
        &[150],
    );
}
