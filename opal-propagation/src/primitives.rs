//! Hand-written transfer functions for foreign primitives.
//!
//! A primitive call produces two values: the slot the method returns on
//! success, and the value left behind for the in-method failure path
//! (the code following the `PRIMITIVE` bytecode). A summary writes both
//! sets; leaving one empty marks the corresponding path dead. Primitives
//! with no summary kill the whole path, which is conservative in the
//! narrowing direction — the output is advisory, not sound across the
//! foreign boundary.

use opal_program::Program;

use crate::type_set::TypeSet;

/// `(program, success, failure)` transfer function.
pub type TypeSummary = fn(&Program, &mut TypeSet, &mut TypeSet);

pub const MODULE_CORE: u8 = 0;
pub const MODULE_TASK: u8 = 1;

pub const CORE_INT_ADD: u16 = 0;
pub const CORE_INT_SUB: u16 = 1;
pub const CORE_INT_MUL: u16 = 2;
pub const CORE_INT_DIV: u16 = 3;
pub const CORE_INT_MOD: u16 = 4;
pub const CORE_INT_COMPARE: u16 = 5;
pub const CORE_FLOAT_ADD: u16 = 6;
pub const CORE_FLOAT_SQRT: u16 = 7;
pub const CORE_INT_TO_FLOAT: u16 = 8;
pub const CORE_NUMBER_TO_STRING: u16 = 9;
pub const CORE_STRING_CONCAT: u16 = 10;
pub const CORE_STRING_AT: u16 = 11;
pub const CORE_STRING_LENGTH: u16 = 12;
pub const CORE_ARRAY_NEW: u16 = 13;
pub const CORE_ARRAY_AT: u16 = 14;
pub const CORE_ARRAY_AT_PUT: u16 = 15;
pub const CORE_BYTE_ARRAY_NEW: u16 = 16;
pub const CORE_IDENTITY_HASH: u16 = 17;
pub const CORE_OBJECT_EQUALS: u16 = 18;

pub const TASK_CURRENT: u16 = 0;
pub const TASK_SPAWN: u16 = 1;
pub const TASK_YIELD: u16 = 2;

/// Look up the summary for `(module, index)`; `None` for primitives the
/// analyzer has no model for.
pub fn lookup(module: u8, index: u16) -> Option<TypeSummary> {
    let summary: TypeSummary = match (module, index) {
        (MODULE_CORE, CORE_INT_ADD) => int_arithmetic,
        (MODULE_CORE, CORE_INT_SUB) => int_arithmetic,
        (MODULE_CORE, CORE_INT_MUL) => int_arithmetic,
        (MODULE_CORE, CORE_INT_DIV) => int_division,
        (MODULE_CORE, CORE_INT_MOD) => int_division,
        (MODULE_CORE, CORE_INT_COMPARE) => comparison,
        (MODULE_CORE, CORE_FLOAT_ADD) => float_arithmetic,
        (MODULE_CORE, CORE_FLOAT_SQRT) => float_infallible,
        (MODULE_CORE, CORE_INT_TO_FLOAT) => float_infallible,
        (MODULE_CORE, CORE_NUMBER_TO_STRING) => to_string,
        (MODULE_CORE, CORE_STRING_CONCAT) => string_fallible,
        (MODULE_CORE, CORE_STRING_AT) => string_at,
        (MODULE_CORE, CORE_STRING_LENGTH) => length,
        (MODULE_CORE, CORE_ARRAY_NEW) => array_new,
        (MODULE_CORE, CORE_ARRAY_AT) => array_at,
        (MODULE_CORE, CORE_ARRAY_AT_PUT) => array_at_put,
        (MODULE_CORE, CORE_BYTE_ARRAY_NEW) => byte_array_new,
        (MODULE_CORE, CORE_IDENTITY_HASH) => length,
        (MODULE_CORE, CORE_OBJECT_EQUALS) => comparison_infallible,
        (MODULE_TASK, TASK_CURRENT) => task_current,
        (MODULE_TASK, TASK_SPAWN) => task_spawn,
        (MODULE_TASK, TASK_YIELD) => task_yield,
        _ => return None,
    };
    Some(summary)
}

// Integer arithmetic may overflow a smi into a large integer; the
// failure path sees the argument-type error message.
fn int_arithmetic(program: &Program, success: &mut TypeSet, failure: &mut TypeSet) {
    success.add_int(program);
    failure.add_string(program);
}

fn int_division(program: &Program, success: &mut TypeSet, failure: &mut TypeSet) {
    success.add_int(program);
    // Division by zero and argument-type errors share the failure slot.
    failure.add_string(program);
}

fn comparison(program: &Program, success: &mut TypeSet, failure: &mut TypeSet) {
    success.add_bool(program);
    failure.add_string(program);
}

fn comparison_infallible(program: &Program, success: &mut TypeSet, _failure: &mut TypeSet) {
    success.add_bool(program);
}

fn float_arithmetic(program: &Program, success: &mut TypeSet, failure: &mut TypeSet) {
    success.add_float(program);
    failure.add_string(program);
}

fn float_infallible(program: &Program, success: &mut TypeSet, _failure: &mut TypeSet) {
    success.add_float(program);
}

fn to_string(program: &Program, success: &mut TypeSet, _failure: &mut TypeSet) {
    success.add_string(program);
}

fn string_fallible(program: &Program, success: &mut TypeSet, failure: &mut TypeSet) {
    success.add_string(program);
    failure.add_string(program);
}

fn string_at(program: &Program, success: &mut TypeSet, failure: &mut TypeSet) {
    success.add_smi(program);
    failure.add_string(program);
}

fn length(program: &Program, success: &mut TypeSet, _failure: &mut TypeSet) {
    success.add_smi(program);
}

fn array_new(program: &Program, success: &mut TypeSet, failure: &mut TypeSet) {
    success.add_array(program);
    failure.add_string(program);
}

// Array elements are not tracked per slot; reads produce any value.
fn array_at(program: &Program, success: &mut TypeSet, failure: &mut TypeSet) {
    success.add_any(program);
    failure.add_string(program);
}

fn array_at_put(program: &Program, success: &mut TypeSet, failure: &mut TypeSet) {
    success.add_any(program);
    failure.add_string(program);
}

fn byte_array_new(program: &Program, success: &mut TypeSet, failure: &mut TypeSet) {
    success.add_byte_array(program, false);
    failure.add_string(program);
}

fn task_current(program: &Program, success: &mut TypeSet, _failure: &mut TypeSet) {
    success.add_task(program);
}

fn task_spawn(program: &Program, success: &mut TypeSet, failure: &mut TypeSet) {
    success.add_task(program);
    failure.add_string(program);
}

fn task_yield(program: &Program, success: &mut TypeSet, _failure: &mut TypeSet) {
    success.add_null(program);
}
