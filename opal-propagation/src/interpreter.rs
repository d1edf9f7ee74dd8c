//! Per-opcode transfer functions.
//!
//! `process` runs one basic block: it interprets bytecodes over the
//! abstract state until the path ends (return, throw, unconditional
//! branch, dead narrowing) and registers successor blocks with the
//! worklist. Paths whose top of stack becomes empty after a narrowing or
//! a call are unreachable and simply stop; the fixpoint discards them.

use log::debug;

use opal_program::{Opcode, Program};

use crate::primitives;
use crate::propagator::Propagator;
use crate::templates::{BlockTemplateId, MethodTemplateId};
use crate::type_scope::{MergeKind, TypeScope};
use crate::type_set::TypeSet;
use crate::type_stack::TypeStack;
use crate::worklist::Worklist;

fn read_u16(code: &[u8], at: usize) -> u32 {
    u16::from_le_bytes([code[at], code[at + 1]]) as u32
}

fn read_u32(code: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([code[at], code[at + 1], code[at + 2], code[at + 3]])
}

/// Decode the single unsigned operand of an opcode, whatever its width.
fn operand(code: &[u8], pc: usize, op: Opcode) -> u32 {
    match op.length() {
        2 => code[pc + 1] as u32,
        3 => read_u16(code, pc + 1),
        5 => read_u32(code, pc + 1),
        _ => unreachable!("{op} has no single operand"),
    }
}

fn method_return(propagator: &mut Propagator, template: MethodTemplateId, stack: &mut TypeStack) {
    let top = stack.local(0).clone();
    let result = propagator.template(template).result();
    propagator.merge_variable(result, &top);
    stack.pop();
}

fn block_return(propagator: &mut Propagator, block: BlockTemplateId, stack: &mut TypeStack) {
    let top = stack.local(0).clone();
    let result = propagator.block(block).result();
    propagator.merge_variable(result, &top);
    stack.pop();
}

/// Synthesize a return from the current frame: the enclosing block when
/// the scope is nested, the method otherwise. Block returns flow their
/// effects on outer frames back into the enclosing scope.
fn handle_return(
    propagator: &mut Propagator,
    template: MethodTemplateId,
    scope: &mut TypeScope,
    outer: &mut Option<&mut TypeScope>,
) {
    if scope.level() > 0 {
        let receiver = scope.top().get(0).clone();
        block_return(propagator, receiver.block(), scope.top_mut());
        let enclosing = outer
            .as_deref_mut()
            .unwrap_or_else(|| unreachable!("block scope without enclosing scope"));
        enclosing.merge(scope, MergeKind::Return);
    } else {
        method_return(propagator, template, scope.top_mut());
    }
}

/// Interpret one basic block of `template`'s method, starting at `bcp`.
///
/// `outer` is the enclosing scope when this is a block body; block
/// returns and unwinds merge into it.
pub(crate) fn process(
    propagator: &mut Propagator,
    template: MethodTemplateId,
    mut bcp: u32,
    scope: &mut TypeScope,
    worklist: &mut Worklist,
    mut outer: Option<&mut TypeScope>,
) {
    let program: &Program = propagator.program();
    let code: &[u8] = &program.bytecodes;
    let mut linked = false;

    loop {
        let pc = bcp as usize;
        assert!(pc < code.len(), "bytecode position {bcp} out of bounds");
        let Some(op) = Opcode::from_byte(code[pc]) else {
            debug!("unknown opcode {} at {bcp}; ending path", code[pc]);
            return;
        };

        match op {
            Opcode::LoadLocal | Opcode::LoadLocalWide => {
                let n = operand(code, pc, op) as usize;
                let stack = scope.top_mut();
                let local = stack.local(n).clone();
                stack.push(&local);
            }

            Opcode::LoadLocal0
            | Opcode::LoadLocal1
            | Opcode::LoadLocal2
            | Opcode::LoadLocal3
            | Opcode::LoadLocal4
            | Opcode::LoadLocal5 => {
                let n = (op as u8 - Opcode::LoadLocal0 as u8) as usize;
                let stack = scope.top_mut();
                let local = stack.local(n).clone();
                stack.push(&local);
            }

            Opcode::PopLoadLocal => {
                let n = operand(code, pc, op) as usize;
                let stack = scope.top_mut();
                let local = stack.local(n + 1).clone();
                stack.set_local(0, &local);
            }

            Opcode::StoreLocal => {
                let n = operand(code, pc, op) as usize;
                let stack = scope.top_mut();
                let top = stack.local(0).clone();
                stack.set_local(n, &top);
            }

            Opcode::StoreLocalPop => {
                let n = operand(code, pc, op) as usize;
                let stack = scope.top_mut();
                let top = stack.local(0).clone();
                stack.set_local(n, &top);
                stack.pop();
            }

            Opcode::LoadOuter => {
                let n = operand(code, pc, op) as usize;
                propagator.load_outer(scope, bcp, n);
            }

            Opcode::LoadOuterBlock => {
                let n = operand(code, pc, op) as usize;
                propagator.load_outer(scope, bcp, n);
                assert!(scope.top().local(0).is_block());
            }

            Opcode::StoreOuter => {
                let n = operand(code, pc, op) as usize;
                let value = scope.top().local(0).clone();
                let block = scope.top().local(1).clone();
                let level = propagator.block(block.block()).level();
                scope.store_outer(level, n, &value);
                let stack = scope.top_mut();
                stack.pop();
                stack.pop();
                stack.push(&value);
            }

            Opcode::LoadField | Opcode::LoadFieldWide => {
                let index = operand(code, pc, op);
                propagator.load_field(template, scope.top_mut(), bcp, index);
                if scope.top().local(0).is_empty() {
                    return;
                }
            }

            Opcode::LoadFieldLocal => {
                let encoded = operand(code, pc, op);
                let local = (encoded & 0x0f) as usize;
                let index = encoded >> 4;
                {
                    let stack = scope.top_mut();
                    let instance = stack.local(local).clone();
                    stack.push(&instance);
                }
                propagator.load_field(template, scope.top_mut(), bcp, index);
                if scope.top().local(0).is_empty() {
                    return;
                }
            }

            Opcode::PopLoadFieldLocal => {
                let encoded = operand(code, pc, op);
                let local = (encoded & 0x0f) as usize;
                let index = encoded >> 4;
                {
                    let stack = scope.top_mut();
                    let instance = stack.local(local + 1).clone();
                    stack.set_local(0, &instance);
                }
                propagator.load_field(template, scope.top_mut(), bcp, index);
                if scope.top().local(0).is_empty() {
                    return;
                }
            }

            Opcode::StoreField | Opcode::StoreFieldWide => {
                let index = operand(code, pc, op);
                propagator.store_field(scope.top_mut(), index);
            }

            Opcode::StoreFieldPop => {
                let index = operand(code, pc, op);
                propagator.store_field(scope.top_mut(), index);
                scope.top_mut().pop();
            }

            Opcode::LoadLiteral | Opcode::LoadLiteralWide => {
                let index = operand(code, pc, op) as usize;
                let literal = &program.literals[index];
                scope.top_mut().push_literal(program, literal);
            }

            Opcode::LoadNull => scope.top_mut().push_null(program),

            Opcode::LoadSmi0 | Opcode::LoadSmi1 => scope.top_mut().push_smi(program),

            Opcode::LoadSmis0 => {
                let count = operand(code, pc, op);
                let stack = scope.top_mut();
                for _ in 0..count {
                    stack.push_smi(program);
                }
            }

            Opcode::LoadSmiU8 | Opcode::LoadSmiU16 | Opcode::LoadSmiU32 => {
                scope.top_mut().push_smi(program)
            }

            Opcode::LoadBlockMethod => {
                let header = operand(code, pc, op);
                let inner = program.method_at(header);
                // One block template per creation site and surrounding
                // specialization; its parameter cells subscribe the
                // surrounding template to widenings.
                let block = propagator.find_block(template, inner, scope.level(), bcp);
                scope.top_mut().push_block(block);
                propagator.propagate_block(block, template, scope, linked);
            }

            Opcode::LoadGlobalVar | Opcode::LoadGlobalVarWide => {
                let index = operand(code, pc, op);
                let variable = propagator.global_variable(index);
                let value = propagator.use_variable(variable, Some(template), Some(bcp));
                scope.top_mut().push(&value);
                if scope.top().local(0).is_empty() {
                    return;
                }
            }

            Opcode::LoadGlobalVarLazy | Opcode::LoadGlobalVarLazyWide => {
                let index = operand(code, pc, op) as usize;
                let Some(header) = program.global_variables[index].initializer_method() else {
                    debug!("global {index} is not a lazy initializer; ending path");
                    return;
                };
                let target = program.method_at(header);
                propagator.call_static(template, scope.top_mut(), bcp, target);
                if scope.top().local(0).is_empty() {
                    return;
                }
            }

            Opcode::StoreGlobalVar | Opcode::StoreGlobalVarWide => {
                let index = operand(code, pc, op);
                let variable = propagator.global_variable(index);
                let top = scope.top().local(0).clone();
                propagator.merge_variable(variable, &top);
            }

            Opcode::LoadGlobalVarDynamic
            | Opcode::StoreGlobalVarDynamic
            | Opcode::InvokeInitializerTail
            | Opcode::InvokeLambdaTail
            | Opcode::NonLocalBranch => {
                // No frontend emits these yet; their semantics are not
                // guessed at. Treat the path as dead.
                debug!("unimplemented opcode {op} at {bcp}; ending path");
                return;
            }

            Opcode::LoadBlock => {
                let n = operand(code, pc, op) as usize;
                let stack = scope.top_mut();
                let block = stack.local(n).clone();
                assert!(block.is_block());
                stack.push(&block);
            }

            Opcode::Pop => {
                let count = operand(code, pc, op);
                let stack = scope.top_mut();
                for _ in 0..count {
                    stack.pop();
                }
            }

            Opcode::Pop1 => scope.top_mut().pop(),

            Opcode::Allocate | Opcode::AllocateWide => {
                let class = operand(code, pc, op);
                // Fields may be observed before initialization.
                let fields = program.instance_fields_for(class);
                let mut null_set = TypeSet::empty(propagator.words_per_type());
                null_set.add_null(program);
                for index in 0..fields {
                    let variable = propagator.field(class, index as u32);
                    propagator.merge_variable(variable, &null_set);
                }
                scope.top_mut().push_instance(class);
            }

            Opcode::IsClass
            | Opcode::IsClassWide
            | Opcode::IsInterface
            | Opcode::IsInterfaceWide => {
                let stack = scope.top_mut();
                stack.pop();
                stack.push_bool(program);
            }

            Opcode::AsClass | Opcode::AsClassWide => {
                let encoded = operand(code, pc, op);
                let index = (encoded >> 1) as usize;
                let nullable = encoded & 1 != 0;
                let alive = scope
                    .top_mut()
                    .local_mut(0)
                    .remove_typecheck_class(program, index, nullable);
                if !alive {
                    return;
                }
            }

            Opcode::AsInterface | Opcode::AsInterfaceWide => {
                let encoded = operand(code, pc, op);
                let index = (encoded >> 1) as usize;
                let nullable = encoded & 1 != 0;
                let alive = scope
                    .top_mut()
                    .local_mut(0)
                    .remove_typecheck_interface(program, index, nullable);
                if !alive {
                    return;
                }
            }

            Opcode::AsLocal => {
                let encoded = operand(code, pc, op);
                let n = (encoded >> 5) as usize;
                let index = (encoded & 0x1f) as usize;
                let alive = scope
                    .top_mut()
                    .local_mut(n)
                    .remove_typecheck_class(program, index, false);
                if !alive {
                    return;
                }
            }

            Opcode::InvokeStatic => {
                let index = operand(code, pc, op) as usize;
                let Some(target) = program.dispatch_target(index) else {
                    debug!("static call through empty dispatch entry {index}; ending path");
                    return;
                };
                propagator.call_static(template, scope.top_mut(), bcp, target);
                if scope.top().local(0).is_empty() {
                    return;
                }
            }

            Opcode::InvokeStaticTail => {
                let index = operand(code, pc, op) as usize;
                let Some(target) = program.dispatch_target(index) else {
                    debug!("static call through empty dispatch entry {index}; ending path");
                    return;
                };
                propagator.call_static(template, scope.top_mut(), bcp, target);
                if scope.top().local(0).is_empty() {
                    return;
                }
                handle_return(propagator, template, scope, &mut outer);
                return;
            }

            Opcode::InvokeBlock => {
                let count = operand(code, pc, op) as usize;
                let receiver = scope.top().local(count - 1).clone();
                assert!(receiver.is_block(), "block invocation without a block");
                let block = receiver.block();
                let arity = propagator.block(block).arity();
                for i in 1..arity {
                    let argument = scope.top().local(count - (i + 1)).clone();
                    // Widening a parameter cell re-enqueues the method
                    // template surrounding the block.
                    let cell = propagator.block(block).argument(i);
                    propagator.merge_variable(cell, &argument);
                }
                let stack = scope.top_mut();
                for _ in 0..count {
                    stack.pop();
                }
                let result = propagator.block(block).result();
                let value = propagator.use_variable(result, Some(template), Some(bcp));
                if value.is_empty() {
                    if !linked {
                        return;
                    }
                    // The invoked try-block is guaranteed to unwind. Mark
                    // the unwind-reason slot so the UNWIND bytecode stops
                    // propagating into the code behind it.
                    scope.top_mut().local_mut(1).add_smi(program);
                }
                scope.top_mut().push(&value);
            }

            Opcode::InvokeVirtual => {
                let arity = code[pc + 1] as usize;
                let offset = read_u16(code, pc + 2);
                propagator.call_virtual(template, scope.top_mut(), bcp, arity + 1, offset);
                if scope.top().local(0).is_empty() {
                    return;
                }
            }

            Opcode::InvokeVirtualGet => {
                let offset = operand(code, pc, op);
                propagator.call_virtual(template, scope.top_mut(), bcp, 1, offset);
                if scope.top().local(0).is_empty() {
                    return;
                }
            }

            Opcode::InvokeVirtualSet => {
                let offset = operand(code, pc, op);
                propagator.call_virtual(template, scope.top_mut(), bcp, 2, offset);
                if scope.top().local(0).is_empty() {
                    return;
                }
            }

            Opcode::InvokeEq
            | Opcode::InvokeLt
            | Opcode::InvokeLte
            | Opcode::InvokeGt
            | Opcode::InvokeGte
            | Opcode::InvokeBitOr
            | Opcode::InvokeBitXor
            | Opcode::InvokeBitAnd
            | Opcode::InvokeAdd
            | Opcode::InvokeSub
            | Opcode::InvokeMul
            | Opcode::InvokeDiv
            | Opcode::InvokeMod
            | Opcode::InvokeBitShl
            | Opcode::InvokeBitShr
            | Opcode::InvokeBitUshr
            | Opcode::InvokeAt => {
                let offset = program.invoke_bytecode_offset(op) as u32;
                propagator.call_virtual(template, scope.top_mut(), bcp, 2, offset);
                if scope.top().local(0).is_empty() {
                    return;
                }
            }

            Opcode::InvokeAtPut => {
                let offset = program.invoke_bytecode_offset(op) as u32;
                propagator.call_virtual(template, scope.top_mut(), bcp, 3, offset);
                if scope.top().local(0).is_empty() {
                    return;
                }
            }

            Opcode::Branch => {
                let delta = operand(code, pc, op);
                worklist.add(bcp + delta, scope);
                return;
            }

            Opcode::BranchIfTrue | Opcode::BranchIfFalse => {
                let delta = operand(code, pc, op);
                scope.top_mut().pop();
                worklist.add(bcp + delta, scope);
            }

            Opcode::BranchBack => {
                let delta = operand(code, pc, op);
                worklist.add(bcp - delta, scope);
                return;
            }

            Opcode::BranchBackIfTrue | Opcode::BranchBackIfFalse => {
                let delta = operand(code, pc, op);
                scope.top_mut().pop();
                worklist.add(bcp - delta, scope);
            }

            Opcode::Primitive => {
                let module = code[pc + 1];
                let index = read_u16(code, pc + 2) as u16;
                let Some(summary) = primitives::lookup(module, index) else {
                    debug!("unknown primitive {module}:{index} at {bcp}; ending path");
                    return;
                };
                let words = propagator.words_per_type();
                let mut success = TypeSet::empty(words);
                let mut failure = TypeSet::empty(words);
                summary(program, &mut success, &mut failure);
                {
                    let stack = scope.top_mut();
                    stack.push(&failure);
                    stack.push(&success);
                }
                method_return(propagator, template, scope.top_mut());
                if scope.top().local(0).is_empty() {
                    return;
                }
            }

            Opcode::Throw => {
                if scope.is_linked() {
                    if let Some(enclosing) = outer.as_deref_mut() {
                        enclosing.merge(scope, MergeKind::Unwind);
                    }
                }
                return;
            }

            Opcode::Return => {
                handle_return(propagator, template, scope, &mut outer);
                return;
            }

            Opcode::ReturnNull => {
                scope.top_mut().push_null(program);
                handle_return(propagator, template, scope, &mut outer);
                return;
            }

            Opcode::NonLocalReturn | Opcode::NonLocalReturnWide => {
                // The value sits on top of the block that is returned
                // through; the return targets the enclosing method.
                scope.top_mut().pop();
                method_return(propagator, template, scope.top_mut());
                return;
            }

            Opcode::Identical => {
                let stack = scope.top_mut();
                stack.pop();
                stack.pop();
                stack.push_bool(program);
            }

            Opcode::Link => {
                let stack = scope.top_mut();
                stack.push_instance(program.exception_class());
                stack.push_empty(); // Unwind target.
                stack.push_empty(); // Unwind reason.
                stack.push_smi(program); // Unwind chain next.
                // Try bodies are separate blocks, so linked regions
                // never nest within one method body.
                assert!(!linked);
                linked = true;
            }

            Opcode::Unlink => {
                scope.top_mut().pop();
                linked = false;
            }

            Opcode::Unwind => {
                // A non-empty reason slot means the try-block always
                // unwinds; nothing behind this bytecode is reachable.
                if !scope.top().local(0).is_empty() {
                    return;
                }
                let stack = scope.top_mut();
                stack.pop();
                stack.pop();
                stack.pop();
            }

            Opcode::Halt => return,

            Opcode::IntrinsicSmiRepeat
            | Opcode::IntrinsicArrayDo
            | Opcode::IntrinsicHashDo => {
                // The intrinsics only optimize bytecode sequences that
                // already express the behavior; fall through to those.
                scope.top_mut().pop();
            }

            Opcode::IntrinsicHashFind => {
                let stack = scope.top_mut();
                for _ in 0..7 {
                    stack.pop();
                }
            }
        }

        bcp += op.length() as u32;
    }
}
