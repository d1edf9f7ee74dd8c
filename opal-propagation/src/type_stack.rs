//! Abstract operand stacks.

use opal_program::{Literal, Program};

use crate::templates::BlockTemplateId;
use crate::type_set::TypeSet;

/// One frame's worth of abstract stack slots.
///
/// The capacity is fixed when the frame is entered (arguments + reserved
/// frame slots + declared maximum operand height); pushing past it is a
/// bug in the input image. Slots hold owned `TypeSet`s — values are
/// copied on every push so a stack slot never aliases a type variable.
#[derive(Debug, Clone)]
pub struct TypeStack {
    words_per_type: usize,
    capacity: usize,
    slots: Vec<TypeSet>,
}

impl TypeStack {
    /// A stack with `height` pre-filled empty slots and room for
    /// `capacity` in total.
    pub fn new(height: usize, capacity: usize, words_per_type: usize) -> TypeStack {
        debug_assert!(height <= capacity);
        TypeStack {
            words_per_type,
            capacity,
            slots: (0..height).map(|_| TypeSet::empty(words_per_type)).collect(),
        }
    }

    pub fn sp(&self) -> usize {
        self.slots.len()
    }

    pub fn get(&self, index: usize) -> &TypeSet {
        &self.slots[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut TypeSet {
        &mut self.slots[index]
    }

    pub fn set(&mut self, index: usize, type_set: &TypeSet) {
        self.slots[index].clone_from(type_set);
    }

    /// Slot `n` positions below the top of the stack.
    pub fn local(&self, n: usize) -> &TypeSet {
        let sp = self.sp();
        assert!(n < sp, "local {n} underflows stack of height {sp}");
        &self.slots[sp - 1 - n]
    }

    pub fn local_mut(&mut self, n: usize) -> &mut TypeSet {
        let sp = self.sp();
        assert!(n < sp, "local {n} underflows stack of height {sp}");
        &mut self.slots[sp - 1 - n]
    }

    pub fn set_local(&mut self, n: usize, type_set: &TypeSet) {
        let sp = self.sp();
        assert!(n < sp, "local {n} underflows stack of height {sp}");
        self.slots[sp - 1 - n].clone_from(type_set);
    }

    pub fn push(&mut self, type_set: &TypeSet) {
        assert!(self.sp() < self.capacity, "stack overflow");
        self.slots.push(type_set.clone());
    }

    pub fn push_empty(&mut self) -> &mut TypeSet {
        assert!(self.sp() < self.capacity, "stack overflow");
        self.slots.push(TypeSet::empty(self.words_per_type));
        let sp = self.sp();
        &mut self.slots[sp - 1]
    }

    pub fn pop(&mut self) {
        assert!(self.slots.pop().is_some(), "stack underflow");
    }

    /// Shift the top of the stack down over `arity` consumed arguments.
    pub fn drop_arguments(&mut self, arity: usize) {
        if arity == 0 {
            return;
        }
        let top = self.local(0).clone();
        self.set_local(arity, &top);
        let sp = self.sp();
        self.slots.truncate(sp - arity);
    }

    /// Union `type_set` into the top slot.
    pub fn merge_top(&mut self, type_set: &TypeSet) -> bool {
        self.local_mut(0).add_all(type_set)
    }

    /// Element-wise union with another stack of identical height. Block
    /// slots must carry the same template on both sides; a mismatch is a
    /// bug in the caller and aborts.
    pub fn merge(&mut self, other: &TypeStack) -> bool {
        assert_eq!(self.sp(), other.sp(), "merging stacks of different height");
        let mut result = false;
        for (slot, incoming) in self.slots.iter_mut().zip(other.slots.iter()) {
            if slot.is_block() {
                assert_eq!(
                    slot.block(),
                    incoming.block(),
                    "block slot identity mismatch at merge"
                );
            } else {
                result = slot.add_all(incoming) || result;
            }
        }
        result
    }

    pub fn push_any(&mut self, program: &Program) {
        self.push_empty().add_any(program);
    }

    pub fn push_null(&mut self, program: &Program) {
        self.push_empty().add_null(program);
    }

    pub fn push_smi(&mut self, program: &Program) {
        self.push_empty().add_smi(program);
    }

    pub fn push_int(&mut self, program: &Program) {
        self.push_empty().add_int(program);
    }

    pub fn push_bool(&mut self, program: &Program) {
        self.push_empty().add_bool(program);
    }

    pub fn push_instance(&mut self, class: u32) {
        self.push_empty().add(class);
    }

    pub fn push_literal(&mut self, program: &Program, literal: &Literal) {
        self.push_instance(program.class_of(literal));
    }

    pub fn push_block(&mut self, block: BlockTemplateId) {
        self.push_empty().set_block(block);
    }
}
