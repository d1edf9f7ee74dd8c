//! Programmatic image assembly.
//!
//! `ImageBuilder` constructs valid program images without going through
//! the compiler frontend. It exists for tests and tooling: add classes,
//! assemble methods with `MethodAsm`, wire up the dispatch table, and
//! `finish()` into a validated `Program`.

use crate::literal::Literal;
use crate::method::Method;
use crate::opcode::Opcode;
use crate::program::{Program, SpecialClasses};
use crate::ImageError;

/// Assembles the bytecode of a single method. Branch targets within the
/// method are resolved with `Label`s; positions are relative to the
/// method's first bytecode, so assembly is independent of where the
/// method lands in the image.
pub struct MethodAsm {
    arity: u8,
    max_height: u8,
    selector_offset: u16,
    code: Vec<u8>,
}

/// Position of a forward branch awaiting its target.
#[must_use]
pub struct Label(usize);

impl MethodAsm {
    pub fn new(arity: u8, max_height: u8) -> MethodAsm {
        MethodAsm {
            arity,
            max_height,
            selector_offset: 0xffff,
            code: Vec::new(),
        }
    }

    /// Mark this method as the target of virtual dispatch at `offset`.
    pub fn with_selector(mut self, offset: u16) -> MethodAsm {
        self.selector_offset = offset;
        self
    }

    pub fn op(&mut self, op: Opcode) -> &mut MethodAsm {
        assert_eq!(op.length(), 1, "{op} takes arguments");
        self.code.push(op as u8);
        self
    }

    pub fn op_u8(&mut self, op: Opcode, arg: u8) -> &mut MethodAsm {
        assert_eq!(op.length(), 2, "{op} does not take a byte argument");
        self.code.push(op as u8);
        self.code.push(arg);
        self
    }

    pub fn op_u16(&mut self, op: Opcode, arg: u16) -> &mut MethodAsm {
        assert_eq!(op.length(), 3, "{op} does not take a u16 argument");
        self.code.push(op as u8);
        self.code.extend_from_slice(&arg.to_le_bytes());
        self
    }

    pub fn op_u32(&mut self, op: Opcode, arg: u32) -> &mut MethodAsm {
        assert_eq!(op.length(), 5, "{op} does not take a u32 argument");
        self.code.push(op as u8);
        self.code.extend_from_slice(&arg.to_le_bytes());
        self
    }

    pub fn invoke_virtual(&mut self, arity: u8, offset: u16) -> &mut MethodAsm {
        self.code.push(Opcode::InvokeVirtual as u8);
        self.code.push(arity);
        self.code.extend_from_slice(&offset.to_le_bytes());
        self
    }

    pub fn primitive(&mut self, module: u8, index: u16) -> &mut MethodAsm {
        self.code.push(Opcode::Primitive as u8);
        self.code.push(module);
        self.code.extend_from_slice(&index.to_le_bytes());
        self
    }

    /// Current position, usable as a backward branch target.
    pub fn here(&self) -> usize {
        self.code.len()
    }

    /// Emit a forward branch whose target is bound later.
    pub fn branch_forward(&mut self, op: Opcode) -> Label {
        assert_eq!(op.length(), 3, "{op} is not a branch");
        let at = self.code.len();
        self.code.push(op as u8);
        self.code.extend_from_slice(&0u16.to_le_bytes());
        Label(at)
    }

    /// Bind a forward branch to the current position.
    pub fn bind(&mut self, label: Label) {
        let delta = self.code.len() - label.0;
        let bytes = (delta as u16).to_le_bytes();
        self.code[label.0 + 1] = bytes[0];
        self.code[label.0 + 2] = bytes[1];
    }

    /// Emit a backward branch to an already-assembled position.
    pub fn branch_back(&mut self, op: Opcode, target: usize) -> &mut MethodAsm {
        assert_eq!(op.length(), 3, "{op} is not a branch");
        assert!(target <= self.code.len());
        let delta = (self.code.len() - target) as u16;
        self.code.push(op as u8);
        self.code.extend_from_slice(&delta.to_le_bytes());
        self
    }
}

/// Builds a complete program image. `new()` seeds the standard class
/// world (ids 0..12, in `SpecialClasses` declaration order); user classes
/// follow with `add_class`.
pub struct ImageBuilder {
    bytecodes: Vec<u8>,
    literals: Vec<Literal>,
    global_variables: Vec<Literal>,
    dispatch_table: Vec<i32>,
    class_fields: Vec<u16>,
    class_check_ids: Vec<(u32, u32)>,
    interface_check_offsets: Vec<u32>,
    invoke_bytecode_offsets: Vec<u16>,
    special_classes: SpecialClasses,
    entry_method: Option<u32>,
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageBuilder {
    pub fn new() -> ImageBuilder {
        let special_classes = SpecialClasses {
            null_class: 0,
            true_class: 1,
            false_class: 2,
            smi_class: 3,
            large_integer_class: 4,
            float_class: 5,
            string_class: 6,
            array_class: 7,
            byte_array_class: 8,
            task_class: 9,
            exception_class: 10,
            lazy_initializer_class: 11,
        };
        let mut class_fields = vec![0u16; 12];
        class_fields[special_classes.task_class as usize] = 2;
        class_fields[special_classes.exception_class as usize] = 2;
        class_fields[special_classes.lazy_initializer_class as usize] = 1;
        let invoke_count =
            (Opcode::LAST_INVOKE_BYTECODE as u8 - Opcode::FIRST_INVOKE_BYTECODE as u8) as usize + 1;
        ImageBuilder {
            bytecodes: Vec::new(),
            literals: Vec::new(),
            global_variables: Vec::new(),
            dispatch_table: Vec::new(),
            class_fields,
            class_check_ids: Vec::new(),
            interface_check_offsets: Vec::new(),
            invoke_bytecode_offsets: vec![0; invoke_count],
            special_classes,
            entry_method: None,
        }
    }

    pub fn special_classes(&self) -> SpecialClasses {
        self.special_classes
    }

    pub fn add_class(&mut self, field_count: u16) -> u32 {
        let id = self.class_fields.len() as u32;
        self.class_fields.push(field_count);
        id
    }

    pub fn add_literal(&mut self, literal: Literal) -> u32 {
        let index = self.literals.len() as u32;
        self.literals.push(literal);
        index
    }

    pub fn add_global(&mut self, value: Literal) -> u32 {
        let index = self.global_variables.len() as u32;
        self.global_variables.push(value);
        index
    }

    /// Add a global backed by a lazy initializer method.
    pub fn add_lazy_global(&mut self, initializer: u32) -> u32 {
        let record = Literal::Instance {
            class: self.special_classes.lazy_initializer_class,
            fields: vec![Literal::Smi(initializer as i64)],
        };
        self.add_global(record)
    }

    /// Install a method in the dispatch table, growing it as needed.
    pub fn set_dispatch(&mut self, index: usize, method: u32) {
        if index >= self.dispatch_table.len() {
            self.dispatch_table.resize(index + 1, -1);
        }
        self.dispatch_table[index] = method as i32;
    }

    pub fn add_class_check(&mut self, start: u32, end: u32) -> u32 {
        let index = self.class_check_ids.len() as u32;
        self.class_check_ids.push((start, end));
        index
    }

    pub fn add_interface_check(&mut self, selector_offset: u32) -> u32 {
        let index = self.interface_check_offsets.len() as u32;
        self.interface_check_offsets.push(selector_offset);
        index
    }

    pub fn set_invoke_offset(&mut self, opcode: Opcode, selector_offset: u16) {
        assert!(opcode.is_invoke_bytecode(), "{opcode} takes no selector");
        let index = (opcode as u8 - Opcode::FIRST_INVOKE_BYTECODE as u8) as usize;
        self.invoke_bytecode_offsets[index] = selector_offset;
    }

    /// Append an assembled method, returning its header position.
    pub fn add_method(&mut self, asm: MethodAsm) -> u32 {
        let header = self.bytecodes.len() as u32;
        self.bytecodes.push(asm.arity);
        self.bytecodes.push(asm.max_height);
        self.bytecodes
            .extend_from_slice(&asm.selector_offset.to_le_bytes());
        debug_assert_eq!(header + Method::HEADER_SIZE, self.bytecodes.len() as u32);
        self.bytecodes.extend_from_slice(&asm.code);
        header
    }

    pub fn entry(&mut self, method: u32) {
        self.entry_method = Some(method);
    }

    pub fn finish(self) -> Result<Program, ImageError> {
        let entry_method = self.entry_method.ok_or(ImageError::MissingEntryMethod)?;
        let program = Program {
            bytecodes: self.bytecodes,
            literals: self.literals,
            global_variables: self.global_variables,
            dispatch_table: self.dispatch_table,
            class_count: self.class_fields.len() as u32,
            class_check_ids: self.class_check_ids,
            interface_check_offsets: self.interface_check_offsets,
            class_fields: self.class_fields,
            invoke_bytecode_offsets: self.invoke_bytecode_offsets,
            special_classes: self.special_classes,
            entry_method,
        };
        program.validate()?;
        Ok(program)
    }
}
