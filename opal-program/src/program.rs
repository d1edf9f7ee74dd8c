//! The parsed program image.

use serde::{Deserialize, Serialize};

use crate::literal::Literal;
use crate::method::Method;
use crate::opcode::Opcode;
use crate::ImageError;

/// Well-known class ids the VM allocates for itself. All of them live in
/// the dense class-id space `[0, class_count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecialClasses {
    pub null_class: u32,
    pub true_class: u32,
    pub false_class: u32,
    pub smi_class: u32,
    pub large_integer_class: u32,
    pub float_class: u32,
    pub string_class: u32,
    pub array_class: u32,
    pub byte_array_class: u32,
    pub task_class: u32,
    pub exception_class: u32,
    pub lazy_initializer_class: u32,
}

/// A compiled Opal program: flat bytecode plus the pools and tables the
/// interpreter and the analyzer share.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub bytecodes: Vec<u8>,
    pub literals: Vec<Literal>,
    pub global_variables: Vec<Literal>,
    /// Row-per-selector-offset dispatch table. Entries are method header
    /// positions, or -1 where no method is installed.
    pub dispatch_table: Vec<i32>,
    pub class_count: u32,
    /// `[start, end)` class-id subranges, one pair per compile-time class
    /// check, indexed by the check's literal index in the bytecode.
    pub class_check_ids: Vec<(u32, u32)>,
    /// Selector offsets, one per compile-time interface check.
    pub interface_check_offsets: Vec<u32>,
    /// Instance field count per class id.
    pub class_fields: Vec<u16>,
    /// Selector offsets for the argument-less invoke opcodes, indexed by
    /// `opcode - FIRST_INVOKE_BYTECODE`.
    pub invoke_bytecode_offsets: Vec<u16>,
    pub special_classes: SpecialClasses,
    /// Header position of the program entry method.
    pub entry_method: u32,
}

/// Field layout of the Task class, fixed by the VM.
impl Program {
    pub const TASK_ID_INDEX: usize = 0;
    pub const TASK_STACK_INDEX: usize = 1;
    pub const EXCEPTION_VALUE_INDEX: usize = 0;
    pub const EXCEPTION_TRACE_INDEX: usize = 1;
}

impl Program {
    pub fn from_json(text: &str) -> Result<Program, ImageError> {
        let program: Program = serde_json::from_str(text)?;
        program.validate()?;
        log::debug!(
            "loaded image: {} classes, {} bytecodes, {} globals",
            program.class_count,
            program.bytecodes.len(),
            program.global_variables.len()
        );
        Ok(program)
    }

    pub fn to_json(&self) -> String {
        // Serializing a validated image cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), ImageError> {
        if self.class_count == 0 {
            return Err(ImageError::NoClasses);
        }
        if self.class_fields.len() != self.class_count as usize {
            return Err(ImageError::ClassTableMismatch {
                expected: self.class_count,
                found: self.class_fields.len(),
            });
        }
        let special = [
            self.special_classes.null_class,
            self.special_classes.true_class,
            self.special_classes.false_class,
            self.special_classes.smi_class,
            self.special_classes.large_integer_class,
            self.special_classes.float_class,
            self.special_classes.string_class,
            self.special_classes.array_class,
            self.special_classes.byte_array_class,
            self.special_classes.task_class,
            self.special_classes.exception_class,
            self.special_classes.lazy_initializer_class,
        ];
        for id in special {
            if id >= self.class_count {
                return Err(ImageError::ClassOutOfRange {
                    id,
                    count: self.class_count,
                });
            }
        }
        for (index, &target) in self.dispatch_table.iter().enumerate() {
            if target == -1 {
                continue;
            }
            if target < 0 || !self.method_header_in_bounds(target as u32) {
                return Err(ImageError::BadDispatchEntry { index, target });
            }
        }
        for (index, &(start, end)) in self.class_check_ids.iter().enumerate() {
            if start > end || end > self.class_count {
                return Err(ImageError::BadClassCheck { index, start, end });
            }
        }
        if !self.method_header_in_bounds(self.entry_method) {
            return Err(ImageError::MethodOutOfRange {
                position: self.entry_method,
            });
        }
        Ok(())
    }

    fn method_header_in_bounds(&self, header: u32) -> bool {
        (header as usize) + Method::HEADER_SIZE as usize <= self.bytecodes.len()
    }

    pub fn method_at(&self, header: u32) -> Method {
        Method::at(&self.bytecodes, header)
    }

    pub fn entry(&self) -> Method {
        self.method_at(self.entry_method)
    }

    /// Resolve a dispatch-table row to its method, or `None` on the -1
    /// sentinel or an out-of-table index.
    pub fn dispatch_target(&self, index: usize) -> Option<Method> {
        let target = *self.dispatch_table.get(index)?;
        if target == -1 {
            return None;
        }
        Some(self.method_at(target as u32))
    }

    pub fn instance_fields_for(&self, class: u32) -> usize {
        assert!(class < self.class_count, "class id {class} out of range");
        self.class_fields[class as usize] as usize
    }

    /// The `[start, end)` class-id range of a compile-time class check.
    pub fn class_check_range(&self, index: usize) -> (u32, u32) {
        self.class_check_ids[index]
    }

    pub fn interface_check_offset(&self, index: usize) -> u32 {
        self.interface_check_offsets[index]
    }

    /// Selector offset baked into an argument-less invoke opcode.
    pub fn invoke_bytecode_offset(&self, opcode: Opcode) -> u16 {
        assert!(opcode.is_invoke_bytecode(), "{opcode} takes no selector");
        let index = opcode as u8 - Opcode::FIRST_INVOKE_BYTECODE as u8;
        self.invoke_bytecode_offsets[index as usize]
    }

    /// Class of a pooled runtime value.
    pub fn class_of(&self, literal: &Literal) -> u32 {
        let special = &self.special_classes;
        match literal {
            Literal::Null => special.null_class,
            Literal::Bool(true) => special.true_class,
            Literal::Bool(false) => special.false_class,
            Literal::Smi(_) => special.smi_class,
            Literal::LargeInt(_) => special.large_integer_class,
            Literal::Float(_) => special.float_class,
            Literal::String(_) => special.string_class,
            Literal::ByteArray(_) => special.byte_array_class,
            Literal::Array(_) => special.array_class,
            Literal::Instance { class, .. } => *class,
        }
    }

    pub fn null_class(&self) -> u32 {
        self.special_classes.null_class
    }

    pub fn true_class(&self) -> u32 {
        self.special_classes.true_class
    }

    pub fn false_class(&self) -> u32 {
        self.special_classes.false_class
    }

    pub fn smi_class(&self) -> u32 {
        self.special_classes.smi_class
    }

    pub fn large_integer_class(&self) -> u32 {
        self.special_classes.large_integer_class
    }

    pub fn float_class(&self) -> u32 {
        self.special_classes.float_class
    }

    pub fn string_class(&self) -> u32 {
        self.special_classes.string_class
    }

    pub fn array_class(&self) -> u32 {
        self.special_classes.array_class
    }

    pub fn byte_array_class(&self) -> u32 {
        self.special_classes.byte_array_class
    }

    pub fn task_class(&self) -> u32 {
        self.special_classes.task_class
    }

    pub fn exception_class(&self) -> u32 {
        self.special_classes.exception_class
    }

    pub fn lazy_initializer_class(&self) -> u32 {
        self.special_classes.lazy_initializer_class
    }
}
