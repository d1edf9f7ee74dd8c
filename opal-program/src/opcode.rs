//! The Opal VM instruction set.
//!
//! Every instruction is a one-byte opcode followed by a fixed number of
//! argument bytes. Wide variants carry a `u16` little-endian argument where
//! the narrow form carries a `u8`. Branch instructions encode unsigned
//! deltas relative to the branch opcode itself; the `*_BACK` forms subtract.

macro_rules! opcodes {
    ($($name:ident = $value:literal, $len:literal;)*) => {
        /// One byte of the instruction stream, decoded.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Opcode {
            $($name = $value,)*
        }

        impl Opcode {
            /// Decode a single opcode byte. Returns `None` for bytes the
            /// VM does not define; callers treat those paths as dead.
            pub fn from_byte(byte: u8) -> Option<Opcode> {
                match byte {
                    $($value => Some(Opcode::$name),)*
                    _ => None,
                }
            }

            /// Total encoded length, opcode byte included.
            pub fn length(self) -> usize {
                match self {
                    $(Opcode::$name => $len,)*
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$name => stringify!($name),)*
                }
            }
        }
    };
}

opcodes! {
    LoadLocal = 0, 2;
    LoadLocalWide = 1, 3;
    LoadLocal0 = 2, 1;
    LoadLocal1 = 3, 1;
    LoadLocal2 = 4, 1;
    LoadLocal3 = 5, 1;
    LoadLocal4 = 6, 1;
    LoadLocal5 = 7, 1;
    PopLoadLocal = 8, 2;
    StoreLocal = 9, 2;
    StoreLocalPop = 10, 2;
    LoadOuter = 11, 2;
    StoreOuter = 12, 2;
    LoadField = 13, 2;
    LoadFieldWide = 14, 3;
    LoadFieldLocal = 15, 2;
    PopLoadFieldLocal = 16, 2;
    StoreField = 17, 2;
    StoreFieldWide = 18, 3;
    StoreFieldPop = 19, 2;
    LoadLiteral = 20, 2;
    LoadLiteralWide = 21, 3;
    LoadNull = 22, 1;
    LoadSmi0 = 23, 1;
    LoadSmis0 = 24, 2;
    LoadSmi1 = 25, 1;
    LoadSmiU8 = 26, 2;
    LoadSmiU16 = 27, 3;
    LoadSmiU32 = 28, 5;
    LoadBlockMethod = 29, 5;
    LoadGlobalVar = 30, 2;
    LoadGlobalVarWide = 31, 3;
    LoadGlobalVarLazy = 32, 2;
    LoadGlobalVarLazyWide = 33, 3;
    LoadGlobalVarDynamic = 34, 1;
    StoreGlobalVar = 35, 2;
    StoreGlobalVarWide = 36, 3;
    StoreGlobalVarDynamic = 37, 1;
    LoadBlock = 38, 2;
    LoadOuterBlock = 39, 2;
    Pop = 40, 2;
    Pop1 = 41, 1;
    Allocate = 42, 2;
    AllocateWide = 43, 3;
    IsClass = 44, 2;
    IsClassWide = 45, 3;
    IsInterface = 46, 2;
    IsInterfaceWide = 47, 3;
    AsClass = 48, 2;
    AsClassWide = 49, 3;
    AsInterface = 50, 2;
    AsInterfaceWide = 51, 3;
    AsLocal = 52, 2;
    InvokeStatic = 53, 3;
    InvokeStaticTail = 54, 3;
    InvokeBlock = 55, 2;
    InvokeInitializerTail = 56, 2;
    InvokeLambdaTail = 57, 2;
    InvokeVirtual = 58, 4;
    InvokeVirtualGet = 59, 3;
    InvokeVirtualSet = 60, 3;
    InvokeEq = 61, 1;
    InvokeLt = 62, 1;
    InvokeLte = 63, 1;
    InvokeGt = 64, 1;
    InvokeGte = 65, 1;
    InvokeBitOr = 66, 1;
    InvokeBitXor = 67, 1;
    InvokeBitAnd = 68, 1;
    InvokeAdd = 69, 1;
    InvokeSub = 70, 1;
    InvokeMul = 71, 1;
    InvokeDiv = 72, 1;
    InvokeMod = 73, 1;
    InvokeBitShl = 74, 1;
    InvokeBitShr = 75, 1;
    InvokeBitUshr = 76, 1;
    InvokeAt = 77, 1;
    InvokeAtPut = 78, 1;
    Branch = 79, 3;
    BranchIfTrue = 80, 3;
    BranchIfFalse = 81, 3;
    BranchBack = 82, 3;
    BranchBackIfTrue = 83, 3;
    BranchBackIfFalse = 84, 3;
    NonLocalBranch = 85, 3;
    Primitive = 86, 4;
    Throw = 87, 1;
    Return = 88, 1;
    ReturnNull = 89, 1;
    NonLocalReturn = 90, 2;
    NonLocalReturnWide = 91, 3;
    Identical = 92, 1;
    Link = 93, 1;
    Unlink = 94, 1;
    Unwind = 95, 1;
    Halt = 96, 1;
    IntrinsicSmiRepeat = 97, 1;
    IntrinsicArrayDo = 98, 1;
    IntrinsicHashDo = 99, 1;
    IntrinsicHashFind = 100, 1;
}

impl Opcode {
    /// First opcode of the argument-less virtual-invoke family. The
    /// program image carries one selector offset per family member.
    pub const FIRST_INVOKE_BYTECODE: Opcode = Opcode::InvokeEq;
    pub const LAST_INVOKE_BYTECODE: Opcode = Opcode::InvokeAtPut;

    pub fn is_invoke_bytecode(self) -> bool {
        let b = self as u8;
        Opcode::FIRST_INVOKE_BYTECODE as u8 <= b && b <= Opcode::LAST_INVOKE_BYTECODE as u8
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_round_trip() {
        for byte in 0..=u8::MAX {
            if let Some(op) = Opcode::from_byte(byte) {
                assert_eq!(op as u8, byte);
                assert!(op.length() >= 1);
                assert!(op.length() <= 5);
            }
        }
    }

    #[test]
    fn test_invoke_bytecode_family() {
        assert!(Opcode::InvokeEq.is_invoke_bytecode());
        assert!(Opcode::InvokeAtPut.is_invoke_bytecode());
        assert!(Opcode::InvokeAdd.is_invoke_bytecode());
        assert!(!Opcode::InvokeVirtual.is_invoke_bytecode());
        assert!(!Opcode::Branch.is_invoke_bytecode());
    }

    #[test]
    fn test_wide_variants_are_longer() {
        assert_eq!(Opcode::LoadLocal.length() + 1, Opcode::LoadLocalWide.length());
        assert_eq!(Opcode::LoadField.length() + 1, Opcode::LoadFieldWide.length());
        assert_eq!(Opcode::Allocate.length() + 1, Opcode::AllocateWide.length());
    }
}
