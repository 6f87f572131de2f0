//! Bytecode opcodes
//!
//! Flat, stack-oriented instruction set produced by the bytecode generator
//! and executed by the stack VM. Jump operands are relative instruction
//! offsets measured from the instruction after the jump.

use std::fmt;

/// The opcode set
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    // ===== Stack / value =====
    PushInt,
    PushUInt64,
    PushFloat,
    PushString,
    PushBool,
    PushNull,
    Pop,
    Dup,

    // ===== Variable / scope =====
    DeclareVar,
    LoadVar,
    StoreVar,
    BeginScope,
    EndScope,
    StoreTemp,
    LoadTemp,
    ClearTemp,

    // ===== Arithmetic / comparison / logic =====
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
    Negate,
    Not,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    // ===== Control =====
    Jump,
    JumpIfFalse,
    JumpIfTrue,
    Return,
    Call,
    CallHigherOrder,
    Halt,

    // ===== Containers =====
    CreateList,
    CreateTuple,
    CreateDict,
    GetIndex,
    SetIndex,
    GetProperty,
    SetProperty,
    CreateRange,
    SetRangeStep,
    GetIterator,
    IteratorHasNext,
    IteratorNext,

    // ===== Classes =====
    BeginClass,
    EndClass,
    SetSuperclass,
    DefineField,
    LoadThis,
    LoadSuper,

    // ===== Functions =====
    BeginFunction,
    EndFunction,
    DefineParam,
    DefineOptionalParam,
    SetDefaultValue,
    PushFunction,
    PushFunctionRef,
    PushLambda,
    CaptureVar,
    CreateClosure,

    // ===== Enums / sums =====
    BeginEnum,
    EndEnum,
    DefineEnumVariant,
    DefineEnumVariantWithType,
    MatchPattern,

    // ===== Strings =====
    Concat,
    InterpolateString,

    // ===== Errors =====
    ConstructError,
    ConstructOk,
    CheckError,
    UnwrapValue,
    PropagateError,

    // ===== Concurrency boundary =====
    BeginParallel,
    EndParallel,
    BeginConcurrent,
    EndConcurrent,
    BeginTask,
    EndTask,
    BeginWorker,
    EndWorker,
    StoreIterable,
    Await,
    DefineAtomic,

    // ===== Miscellaneous =====
    Print,
    Contract,
}

impl Opcode {
    /// Whether this opcode carries a relative jump offset in the integer
    /// immediate
    pub fn is_jump(self) -> bool {
        matches!(self, Opcode::Jump | Opcode::JumpIfFalse | Opcode::JumpIfTrue)
    }

    /// The matching closer for a `Begin*` opcode
    pub fn matching_end(self) -> Option<Opcode> {
        Some(match self {
            Opcode::BeginScope => Opcode::EndScope,
            Opcode::BeginFunction => Opcode::EndFunction,
            Opcode::BeginClass => Opcode::EndClass,
            Opcode::BeginEnum => Opcode::EndEnum,
            Opcode::BeginParallel => Opcode::EndParallel,
            Opcode::BeginConcurrent => Opcode::EndConcurrent,
            Opcode::BeginTask => Opcode::EndTask,
            Opcode::BeginWorker => Opcode::EndWorker,
            _ => return None,
        })
    }

    /// Whether this opcode closes a block opened by `opener`
    pub fn closes(self, opener: Opcode) -> bool {
        opener.matching_end() == Some(self)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::PushInt => "PUSH_INT",
            Opcode::PushUInt64 => "PUSH_UINT64",
            Opcode::PushFloat => "PUSH_FLOAT",
            Opcode::PushString => "PUSH_STRING",
            Opcode::PushBool => "PUSH_BOOL",
            Opcode::PushNull => "PUSH_NULL",
            Opcode::Pop => "POP",
            Opcode::Dup => "DUP",
            Opcode::DeclareVar => "DECLARE_VAR",
            Opcode::LoadVar => "LOAD_VAR",
            Opcode::StoreVar => "STORE_VAR",
            Opcode::BeginScope => "BEGIN_SCOPE",
            Opcode::EndScope => "END_SCOPE",
            Opcode::StoreTemp => "STORE_TEMP",
            Opcode::LoadTemp => "LOAD_TEMP",
            Opcode::ClearTemp => "CLEAR_TEMP",
            Opcode::Add => "ADD",
            Opcode::Subtract => "SUBTRACT",
            Opcode::Multiply => "MULTIPLY",
            Opcode::Divide => "DIVIDE",
            Opcode::Modulo => "MODULO",
            Opcode::Power => "POWER",
            Opcode::Negate => "NEGATE",
            Opcode::Not => "NOT",
            Opcode::Equal => "EQUAL",
            Opcode::NotEqual => "NOT_EQUAL",
            Opcode::Less => "LESS",
            Opcode::LessEqual => "LESS_EQUAL",
            Opcode::Greater => "GREATER",
            Opcode::GreaterEqual => "GREATER_EQUAL",
            Opcode::Jump => "JUMP",
            Opcode::JumpIfFalse => "JUMP_IF_FALSE",
            Opcode::JumpIfTrue => "JUMP_IF_TRUE",
            Opcode::Return => "RETURN",
            Opcode::Call => "CALL",
            Opcode::CallHigherOrder => "CALL_HIGHER_ORDER",
            Opcode::Halt => "HALT",
            Opcode::CreateList => "CREATE_LIST",
            Opcode::CreateTuple => "CREATE_TUPLE",
            Opcode::CreateDict => "CREATE_DICT",
            Opcode::GetIndex => "GET_INDEX",
            Opcode::SetIndex => "SET_INDEX",
            Opcode::GetProperty => "GET_PROPERTY",
            Opcode::SetProperty => "SET_PROPERTY",
            Opcode::CreateRange => "CREATE_RANGE",
            Opcode::SetRangeStep => "SET_RANGE_STEP",
            Opcode::GetIterator => "GET_ITERATOR",
            Opcode::IteratorHasNext => "ITERATOR_HAS_NEXT",
            Opcode::IteratorNext => "ITERATOR_NEXT",
            Opcode::BeginClass => "BEGIN_CLASS",
            Opcode::EndClass => "END_CLASS",
            Opcode::SetSuperclass => "SET_SUPERCLASS",
            Opcode::DefineField => "DEFINE_FIELD",
            Opcode::LoadThis => "LOAD_THIS",
            Opcode::LoadSuper => "LOAD_SUPER",
            Opcode::BeginFunction => "BEGIN_FUNCTION",
            Opcode::EndFunction => "END_FUNCTION",
            Opcode::DefineParam => "DEFINE_PARAM",
            Opcode::DefineOptionalParam => "DEFINE_OPTIONAL_PARAM",
            Opcode::SetDefaultValue => "SET_DEFAULT_VALUE",
            Opcode::PushFunction => "PUSH_FUNCTION",
            Opcode::PushFunctionRef => "PUSH_FUNCTION_REF",
            Opcode::PushLambda => "PUSH_LAMBDA",
            Opcode::CaptureVar => "CAPTURE_VAR",
            Opcode::CreateClosure => "CREATE_CLOSURE",
            Opcode::BeginEnum => "BEGIN_ENUM",
            Opcode::EndEnum => "END_ENUM",
            Opcode::DefineEnumVariant => "DEFINE_ENUM_VARIANT",
            Opcode::DefineEnumVariantWithType => "DEFINE_ENUM_VARIANT_WITH_TYPE",
            Opcode::MatchPattern => "MATCH_PATTERN",
            Opcode::Concat => "CONCAT",
            Opcode::InterpolateString => "INTERPOLATE_STRING",
            Opcode::ConstructError => "CONSTRUCT_ERROR",
            Opcode::ConstructOk => "CONSTRUCT_OK",
            Opcode::CheckError => "CHECK_ERROR",
            Opcode::UnwrapValue => "UNWRAP_VALUE",
            Opcode::PropagateError => "PROPAGATE_ERROR",
            Opcode::BeginParallel => "BEGIN_PARALLEL",
            Opcode::EndParallel => "END_PARALLEL",
            Opcode::BeginConcurrent => "BEGIN_CONCURRENT",
            Opcode::EndConcurrent => "END_CONCURRENT",
            Opcode::BeginTask => "BEGIN_TASK",
            Opcode::EndTask => "END_TASK",
            Opcode::BeginWorker => "BEGIN_WORKER",
            Opcode::EndWorker => "END_WORKER",
            Opcode::StoreIterable => "STORE_ITERABLE",
            Opcode::Await => "AWAIT",
            Opcode::DefineAtomic => "DEFINE_ATOMIC",
            Opcode::Print => "PRINT",
            Opcode::Contract => "CONTRACT",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jump_classification() {
        assert!(Opcode::Jump.is_jump());
        assert!(Opcode::JumpIfFalse.is_jump());
        assert!(Opcode::JumpIfTrue.is_jump());
        assert!(!Opcode::Return.is_jump());
    }

    #[test]
    fn test_begin_end_pairing() {
        assert!(Opcode::EndScope.closes(Opcode::BeginScope));
        assert!(Opcode::EndFunction.closes(Opcode::BeginFunction));
        assert!(!Opcode::EndScope.closes(Opcode::BeginFunction));
        assert_eq!(Opcode::Add.matching_end(), None);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(format!("{}", Opcode::PushInt), "PUSH_INT");
        assert_eq!(format!("{}", Opcode::JumpIfFalse), "JUMP_IF_FALSE");
        assert_eq!(format!("{}", Opcode::ConstructError), "CONSTRUCT_ERROR");
    }
}
