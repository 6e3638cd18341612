//! The bytecode operations a MIR instruction can carry.

macro_rules! opcodes {
    ($($variant:ident = $name:literal,)*) => {
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(u16)]
        pub enum Opcode {
            $($variant,)*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$variant,)*];

            /// Mnemonic used by the MIR text format.
            pub fn name(self) -> &'static str {
                match self {
                    $(Opcode::$variant => $name,)*
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                match name {
                    $($name => Some(Opcode::$variant),)*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    Nop = "nop",
    Move = "move",
    MoveWide = "move-wide",
    MoveObject = "move-object",
    MoveResult = "move-result",
    MoveResultWide = "move-result-wide",
    MoveResultObject = "move-result-object",
    MoveException = "move-exception",
    ReturnVoid = "return-void",
    Return = "return",
    ReturnWide = "return-wide",
    ReturnObject = "return-object",
    Const4 = "const/4",
    Const16 = "const/16",
    Const = "const",
    ConstHigh16 = "const/high16",
    ConstWide16 = "const-wide/16",
    ConstWide32 = "const-wide/32",
    ConstWide = "const-wide",
    ConstWideHigh16 = "const-wide/high16",
    ConstString = "const-string",
    ConstClass = "const-class",
    MonitorEnter = "monitor-enter",
    MonitorExit = "monitor-exit",
    CheckCast = "check-cast",
    InstanceOf = "instance-of",
    ArrayLength = "array-length",
    NewInstance = "new-instance",
    NewArray = "new-array",
    FilledNewArray = "filled-new-array",
    FillArrayData = "fill-array-data",
    Throw = "throw",
    Goto = "goto",
    PackedSwitch = "packed-switch",
    SparseSwitch = "sparse-switch",
    CmplFloat = "cmpl-float",
    CmpgFloat = "cmpg-float",
    CmplDouble = "cmpl-double",
    CmpgDouble = "cmpg-double",
    CmpLong = "cmp-long",
    IfEq = "if-eq",
    IfNe = "if-ne",
    IfLt = "if-lt",
    IfGe = "if-ge",
    IfGt = "if-gt",
    IfLe = "if-le",
    IfEqz = "if-eqz",
    IfNez = "if-nez",
    IfLtz = "if-ltz",
    IfGez = "if-gez",
    IfGtz = "if-gtz",
    IfLez = "if-lez",
    Aget = "aget",
    AgetWide = "aget-wide",
    AgetObject = "aget-object",
    AgetBoolean = "aget-boolean",
    AgetByte = "aget-byte",
    AgetChar = "aget-char",
    AgetShort = "aget-short",
    Aput = "aput",
    AputWide = "aput-wide",
    AputObject = "aput-object",
    AputBoolean = "aput-boolean",
    AputByte = "aput-byte",
    AputChar = "aput-char",
    AputShort = "aput-short",
    Iget = "iget",
    IgetWide = "iget-wide",
    IgetObject = "iget-object",
    IgetBoolean = "iget-boolean",
    IgetByte = "iget-byte",
    IgetChar = "iget-char",
    IgetShort = "iget-short",
    Iput = "iput",
    IputWide = "iput-wide",
    IputObject = "iput-object",
    IputBoolean = "iput-boolean",
    IputByte = "iput-byte",
    IputChar = "iput-char",
    IputShort = "iput-short",
    Sget = "sget",
    SgetWide = "sget-wide",
    SgetObject = "sget-object",
    SgetBoolean = "sget-boolean",
    SgetByte = "sget-byte",
    SgetChar = "sget-char",
    SgetShort = "sget-short",
    Sput = "sput",
    SputWide = "sput-wide",
    SputObject = "sput-object",
    SputBoolean = "sput-boolean",
    SputByte = "sput-byte",
    SputChar = "sput-char",
    SputShort = "sput-short",
    InvokeVirtual = "invoke-virtual",
    InvokeSuper = "invoke-super",
    InvokeDirect = "invoke-direct",
    InvokeStatic = "invoke-static",
    InvokeInterface = "invoke-interface",
    NegInt = "neg-int",
    NotInt = "not-int",
    NegLong = "neg-long",
    NotLong = "not-long",
    NegFloat = "neg-float",
    NegDouble = "neg-double",
    IntToLong = "int-to-long",
    IntToFloat = "int-to-float",
    IntToDouble = "int-to-double",
    LongToInt = "long-to-int",
    LongToFloat = "long-to-float",
    LongToDouble = "long-to-double",
    FloatToInt = "float-to-int",
    FloatToLong = "float-to-long",
    FloatToDouble = "float-to-double",
    DoubleToInt = "double-to-int",
    DoubleToLong = "double-to-long",
    DoubleToFloat = "double-to-float",
    IntToByte = "int-to-byte",
    IntToChar = "int-to-char",
    IntToShort = "int-to-short",
    AddInt = "add-int",
    SubInt = "sub-int",
    MulInt = "mul-int",
    DivInt = "div-int",
    RemInt = "rem-int",
    AndInt = "and-int",
    OrInt = "or-int",
    XorInt = "xor-int",
    ShlInt = "shl-int",
    ShrInt = "shr-int",
    UshrInt = "ushr-int",
    AddLong = "add-long",
    SubLong = "sub-long",
    MulLong = "mul-long",
    DivLong = "div-long",
    RemLong = "rem-long",
    AndLong = "and-long",
    OrLong = "or-long",
    XorLong = "xor-long",
    ShlLong = "shl-long",
    ShrLong = "shr-long",
    UshrLong = "ushr-long",
    AddFloat = "add-float",
    SubFloat = "sub-float",
    MulFloat = "mul-float",
    DivFloat = "div-float",
    RemFloat = "rem-float",
    AddDouble = "add-double",
    SubDouble = "sub-double",
    MulDouble = "mul-double",
    DivDouble = "div-double",
    RemDouble = "rem-double",
    AddIntLit16 = "add-int/lit16",
    RsubInt = "rsub-int",
    MulIntLit16 = "mul-int/lit16",
    DivIntLit16 = "div-int/lit16",
    RemIntLit16 = "rem-int/lit16",
    AndIntLit16 = "and-int/lit16",
    OrIntLit16 = "or-int/lit16",
    XorIntLit16 = "xor-int/lit16",
    AddIntLit8 = "add-int/lit8",
    RsubIntLit8 = "rsub-int/lit8",
    MulIntLit8 = "mul-int/lit8",
    DivIntLit8 = "div-int/lit8",
    RemIntLit8 = "rem-int/lit8",
    AndIntLit8 = "and-int/lit8",
    OrIntLit8 = "or-int/lit8",
    XorIntLit8 = "xor-int/lit8",
    ShlIntLit8 = "shl-int/lit8",
    ShrIntLit8 = "shr-int/lit8",
    UshrIntLit8 = "ushr-int/lit8",
    Phi = "phi",
}

/// Element type of an array or field access.
///
/// The discriminant doubles as the offset of a typed access
/// opcode from the first opcode of its family
/// (e.g. `AgetChar - Aget`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u16)]
pub enum AccessType {
    Normal,
    Wide,
    Object,
    Boolean,
    Byte,
    Char,
    Short,
}

impl AccessType {
    pub const COUNT: usize = 7;

    const ALL: [AccessType; Self::COUNT] = [
        AccessType::Normal,
        AccessType::Wide,
        AccessType::Object,
        AccessType::Boolean,
        AccessType::Byte,
        AccessType::Char,
        AccessType::Short,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    fn from_offset(first: Opcode, op: Opcode) -> Self {
        Self::ALL[(op as u16 - first as u16) as usize]
    }
}

/// Where the literal operand of an instruction is stored.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LiteralKind {
    None,
    /// 32-bit literal in `v_b` (narrow constants, short wide
    /// constants, string and class indices).
    B,
    /// 64-bit literal in `v_b_wide`.
    Wide,
    /// 32-bit literal in `v_c` (arithmetic with a literal operand).
    C,
}

impl Opcode {
    pub fn access_type(self) -> Option<AccessType> {
        use Opcode::*;
        let first = match self {
            Aget | AgetWide | AgetObject | AgetBoolean | AgetByte | AgetChar | AgetShort => Aget,
            Aput | AputWide | AputObject | AputBoolean | AputByte | AputChar | AputShort => Aput,
            Iget | IgetWide | IgetObject | IgetBoolean | IgetByte | IgetChar | IgetShort => Iget,
            Iput | IputWide | IputObject | IputBoolean | IputByte | IputChar | IputShort => Iput,
            Sget | SgetWide | SgetObject | SgetBoolean | SgetByte | SgetChar | SgetShort => Sget,
            Sput | SputWide | SputObject | SputBoolean | SputByte | SputChar | SputShort => Sput,
            _ => return None,
        };
        Some(AccessType::from_offset(first, self))
    }

    pub fn is_aget(self) -> bool {
        (Opcode::Aget..=Opcode::AgetShort).contains(&self)
    }

    pub fn is_aput(self) -> bool {
        (Opcode::Aput..=Opcode::AputShort).contains(&self)
    }

    pub fn is_iget(self) -> bool {
        (Opcode::Iget..=Opcode::IgetShort).contains(&self)
    }

    pub fn is_iput(self) -> bool {
        (Opcode::Iput..=Opcode::IputShort).contains(&self)
    }

    pub fn is_sget(self) -> bool {
        (Opcode::Sget..=Opcode::SgetShort).contains(&self)
    }

    pub fn is_sput(self) -> bool {
        (Opcode::Sput..=Opcode::SputShort).contains(&self)
    }

    pub fn is_instance_field_access(self) -> bool {
        self.is_iget() || self.is_iput()
    }

    pub fn is_static_field_access(self) -> bool {
        self.is_sget() || self.is_sput()
    }

    pub fn is_invoke(self) -> bool {
        (Opcode::InvokeVirtual..=Opcode::InvokeInterface).contains(&self)
    }

    /// Invokes that dispatch on (and therefore null-check) a receiver.
    pub fn has_receiver(self) -> bool {
        self.is_invoke() && self != Opcode::InvokeStatic
    }

    pub fn is_conditional_branch(self) -> bool {
        (Opcode::IfEq..=Opcode::IfLez).contains(&self)
    }

    pub fn is_return(self) -> bool {
        (Opcode::ReturnVoid..=Opcode::ReturnObject).contains(&self)
    }

    /// Whether the instruction ends its basic block.
    pub fn is_terminator(self) -> bool {
        use Opcode::*;
        self.is_conditional_branch()
            || self.is_return()
            || matches!(self, Goto | PackedSwitch | SparseSwitch | Throw)
    }

    pub fn is_unary_lit(self) -> bool {
        (Opcode::AddIntLit16..=Opcode::UshrIntLit8).contains(&self)
    }

    pub fn is_unary_arithmetic(self) -> bool {
        (Opcode::NegInt..=Opcode::IntToShort).contains(&self)
    }

    pub fn is_binary_arithmetic(self) -> bool {
        (Opcode::AddInt..=Opcode::RemDouble).contains(&self)
            || (Opcode::CmplFloat..=Opcode::CmpLong).contains(&self)
    }

    /// Whether the instruction's definition occupies a wide (64-bit) value.
    pub fn defines_wide(self) -> bool {
        use Opcode::*;
        matches!(
            self,
            MoveWide
                | MoveResultWide
                | ConstWide16
                | ConstWide32
                | ConstWide
                | ConstWideHigh16
                | AgetWide
                | IgetWide
                | SgetWide
                | NegLong
                | NotLong
                | NegDouble
                | IntToLong
                | IntToDouble
                | LongToDouble
                | FloatToLong
                | FloatToDouble
                | DoubleToLong
        ) || (AddLong..=UshrLong).contains(&self)
            || (AddDouble..=RemDouble).contains(&self)
    }

    pub fn literal_kind(self) -> LiteralKind {
        use Opcode::*;
        match self {
            Const4 | Const16 | Const | ConstHigh16 | ConstWide16 | ConstWide32
            | ConstWideHigh16 | ConstString | ConstClass => LiteralKind::B,
            ConstWide => LiteralKind::Wide,
            op if op.is_unary_lit() => LiteralKind::C,
            _ => LiteralKind::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_roundtrip() {
        for &op in Opcode::ALL {
            assert_eq!(Opcode::from_name(op.name()), Some(op));
        }
        assert_eq!(Opcode::from_name("add-int/lit9"), None);
    }

    #[test]
    fn access_types() {
        assert_eq!(Opcode::AgetChar.access_type(), Some(AccessType::Char));
        assert_eq!(Opcode::IputWide.access_type(), Some(AccessType::Wide));
        assert_eq!(Opcode::SputObject.access_type(), Some(AccessType::Object));
        assert_eq!(Opcode::AddInt.access_type(), None);
    }

    #[test]
    fn classification() {
        assert!(Opcode::IfLez.is_terminator());
        assert!(Opcode::ReturnWide.is_terminator());
        assert!(!Opcode::InvokeStatic.has_receiver());
        assert!(Opcode::InvokeInterface.has_receiver());
        assert!(Opcode::ShrLong.defines_wide());
        assert!(!Opcode::LongToInt.defines_wide());
        assert_eq!(Opcode::XorIntLit8.literal_kind(), LiteralKind::C);
    }
}
