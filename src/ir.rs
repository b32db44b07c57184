/// Intermediate representation for parsed JVM classes and methods.
#[derive(Clone, Debug)]
pub(crate) struct Class {
    pub(crate) name: String,
    pub(crate) access: ClassAccess,
    pub(crate) super_name: Option<String>,
    pub(crate) interfaces: Vec<String>,
    pub(crate) fields: Vec<Field>,
    pub(crate) methods: Vec<Method>,
}

impl Class {
    /// Look up a declared field by simple name.
    pub(crate) fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// Look up a declared method by name and descriptor.
    pub(crate) fn method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|method| method.name == name && method.descriptor == descriptor)
    }

    /// Static initializer of the class, when present.
    pub(crate) fn static_initializer(&self) -> Option<&Method> {
        self.methods
            .iter()
            .find(|method| method.name == STATIC_INITIALIZER)
    }
}

/// Reserved name of the class static initializer.
pub(crate) const STATIC_INITIALIZER: &str = "<clinit>";
/// Reserved name of instance constructors.
pub(crate) const CONSTRUCTOR: &str = "<init>";

/// Class access flags relevant for analysis.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct ClassAccess {
    pub(crate) is_interface: bool,
    pub(crate) is_enum: bool,
}

impl ClassAccess {
    pub(crate) fn from_bits(bits: u16) -> Self {
        Self {
            is_interface: bits & 0x0200 != 0,
            is_enum: bits & 0x4000 != 0,
        }
    }
}

/// Field declared by a class.
#[derive(Clone, Debug)]
pub(crate) struct Field {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access: FieldAccess,
}

/// Field access flags relevant for analysis.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct FieldAccess {
    pub(crate) is_final: bool,
}

impl FieldAccess {
    pub(crate) fn from_bits(bits: u16) -> Self {
        Self {
            is_final: bits & 0x0010 != 0,
        }
    }
}

/// Method declared by a class, with its bytecode.
#[derive(Clone, Debug)]
pub(crate) struct Method {
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) access: MethodAccess,
    pub(crate) instructions: Vec<Instruction>,
    pub(crate) line_numbers: Vec<LineNumber>,
}

impl Method {
    /// Best-effort source line for a bytecode offset.
    pub(crate) fn line_for_offset(&self, offset: u32) -> Option<u32> {
        let mut line = None;
        for entry in &self.line_numbers {
            if entry.start_pc > offset {
                break;
            }
            line = Some(entry.line);
        }
        line
    }

    pub(crate) fn is_static_initializer(&self) -> bool {
        self.name == STATIC_INITIALIZER
    }

    pub(crate) fn is_constructor(&self) -> bool {
        self.name == CONSTRUCTOR
    }
}

/// Method access flags relevant for analysis.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub(crate) struct MethodAccess {
    pub(crate) is_static: bool,
    pub(crate) is_abstract: bool,
    pub(crate) is_native: bool,
    pub(crate) is_synthetic: bool,
    pub(crate) is_bridge: bool,
}

impl MethodAccess {
    pub(crate) fn from_bits(bits: u16) -> Self {
        Self {
            is_static: bits & 0x0008 != 0,
            is_bridge: bits & 0x0040 != 0,
            is_native: bits & 0x0100 != 0,
            is_abstract: bits & 0x0400 != 0,
            is_synthetic: bits & 0x1000 != 0,
        }
    }
}

/// Line number table entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct LineNumber {
    pub(crate) start_pc: u32,
    pub(crate) line: u32,
}

/// Bytecode instruction captured for analysis.
#[derive(Clone, Debug)]
pub(crate) struct Instruction {
    pub(crate) offset: u32,
    pub(crate) opcode: u8,
    pub(crate) kind: InstructionKind,
}

/// Operand shapes the detectors care about.
#[derive(Clone, Debug)]
pub(crate) enum InstructionKind {
    Field(FieldRef),
    Invoke(CallSite),
    LoadLocal(u16),
    Other,
}

/// Field reference carried by getstatic/putstatic/getfield/putfield.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct FieldRef {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) kind: FieldAccessKind,
}

/// Field access opcode classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum FieldAccessKind {
    GetStatic,
    PutStatic,
    GetField,
    PutField,
}

/// Call site extracted from bytecode.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct CallSite {
    pub(crate) owner: String,
    pub(crate) name: String,
    pub(crate) descriptor: String,
    pub(crate) kind: CallKind,
}

/// Call opcode classification.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub(crate) enum CallKind {
    Virtual,
    Interface,
    Special,
    Static,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_for_offset_picks_closest_preceding_entry() {
        let method = Method {
            name: "run".to_string(),
            descriptor: "()V".to_string(),
            access: MethodAccess::default(),
            instructions: Vec::new(),
            line_numbers: vec![
                LineNumber {
                    start_pc: 0,
                    line: 10,
                },
                LineNumber {
                    start_pc: 4,
                    line: 11,
                },
            ],
        };

        assert_eq!(method.line_for_offset(0), Some(10));
        assert_eq!(method.line_for_offset(3), Some(10));
        assert_eq!(method.line_for_offset(9), Some(11));
    }

    #[test]
    fn line_for_offset_is_none_without_table() {
        let method = Method {
            name: "run".to_string(),
            descriptor: "()V".to_string(),
            access: MethodAccess::default(),
            instructions: Vec::new(),
            line_numbers: Vec::new(),
        };

        assert_eq!(method.line_for_offset(0), None);
    }

    #[test]
    fn class_access_decodes_enum_flag() {
        let access = ClassAccess::from_bits(0x4031);

        assert!(access.is_enum);
        assert!(!access.is_interface);
    }

    #[test]
    fn member_access_decodes_used_flags() {
        assert!(FieldAccess::from_bits(0x0018).is_final);
        assert!(!FieldAccess::from_bits(0x0008).is_final);

        let access = MethodAccess::from_bits(0x1048);
        assert!(access.is_static);
        assert!(access.is_bridge);
        assert!(access.is_synthetic);
        assert!(!access.is_abstract);
        assert!(!access.is_native);
    }
}
