use std::collections::BTreeSet;

use anyhow::Result;

use crate::detectors::Detector;
use crate::engine::ScanContext;
use crate::ir::{
    CallKind, CallSite, Class, ClassAccess, Field, FieldAccess, FieldAccessKind, FieldRef,
    Instruction, InstructionKind, LineNumber, Method, MethodAccess,
};
use crate::opcodes;
use crate::project::{DEFAULT_SOURCE_EXTENSION, Marker, Project, ResourceHandle};

/// Builder for in-memory classes, standing in for the crawler in tests.
pub(crate) struct ClassBuilder {
    class: Class,
}

impl ClassBuilder {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            class: Class {
                name: name.to_string(),
                access: ClassAccess::default(),
                super_name: Some("java/lang/Object".to_string()),
                interfaces: Vec::new(),
                fields: Vec::new(),
                methods: Vec::new(),
            },
        }
    }

    pub(crate) fn enum_class(mut self) -> Self {
        self.class.access.is_enum = true;
        self.class.super_name = Some("java/lang/Enum".to_string());
        self
    }

    pub(crate) fn interface(mut self) -> Self {
        self.class.access.is_interface = true;
        self
    }

    pub(crate) fn super_class(mut self, name: &str) -> Self {
        self.class.super_name = Some(name.to_string());
        self
    }

    pub(crate) fn implements(mut self, name: &str) -> Self {
        self.class.interfaces.push(name.to_string());
        self
    }

    pub(crate) fn field(mut self, name: &str, descriptor: &str, access: FieldAccess) -> Self {
        self.class.fields.push(Field {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            access,
        });
        self
    }

    pub(crate) fn instance_field(self, name: &str, descriptor: &str) -> Self {
        self.field(name, descriptor, FieldAccess::default())
    }

    pub(crate) fn static_field(self, name: &str, descriptor: &str) -> Self {
        self.field(name, descriptor, FieldAccess::default())
    }

    pub(crate) fn static_final_field(self, name: &str, descriptor: &str) -> Self {
        self.field(name, descriptor, FieldAccess { is_final: true })
    }

    pub(crate) fn method(mut self, method: Method) -> Self {
        self.class.methods.push(method);
        self
    }

    pub(crate) fn build(self) -> Class {
        self.class
    }
}

/// Builder for a method body; offsets follow real instruction lengths.
pub(crate) struct MethodBuilder {
    method: Method,
    next_offset: u32,
}

impl MethodBuilder {
    pub(crate) fn new(name: &str, descriptor: &str) -> Self {
        Self {
            method: Method {
                name: name.to_string(),
                descriptor: descriptor.to_string(),
                access: MethodAccess::default(),
                instructions: Vec::new(),
                line_numbers: Vec::new(),
            },
            next_offset: 0,
        }
    }

    pub(crate) fn static_method(mut self) -> Self {
        self.method.access.is_static = true;
        self
    }

    pub(crate) fn abstract_method(mut self) -> Self {
        self.method.access.is_abstract = true;
        self
    }

    pub(crate) fn synthetic(mut self) -> Self {
        self.method.access.is_synthetic = true;
        self
    }

    /// Start a new source line at the next instruction.
    pub(crate) fn line(mut self, line: u32) -> Self {
        self.method.line_numbers.push(LineNumber {
            start_pc: self.next_offset,
            line,
        });
        self
    }

    pub(crate) fn op(self, opcode: u8) -> Self {
        let length = match opcode {
            opcodes::LDC => 2,
            opcodes::LDC_W | opcodes::LDC2_W | opcodes::GOTO => 3,
            _ => 1,
        };
        self.push(opcode, InstructionKind::Other, length)
    }

    pub(crate) fn aload(self, index: u16) -> Self {
        if index <= 3 {
            self.push(opcodes::ALOAD_0 + index as u8, InstructionKind::LoadLocal(index), 1)
        } else {
            self.push(opcodes::ALOAD, InstructionKind::LoadLocal(index), 2)
        }
    }

    pub(crate) fn getstatic(self, owner: &str, name: &str, descriptor: &str) -> Self {
        self.field_op(opcodes::GETSTATIC, FieldAccessKind::GetStatic, owner, name, descriptor)
    }

    pub(crate) fn putstatic(self, owner: &str, name: &str, descriptor: &str) -> Self {
        self.field_op(opcodes::PUTSTATIC, FieldAccessKind::PutStatic, owner, name, descriptor)
    }

    pub(crate) fn getfield(self, owner: &str, name: &str, descriptor: &str) -> Self {
        self.field_op(opcodes::GETFIELD, FieldAccessKind::GetField, owner, name, descriptor)
    }

    pub(crate) fn putfield(self, owner: &str, name: &str, descriptor: &str) -> Self {
        self.field_op(opcodes::PUTFIELD, FieldAccessKind::PutField, owner, name, descriptor)
    }

    pub(crate) fn invoke(self, kind: CallKind, owner: &str, name: &str, descriptor: &str) -> Self {
        let (opcode, length) = match kind {
            CallKind::Virtual => (opcodes::INVOKEVIRTUAL, 3),
            CallKind::Special => (opcodes::INVOKESPECIAL, 3),
            CallKind::Static => (opcodes::INVOKESTATIC, 3),
            CallKind::Interface => (opcodes::INVOKEINTERFACE, 5),
        };
        let call = CallSite {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            kind,
        };
        self.push(opcode, InstructionKind::Invoke(call), length)
    }

    pub(crate) fn build(self) -> Method {
        self.method
    }

    fn field_op(
        self,
        opcode: u8,
        kind: FieldAccessKind,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Self {
        let field = FieldRef {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            kind,
        };
        self.push(opcode, InstructionKind::Field(field), 3)
    }

    fn push(mut self, opcode: u8, kind: InstructionKind, length: u32) -> Self {
        self.method.instructions.push(Instruction {
            offset: self.next_offset,
            opcode,
            kind,
        });
        self.next_offset += length;
        self
    }
}

/// Owned summary of a problem, detached from the borrowed model.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Finding {
    pub(crate) class: String,
    pub(crate) method: String,
    pub(crate) offset: u32,
    pub(crate) message: String,
}

/// Run one detector over every class in `classes`, as a single scan.
pub(crate) fn run_detector(detector: &dyn Detector, classes: &[Class]) -> Result<Vec<Finding>> {
    let scan = ScanContext::new(classes)?;
    let mut findings = Vec::new();
    for class in classes {
        for problem in detector.analyze_class(class, &scan)? {
            findings.push(Finding {
                class: problem.class.name.clone(),
                method: problem.method.name.clone(),
                offset: problem.offset(),
                message: problem.message.clone(),
            });
        }
    }
    Ok(findings)
}

/// In-memory project with scriptable marker-clearing failures.
pub(crate) struct MemoryProject {
    pub(crate) sources: BTreeSet<String>,
    pub(crate) markers: Vec<Marker>,
    pub(crate) clear_failures: u32,
    pub(crate) clear_calls: u32,
}

impl MemoryProject {
    pub(crate) fn with_sources(sources: &[&str]) -> Self {
        Self {
            sources: sources.iter().map(|source| source.to_string()).collect(),
            markers: Vec::new(),
            clear_failures: 0,
            clear_calls: 0,
        }
    }
}

impl Project for MemoryProject {
    fn source_extension(&self) -> &str {
        DEFAULT_SOURCE_EXTENSION
    }

    fn find_source(&self, relative_path: &str) -> Option<ResourceHandle> {
        self.sources
            .contains(relative_path)
            .then(|| ResourceHandle::new(relative_path))
    }

    fn clear_markers(&mut self) -> Result<()> {
        self.clear_calls += 1;
        if self.clear_failures > 0 {
            self.clear_failures -= 1;
            anyhow::bail!("marker store is locked");
        }
        self.markers.clear();
        Ok(())
    }

    fn add_marker(&mut self, marker: Marker) -> Result<()> {
        self.markers.push(marker);
        Ok(())
    }
}

/// Minimal class file writer for crawler and end-to-end tests.
pub(crate) struct ClassFileBuilder {
    cp: Vec<CpEntry>,
    access: u16,
    this_class: u16,
    super_class: u16,
    fields: Vec<FieldSpec>,
    methods: Vec<MethodSpec>,
    code_index: u16,
    line_table_index: u16,
}

impl ClassFileBuilder {
    pub(crate) fn new(class_name: &str, super_name: &str) -> Self {
        let mut builder = Self {
            cp: Vec::new(),
            access: 0x0021,
            this_class: 0,
            super_class: 0,
            fields: Vec::new(),
            methods: Vec::new(),
            code_index: 0,
            line_table_index: 0,
        };
        builder.code_index = builder.add_utf8("Code");
        builder.line_table_index = builder.add_utf8("LineNumberTable");
        builder.this_class = builder.add_class(class_name);
        builder.super_class = builder.add_class(super_name);
        builder
    }

    pub(crate) fn access(mut self, flags: u16) -> Self {
        self.access = flags;
        self
    }

    pub(crate) fn add_utf8(&mut self, value: &str) -> u16 {
        self.cp.push(CpEntry::Utf8(value.to_string()));
        self.cp.len() as u16
    }

    pub(crate) fn add_class(&mut self, name: &str) -> u16 {
        let name_index = self.add_utf8(name);
        self.cp.push(CpEntry::Class(name_index));
        self.cp.len() as u16
    }

    fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.cp.push(CpEntry::NameAndType(name_index, descriptor_index));
        self.cp.len() as u16
    }

    pub(crate) fn add_field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.cp.push(CpEntry::FieldRef(class_index, name_and_type));
        self.cp.len() as u16
    }

    pub(crate) fn add_method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.add_class(class);
        let name_and_type = self.add_name_and_type(name, descriptor);
        self.cp.push(CpEntry::MethodRef(class_index, name_and_type));
        self.cp.len() as u16
    }

    pub(crate) fn add_field(&mut self, access: u16, name: &str, descriptor: &str) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.fields.push(FieldSpec {
            access,
            name_index,
            descriptor_index,
        });
    }

    /// Add a method with a `Code` attribute; `lines` maps start_pc to line.
    pub(crate) fn add_method(
        &mut self,
        access: u16,
        name: &str,
        descriptor: &str,
        code: Vec<u8>,
        max_locals: u16,
        lines: &[(u16, u16)],
    ) {
        let name_index = self.add_utf8(name);
        let descriptor_index = self.add_utf8(descriptor);
        self.methods.push(MethodSpec {
            access,
            name_index,
            descriptor_index,
            code,
            max_stack: 2,
            max_locals,
            lines: lines.to_vec(),
        });
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        let mut bytes = Vec::new();
        write_u32(&mut bytes, 0xCAFEBABE);
        write_u16(&mut bytes, 0);
        write_u16(&mut bytes, 52);
        write_u16(&mut bytes, (self.cp.len() + 1) as u16);
        for entry in &self.cp {
            entry.write(&mut bytes);
        }
        write_u16(&mut bytes, self.access);
        write_u16(&mut bytes, self.this_class);
        write_u16(&mut bytes, self.super_class);
        write_u16(&mut bytes, 0);
        write_u16(&mut bytes, self.fields.len() as u16);
        for field in &self.fields {
            write_u16(&mut bytes, field.access);
            write_u16(&mut bytes, field.name_index);
            write_u16(&mut bytes, field.descriptor_index);
            write_u16(&mut bytes, 0);
        }
        write_u16(&mut bytes, self.methods.len() as u16);
        for method in &self.methods {
            write_u16(&mut bytes, method.access);
            write_u16(&mut bytes, method.name_index);
            write_u16(&mut bytes, method.descriptor_index);
            write_u16(&mut bytes, 1);
            write_u16(&mut bytes, self.code_index);
            let line_table_len = if method.lines.is_empty() {
                0
            } else {
                8 + 4 * method.lines.len() as u32
            };
            let attr_len = 12 + method.code.len() as u32 + line_table_len;
            write_u32(&mut bytes, attr_len);
            write_u16(&mut bytes, method.max_stack);
            write_u16(&mut bytes, method.max_locals);
            write_u32(&mut bytes, method.code.len() as u32);
            bytes.extend_from_slice(&method.code);
            write_u16(&mut bytes, 0);
            if method.lines.is_empty() {
                write_u16(&mut bytes, 0);
            } else {
                write_u16(&mut bytes, 1);
                write_u16(&mut bytes, self.line_table_index);
                write_u32(&mut bytes, 2 + 4 * method.lines.len() as u32);
                write_u16(&mut bytes, method.lines.len() as u16);
                for (start_pc, line) in &method.lines {
                    write_u16(&mut bytes, *start_pc);
                    write_u16(&mut bytes, *line);
                }
            }
        }
        write_u16(&mut bytes, 0);
        bytes
    }
}

struct FieldSpec {
    access: u16,
    name_index: u16,
    descriptor_index: u16,
}

struct MethodSpec {
    access: u16,
    name_index: u16,
    descriptor_index: u16,
    code: Vec<u8>,
    max_stack: u16,
    max_locals: u16,
    lines: Vec<(u16, u16)>,
}

enum CpEntry {
    Utf8(String),
    Class(u16),
    NameAndType(u16, u16),
    FieldRef(u16, u16),
    MethodRef(u16, u16),
}

impl CpEntry {
    fn write(&self, bytes: &mut Vec<u8>) {
        match self {
            CpEntry::Utf8(value) => {
                bytes.push(1);
                write_u16(bytes, value.len() as u16);
                bytes.extend_from_slice(value.as_bytes());
            }
            CpEntry::Class(name_index) => {
                bytes.push(7);
                write_u16(bytes, *name_index);
            }
            CpEntry::NameAndType(name_index, descriptor_index) => {
                bytes.push(12);
                write_u16(bytes, *name_index);
                write_u16(bytes, *descriptor_index);
            }
            CpEntry::FieldRef(class_index, name_and_type) => {
                bytes.push(9);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
            CpEntry::MethodRef(class_index, name_and_type) => {
                bytes.push(10);
                write_u16(bytes, *class_index);
                write_u16(bytes, *name_and_type);
            }
        }
    }
}

fn write_u16(bytes: &mut Vec<u8>, value: u16) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

fn write_u32(bytes: &mut Vec<u8>, value: u32) {
    bytes.extend_from_slice(&value.to_be_bytes());
}

pub(crate) fn high(value: u16) -> u8 {
    (value >> 8) as u8
}

pub(crate) fn low(value: u16) -> u8 {
    (value & 0xff) as u8
}

/// `public enum com.x.Color { RED }`
pub(crate) fn color_class_bytes() -> Vec<u8> {
    let mut builder = ClassFileBuilder::new("com/x/Color", "java/lang/Enum").access(0x4031);
    builder.add_field(0x4019, "RED", "Lcom/x/Color;");
    builder.finish()
}

/// `public class com.x.Paint { static Color DEFAULT = Color.RED; }`, with the
/// read on line 3.
pub(crate) fn paint_class_bytes() -> Vec<u8> {
    let mut builder = ClassFileBuilder::new("com/x/Paint", "java/lang/Object");
    let red = builder.add_field_ref("com/x/Color", "RED", "Lcom/x/Color;");
    let default = builder.add_field_ref("com/x/Paint", "DEFAULT", "Lcom/x/Color;");
    builder.add_field(0x0008, "DEFAULT", "Lcom/x/Color;");
    let code = vec![
        opcodes::GETSTATIC,
        high(red),
        low(red),
        opcodes::PUTSTATIC,
        high(default),
        low(default),
        opcodes::RETURN,
    ];
    builder.add_method(0x0008, "<clinit>", "()V", code, 0, &[(0, 3)]);
    builder.finish()
}
