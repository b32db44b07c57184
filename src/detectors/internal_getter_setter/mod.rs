use anyhow::Result;

use crate::descriptor::{ReturnKind, method_param_count, method_return_kind};
use crate::detectors::{Detector, DetectorMetadata, Problem, describe_method};
use crate::engine::ScanContext;
use crate::ir::{CallKind, Class, FieldAccessKind, Instruction, InstructionKind, Method};
use crate::opcodes;

/// Detector for calls to the class's own trivial getters and setters.
#[derive(Default)]
pub(crate) struct InternalGetterSetterDetector;

crate::register_detector!(InternalGetterSetterDetector);

impl Detector for InternalGetterSetterDetector {
    fn metadata(&self) -> DetectorMetadata {
        DetectorMetadata {
            id: "AVOID_INTERNAL_GETTERS_SETTERS",
            title: "Avoid Internal Getters/Setters",
            description: "Inside a class access fields directly instead of calling its own getters and setters!",
        }
    }

    fn analyze_method<'a>(
        &self,
        class: &'a Class,
        method: &'a Method,
        _scan: &ScanContext<'_>,
    ) -> Result<Vec<Problem<'a>>> {
        if method.is_constructor() {
            return Ok(Vec::new());
        }
        let mut problems = Vec::new();
        for instruction in &method.instructions {
            let InstructionKind::Invoke(call) = &instruction.kind else {
                continue;
            };
            if !matches!(call.kind, CallKind::Virtual | CallKind::Special) || call.owner != class.name {
                continue;
            }
            let Some(target) = class.method(&call.name, &call.descriptor) else {
                continue;
            };
            let accessor = if is_trivial_getter(class, target) {
                "getter"
            } else if is_trivial_setter(class, target) {
                "setter"
            } else {
                continue;
            };
            problems.push(Problem::at(
                class,
                method,
                instruction,
                format!(
                    "Internal {accessor} {}{} called from {}; access the field directly",
                    call.name,
                    call.descriptor,
                    describe_method(class, method)
                ),
            ));
        }
        Ok(problems)
    }
}

/// `aload_0; getfield <own field>; <x>return`
fn is_trivial_getter(class: &Class, method: &Method) -> bool {
    if method.access.is_static
        || !matches!(method_param_count(&method.descriptor), Ok(0))
        || matches!(method_return_kind(&method.descriptor), Ok(ReturnKind::Void) | Err(_))
    {
        return false;
    }
    match method.instructions.as_slice() {
        [load, get, ret] => {
            load.opcode == opcodes::ALOAD_0
                && is_own_field(class, get, FieldAccessKind::GetField)
                && (opcodes::IRETURN..=opcodes::ARETURN).contains(&ret.opcode)
        }
        _ => false,
    }
}

/// `aload_0; <x>load_1; putfield <own field>; return`
fn is_trivial_setter(class: &Class, method: &Method) -> bool {
    if method.access.is_static
        || !matches!(method_param_count(&method.descriptor), Ok(1))
        || !matches!(method_return_kind(&method.descriptor), Ok(ReturnKind::Void))
    {
        return false;
    }
    match method.instructions.as_slice() {
        [load_this, load_value, put, ret] => {
            load_this.opcode == opcodes::ALOAD_0
                && matches!(
                    load_value.opcode,
                    opcodes::ILOAD_1
                        | opcodes::LLOAD_1
                        | opcodes::FLOAD_1
                        | opcodes::DLOAD_1
                        | opcodes::ALOAD_1
                )
                && is_own_field(class, put, FieldAccessKind::PutField)
                && ret.opcode == opcodes::RETURN
        }
        _ => false,
    }
}

fn is_own_field(class: &Class, instruction: &Instruction, kind: FieldAccessKind) -> bool {
    match &instruction.kind {
        InstructionKind::Field(field_ref) => field_ref.kind == kind && field_ref.owner == class.name,
        _ => false,
    }
}
