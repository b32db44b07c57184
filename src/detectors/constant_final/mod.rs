use anyhow::Result;

use crate::detectors::{Detector, DetectorMetadata, Problem, describe_method};
use crate::engine::ScanContext;
use crate::ir::{Class, FieldAccessKind, InstructionKind, Method};

/// Detector for static fields assigned once in `<clinit>` but not declared final.
#[derive(Default)]
pub(crate) struct ConstantFinalDetector;

crate::register_detector!(ConstantFinalDetector);

impl Detector for ConstantFinalDetector {
    fn metadata(&self) -> DetectorMetadata {
        DetectorMetadata {
            id: "CONSTANT_FINAL",
            title: "Declare Constants Final",
            description: "If it is a constant declare it final!",
        }
    }

    fn analyze_class<'a>(
        &self,
        class: &'a Class,
        scan: &ScanContext<'_>,
    ) -> Result<Vec<Problem<'a>>> {
        // Enum static initializers write every constant; those are expected.
        if class.access.is_enum {
            return Ok(Vec::new());
        }
        match class.static_initializer() {
            Some(method) => self.analyze_method(class, method, scan),
            None => Ok(Vec::new()),
        }
    }

    fn analyze_method<'a>(
        &self,
        class: &'a Class,
        method: &'a Method,
        _scan: &ScanContext<'_>,
    ) -> Result<Vec<Problem<'a>>> {
        let mut problems = Vec::new();
        for instruction in &method.instructions {
            let InstructionKind::Field(field_ref) = &instruction.kind else {
                continue;
            };
            if field_ref.kind != FieldAccessKind::PutStatic {
                continue;
            }
            // A field missing from the table counts as non-final.
            let is_final = class
                .field(&field_ref.name)
                .is_some_and(|field| field.access.is_final);
            if is_final {
                continue;
            }
            problems.push(Problem::at(
                class,
                method,
                instruction,
                format!(
                    "Static field {}.{} is only assigned in {}; declare it final",
                    class.name,
                    field_ref.name,
                    describe_method(class, method)
                ),
            ));
        }
        Ok(problems)
    }
}
