use anyhow::Result;

use crate::descriptor::object_class_name;
use crate::detectors::{Detector, DetectorMetadata, Problem, describe_method, visit_methods};
use crate::engine::ScanContext;
use crate::ir::{Class, FieldAccessKind, InstructionKind, Method};

/// Detector for reads of enum constants outside the enum itself.
#[derive(Default)]
pub(crate) struct EnumUsageDetector;

crate::register_detector!(EnumUsageDetector);

impl Detector for EnumUsageDetector {
    fn metadata(&self) -> DetectorMetadata {
        DetectorMetadata {
            id: "AVOID_ENUMS",
            title: "Avoid Enums",
            description: "The use of enum is discouraged, because they increase the byte code size and decrease speed!",
        }
    }

    fn analyze_class<'a>(
        &self,
        class: &'a Class,
        scan: &ScanContext<'_>,
    ) -> Result<Vec<Problem<'a>>> {
        if class.access.is_enum {
            return Ok(Vec::new());
        }
        visit_methods(self, class, scan)
    }

    fn analyze_method<'a>(
        &self,
        class: &'a Class,
        method: &'a Method,
        scan: &ScanContext<'_>,
    ) -> Result<Vec<Problem<'a>>> {
        let mut problems = Vec::new();
        for instruction in &method.instructions {
            let InstructionKind::Field(field_ref) = &instruction.kind else {
                continue;
            };
            if field_ref.kind != FieldAccessKind::GetStatic {
                continue;
            }
            let Some(type_name) = object_class_name(&field_ref.descriptor) else {
                continue;
            };
            if !scan.is_enum_type(&type_name) {
                continue;
            }
            problems.push(Problem::at(
                class,
                method,
                instruction,
                format!(
                    "Enum constant {}.{} used in {}; prefer int constants",
                    field_ref.owner,
                    field_ref.name,
                    describe_method(class, method)
                ),
            ));
        }
        Ok(problems)
    }
}
