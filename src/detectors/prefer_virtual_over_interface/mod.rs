use anyhow::Result;

use crate::detectors::{Detector, DetectorMetadata, Problem, describe_method};
use crate::engine::ScanContext;
use crate::ir::{CallKind, Class, InstructionKind, Method};

/// Detector for calls dispatched through an interface type.
#[derive(Default)]
pub(crate) struct PreferVirtualOverInterfaceDetector;

crate::register_detector!(PreferVirtualOverInterfaceDetector);

impl Detector for PreferVirtualOverInterfaceDetector {
    fn metadata(&self) -> DetectorMetadata {
        DetectorMetadata {
            id: "PREFER_VIRTUAL_OVER_INTERFACE",
            title: "Prefer Virtual Over Interface",
            description: "Calling through an interface reference is slower than a virtual call on the concrete type!",
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
            let InstructionKind::Invoke(call) = &instruction.kind else {
                continue;
            };
            if call.kind != CallKind::Interface {
                continue;
            }
            problems.push(Problem::at(
                class,
                method,
                instruction,
                format!(
                    "Interface call {}.{}{} in {}; declare the receiver with its concrete type",
                    call.owner,
                    call.name,
                    call.descriptor,
                    describe_method(class, method)
                ),
            ));
        }
        Ok(problems)
    }
}
