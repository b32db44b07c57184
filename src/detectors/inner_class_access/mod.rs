use anyhow::Result;

use crate::detectors::{Detector, DetectorMetadata, Problem, describe_method};
use crate::engine::ScanContext;
use crate::ir::{CallKind, Class, InstructionKind, Method};

const ACCESSOR_PREFIX: &str = "access$";

/// Detector for calls to compiler-generated private member accessors.
///
/// `javac` emits static `access$NNN` methods when a nested class touches a
/// private member of its outer class (or the reverse). Every such access costs
/// an extra static call.
#[derive(Default)]
pub(crate) struct InnerClassAccessDetector;

crate::register_detector!(InnerClassAccessDetector);

impl Detector for InnerClassAccessDetector {
    fn metadata(&self) -> DetectorMetadata {
        DetectorMetadata {
            id: "INNER_CLASS_PRIVATE_ACCESS",
            title: "Use Package Scope with Inner Classes",
            description: "Private members shared with inner classes are reached through synthetic accessors, use package scope instead!",
        }
    }

    fn analyze_method<'a>(
        &self,
        class: &'a Class,
        method: &'a Method,
        scan: &ScanContext<'_>,
    ) -> Result<Vec<Problem<'a>>> {
        let mut problems = Vec::new();
        for instruction in &method.instructions {
            let InstructionKind::Invoke(call) = &instruction.kind else {
                continue;
            };
            if call.kind != CallKind::Static || !call.name.starts_with(ACCESSOR_PREFIX) {
                continue;
            }
            // When the owner is scanned, require the accessor to be synthetic.
            let is_accessor = match scan.class(&call.owner) {
                Some(owner) => owner
                    .method(&call.name, &call.descriptor)
                    .is_none_or(|target| target.access.is_synthetic),
                None => true,
            };
            if !is_accessor {
                continue;
            }
            problems.push(Problem::at(
                class,
                method,
                instruction,
                format!(
                    "Synthetic accessor {}.{} called from {}; make the accessed member package-private",
                    call.owner,
                    call.name,
                    describe_method(class, method)
                ),
            ));
        }
        Ok(problems)
    }
}
