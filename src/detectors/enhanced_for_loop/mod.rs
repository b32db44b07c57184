use anyhow::Result;

use crate::detectors::{Detector, DetectorMetadata, Problem, describe_method};
use crate::engine::ScanContext;
use crate::ir::{Class, InstructionKind, Method};

const ITERATOR_NAME: &str = "iterator";
const ITERATOR_DESCRIPTOR: &str = "()Ljava/util/Iterator;";
const RANDOM_ACCESS_LISTS: [&str; 3] = ["java/util/ArrayList", "java/util/List", "java/util/Vector"];

/// Detector for iterator-based loops over random-access lists.
#[derive(Default)]
pub(crate) struct EnhancedForLoopDetector;

crate::register_detector!(EnhancedForLoopDetector);

impl Detector for EnhancedForLoopDetector {
    fn metadata(&self) -> DetectorMetadata {
        DetectorMetadata {
            id: "ENHANCED_FOR_LOOP_ITERATOR",
            title: "Avoid Enhanced For Loop on Lists",
            description: "The enhanced for loop allocates an iterator, use a counted loop for ArrayList and Vector!",
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
            if call.name != ITERATOR_NAME
                || call.descriptor != ITERATOR_DESCRIPTOR
                || !RANDOM_ACCESS_LISTS.contains(&call.owner.as_str())
            {
                continue;
            }
            problems.push(Problem::at(
                class,
                method,
                instruction,
                format!(
                    "Iterator over {} created in {}; use an indexed loop",
                    call.owner,
                    describe_method(class, method)
                ),
            ));
        }
        Ok(problems)
    }
}
