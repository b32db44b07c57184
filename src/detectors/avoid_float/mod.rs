use anyhow::Result;

use crate::detectors::{Detector, DetectorMetadata, Problem, describe_method};
use crate::engine::ScanContext;
use crate::ir::{Class, Method};
use crate::opcodes;

/// Detector for floating point arithmetic.
#[derive(Default)]
pub(crate) struct AvoidFloatDetector;

crate::register_detector!(AvoidFloatDetector);

impl Detector for AvoidFloatDetector {
    fn metadata(&self) -> DetectorMetadata {
        DetectorMetadata {
            id: "AVOID_FLOAT",
            title: "Avoid Float",
            description: "Floating point arithmetic is slow on devices without an FPU, use int arithmetic where possible!",
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
            let Some(operation) = float_operation(instruction.opcode) else {
                continue;
            };
            problems.push(Problem::at(
                class,
                method,
                instruction,
                format!(
                    "Floating point {operation} in {}",
                    describe_method(class, method)
                ),
            ));
        }
        Ok(problems)
    }
}

fn float_operation(opcode: u8) -> Option<&'static str> {
    let operation = match opcode {
        opcodes::FADD => "fadd",
        opcodes::DADD => "dadd",
        opcodes::FSUB => "fsub",
        opcodes::DSUB => "dsub",
        opcodes::FMUL => "fmul",
        opcodes::DMUL => "dmul",
        opcodes::FDIV => "fdiv",
        opcodes::DDIV => "ddiv",
        opcodes::FREM => "frem",
        opcodes::DREM => "drem",
        opcodes::FNEG => "fneg",
        opcodes::DNEG => "dneg",
        _ => return None,
    };
    Some(operation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::{ClassBuilder, MethodBuilder, run_detector};

    const IADD: u8 = 0x60;
    const LADD: u8 = 0x61;
    const FLOAD_0: u8 = 0x22;

    #[test]
    fn reports_float_and_double_arithmetic() {
        let classes = vec![
            ClassBuilder::new("com/example/Geometry")
                .method(
                    MethodBuilder::new("scale", "(FF)F")
                        .static_method()
                        .op(FLOAD_0)
                        .op(opcodes::FLOAD_1)
                        .op(opcodes::FMUL)
                        .op(opcodes::FNEG)
                        .op(opcodes::IRETURN)
                        .build(),
                )
                .method(
                    MethodBuilder::new("half", "(D)D")
                        .static_method()
                        .op(opcodes::LDC2_W)
                        .op(opcodes::DDIV)
                        .op(opcodes::IRETURN)
                        .build(),
                )
                .build(),
        ];

        let findings = run_detector(&AvoidFloatDetector, &classes).expect("run detector");

        assert_eq!(findings.len(), 3);
        assert_eq!(findings[0].offset, 2);
        assert!(findings[0].message.contains("fmul"));
        assert!(findings[1].message.contains("fneg"));
        assert_eq!(findings[2].method, "half");
        assert_eq!(findings[2].offset, 3);
    }

    #[test]
    fn integer_arithmetic_is_ignored() {
        let classes = vec![
            ClassBuilder::new("com/example/Counter")
                .method(
                    MethodBuilder::new("sum", "(IJ)J")
                        .static_method()
                        .op(IADD)
                        .op(LADD)
                        .op(opcodes::IRETURN)
                        .build(),
                )
                .build(),
        ];

        let findings = run_detector(&AvoidFloatDetector, &classes).expect("run detector");

        assert!(findings.is_empty());
    }
}
