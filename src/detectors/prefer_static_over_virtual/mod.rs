use anyhow::Result;

use crate::detectors::{Detector, DetectorMetadata, Problem, describe_method, visit_methods};
use crate::engine::ScanContext;
use crate::ir::{Class, InstructionKind, Method};

/// Detector for instance methods that never touch `this`.
#[derive(Default)]
pub(crate) struct PreferStaticOverVirtualDetector;

crate::register_detector!(PreferStaticOverVirtualDetector);

impl Detector for PreferStaticOverVirtualDetector {
    fn metadata(&self) -> DetectorMetadata {
        DetectorMetadata {
            id: "PREFER_STATIC_OVER_VIRTUAL",
            title: "Prefer Static Over Virtual",
            description: "If a method does not access instance state make it static, static calls are faster!",
        }
    }

    fn analyze_class<'a>(
        &self,
        class: &'a Class,
        scan: &ScanContext<'_>,
    ) -> Result<Vec<Problem<'a>>> {
        if class.access.is_interface {
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
        let access = method.access;
        if access.is_static
            || access.is_abstract
            || access.is_native
            || access.is_synthetic
            || access.is_bridge
            || method.is_constructor()
            || method.is_static_initializer()
        {
            return Ok(Vec::new());
        }
        let Some(first) = method.instructions.first() else {
            return Ok(Vec::new());
        };
        let uses_this = method
            .instructions
            .iter()
            .any(|instruction| matches!(instruction.kind, InstructionKind::LoadLocal(0)));
        if uses_this || scan.may_override(class, method) {
            return Ok(Vec::new());
        }
        Ok(vec![Problem::at(
            class,
            method,
            first,
            format!(
                "{} does not use this; declare it static",
                describe_method(class, method)
            ),
        )])
    }
}
