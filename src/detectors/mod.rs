use anyhow::Result;

use crate::engine::ScanContext;
use crate::ir::{Class, Instruction, Method};
use crate::project::{Marker, ResourceHandle};

// Detector modules are auto-discovered by build.rs; do not edit manually.
include!(concat!(env!("OUT_DIR"), "/detector_modules.rs"));

/// Metadata describing a guideline detector.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct DetectorMetadata {
    pub(crate) id: &'static str,
    pub(crate) title: &'static str,
    pub(crate) description: &'static str,
}

/// Guideline check over one class of the scanned project.
///
/// Detectors are stateless. Anything that spans the whole project (such as
/// the set of enum types) is read from the [`ScanContext`], which is rebuilt
/// for every scan.
pub(crate) trait Detector: Send + Sync {
    fn metadata(&self) -> DetectorMetadata;

    /// Class-level entry point. Defaults to visiting every method.
    fn analyze_class<'a>(
        &self,
        class: &'a Class,
        scan: &ScanContext<'_>,
    ) -> Result<Vec<Problem<'a>>> {
        visit_methods(self, class, scan)
    }

    /// Method-level hook used by the default traversal.
    fn analyze_method<'a>(
        &self,
        _class: &'a Class,
        _method: &'a Method,
        _scan: &ScanContext<'_>,
    ) -> Result<Vec<Problem<'a>>> {
        Ok(Vec::new())
    }
}

/// Default traversal: run `analyze_method` on every method of `class`.
pub(crate) fn visit_methods<'a, D>(
    detector: &D,
    class: &'a Class,
    scan: &ScanContext<'_>,
) -> Result<Vec<Problem<'a>>>
where
    D: Detector + ?Sized,
{
    let mut problems = Vec::new();
    for method in &class.methods {
        problems.extend(detector.analyze_method(class, method, scan)?);
    }
    Ok(problems)
}

/// Wrapper struct for detector factory functions to enable inventory collection.
pub(crate) struct DetectorFactory(pub fn() -> Box<dyn Detector>);

inventory::collect!(DetectorFactory);

/// Macro to register a detector implementation.
///
/// Usage: `register_detector!(DetectorName);`
#[macro_export]
macro_rules! register_detector {
    ($detector_type:ty) => {
        inventory::submit! {
            $crate::detectors::DetectorFactory(|| Box::new(<$detector_type>::default()))
        }
    };
}

/// Returns all registered detectors as boxed trait objects.
pub(crate) fn all_detectors() -> Vec<Box<dyn Detector>> {
    inventory::iter::<DetectorFactory>
        .into_iter()
        .map(|factory| (factory.0)())
        .collect()
}

/// Guideline violation found at one instruction.
///
/// Borrows the scanned model, so a problem can only exist while the class it
/// points into is alive. Resolving it into a [`Marker`] consumes it.
#[derive(Debug)]
pub(crate) struct Problem<'a> {
    pub(crate) class: &'a Class,
    pub(crate) method: &'a Method,
    pub(crate) instruction: &'a Instruction,
    pub(crate) message: String,
}

impl<'a> Problem<'a> {
    pub(crate) fn at(
        class: &'a Class,
        method: &'a Method,
        instruction: &'a Instruction,
        message: impl Into<String>,
    ) -> Self {
        Self {
            class,
            method,
            instruction,
            message: message.into(),
        }
    }

    pub(crate) fn offset(&self) -> u32 {
        self.instruction.offset
    }

    pub(crate) fn line(&self) -> Option<u32> {
        self.method.line_for_offset(self.instruction.offset)
    }

    pub(crate) fn logical_location(&self) -> String {
        method_logical_name(&self.class.name, &self.method.name, &self.method.descriptor)
    }

    /// Materialize the problem as a marker on `resource`.
    pub(crate) fn into_marker(self, metadata: &DetectorMetadata, resource: &ResourceHandle) -> Marker {
        let logical_location = self.logical_location();
        let line = self.line();
        Marker {
            detector_id: metadata.id.to_string(),
            title: metadata.title.to_string(),
            description: metadata.description.to_string(),
            message: self.message,
            resource: resource.clone(),
            logical_location,
            offset: self.instruction.offset,
            line,
        }
    }
}

pub(crate) fn method_logical_name(class_name: &str, method_name: &str, descriptor: &str) -> String {
    format!("{class_name}.{method_name}{descriptor}")
}

/// Human readable `Class.method(descriptor)` used in problem messages.
pub(crate) fn describe_method(class: &Class, method: &Method) -> String {
    method_logical_name(&class.name, &method.name, &method.descriptor)
}
