use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use opentelemetry::KeyValue;
use rayon::prelude::*;
use serde_sarif::sarif::{MultiformatMessageString, ReportingDescriptor};
use tracing::{debug, info, warn};

use crate::class_index::ClassIndex;
use crate::detectors::{Detector, DetectorMetadata, Problem, all_detectors};
use crate::ir::{Class, Method};
use crate::project::{Marker, Project, ResourceHandle, source_path_for_class};
use crate::telemetry::{Telemetry, with_span};

/// Project-wide facts shared by detectors during one scan.
///
/// Built at the start of every [`Engine::analyze_project`] call, before any
/// class is analyzed, and dropped when the scan ends.
pub(crate) struct ScanContext<'a> {
    index: ClassIndex<'a>,
}

impl<'a> ScanContext<'a> {
    pub(crate) fn new(classes: &'a [Class]) -> Result<Self> {
        let index = ClassIndex::build(classes).context("index project classes")?;
        Ok(Self { index })
    }

    pub(crate) fn class(&self, name: &str) -> Option<&'a Class> {
        self.index.get(name)
    }

    pub(crate) fn is_enum_type(&self, name: &str) -> bool {
        self.index.is_enum_type(name)
    }

    pub(crate) fn class_count(&self) -> usize {
        self.index.len()
    }

    pub(crate) fn enum_type_count(&self) -> usize {
        self.index.enum_type_count()
    }

    /// Whether `method` may override or implement an inherited method.
    ///
    /// Answers `true` when a super type outside the scanned class set makes
    /// the question undecidable.
    pub(crate) fn may_override(&self, class: &Class, method: &Method) -> bool {
        self.index.overrides_inherited(class, method) || self.index.has_unresolved_super_types(class)
    }
}

/// Bounded retry for clearing markers left by a previous scan.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct RetryPolicy {
    pub(crate) max_attempts: u32,
    pub(crate) backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

/// Counters describing one project scan.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct ScanStats {
    pub(crate) class_count: usize,
    pub(crate) analyzed_class_count: usize,
    pub(crate) skipped_class_count: usize,
    pub(crate) enum_type_count: usize,
    pub(crate) detector_failures: usize,
    pub(crate) duration_ms: u128,
}

/// Outcome of [`Engine::analyze_project`].
pub(crate) struct AnalysisReport {
    pub(crate) detectors: Vec<DetectorMetadata>,
    pub(crate) markers: Vec<Marker>,
    pub(crate) stats: ScanStats,
}

/// Analysis engine that runs every registered detector over a project.
pub(crate) struct Engine {
    detectors: Vec<Box<dyn Detector>>,
    retry: RetryPolicy,
    telemetry: Option<Arc<Telemetry>>,
}

/// Problems one class produced, grouped by detector index.
struct ClassOutcome<'a> {
    problems: Vec<(usize, Vec<Problem<'a>>)>,
    failures: usize,
}

impl Engine {
    pub(crate) fn new() -> Self {
        Self::with_detectors(all_detectors())
    }

    pub(crate) fn with_detectors(mut detectors: Vec<Box<dyn Detector>>) -> Self {
        detectors.sort_by(|a, b| a.metadata().id.cmp(b.metadata().id));
        Self {
            detectors,
            retry: RetryPolicy::default(),
            telemetry: None,
        }
    }

    pub(crate) fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub(crate) fn with_telemetry(mut self, telemetry: Option<Arc<Telemetry>>) -> Self {
        self.telemetry = telemetry;
        self
    }

    pub(crate) fn metadata(&self) -> Vec<DetectorMetadata> {
        self.detectors.iter().map(|detector| detector.metadata()).collect()
    }

    /// Re-analyze the whole project.
    ///
    /// The class set is indexed before anything is touched, so a rejected
    /// set leaves earlier markers in place. Markers from earlier scans are
    /// then cleared; if they cannot be cleared the scan fails before any
    /// detector runs.
    pub(crate) fn analyze_project(
        &self,
        project: &mut dyn Project,
        classes: &[Class],
    ) -> Result<AnalysisReport> {
        let started_at = Instant::now();
        let telemetry = self.telemetry.as_deref();

        let scan = ScanContext::new(classes)?;
        debug!(
            classes = scan.class_count(),
            enum_types = scan.enum_type_count(),
            "scan context built"
        );

        with_span(
            telemetry,
            "clear_markers",
            &[KeyValue::new("perfguide.phase", "clear_markers")],
            || clear_markers(project, self.retry),
        )?;

        let mut stats = ScanStats {
            class_count: scan.class_count(),
            enum_type_count: scan.enum_type_count(),
            ..ScanStats::default()
        };

        let extension = project.source_extension().to_string();
        let mut targets: Vec<(&Class, ResourceHandle)> = Vec::new();
        for class in classes {
            let source_path = source_path_for_class(&class.name, &extension);
            match project.find_source(&source_path) {
                Some(resource) => targets.push((class, resource)),
                None => {
                    debug!(class = %class.name, path = %source_path, "no source resource; skipping class");
                    stats.skipped_class_count += 1;
                }
            }
        }
        stats.analyzed_class_count = targets.len();

        let outcomes: Vec<ClassOutcome<'_>> = with_span(
            telemetry,
            "analysis",
            &[KeyValue::new("perfguide.phase", "analysis")],
            || {
                targets
                    .par_iter()
                    .map(|(class, resource)| {
                        let attributes = [
                            KeyValue::new("perfguide.class", class.name.clone()),
                            KeyValue::new("perfguide.resource", resource.path().to_string()),
                        ];
                        with_span(telemetry, "class", &attributes, || {
                            self.analyze_class(*class, &scan)
                        })
                    })
                    .collect()
            },
        );

        let mut markers = Vec::new();
        for ((_, resource), outcome) in targets.iter().zip(outcomes) {
            stats.detector_failures += outcome.failures;
            for (detector_index, problems) in outcome.problems {
                let metadata = self.detectors[detector_index].metadata();
                for problem in problems {
                    let marker = problem.into_marker(&metadata, resource);
                    project
                        .add_marker(marker.clone())
                        .with_context(|| format!("failed to add marker to {}", resource.path()))?;
                    markers.push(marker);
                }
            }
        }
        project.flush().context("failed to persist markers")?;

        stats.duration_ms = started_at.elapsed().as_millis();
        info!(
            classes = stats.class_count,
            analyzed = stats.analyzed_class_count,
            skipped = stats.skipped_class_count,
            problems = markers.len(),
            failures = stats.detector_failures,
            "project analysis finished"
        );

        Ok(AnalysisReport {
            detectors: self.metadata(),
            markers,
            stats,
        })
    }

    fn analyze_class<'a>(&self, class: &'a Class, scan: &ScanContext<'_>) -> ClassOutcome<'a> {
        let mut outcome = ClassOutcome {
            problems: Vec::new(),
            failures: 0,
        };
        for (detector_index, detector) in self.detectors.iter().enumerate() {
            let detector_id = detector.metadata().id;
            let result = catch_unwind(AssertUnwindSafe(|| detector.analyze_class(class, scan)));
            match result {
                Ok(Ok(problems)) => {
                    if !problems.is_empty() {
                        outcome.problems.push((detector_index, problems));
                    }
                }
                Ok(Err(err)) => {
                    warn!(detector = detector_id, class = %class.name, error = %format!("{err:#}"), "detector failed; skipping");
                    outcome.failures += 1;
                }
                Err(_) => {
                    warn!(detector = detector_id, class = %class.name, "detector panicked; skipping");
                    outcome.failures += 1;
                }
            }
        }
        outcome
    }
}

fn clear_markers(project: &mut dyn Project, retry: RetryPolicy) -> Result<()> {
    let max_attempts = retry.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match project.clear_markers() {
            Ok(()) => return Ok(()),
            Err(err) if attempt >= max_attempts => {
                return Err(err.context(format!("failed to clear markers after {attempt} attempts")));
            }
            Err(err) => {
                warn!(attempt, error = %format!("{err:#}"), "failed to clear markers; retrying");
                thread::sleep(retry.backoff);
                attempt += 1;
            }
        }
    }
}

pub(crate) fn detector_descriptor(metadata: &DetectorMetadata) -> ReportingDescriptor {
    ReportingDescriptor::builder()
        .id(metadata.id)
        .name(metadata.title)
        .short_description(
            MultiformatMessageString::builder()
                .text(metadata.description)
                .build(),
        )
        .build()
}
