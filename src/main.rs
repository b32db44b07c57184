mod class_index;
mod descriptor;
mod detectors;
mod engine;
mod ir;
mod opcodes;
mod project;
mod scan;
mod telemetry;
#[cfg(test)]
mod test_harness;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use opentelemetry::KeyValue;
use serde_json::json;
use serde_sarif::sarif::{
    Artifact, ArtifactLocation, Invocation, Location, LogicalLocation, Message, PhysicalLocation,
    PropertyBag, Region, ReportingDescriptor, Result as SarifResult, Run, SCHEMA_URL, Sarif, Tool,
    ToolComponent,
};
use tracing::{info, warn};

use crate::detectors::DetectorMetadata;
use crate::engine::{Engine, ScanStats, detector_descriptor};
use crate::project::{DEFAULT_SOURCE_EXTENSION, FsProject, Marker};
use crate::scan::scan_inputs;
use crate::telemetry::{Telemetry, init_logging, with_span};

/// CLI arguments for perfguide execution.
#[derive(Parser, Debug)]
#[command(
    name = "perfguide",
    about = "Report performance guideline violations in JVM class files and JAR files as SARIF.",
    version
)]
struct Cli {
    /// Class file, directory or JAR to analyze.
    #[arg(long, value_name = "PATH")]
    input: PathBuf,
    /// Additional class files, directories or JARs used as context.
    #[arg(long, value_name = "PATH")]
    classpath: Vec<PathBuf>,
    /// Root directory that source files are resolved against.
    #[arg(long, value_name = "PATH", default_value = "src")]
    source_root: PathBuf,
    #[arg(long, value_name = "EXT", default_value = DEFAULT_SOURCE_EXTENSION)]
    source_extension: String,
    /// JSON file holding markers from the last scan.
    #[arg(long, value_name = "PATH", default_value = ".perfguide/markers.json")]
    markers: PathBuf,
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
    #[arg(long)]
    quiet: bool,
    #[arg(long)]
    timing: bool,
    /// OTLP HTTP endpoint for trace export.
    #[arg(long, value_name = "URL")]
    otel: Option<String>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet);
    let telemetry = match &cli.otel {
        Some(endpoint) => Some(Arc::new(Telemetry::new(endpoint.clone())?)),
        None => None,
    };
    let result = run(&cli, telemetry.clone());
    if let Some(telemetry) = telemetry {
        if let Err(err) = telemetry.shutdown() {
            warn!(error = %format!("{err:#}"), "failed to flush telemetry");
        }
    }
    result
}

fn run(cli: &Cli, telemetry: Option<Arc<Telemetry>>) -> Result<()> {
    if !cli.input.exists() {
        anyhow::bail!("input not found: {}", cli.input.display());
    }
    for entry in &cli.classpath {
        if !entry.exists() {
            anyhow::bail!("classpath entry not found: {}", entry.display());
        }
    }

    let started_at = Instant::now();
    let scan_started_at = Instant::now();
    let scan = with_span(
        telemetry.as_deref(),
        "scan",
        &[KeyValue::new("perfguide.phase", "scan")],
        || scan_inputs(&cli.input, &cli.classpath, telemetry.as_deref()),
    )?;
    let scan_duration_ms = scan_started_at.elapsed().as_millis();

    let mut project = FsProject::open(&cli.source_root, &cli.source_extension, &cli.markers)
        .context("failed to open project")?;
    let engine = Engine::new().with_telemetry(telemetry);
    let report = engine.analyze_project(&mut project, &scan.classes)?;
    info!(
        markers = project.markers().len(),
        store = %cli.markers.display(),
        "marker store updated"
    );

    let artifact_count = scan.artifacts.len();
    let invocation = build_invocation(&InvocationStats {
        scan_duration_ms,
        artifact_count,
        scan: report.stats.clone(),
    });
    let results = build_results(&project, &report.markers);
    let sarif = build_sarif(scan.artifacts, invocation, build_rules(&report.detectors), results);

    let mut writer = output_writer(cli.output.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &sarif)
        .context("failed to serialize SARIF output")?;
    writer
        .write_all(b"\n")
        .context("failed to write SARIF output")?;

    if cli.timing && !cli.quiet {
        eprintln!(
            "timing: total_ms={} scan_ms={} analysis_ms={} classes={} analyzed={} problems={}",
            started_at.elapsed().as_millis(),
            scan_duration_ms,
            report.stats.duration_ms,
            scan.class_count,
            report.stats.analyzed_class_count,
            report.markers.len()
        );
    }

    Ok(())
}

fn output_writer(output: Option<&Path>) -> Result<Box<dyn Write>> {
    match output {
        Some(path) if path == Path::new("-") => Ok(Box::new(io::stdout())),
        Some(path) => Ok(Box::new(
            File::create(path).with_context(|| format!("failed to open {}", path.display()))?,
        )),
        None => Ok(Box::new(io::stdout())),
    }
}

/// Metadata captured for SARIF invocation properties.
struct InvocationStats {
    scan_duration_ms: u128,
    artifact_count: usize,
    scan: ScanStats,
}

fn build_invocation(stats: &InvocationStats) -> Invocation {
    let arguments: Vec<String> = std::env::args().collect();
    let command_line = arguments.join(" ");
    let mut properties = BTreeMap::new();
    properties.insert("perfguide.scan_ms".to_string(), json!(stats.scan_duration_ms));
    properties.insert("perfguide.analysis_ms".to_string(), json!(stats.scan.duration_ms));
    properties.insert("perfguide.artifact_count".to_string(), json!(stats.artifact_count));
    properties.insert("perfguide.class_count".to_string(), json!(stats.scan.class_count));
    properties.insert(
        "perfguide.analyzed_class_count".to_string(),
        json!(stats.scan.analyzed_class_count),
    );
    properties.insert(
        "perfguide.skipped_class_count".to_string(),
        json!(stats.scan.skipped_class_count),
    );
    properties.insert(
        "perfguide.enum_type_count".to_string(),
        json!(stats.scan.enum_type_count),
    );
    properties.insert(
        "perfguide.detector_failures".to_string(),
        json!(stats.scan.detector_failures),
    );

    Invocation::builder()
        .execution_successful(true)
        .arguments(arguments)
        .command_line(command_line)
        .properties(PropertyBag::builder().additional_properties(properties).build())
        .build()
}

fn build_rules(detectors: &[DetectorMetadata]) -> Vec<ReportingDescriptor> {
    detectors.iter().map(detector_descriptor).collect()
}

fn build_results(project: &FsProject, markers: &[Marker]) -> Vec<SarifResult> {
    markers
        .iter()
        .map(|marker| {
            let uri = project
                .resource_path(&marker.resource)
                .to_string_lossy()
                .replace('\\', "/");
            SarifResult::builder()
                .rule_id(marker.detector_id.clone())
                .message(Message::builder().text(marker.message.clone()).build())
                .locations(vec![marker_location(marker, uri)])
                .build()
        })
        .collect()
}

fn marker_location(marker: &Marker, uri: String) -> Location {
    let logical = LogicalLocation::builder()
        .name(marker.logical_location.clone())
        .kind("function")
        .build();
    let artifact_location = ArtifactLocation::builder().uri(uri).build();
    let physical = match marker.line {
        Some(line) => PhysicalLocation::builder()
            .artifact_location(artifact_location)
            .region(Region::builder().start_line(line as i64).build())
            .build(),
        None => PhysicalLocation::builder()
            .artifact_location(artifact_location)
            .build(),
    };
    Location::builder()
        .logical_locations(vec![logical])
        .physical_location(physical)
        .build()
}

fn build_sarif(
    artifacts: Vec<Artifact>,
    invocation: Invocation,
    rules: Vec<ReportingDescriptor>,
    results: Vec<SarifResult>,
) -> Sarif {
    let driver = if rules.is_empty() {
        ToolComponent::builder()
            .name("perfguide")
            .version(env!("CARGO_PKG_VERSION"))
            .build()
    } else {
        ToolComponent::builder()
            .name("perfguide")
            .version(env!("CARGO_PKG_VERSION"))
            .rules(rules)
            .build()
    };
    let tool = Tool {
        driver,
        extensions: None,
        properties: None,
    };
    let run = if artifacts.is_empty() {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .build()
    } else {
        Run::builder()
            .tool(tool)
            .invocations(vec![invocation])
            .results(results)
            .artifacts(artifacts)
            .build()
    };

    Sarif::builder()
        .schema(SCHEMA_URL)
        .runs(vec![run])
        .version(json!("2.1.0"))
        .build()
}
