use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Source file extension used when the host does not configure one.
pub(crate) const DEFAULT_SOURCE_EXTENSION: &str = ".java";

const MARKER_STORE_VERSION: u32 = 1;

/// Opaque handle to a source resource owned by the project.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub(crate) struct ResourceHandle {
    path: String,
}

impl ResourceHandle {
    pub(crate) fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub(crate) fn path(&self) -> &str {
        &self.path
    }
}

/// Persisted, located report of one problem.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub(crate) struct Marker {
    pub(crate) detector_id: String,
    pub(crate) title: String,
    pub(crate) description: String,
    pub(crate) message: String,
    pub(crate) resource: ResourceHandle,
    pub(crate) logical_location: String,
    pub(crate) offset: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) line: Option<u32>,
}

/// Host project: source lookup and marker persistence.
pub(crate) trait Project {
    /// Extension appended to a class path to find its source, e.g. `.java`.
    fn source_extension(&self) -> &str;

    /// Resolve a source-root relative path to a resource, if it exists.
    fn find_source(&self, relative_path: &str) -> Option<ResourceHandle>;

    /// Remove every marker created by earlier scans.
    fn clear_markers(&mut self) -> Result<()>;

    fn add_marker(&mut self, marker: Marker) -> Result<()>;

    /// Persist markers added since the last flush.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Source path of the top-level class that defines `class_name`.
///
/// Nested classes live in their outer class's source file, so the name is
/// cut at the last `$` before the extension is appended.
pub(crate) fn source_path_for_class(class_name: &str, extension: &str) -> String {
    let top_level = match class_name.rfind('$') {
        Some(index) => &class_name[..index],
        None => class_name,
    };
    format!("{top_level}{extension}")
}

/// Project rooted on the filesystem with a JSON marker store.
pub(crate) struct FsProject {
    source_root: PathBuf,
    source_extension: String,
    marker_store: PathBuf,
    markers: Vec<Marker>,
}

/// On-disk layout of the marker store.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MarkerStore {
    version: u32,
    markers: Vec<Marker>,
}

impl FsProject {
    /// Open a project, loading markers left by a previous scan.
    pub(crate) fn open(
        source_root: impl Into<PathBuf>,
        source_extension: impl Into<String>,
        marker_store: impl Into<PathBuf>,
    ) -> Result<Self> {
        let marker_store = marker_store.into();
        let markers = load_markers(&marker_store)?;
        Ok(Self {
            source_root: source_root.into(),
            source_extension: normalize_extension(source_extension.into()),
            marker_store,
            markers,
        })
    }

    pub(crate) fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Filesystem path of a resource handed out by this project.
    pub(crate) fn resource_path(&self, resource: &ResourceHandle) -> PathBuf {
        self.source_root.join(resource.path())
    }
}

impl Project for FsProject {
    fn source_extension(&self) -> &str {
        &self.source_extension
    }

    fn find_source(&self, relative_path: &str) -> Option<ResourceHandle> {
        if relative_path.is_empty() || !self.source_root.is_dir() {
            return None;
        }
        let path = self.source_root.join(relative_path);
        if path.is_file() {
            Some(ResourceHandle::new(relative_path))
        } else {
            None
        }
    }

    fn clear_markers(&mut self) -> Result<()> {
        if self.marker_store.exists() {
            fs::remove_file(&self.marker_store).with_context(|| {
                format!("failed to remove marker store {}", self.marker_store.display())
            })?;
        }
        self.markers.clear();
        Ok(())
    }

    fn add_marker(&mut self, marker: Marker) -> Result<()> {
        self.markers.push(marker);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(parent) = self.marker_store.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }
        let store = MarkerStore {
            version: MARKER_STORE_VERSION,
            markers: self.markers.clone(),
        };
        let json =
            serde_json::to_string_pretty(&store).context("failed to serialize marker store")?;
        fs::write(&self.marker_store, format!("{json}\n")).with_context(|| {
            format!("failed to write marker store {}", self.marker_store.display())
        })?;
        Ok(())
    }
}

fn normalize_extension(extension: String) -> String {
    if extension.is_empty() || extension.starts_with('.') {
        extension
    } else {
        format!(".{extension}")
    }
}

fn load_markers(path: &Path) -> Result<Vec<Marker>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read marker store {}", path.display()))?;
    let deserializer = &mut serde_json::Deserializer::from_str(&content);
    let store: MarkerStore = serde_path_to_error::deserialize(deserializer)
        .with_context(|| format!("failed to parse marker store {}", path.display()))?;
    if store.version != MARKER_STORE_VERSION {
        anyhow::bail!(
            "unsupported marker store version {} in {}",
            store.version,
            path.display()
        );
    }
    Ok(store.markers)
}
