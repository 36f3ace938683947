//! Virtual views: several containers presented as one row sequence per
//! group, addressed through a segment table instead of copying data.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::model::{column_index, same_columns};
use super::sample::Sample;
use super::storage::Container;
use crate::error::{Error, Result};

const MANIFEST_FORMAT: &str = "tagsel-vds";

// ---------------------------------------------------------------------------
// Segment table
// ---------------------------------------------------------------------------

/// Rows `start..end` of the virtual group live in container `source`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub source: usize,
    pub start: usize,
    pub end: usize,
}

impl Segment {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

#[derive(Debug, Clone)]
pub struct VirtualGroup {
    name: String,
    schema: SchemaRef,
    segments: Vec<Segment>,
}

impl VirtualGroup {
    /// Stitch `name` from every container in order. Schemas must agree with
    /// the first container's.
    fn build(name: &str, containers: &[Container]) -> Result<Self> {
        let schema = containers
            .first()
            .ok_or_else(|| Error::NoSources(name.to_string()))?
            .schema(name)?;
        let mut segments = Vec::with_capacity(containers.len());
        let mut offset = 0;
        for (source, container) in containers.iter().enumerate() {
            if !same_columns(&schema, container.schema(name)?.as_ref()) {
                return Err(Error::SchemaMismatch {
                    group: name.to_string(),
                    source_path: container.path().to_path_buf(),
                });
            }
            let rows = container.num_rows(name)?;
            if rows > 0 {
                segments.push(Segment {
                    source,
                    start: offset,
                    end: offset + rows,
                });
                offset += rows;
            }
        }
        Ok(VirtualGroup {
            name: name.to_string(),
            schema,
            segments,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.last().map_or(0, |s| s.end)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Segment index holding virtual `row`, and the row's offset within it.
    pub fn locate(&self, row: usize) -> Option<(usize, usize)> {
        let idx = self.segments.partition_point(|s| s.end <= row);
        let segment = self.segments.get(idx)?;
        Some((idx, row - segment.start))
    }

    fn read(
        &self,
        containers: &[Container],
        rows: Range<usize>,
        columns: Option<&[String]>,
    ) -> Result<RecordBatch> {
        let schema = match columns {
            Some(cols) => {
                let indices = cols
                    .iter()
                    .map(|c| column_index(&self.schema, c))
                    .collect::<Result<Vec<_>>>()?;
                Arc::new(self.schema.project(&indices)?)
            }
            None => self.schema.clone(),
        };
        let end = rows.end.min(self.len());
        let start = rows.start.min(end);
        let Some((first, _)) = self.locate(start).filter(|_| start < end) else {
            return Ok(RecordBatch::new_empty(schema));
        };

        let mut parts = Vec::new();
        for segment in self.segments[first..].iter().take_while(|s| s.start < end) {
            let low = start.max(segment.start) - segment.start;
            let high = end.min(segment.end) - segment.start;
            parts.push(containers[segment.source].read_slice(&self.name, low..high, columns)?);
        }
        if parts.len() == 1 {
            return Ok(parts.remove(0));
        }
        Ok(concat_batches(&schema, &parts)?)
    }
}

// ---------------------------------------------------------------------------
// VirtualView – merged view over containers
// ---------------------------------------------------------------------------

/// Groups common to every source, each stitched into one sequence.
#[derive(Debug, Clone)]
pub struct VirtualView {
    containers: Vec<Container>,
    groups: IndexMap<String, VirtualGroup>,
}

impl VirtualView {
    pub fn open(sources: &[PathBuf]) -> Result<Self> {
        let containers = sources
            .iter()
            .map(|p| Container::open(p))
            .collect::<Result<Vec<_>>>()?;
        Self::from_containers(containers)
    }

    pub fn from_containers(containers: Vec<Container>) -> Result<Self> {
        let Some(first) = containers.first() else {
            return Err(Error::NoSources(String::from("<empty source list>")));
        };
        let mut groups = IndexMap::new();
        for name in first.groups() {
            match containers.iter().find(|c| !c.has_group(name)) {
                Some(missing) => warn!(
                    "group '{name}' is absent from {}, dropping it from the merged view",
                    missing.path().display()
                ),
                None => {
                    groups.insert(name.to_string(), VirtualGroup::build(name, &containers)?);
                }
            }
        }
        for c in &containers[1..] {
            for name in c.groups().filter(|g| !groups.contains_key(*g) && !first.has_group(g)) {
                warn!(
                    "group '{name}' of {} is absent from {}, dropping it from the merged view",
                    c.path().display(),
                    first.path().display()
                );
            }
        }
        debug!(
            "merged {} source(s) into groups [{}]",
            containers.len(),
            groups.keys().cloned().collect::<Vec<_>>().join(", ")
        );
        Ok(VirtualView { containers, groups })
    }

    pub fn containers(&self) -> &[Container] {
        &self.containers
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    pub fn group(&self, group: &str) -> Result<&VirtualGroup> {
        self.groups
            .get(group)
            .ok_or_else(|| Error::MissingGroup(group.to_string()))
    }

    pub fn num_rows(&self, group: &str) -> Result<usize> {
        Ok(self.group(group)?.len())
    }

    pub fn schema(&self, group: &str) -> Result<SchemaRef> {
        Ok(self.group(group)?.schema())
    }

    /// Read virtual rows of `group`, crossing source boundaries as needed.
    pub fn read(
        &self,
        group: &str,
        rows: Range<usize>,
        columns: Option<&[String]>,
    ) -> Result<RecordBatch> {
        self.group(group)?.read(&self.containers, rows, columns)
    }

    /// First value of a group attribute across the sources, in source order.
    pub fn first_attr(&self, name: &str, group: Option<&str>) -> Option<&JsonValue> {
        self.containers.iter().find_map(|c| c.attr(name, group))
    }
}

// ---------------------------------------------------------------------------
// Manifest – the on-disk virtual file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestGroup {
    /// Row count contributed by each source, in source order.
    pub lengths: Vec<usize>,
    #[serde(default)]
    pub attrs: IndexMap<String, JsonValue>,
}

impl ManifestGroup {
    pub fn total(&self) -> usize {
        self.lengths.iter().sum()
    }
}

/// JSON file listing the containers of a merged dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format: String,
    pub sources: Vec<PathBuf>,
    pub groups: IndexMap<String, ManifestGroup>,
}

impl Manifest {
    pub fn is_manifest(path: &Path) -> bool {
        path.is_file() && path.extension().is_some_and(|e| e == "json")
    }

    /// Load a manifest; relative sources are taken relative to its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let mut manifest: Manifest = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        for source in &mut manifest.sources {
            if source.is_relative() {
                *source = base.join(&*source);
            }
        }
        Ok(manifest)
    }

    fn from_view(view: &VirtualView) -> Result<Self> {
        let mut sources = Vec::with_capacity(view.containers().len());
        for c in view.containers() {
            sources.push(std::fs::canonicalize(c.path())?);
        }
        let mut groups = IndexMap::new();
        for name in view.groups() {
            let mut attrs = IndexMap::new();
            for c in view.containers() {
                if let Some(group_attrs) = c.attrs().groups.get(name) {
                    for (k, v) in group_attrs {
                        attrs.entry(k.clone()).or_insert_with(|| v.clone());
                    }
                }
            }
            let lengths = view
                .containers()
                .iter()
                .map(|c| c.num_rows(name))
                .collect::<Result<Vec<_>>>()?;
            groups.insert(name.to_string(), ManifestGroup { lengths, attrs });
        }
        Ok(Manifest {
            format: MANIFEST_FORMAT.to_string(),
            sources,
            groups,
        })
    }

    pub fn num_rows(&self, group: &str) -> Result<usize> {
        self.groups
            .get(group)
            .map(ManifestGroup::total)
            .ok_or_else(|| Error::MissingGroup(group.to_string()))
    }
}

/// Write a manifest merging every container matching `pattern`.
///
/// Defaults to `<parent of first match>/vds/vds.json`. An existing manifest
/// is returned untouched unless `overwrite` is set.
pub fn create_virtual_file(
    pattern: &str,
    output: Option<&Path>,
    overwrite: bool,
) -> Result<PathBuf> {
    let files = Sample::new(pattern).files()?;
    let first = files
        .first()
        .ok_or_else(|| Error::NoSources(pattern.to_string()))?;
    let output = match output {
        Some(p) => p.to_path_buf(),
        None => first
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join("vds")
            .join("vds.json"),
    };
    if !overwrite && output.is_file() {
        debug!("reusing virtual file {}", output.display());
        return Ok(output);
    }

    let manifest = Manifest::from_view(&VirtualView::open(&files)?)?;
    if let Some(parent) = output.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&output, serde_json::to_string_pretty(&manifest)?)?;
    info!(
        "wrote virtual file {} over {} source(s)",
        output.display(),
        manifest.sources.len()
    );
    Ok(output)
}
