use std::fs::File;
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::compute::concat_batches;
use arrow::datatypes::{Schema, SchemaRef};
use arrow::record_batch::{RecordBatch, RecordBatchOptions};
use indexmap::IndexMap;
use log::{debug, info};
use parquet::arrow::arrow_reader::{
    ArrowReaderMetadata, ArrowReaderOptions, ParquetRecordBatchReaderBuilder, RowSelection,
    RowSelector,
};
use parquet::arrow::{ArrowWriter, ProjectionMask};
use parquet::file::properties::WriterProperties;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::model::{column_index, Compression};
use crate::error::{Error, Result};

const GROUP_EXT: &str = "parquet";
const ATTRS_FILE: &str = "attrs.json";

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// File-level and per-group attributes, stored as `attrs.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attrs {
    #[serde(default)]
    pub file: IndexMap<String, JsonValue>,
    #[serde(default)]
    pub groups: IndexMap<String, IndexMap<String, JsonValue>>,
}

impl Attrs {
    pub fn get(&self, name: &str, group: Option<&str>) -> Option<&JsonValue> {
        match group {
            None => self.file.get(name),
            Some(g) => self.groups.get(g).and_then(|attrs| attrs.get(name)),
        }
    }

    pub fn set(&mut self, name: &str, value: JsonValue, group: Option<&str>) {
        match group {
            None => self.file.insert(name.to_string(), value),
            Some(g) => self
                .groups
                .entry(g.to_string())
                .or_default()
                .insert(name.to_string(), value),
        };
    }
}

// ---------------------------------------------------------------------------
// Container – read side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct GroupMeta {
    file: PathBuf,
    metadata: ArrowReaderMetadata,
    num_rows: usize,
}

/// A directory with one Parquet file per group plus `attrs.json`.
///
/// Footers are read once on open; slices open the group file read-only, so a
/// container can back any number of readers.
#[derive(Debug, Clone)]
pub struct Container {
    path: PathBuf,
    groups: IndexMap<String, GroupMeta>,
    attrs: Attrs,
}

impl Container {
    pub fn open(path: &Path) -> Result<Self> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|e| e == GROUP_EXT))
            .collect();
        files.sort();

        let mut groups = IndexMap::new();
        for file in files {
            let Some(name) = file.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let handle = File::open(&file)?;
            let metadata = ArrowReaderMetadata::load(&handle, ArrowReaderOptions::new())?;
            let num_rows = metadata.metadata().file_metadata().num_rows() as usize;
            groups.insert(
                name.to_string(),
                GroupMeta {
                    file,
                    metadata,
                    num_rows,
                },
            );
        }

        let attrs_path = path.join(ATTRS_FILE);
        let attrs = if attrs_path.is_file() {
            serde_json::from_str(&std::fs::read_to_string(&attrs_path)?)?
        } else {
            Attrs::default()
        };

        debug!(
            "opened container {} with groups [{}]",
            path.display(),
            groups.keys().cloned().collect::<Vec<_>>().join(", ")
        );
        Ok(Container {
            path: path.to_path_buf(),
            groups,
            attrs,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    fn group(&self, group: &str) -> Result<&GroupMeta> {
        self.groups
            .get(group)
            .ok_or_else(|| Error::MissingGroup(group.to_string()))
    }

    pub fn num_rows(&self, group: &str) -> Result<usize> {
        Ok(self.group(group)?.num_rows)
    }

    pub fn schema(&self, group: &str) -> Result<SchemaRef> {
        Ok(self.group(group)?.metadata.schema().clone())
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    pub fn attr(&self, name: &str, group: Option<&str>) -> Option<&JsonValue> {
        self.attrs.get(name, group)
    }

    /// Read `rows` of `group`, clamped to the group length. `columns` are
    /// returned in the requested order; `None` reads every column.
    pub fn read_slice(
        &self,
        group: &str,
        rows: Range<usize>,
        columns: Option<&[String]>,
    ) -> Result<RecordBatch> {
        let meta = self.group(group)?;
        let full = meta.metadata.schema();
        let end = rows.end.min(meta.num_rows);
        let start = rows.start.min(end);
        let len = end - start;

        let wanted: Vec<usize> = match columns {
            Some(cols) => cols
                .iter()
                .map(|c| column_index(full, c))
                .collect::<Result<_>>()?,
            None => (0..full.fields().len()).collect(),
        };
        if wanted.is_empty() {
            let options = RecordBatchOptions::new().with_row_count(Some(len));
            return Ok(RecordBatch::try_new_with_options(
                Arc::new(Schema::empty()),
                vec![],
                &options,
            )?);
        }

        let mut sorted = wanted.clone();
        sorted.sort_unstable();
        sorted.dedup();
        let projected = Arc::new(full.project(&sorted)?);
        if len == 0 {
            return reorder(RecordBatch::new_empty(projected), &wanted, &sorted);
        }

        let mut selectors = Vec::with_capacity(2);
        if start > 0 {
            selectors.push(RowSelector::skip(start));
        }
        selectors.push(RowSelector::select(len));

        let file = File::open(&meta.file)?;
        let builder = ParquetRecordBatchReaderBuilder::new_with_metadata(file, meta.metadata.clone());
        let mask = ProjectionMask::roots(builder.parquet_schema(), sorted.iter().copied());
        let reader = builder
            .with_projection(mask)
            .with_row_selection(RowSelection::from(selectors))
            .with_batch_size(len)
            .build()?;
        let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
        let batch = concat_batches(&projected, &batches)?;
        reorder(batch, &wanted, &sorted)
    }
}

/// Project a batch read in file order (`sorted`) back to request order.
fn reorder(batch: RecordBatch, wanted: &[usize], sorted: &[usize]) -> Result<RecordBatch> {
    if wanted == sorted {
        return Ok(batch);
    }
    let positions: Vec<usize> = wanted
        .iter()
        .map(|w| sorted.partition_point(|s| s < w))
        .collect();
    Ok(batch.project(&positions)?)
}

// ---------------------------------------------------------------------------
// ContainerWriter – write side
// ---------------------------------------------------------------------------

struct GroupWriter {
    writer: ArrowWriter<File>,
    schema: SchemaRef,
    cursor: usize,
}

/// Append-only writer for a container. Each group is a Parquet file written
/// front to back; `close` finalizes the files and writes `attrs.json`.
pub struct ContainerWriter {
    path: PathBuf,
    groups: IndexMap<String, GroupWriter>,
    attrs: Attrs,
}

impl ContainerWriter {
    /// Create the container directory, removing group files and attributes
    /// left by a previous container at the same path.
    pub fn create(path: &Path) -> Result<Self> {
        if path.is_dir() {
            for entry in std::fs::read_dir(path)? {
                let file = entry?.path();
                let is_group = file.extension().is_some_and(|e| e == GROUP_EXT);
                if is_group || file.file_name().is_some_and(|n| n == ATTRS_FILE) {
                    std::fs::remove_file(&file)?;
                }
            }
        } else {
            std::fs::create_dir_all(path)?;
        }
        info!("creating container {}", path.display());
        Ok(ContainerWriter {
            path: path.to_path_buf(),
            groups: IndexMap::new(),
            attrs: Attrs::default(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn create_group(
        &mut self,
        group: &str,
        schema: SchemaRef,
        compression: Compression,
    ) -> Result<()> {
        let file = File::create(self.path.join(format!("{group}.{GROUP_EXT}")))?;
        let props = WriterProperties::builder()
            .set_compression(compression.into())
            .build();
        let writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;
        self.groups.insert(
            group.to_string(),
            GroupWriter {
                writer,
                schema,
                cursor: 0,
            },
        );
        Ok(())
    }

    fn group_mut(&mut self, group: &str) -> Result<&mut GroupWriter> {
        self.groups
            .get_mut(group)
            .ok_or_else(|| Error::MissingGroup(group.to_string()))
    }

    pub fn schema(&self, group: &str) -> Result<SchemaRef> {
        self.groups
            .get(group)
            .map(|g| g.schema.clone())
            .ok_or_else(|| Error::MissingGroup(group.to_string()))
    }

    pub fn cursor(&self, group: &str) -> Result<usize> {
        self.groups
            .get(group)
            .map(|g| g.cursor)
            .ok_or_else(|| Error::MissingGroup(group.to_string()))
    }

    /// Append `batch` at the group cursor.
    pub fn write_slice(&mut self, group: &str, batch: &RecordBatch) -> Result<()> {
        let g = self.group_mut(group)?;
        g.writer.write(batch)?;
        g.cursor += batch.num_rows();
        Ok(())
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<JsonValue>, group: Option<&str>) {
        self.attrs.set(name, value.into(), group);
    }

    pub fn attrs(&self) -> &Attrs {
        &self.attrs
    }

    /// Finalize every group file and write the attributes. Groups end at
    /// their cursor; the final row count of each is returned.
    pub fn close(self) -> Result<IndexMap<String, usize>> {
        let mut lengths = IndexMap::with_capacity(self.groups.len());
        for (name, g) in self.groups {
            let rows = g.cursor;
            g.writer.close()?;
            debug!("closed group '{name}' with {rows} rows");
            lengths.insert(name, rows);
        }
        let attrs = serde_json::to_string_pretty(&self.attrs)?;
        std::fs::write(self.path.join(ATTRS_FILE), attrs)?;
        info!("closed container {}", self.path.display());
        Ok(lengths)
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::{Array, Float32Array, Int32Array};
    use arrow::datatypes::{DataType, Field};

    use super::*;

    fn batch(offset: i32, n: i32) -> RecordBatch {
        let schema = Schema::new(vec![
            Field::new("a", DataType::Int32, false),
            Field::new("b", DataType::Float32, false),
            Field::new("c", DataType::Int32, false),
        ]);
        RecordBatch::try_new(
            Arc::new(schema),
            vec![
                Arc::new(Int32Array::from_iter_values(offset..offset + n)),
                Arc::new(Float32Array::from_iter_values(
                    (offset..offset + n).map(|i| i as f32 * 0.5),
                )),
                Arc::new(Int32Array::from_iter_values((offset..offset + n).map(|i| -i))),
            ],
        )
        .unwrap()
    }

    fn write(dir: &Path) {
        let mut w = ContainerWriter::create(dir).unwrap();
        w.create_group("jets", batch(0, 1).schema(), Compression::Snappy)
            .unwrap();
        w.write_slice("jets", &batch(0, 5)).unwrap();
        w.write_slice("jets", &batch(5, 5)).unwrap();
        w.set_attr("config", "mock", None);
        w.set_attr("shape", vec![10], Some("jets"));
        w.close().unwrap();
    }

    #[test]
    fn slices_and_projection() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path());
        let c = Container::open(dir.path()).unwrap();
        assert_eq!(c.groups().collect::<Vec<_>>(), vec!["jets"]);
        assert_eq!(c.num_rows("jets").unwrap(), 10);

        let cols = vec!["c".to_string(), "a".to_string()];
        let slice = c.read_slice("jets", 3..7, Some(cols.as_slice())).unwrap();
        assert_eq!(slice.num_rows(), 4);
        assert_eq!(slice.schema().field(0).name(), "c");
        let a = slice
            .column(1)
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        assert_eq!(a.values().to_vec(), vec![3, 4, 5, 6]);

        let clamped = c.read_slice("jets", 8..100, None).unwrap();
        assert_eq!(clamped.num_rows(), 2);
        assert_eq!(clamped.num_columns(), 3);
        assert_eq!(c.read_slice("jets", 20..30, None).unwrap().num_rows(), 0);

        let missing = vec!["zzz".to_string()];
        assert!(matches!(
            c.read_slice("jets", 0..1, Some(missing.as_slice())),
            Err(Error::MissingColumn { .. })
        ));
        assert!(matches!(c.num_rows("tracks"), Err(Error::MissingGroup(_))));
    }

    #[test]
    fn attributes_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path());
        let c = Container::open(dir.path()).unwrap();
        assert_eq!(c.attr("config", None), Some(&JsonValue::from("mock")));
        assert_eq!(
            c.attr("shape", Some("jets")),
            Some(&serde_json::json!([10]))
        );
        assert_eq!(c.attr("shape", None), None);
    }

    #[test]
    fn close_reports_cursors() {
        let dir = tempfile::tempdir().unwrap();
        let mut w = ContainerWriter::create(dir.path()).unwrap();
        w.create_group("jets", batch(0, 1).schema(), Compression::None)
            .unwrap();
        w.create_group("empty", batch(0, 1).schema(), Compression::None)
            .unwrap();
        w.write_slice("jets", &batch(0, 3)).unwrap();
        w.write_slice("jets", &batch(3, 4)).unwrap();
        assert_eq!(w.cursor("jets").unwrap(), 7);
        assert!(matches!(w.cursor("tracks"), Err(Error::MissingGroup(_))));

        let lengths = w.close().unwrap();
        assert_eq!(
            lengths.into_iter().collect::<Vec<_>>(),
            vec![("jets".to_string(), 7), ("empty".to_string(), 0)]
        );
        let c = Container::open(dir.path()).unwrap();
        assert_eq!(c.num_rows("jets").unwrap(), 7);
        assert_eq!(c.num_rows("empty").unwrap(), 0);
    }

    #[test]
    fn create_replaces_previous_container() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path());
        let w = ContainerWriter::create(dir.path()).unwrap();
        w.close().unwrap();
        let c = Container::open(dir.path()).unwrap();
        assert_eq!(c.groups().count(), 0);
    }
}
