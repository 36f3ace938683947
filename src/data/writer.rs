use std::path::{Path, PathBuf};

use arrow::array::UInt32Array;
use arrow::compute::take_record_batch;
use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::model::{
    cast_batch, group_trailing, same_columns, storage_schema, Compression, NamedBatch, Precision,
    RowCount, Shape, Variables,
};
use super::reader::Reader;
use super::storage::{Container, ContainerWriter};
use crate::error::{Error, Result};

const WRITER_NAME: &str = env!("CARGO_PKG_NAME");
const WRITER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Storage width of every float column; `None` keeps the batch width.
    pub precision: Option<Precision>,
    /// Per-column widths, taking priority over `precision`.
    pub precision_overrides: IndexMap<String, Precision>,
    /// Permute the rows of each written batch, identically for all groups.
    pub shuffle: bool,
    pub seed: u64,
    pub compression: Compression,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            precision: None,
            precision_overrides: IndexMap::new(),
            shuffle: true,
            seed: 42,
            compression: Compression::default(),
        }
    }
}

impl WriterConfig {
    pub fn with_precision(mut self, precision: Precision) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_precision_override(mut self, column: impl Into<String>, p: Precision) -> Self {
        self.precision_overrides.insert(column.into(), p);
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }
}

#[derive(Debug, Clone)]
struct OutputGroup {
    /// Schema of incoming batches.
    input: SchemaRef,
    /// Schema on disk, after the precision casts.
    stored: SchemaRef,
    shape: Shape,
}

/// Chunked writer into a new container.
///
/// Groups are declared up front with their schema and [`Shape`]. Batches of
/// any length are appended with [`Writer::write`]; [`Writer::close`] trims
/// placeholder groups to the rows written and stamps provenance attributes.
/// The writer is single use: every call after `close` fails.
pub struct Writer {
    path: PathBuf,
    inner: Option<ContainerWriter>,
    groups: IndexMap<String, OutputGroup>,
    config: WriterConfig,
    rng: fastrand::Rng,
    written: usize,
}

impl Writer {
    pub fn create(
        dst: &Path,
        dtypes: &IndexMap<String, SchemaRef>,
        shapes: &IndexMap<String, Shape>,
        config: WriterConfig,
    ) -> Result<Self> {
        if let Some(extra) = shapes.keys().find(|g| !dtypes.contains_key(*g)) {
            return Err(Error::shape(extra, "shape declared without a dtype"));
        }
        let mut inner = ContainerWriter::create(dst)?;
        let mut groups = IndexMap::with_capacity(dtypes.len());
        for (group, schema) in dtypes {
            let shape = shapes
                .get(group)
                .cloned()
                .ok_or_else(|| Error::shape(group, "dtype declared without a shape"))?;
            let trailing = group_trailing(group, schema)?;
            if trailing != shape.trailing {
                return Err(Error::shape(
                    group,
                    format!("declared trailing dims {:?}, dtype has {trailing:?}", shape.trailing),
                ));
            }
            let stored = storage_schema(schema, config.precision, &config.precision_overrides);
            inner.create_group(group, stored.clone(), config.compression)?;
            debug!("declared group '{group}' with shape {:?}", shape);
            groups.insert(
                group.clone(),
                OutputGroup {
                    input: schema.clone(),
                    stored,
                    shape,
                },
            );
        }
        Ok(Writer {
            path: dst.to_path_buf(),
            inner: Some(inner),
            groups,
            rng: fastrand::Rng::with_seed(config.seed),
            config,
            written: 0,
        })
    }

    /// Declare groups for what `reader` yields for `variables`, with
    /// placeholder shapes of `num_jets` rows, and copy the attributes of
    /// the reader's first source.
    pub fn from_reader(
        reader: &Reader,
        variables: &Variables,
        dst: &Path,
        num_jets: usize,
        config: WriterConfig,
    ) -> Result<Self> {
        let dtypes = reader.dtypes(variables)?;
        let mut shapes = IndexMap::with_capacity(dtypes.len());
        for (group, schema) in &dtypes {
            let trailing = group_trailing(group, schema)?;
            shapes.insert(group.clone(), Shape::placeholder(num_jets, trailing));
        }
        let mut writer = Writer::create(dst, &dtypes, &shapes, config)?;
        if let Some(source) = reader.view().containers().first() {
            writer.copy_attrs(source)?;
        }
        Ok(writer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    /// Rows written so far.
    pub fn num_written(&self) -> usize {
        self.written
    }

    fn inner_mut(&mut self) -> Result<&mut ContainerWriter> {
        self.inner.as_mut().ok_or(Error::WriterClosed)
    }

    fn check_batch(&self, group: &str, batch: &RecordBatch) -> Result<()> {
        let declared = &self.groups[group];
        if !same_columns(&declared.input, &batch.schema()) {
            let found: Vec<String> = batch
                .schema()
                .fields()
                .iter()
                .map(|f| format!("{}: {}", f.name(), f.data_type()))
                .collect();
            return Err(Error::shape(
                group,
                format!("batch columns [{}] do not match the declared dtype", found.join(", ")),
            ));
        }
        Ok(())
    }

    /// Append one batch. Every declared group must be present with the
    /// declared columns; other groups of `batch` are ignored.
    pub fn write(&mut self, batch: &NamedBatch) -> Result<()> {
        let inner = self.inner.as_ref().ok_or(Error::WriterClosed)?;
        batch.check_aligned()?;
        let rows = batch.len();
        for (group, declared) in &self.groups {
            let b = batch.get(group)?;
            self.check_batch(group, b)?;
            if let RowCount::Exact(limit) = declared.shape.rows {
                let cursor = inner.cursor(group)?;
                if cursor + rows > limit {
                    return Err(Error::shape(
                        group,
                        format!("writing {rows} rows at {cursor} exceeds the declared {limit}"),
                    ));
                }
            }
        }

        let order = if self.config.shuffle && rows > 1 {
            let mut idx: Vec<u32> = (0..rows as u32).collect();
            self.rng.shuffle(&mut idx);
            Some(UInt32Array::from(idx))
        } else {
            None
        };

        let mut prepared = Vec::with_capacity(self.groups.len());
        for (group, declared) in &self.groups {
            let mut b = batch.get(group)?.clone();
            if let Some(order) = &order {
                b = take_record_batch(&b, order)?;
            }
            let b = cast_batch(
                &b,
                self.config.precision,
                &self.config.precision_overrides,
            )?;
            let b = RecordBatch::try_new(declared.stored.clone(), b.columns().to_vec())?;
            prepared.push((group.clone(), b));
        }
        let inner = self.inner_mut()?;
        for (group, b) in &prepared {
            inner.write_slice(group, b)?;
        }
        self.written += rows;
        Ok(())
    }

    pub fn add_attr(
        &mut self,
        name: &str,
        value: impl Into<JsonValue>,
        group: Option<&str>,
    ) -> Result<()> {
        self.inner_mut()?.set_attr(name, value, group);
        Ok(())
    }

    /// Copy file attributes, and the attributes of declared groups, from
    /// `source`.
    pub fn copy_attrs(&mut self, source: &Container) -> Result<()> {
        let attrs = source.attrs().clone();
        let declared: Vec<String> = self.groups.keys().cloned().collect();
        let inner = self.inner_mut()?;
        for (name, value) in attrs.file {
            inner.set_attr(&name, value, None);
        }
        for (group, values) in attrs.groups {
            if !declared.contains(&group) {
                continue;
            }
            for (name, value) in values {
                inner.set_attr(&name, value, Some(&group));
            }
        }
        Ok(())
    }

    /// End every group at its cursor, stamp the `shape`, `writer` and
    /// `writer_version` attributes and finalize the container.
    ///
    /// A group declared with an exact row count that was not filled yields
    /// [`Error::IncompleteWrite`]; the container is still finalized.
    pub fn close(&mut self) -> Result<()> {
        let mut inner = self.inner.take().ok_or(Error::WriterClosed)?;
        let mut incomplete = None;
        for (group, declared) in &self.groups {
            let cursor = inner.cursor(group)?;
            let dims = declared.shape.dims(cursor);
            inner.set_attr("shape", serde_json::to_value(dims)?, Some(group));
            if let RowCount::Exact(rows) = declared.shape.rows {
                if cursor < rows && incomplete.is_none() {
                    incomplete = Some((group.clone(), cursor, rows));
                }
            }
        }
        inner.set_attr("writer", WRITER_NAME, None);
        inner.set_attr("writer_version", WRITER_VERSION, None);
        inner.close()?;
        info!("wrote {} rows to {}", self.written, self.path.display());

        match incomplete {
            Some((group, written, declared)) => Err(Error::IncompleteWrite {
                path: self.path.clone(),
                group,
                written,
                declared,
            }),
            None => Ok(()),
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        if self.inner.is_some() {
            warn!(
                "writer for {} dropped without close, the output is incomplete",
                self.path.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Float32Array, Int32Array};
    use arrow::datatypes::{DataType, Field, Schema};

    use super::*;

    fn jets(pt: Vec<f32>) -> RecordBatch {
        let schema = Schema::new(vec![Field::new("pt", DataType::Float32, true)]);
        RecordBatch::try_new(Arc::new(schema), vec![Arc::new(Float32Array::from(pt))]).unwrap()
    }

    fn declare(rows: RowCount) -> (IndexMap<String, SchemaRef>, IndexMap<String, Shape>) {
        let dtypes = IndexMap::from([("jets".to_string(), jets(vec![]).schema())]);
        let shapes = IndexMap::from([(
            "jets".to_string(),
            Shape {
                rows,
                trailing: vec![],
            },
        )]);
        (dtypes, shapes)
    }

    #[test]
    fn exact_count_not_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let (dtypes, shapes) = declare(RowCount::Exact(2));
        let mut writer =
            Writer::create(&dir.path().join("out"), &dtypes, &shapes, WriterConfig::default())
                .unwrap();
        let batch = NamedBatch::new("jets").with_group("jets", jets(vec![1.0, 2.0, 3.0]));
        assert!(matches!(
            writer.write(&batch),
            Err(Error::ShapeMismatch { .. })
        ));
        assert_eq!(writer.num_written(), 0);
        writer.close().unwrap_err();
    }

    #[test]
    fn wrong_columns_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (dtypes, shapes) = declare(RowCount::Placeholder(10));
        let mut writer =
            Writer::create(&dir.path().join("out"), &dtypes, &shapes, WriterConfig::default())
                .unwrap();
        let schema = Schema::new(vec![Field::new("pt", DataType::Int32, true)]);
        let ints = RecordBatch::try_new(
            Arc::new(schema),
            vec![Arc::new(Int32Array::from(vec![1, 2]))],
        )
        .unwrap();
        let batch = NamedBatch::new("jets").with_group("jets", ints);
        assert!(matches!(
            writer.write(&batch),
            Err(Error::ShapeMismatch { .. })
        ));
        writer.close().unwrap();
    }

    #[test]
    fn shape_without_dtype() {
        let dir = tempfile::tempdir().unwrap();
        let (dtypes, mut shapes) = declare(RowCount::Placeholder(10));
        shapes.insert("tracks".into(), Shape::placeholder(10, vec![40]));
        assert!(matches!(
            Writer::create(&dir.path().join("out"), &dtypes, &shapes, WriterConfig::default()),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn calls_after_close() {
        let dir = tempfile::tempdir().unwrap();
        let (dtypes, shapes) = declare(RowCount::Placeholder(10));
        let mut writer =
            Writer::create(&dir.path().join("out"), &dtypes, &shapes, WriterConfig::default())
                .unwrap();
        writer.close().unwrap();
        assert!(writer.is_closed());
        let batch = NamedBatch::new("jets").with_group("jets", jets(vec![1.0]));
        assert!(matches!(writer.write(&batch), Err(Error::WriterClosed)));
        assert!(matches!(writer.close(), Err(Error::WriterClosed)));
        assert!(matches!(
            writer.add_attr("x", 1, None),
            Err(Error::WriterClosed)
        ));
    }
}
