use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, FixedSizeListArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, FieldRef, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Name of the group that drives row selection unless configured otherwise.
pub const DEFAULT_PRIMARY: &str = "jets";

// ---------------------------------------------------------------------------
// NamedBatch – one batch of rows across several groups
// ---------------------------------------------------------------------------

/// Record batches keyed by group, all sharing the same row index.
#[derive(Debug, Clone)]
pub struct NamedBatch {
    primary: String,
    groups: IndexMap<String, RecordBatch>,
}

impl NamedBatch {
    pub fn new(primary: impl Into<String>) -> Self {
        NamedBatch {
            primary: primary.into(),
            groups: IndexMap::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>, batch: RecordBatch) -> Self {
        self.insert(group, batch);
        self
    }

    pub fn insert(&mut self, group: impl Into<String>, batch: RecordBatch) {
        self.groups.insert(group.into(), batch);
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn get(&self, group: &str) -> Result<&RecordBatch> {
        self.groups
            .get(group)
            .ok_or_else(|| Error::MissingGroup(group.to_string()))
    }

    pub fn contains(&self, group: &str) -> bool {
        self.groups.contains_key(group)
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &RecordBatch)> {
        self.groups.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Row count of the primary group, or of the first group when the
    /// primary one is absent.
    pub fn len(&self) -> usize {
        self.groups
            .get(&self.primary)
            .or_else(|| self.groups.values().next())
            .map_or(0, |b| b.num_rows())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fails with [`Error::GroupAlignment`] unless every group has the
    /// primary group's row count.
    pub fn check_aligned(&self) -> Result<()> {
        let expected = self.len();
        for (group, batch) in &self.groups {
            if batch.num_rows() != expected {
                return Err(Error::GroupAlignment {
                    group: group.clone(),
                    primary: self.primary.clone(),
                    expected,
                    actual: batch.num_rows(),
                });
            }
        }
        Ok(())
    }

    /// Apply `f` to every group.
    pub fn try_map(
        self,
        mut f: impl FnMut(&str, RecordBatch) -> Result<RecordBatch>,
    ) -> Result<Self> {
        let mut groups = IndexMap::with_capacity(self.groups.len());
        for (name, batch) in self.groups {
            let mapped = f(&name, batch)?;
            groups.insert(name, mapped);
        }
        Ok(NamedBatch {
            primary: self.primary,
            groups,
        })
    }

    /// First `n` rows of every group.
    pub fn head(mut self, n: usize) -> Self {
        for batch in self.groups.values_mut() {
            *batch = batch.slice(0, n.min(batch.num_rows()));
        }
        self
    }

    pub fn remove(&mut self, group: &str) -> Option<RecordBatch> {
        self.groups.shift_remove(group)
    }

    pub fn into_inner(self) -> IndexMap<String, RecordBatch> {
        self.groups
    }
}

// ---------------------------------------------------------------------------
// Variables – which columns to read per group
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Selection {
    /// Every column of the group.
    All,
    Columns(Vec<String>),
}

/// Requested columns per group, in request order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variables(IndexMap<String, Selection>);

impl Variables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every column of `group`.
    pub fn all(group: impl Into<String>) -> Self {
        Self::new().with_all(group)
    }

    pub fn with_all(mut self, group: impl Into<String>) -> Self {
        self.0.insert(group.into(), Selection::All);
        self
    }

    pub fn with_columns<S: Into<String>>(
        mut self,
        group: impl Into<String>,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.0.insert(
            group.into(),
            Selection::Columns(columns.into_iter().map(Into::into).collect()),
        );
        self
    }

    pub fn get(&self, group: &str) -> Option<&Selection> {
        self.0.get(group)
    }

    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Selection)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Shapes
// ---------------------------------------------------------------------------

/// Declared number of rows of an output group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowCount {
    /// Writing past it is an error, closing short of it is reported.
    Exact(usize),
    /// Upper guess; the group is trimmed to what was written on close.
    Placeholder(usize),
}

impl RowCount {
    pub fn value(&self) -> usize {
        match self {
            RowCount::Exact(n) | RowCount::Placeholder(n) => *n,
        }
    }
}

/// Shape of a group: a row count plus the per-row trailing dimensions
/// (`[]` for jets, `[40]` for 40 tracks per jet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub rows: RowCount,
    pub trailing: Vec<usize>,
}

impl Shape {
    pub fn placeholder(rows: usize, trailing: Vec<usize>) -> Self {
        Shape {
            rows: RowCount::Placeholder(rows),
            trailing,
        }
    }

    pub fn exact(rows: usize, trailing: Vec<usize>) -> Self {
        Shape {
            rows: RowCount::Exact(rows),
            trailing,
        }
    }

    /// `[rows, trailing...]`, the form stamped into container attributes.
    pub fn dims(&self, rows: usize) -> Vec<usize> {
        std::iter::once(rows).chain(self.trailing.iter().copied()).collect()
    }
}

/// Fixed trailing dimensions of one column, outermost first. Variable-length
/// lists end the nesting.
pub fn trailing_dims(data_type: &DataType) -> Vec<usize> {
    let mut dims = Vec::new();
    let mut current = data_type;
    while let DataType::FixedSizeList(inner, size) = current {
        dims.push(*size as usize);
        current = inner.data_type();
    }
    dims
}

/// Common trailing dimensions of all columns in a group.
pub fn group_trailing(group: &str, schema: &Schema) -> Result<Vec<usize>> {
    let mut fields = schema.fields().iter();
    let Some(first) = fields.next() else {
        return Ok(Vec::new());
    };
    let dims = trailing_dims(first.data_type());
    for field in fields {
        let other = trailing_dims(field.data_type());
        if other != dims {
            return Err(Error::shape(
                group,
                format!(
                    "column '{}' has trailing dims {other:?}, '{}' has {dims:?}",
                    field.name(),
                    first.name()
                ),
            ));
        }
    }
    Ok(dims)
}

// ---------------------------------------------------------------------------
// Precision and compression
// ---------------------------------------------------------------------------

/// Storage width of floating point columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 32 bit floats.
    Full,
    /// 16 bit floats.
    Half,
}

impl Precision {
    pub fn data_type(&self) -> DataType {
        match self {
            Precision::Full => DataType::Float32,
            Precision::Half => DataType::Float16,
        }
    }
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "full" => Ok(Precision::Full),
            "half" => Ok(Precision::Half),
            other => Err(format!("invalid precision '{other}', expected 'full' or 'half'")),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Precision::Full => "full",
            Precision::Half => "half",
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    None,
    #[default]
    Snappy,
    Lz4,
    Zstd,
}

impl From<Compression> for parquet::basic::Compression {
    fn from(c: Compression) -> Self {
        match c {
            Compression::None => parquet::basic::Compression::UNCOMPRESSED,
            Compression::Snappy => parquet::basic::Compression::SNAPPY,
            Compression::Lz4 => parquet::basic::Compression::LZ4_RAW,
            Compression::Zstd => parquet::basic::Compression::ZSTD(Default::default()),
        }
    }
}

// ---------------------------------------------------------------------------
// Column helpers
// ---------------------------------------------------------------------------

/// Apply `f` to the innermost values of `array`, rebuilding any
/// `FixedSizeList` nesting around the result.
pub(crate) fn map_leaves(
    array: &ArrayRef,
    f: &dyn Fn(&ArrayRef) -> Result<ArrayRef>,
) -> Result<ArrayRef> {
    match array.data_type() {
        DataType::FixedSizeList(inner, size) => {
            let list = array
                .as_any()
                .downcast_ref::<FixedSizeListArray>()
                .ok_or_else(|| Error::shape("", "malformed fixed size list"))?;
            let values = map_leaves(list.values(), f)?;
            let field = Arc::new(Field::new(
                inner.name(),
                values.data_type().clone(),
                inner.is_nullable(),
            ));
            let rebuilt =
                FixedSizeListArray::try_new(field, *size, values, list.nulls().cloned())?;
            Ok(Arc::new(rebuilt))
        }
        _ => f(array),
    }
}

pub(crate) fn leaf_type(data_type: &DataType) -> &DataType {
    match data_type {
        DataType::FixedSizeList(inner, _) => leaf_type(inner.data_type()),
        other => other,
    }
}

/// `data_type` with its innermost type replaced.
pub(crate) fn with_leaf_type(data_type: &DataType, leaf: &DataType) -> DataType {
    match data_type {
        DataType::FixedSizeList(inner, size) => DataType::FixedSizeList(
            Arc::new(Field::new(
                inner.name(),
                with_leaf_type(inner.data_type(), leaf),
                inner.is_nullable(),
            )),
            *size,
        ),
        _ => leaf.clone(),
    }
}

fn target_precision(
    field: &Field,
    precision: Option<Precision>,
    overrides: &IndexMap<String, Precision>,
) -> Option<DataType> {
    if !leaf_type(field.data_type()).is_floating() {
        return None;
    }
    overrides
        .get(field.name())
        .copied()
        .or(precision)
        .map(|p| p.data_type())
}

fn cast_field(field: &FieldRef, target: Option<DataType>) -> FieldRef {
    match target {
        Some(leaf) => Arc::new(
            field
                .as_ref()
                .clone()
                .with_data_type(with_leaf_type(field.data_type(), &leaf)),
        ),
        None => field.clone(),
    }
}

/// Schema a batch of `schema` has after [`cast_batch`].
pub fn storage_schema(
    schema: &Schema,
    precision: Option<Precision>,
    overrides: &IndexMap<String, Precision>,
) -> SchemaRef {
    let fields: Vec<FieldRef> = schema
        .fields()
        .iter()
        .map(|f| cast_field(f, target_precision(f, precision, overrides)))
        .collect();
    Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone()))
}

/// Cast floating columns to `precision`, per-column `overrides` first.
/// Non-float columns are untouched.
pub fn cast_batch(
    batch: &RecordBatch,
    precision: Option<Precision>,
    overrides: &IndexMap<String, Precision>,
) -> Result<RecordBatch> {
    if precision.is_none() && overrides.is_empty() {
        return Ok(batch.clone());
    }
    let schema = batch.schema();
    let mut fields = Vec::with_capacity(batch.num_columns());
    let mut columns = Vec::with_capacity(batch.num_columns());
    for (field, column) in schema.fields().iter().zip(batch.columns()) {
        match target_precision(field, precision, overrides) {
            Some(leaf) if leaf_type(field.data_type()) != &leaf => {
                columns.push(map_leaves(column, &|a| Ok(cast(a, &leaf)?))?);
                fields.push(cast_field(field, Some(leaf)));
            }
            _ => {
                columns.push(column.clone());
                fields.push(field.clone());
            }
        }
    }
    let schema = Schema::new_with_metadata(fields, schema.metadata().clone());
    Ok(RecordBatch::try_new(Arc::new(schema), columns)?)
}

/// Keep the named columns, in the given order.
pub(crate) fn select_columns(batch: &RecordBatch, columns: &[String]) -> Result<RecordBatch> {
    let schema = batch.schema();
    let indices = columns
        .iter()
        .map(|c| column_index(&schema, c))
        .collect::<Result<Vec<_>>>()?;
    Ok(batch.project(&indices)?)
}

pub(crate) fn column_index(schema: &Schema, column: &str) -> Result<usize> {
    schema.index_of(column).map_err(|_| Error::MissingColumn {
        column: column.to_string(),
        available: schema
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

/// Field names and types agree, nullability and metadata aside.
pub(crate) fn same_columns(a: &Schema, b: &Schema) -> bool {
    a.fields().len() == b.fields().len()
        && a
            .fields()
            .iter()
            .zip(b.fields().iter())
            .all(|(x, y)| x.name() == y.name() && x.data_type() == y.data_type())
}

#[cfg(test)]
mod tests {
    use arrow::array::{Float32Array, Int32Array};

    use super::*;

    fn tracks() -> RecordBatch {
        let d0 = Float32Array::from((0..6).map(|i| i as f32).collect::<Vec<_>>());
        let d0 = FixedSizeListArray::try_new(
            Arc::new(Field::new("item", DataType::Float32, true)),
            3,
            Arc::new(d0),
            None,
        )
        .unwrap();
        let hits = Int32Array::from((0..6).collect::<Vec<_>>());
        let hits = FixedSizeListArray::try_new(
            Arc::new(Field::new("item", DataType::Int32, true)),
            3,
            Arc::new(hits),
            None,
        )
        .unwrap();
        let schema = Schema::new(vec![
            Field::new("d0", d0.data_type().clone(), true),
            Field::new("hits", hits.data_type().clone(), true),
        ]);
        RecordBatch::try_new(Arc::new(schema), vec![Arc::new(d0), Arc::new(hits)]).unwrap()
    }

    #[test]
    fn trailing_dimensions() {
        let batch = tracks();
        assert_eq!(group_trailing("tracks", &batch.schema()).unwrap(), vec![3]);
        assert_eq!(trailing_dims(&DataType::Float32), Vec::<usize>::new());

        let mixed = Schema::new(vec![
            Field::new("a", DataType::Float32, true),
            batch.schema().field(0).clone(),
        ]);
        assert!(matches!(
            group_trailing("tracks", &mixed),
            Err(Error::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn half_precision_inside_lists() {
        let batch = tracks();
        let cast = cast_batch(&batch, Some(Precision::Half), &IndexMap::new()).unwrap();
        assert_eq!(leaf_type(cast.schema().field(0).data_type()), &DataType::Float16);
        assert_eq!(leaf_type(cast.schema().field(1).data_type()), &DataType::Int32);
        assert_eq!(
            cast.schema(),
            storage_schema(&batch.schema(), Some(Precision::Half), &IndexMap::new())
        );
    }

    #[test]
    fn overrides_win() {
        let batch = tracks();
        let overrides = IndexMap::from([("d0".to_string(), Precision::Full)]);
        let cast = cast_batch(&batch, Some(Precision::Half), &overrides).unwrap();
        assert_eq!(leaf_type(cast.schema().field(0).data_type()), &DataType::Float32);
    }

    #[test]
    fn alignment() {
        let batch = tracks();
        let named = NamedBatch::new("jets")
            .with_group("jets", batch.slice(0, 1))
            .with_group("tracks", batch.clone());
        assert_eq!(named.len(), 1);
        assert!(matches!(
            named.check_aligned(),
            Err(Error::GroupAlignment { ref group, .. }) if group == "tracks"
        ));
        assert_eq!(NamedBatch::new("jets").with_group("tracks", batch).len(), 2);
    }

    #[test]
    fn variables_from_json() {
        let vars: Variables =
            serde_json::from_str(r#"{"jets": ["pt", "eta"], "tracks": null}"#).unwrap();
        assert_eq!(vars.get("tracks"), Some(&Selection::All));
        assert_eq!(
            vars.get("jets"),
            Some(&Selection::Columns(vec!["pt".into(), "eta".into()]))
        );
    }
}
