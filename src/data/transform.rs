use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, Float64Array, Int64Array};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type, Int64Type, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::model::{leaf_type, map_leaves};
use crate::cuts::Cuts;
use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Float functions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamedFn {
    Log,
    Log10,
    Log2,
    Log1p,
    Exp,
    Sqrt,
    Abs,
    Neg,
}

impl NamedFn {
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            NamedFn::Log => x.ln(),
            NamedFn::Log10 => x.log10(),
            NamedFn::Log2 => x.log2(),
            NamedFn::Log1p => x.ln_1p(),
            NamedFn::Exp => x.exp(),
            NamedFn::Sqrt => x.sqrt(),
            NamedFn::Abs => x.abs(),
            NamedFn::Neg => -x,
        }
    }
}

impl FromStr for NamedFn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "log" => NamedFn::Log,
            "log10" => NamedFn::Log10,
            "log2" => NamedFn::Log2,
            "log1p" => NamedFn::Log1p,
            "exp" => NamedFn::Exp,
            "sqrt" => NamedFn::Sqrt,
            "abs" => NamedFn::Abs,
            "neg" | "negative" => NamedFn::Neg,
            other => return Err(Error::UnknownFunction(other.to_string())),
        })
    }
}

/// Elementwise function applied to a float column.
#[derive(Clone)]
pub enum FloatFn {
    Named(NamedFn),
    Custom(Arc<dyn Fn(f64) -> f64 + Send + Sync>),
}

impl FloatFn {
    pub fn custom(f: impl Fn(f64) -> f64 + Send + Sync + 'static) -> Self {
        FloatFn::Custom(Arc::new(f))
    }

    pub fn apply(&self, x: f64) -> f64 {
        match self {
            FloatFn::Named(f) => f.apply(x),
            FloatFn::Custom(f) => f(x),
        }
    }
}

impl fmt::Debug for FloatFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FloatFn::Named(n) => write!(f, "Named({n:?})"),
            FloatFn::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl From<NamedFn> for FloatFn {
    fn from(f: NamedFn) -> Self {
        FloatFn::Named(f)
    }
}

impl FromStr for FloatFn {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(FloatFn::Named(s.parse()?))
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Serializable form of a [`Transform`]; float functions by name.
///
/// ```yaml
/// variable_map: {jets: {HadronConeExclTruthLabelID: flavour}}
/// ints_map: {jets: {flavour: {15: 0}}}
/// floats_map: {jets: {pt: log}}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    pub variable_map: IndexMap<String, IndexMap<String, String>>,
    pub ints_map: IndexMap<String, IndexMap<String, IndexMap<i64, i64>>>,
    pub floats_map: IndexMap<String, IndexMap<String, String>>,
}

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

/// Renames, integer recoding and float functions, per group.
///
/// Integer and float maps may name a variable by its original or its new
/// name; both resolve to the renamed column.
#[derive(Debug, Clone, Default)]
pub struct Transform {
    variable_map: IndexMap<String, IndexMap<String, String>>,
    variable_map_inv: IndexMap<String, IndexMap<String, String>>,
    ints_map: IndexMap<String, IndexMap<String, HashMap<i64, i64>>>,
    floats_map: IndexMap<String, IndexMap<String, FloatFn>>,
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &TransformConfig) -> Result<Self> {
        let mut t = Transform::new();
        for (group, renames) in &config.variable_map {
            for (old, new) in renames {
                t = t.with_rename(group, old, new);
            }
        }
        for (group, vars) in &config.ints_map {
            for (var, map) in vars {
                t = t.with_int_map(group, var, map.iter().map(|(k, v)| (*k, *v)));
            }
        }
        for (group, vars) in &config.floats_map {
            for (var, name) in vars {
                t = t.with_float_fn(group, var, name.parse::<FloatFn>()?);
            }
        }
        Ok(t)
    }

    pub fn with_rename(mut self, group: &str, old: &str, new: &str) -> Self {
        self.variable_map
            .entry(group.to_string())
            .or_default()
            .insert(old.to_string(), new.to_string());
        self.variable_map_inv
            .entry(group.to_string())
            .or_default()
            .insert(new.to_string(), old.to_string());
        self
    }

    pub fn with_int_map(
        mut self,
        group: &str,
        variable: &str,
        map: impl IntoIterator<Item = (i64, i64)>,
    ) -> Self {
        self.ints_map
            .entry(group.to_string())
            .or_default()
            .entry(variable.to_string())
            .or_default()
            .extend(map);
        self
    }

    pub fn with_float_fn(mut self, group: &str, variable: &str, f: impl Into<FloatFn>) -> Self {
        self.floats_map
            .entry(group.to_string())
            .or_default()
            .insert(variable.to_string(), f.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.variable_map.is_empty() && self.ints_map.is_empty() && self.floats_map.is_empty()
    }

    /// Map names through the rename table, or back through its inverse.
    /// Names without an entry pass through.
    pub fn map_variable_names(
        &self,
        group: &str,
        variables: &[String],
        inverse: bool,
    ) -> Vec<String> {
        variables
            .iter()
            .map(|v| self.map_name(group, v, inverse))
            .collect()
    }

    pub fn map_name(&self, group: &str, variable: &str, inverse: bool) -> String {
        let table = if inverse {
            &self.variable_map_inv
        } else {
            &self.variable_map
        };
        table
            .get(group)
            .and_then(|m| m.get(variable))
            .cloned()
            .unwrap_or_else(|| variable.to_string())
    }

    /// Original column behind a name given in either spelling.
    pub fn raw_name(&self, group: &str, variable: &str) -> String {
        let is_old = self
            .variable_map
            .get(group)
            .is_some_and(|m| m.contains_key(variable));
        if is_old {
            variable.to_string()
        } else {
            self.map_name(group, variable, true)
        }
    }

    /// Cuts rewritten onto renamed columns, so they evaluate against a
    /// renamed batch whichever spelling they use.
    pub fn resolve_cuts(&self, group: &str, cuts: &Cuts) -> Cuts {
        match self.variable_map.get(group) {
            Some(map) => cuts.map_variables(|v| map.get(v).cloned()),
            None => cuts.clone(),
        }
    }

    /// Renamed schema; fails if a rename targets a column that already exists.
    pub fn rename_schema(&self, group: &str, schema: &SchemaRef) -> Result<SchemaRef> {
        let Some(map) = self.variable_map.get(group) else {
            return Ok(schema.clone());
        };
        for (old, new) in map {
            if schema.index_of(old).is_ok() && schema.index_of(new).is_ok() {
                return Err(Error::RenameConflict {
                    group: group.to_string(),
                    old: old.clone(),
                    new: new.clone(),
                });
            }
        }
        let fields: Vec<Field> = schema
            .fields()
            .iter()
            .map(|f| match map.get(f.name()) {
                Some(new) => f.as_ref().clone().with_name(new),
                None => f.as_ref().clone(),
            })
            .collect();
        Ok(Arc::new(Schema::new_with_metadata(fields, schema.metadata().clone())))
    }

    pub fn rename(&self, group: &str, batch: RecordBatch) -> Result<RecordBatch> {
        if !self.variable_map.contains_key(group) {
            return Ok(batch);
        }
        let schema = self.rename_schema(group, &batch.schema())?;
        Ok(RecordBatch::try_new(schema, batch.columns().to_vec())?)
    }

    fn column_for(&self, group: &str, variable: &str, schema: &Schema) -> Option<usize> {
        let renamed = self.map_name(group, variable, false);
        schema.index_of(&renamed).ok()
    }

    /// Recode integer values of a renamed batch. Values without an entry
    /// are kept.
    pub fn map_ints(&self, group: &str, batch: RecordBatch) -> Result<RecordBatch> {
        let Some(vars) = self.ints_map.get(group) else {
            return Ok(batch);
        };
        let mut columns = batch.columns().to_vec();
        for (variable, map) in vars {
            let Some(i) = self.column_for(group, variable, &batch.schema()) else {
                continue;
            };
            let original = leaf_type(columns[i].data_type()).clone();
            if !original.is_integer() {
                return Err(Error::TypeMismatch {
                    column: variable.clone(),
                    data_type: original,
                    operand: String::from("integer map"),
                });
            }
            columns[i] = map_leaves(&columns[i], &|leaf: &ArrayRef| {
                let ints = cast(leaf, &DataType::Int64)?;
                let mapped: Int64Array = ints
                    .as_primitive::<Int64Type>()
                    .iter()
                    .map(|v| v.map(|v| map.get(&v).copied().unwrap_or(v)))
                    .collect();
                Ok(cast(&(Arc::new(mapped) as ArrayRef), leaf.data_type())?)
            })?;
        }
        Ok(RecordBatch::try_new(batch.schema(), columns)?)
    }

    /// Apply float functions to a renamed batch, keeping column types.
    pub fn map_floats(&self, group: &str, batch: RecordBatch) -> Result<RecordBatch> {
        let Some(vars) = self.floats_map.get(group) else {
            return Ok(batch);
        };
        let mut columns = batch.columns().to_vec();
        for (variable, f) in vars {
            let Some(i) = self.column_for(group, variable, &batch.schema()) else {
                continue;
            };
            let original = leaf_type(columns[i].data_type()).clone();
            if !original.is_floating() {
                return Err(Error::TypeMismatch {
                    column: variable.clone(),
                    data_type: original,
                    operand: String::from("float function"),
                });
            }
            columns[i] = map_leaves(&columns[i], &|leaf: &ArrayRef| {
                let floats = cast(leaf, &DataType::Float64)?;
                let mapped: Float64Array = floats
                    .as_primitive::<Float64Type>()
                    .iter()
                    .map(|v| v.map(|v| f.apply(v)))
                    .collect();
                Ok(cast(&(Arc::new(mapped) as ArrayRef), leaf.data_type())?)
            })?;
        }
        Ok(RecordBatch::try_new(batch.schema(), columns)?)
    }

    /// Rename, then recode integers, then apply float functions.
    pub fn apply(&self, group: &str, batch: RecordBatch) -> Result<RecordBatch> {
        let batch = self.rename(group, batch)?;
        let batch = self.map_ints(group, batch)?;
        self.map_floats(group, batch)
    }
}
