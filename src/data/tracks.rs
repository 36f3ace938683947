use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, FixedSizeListArray, Float64Array, Int64Array, Scalar,
};
use arrow::compute::kernels::zip::zip;
use arrow::compute::{cast, cast_with_options, CastOptions};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use log::debug;

use crate::cuts::{Cuts, NanPolicy};
use crate::error::{Error, Result};

/// Per-track flag column of the tracks group.
pub const VALID_COLUMN: &str = "valid";

const TRACKS: &str = "tracks";

/// Applies cuts to individual tracks without changing the track layout.
///
/// Every column of the tracks group holds a fixed-size list per jet. A valid
/// track failing any cut is masked in place: float values become NaN,
/// integers -1 and booleans false, which also clears its valid flag.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackSelector {
    cuts: Cuts,
    valid: String,
}

impl TrackSelector {
    pub fn new(cuts: Cuts) -> Self {
        TrackSelector {
            cuts,
            valid: VALID_COLUMN.to_string(),
        }
    }

    pub fn with_valid(mut self, valid: impl Into<String>) -> Self {
        self.valid = valid.into();
        self
    }

    pub fn cuts(&self) -> &Cuts {
        &self.cuts
    }

    pub fn apply(&self, tracks: &RecordBatch) -> Result<RecordBatch> {
        let schema = tracks.schema();
        let mut lists = Vec::with_capacity(tracks.num_columns());
        let mut width = None;
        for (field, column) in schema.fields().iter().zip(tracks.columns()) {
            let Some(list) = column.as_fixed_size_list_opt() else {
                return Err(Error::shape(
                    TRACKS,
                    format!("column '{}' is not a fixed-size list", field.name()),
                ));
            };
            match width {
                None => width = Some(list.value_length()),
                Some(w) if w != list.value_length() => {
                    return Err(Error::shape(
                        TRACKS,
                        format!(
                            "column '{}' holds {} tracks per row, expected {w}",
                            field.name(),
                            list.value_length()
                        ),
                    ));
                }
                Some(_) => {}
            }
            lists.push(list);
        }

        let flat = flatten(&schema, &lists)?;
        let valid = flat.column_by_name(&self.valid).ok_or_else(|| Error::MissingColumn {
            column: self.valid.clone(),
            available: schema.fields().iter().map(|f| f.name().clone()).collect(),
        })?;
        let valid = cast(valid, &DataType::Boolean)?;
        let valid = valid.as_boolean();

        let mut remove: Vec<bool> = vec![false; flat.num_rows()];
        for cut in &self.cuts {
            let pass = cut.mask_with(&flat, NanPolicy::Exclude)?;
            for (i, r) in remove.iter_mut().enumerate() {
                if valid.is_valid(i) && valid.value(i) && !pass.value(i) {
                    *r = true;
                }
            }
        }
        let removed = remove.iter().filter(|r| **r).count();
        if removed == 0 {
            return Ok(tracks.clone());
        }
        debug!("masking {removed} of {} tracks", flat.num_rows());

        let remove = BooleanArray::from(remove);
        let mut columns: Vec<ArrayRef> = Vec::with_capacity(lists.len());
        for (field, list) in schema.fields().iter().zip(&lists) {
            let (item, size, values, nulls) = (*list).clone().into_parts();
            let fill = Scalar::new(fill_value(field.name(), values.data_type())?);
            let masked = zip(&remove, &fill, &values)?;
            columns.push(Arc::new(FixedSizeListArray::try_new(item, size, masked, nulls)?));
        }
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

/// One row per track, columns named as in the tracks group.
fn flatten(schema: &Schema, lists: &[&FixedSizeListArray]) -> Result<RecordBatch> {
    let fields: Vec<Field> = schema
        .fields()
        .iter()
        .zip(lists)
        .map(|(f, l)| Field::new(f.name(), l.values().data_type().clone(), true))
        .collect();
    let columns: Vec<ArrayRef> = lists.iter().map(|l| l.values().clone()).collect();
    Ok(RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)?)
}

/// Length-one array holding the value a removed track takes in a column of
/// `data_type`.
fn fill_value(column: &str, data_type: &DataType) -> Result<ArrayRef> {
    let wrap = CastOptions {
        safe: false,
        ..Default::default()
    };
    match data_type {
        dt if dt.is_floating() => Ok(cast(&Float64Array::from(vec![f64::NAN]), dt)?),
        dt if dt.is_integer() => Ok(cast_with_options(&Int64Array::from(vec![-1]), dt, &wrap)?),
        DataType::Boolean => Ok(Arc::new(BooleanArray::from(vec![false]))),
        other => Err(Error::NotScalarColumn {
            column: column.to_string(),
            data_type: other.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::{Float32Array, Int32Array};
    use arrow::datatypes::{Float32Type, Int32Type};

    use super::*;

    fn list(values: ArrayRef, width: i32) -> ArrayRef {
        let item = Arc::new(Field::new("item", values.data_type().clone(), true));
        Arc::new(FixedSizeListArray::try_new(item, width, values, None).unwrap())
    }

    /// Two jets with three track slots each; the last slot of the second jet
    /// is padding.
    fn tracks() -> RecordBatch {
        let d0 = Float32Array::from(vec![0.1, 2.0, -0.3, 0.2, -4.0, f32::NAN]);
        let hits = Int32Array::from(vec![3, 1, 4, 2, 5, 0]);
        let valid = BooleanArray::from(vec![true, true, true, true, true, false]);
        let columns = vec![
            list(Arc::new(d0), 3),
            list(Arc::new(hits), 3),
            list(Arc::new(valid), 3),
        ];
        let fields: Vec<Field> = ["d0", "numberOfPixelHits", "valid"]
            .iter()
            .zip(&columns)
            .map(|(n, c)| Field::new(*n, c.data_type().clone(), true))
            .collect();
        RecordBatch::try_new(Arc::new(Schema::new(fields)), columns).unwrap()
    }

    fn leaves(batch: &RecordBatch, column: &str) -> ArrayRef {
        batch
            .column_by_name(column)
            .unwrap()
            .as_fixed_size_list()
            .values()
            .clone()
    }

    #[test]
    fn failing_tracks_are_masked() {
        let cuts = Cuts::from_list(["d0 < 1", "d0 > -1", "numberOfPixelHits >= 2"]).unwrap();
        let selected = TrackSelector::new(cuts).apply(&tracks()).unwrap();
        assert_eq!(selected.num_rows(), 2);
        assert_eq!(selected.schema(), tracks().schema());

        let d0 = leaves(&selected, "d0");
        let d0: Vec<bool> = d0
            .as_primitive::<Float32Type>()
            .values()
            .iter()
            .map(|v| v.is_nan())
            .collect();
        assert_eq!(d0, vec![false, true, false, false, true, true]);
        let hits = leaves(&selected, "numberOfPixelHits");
        assert_eq!(
            hits.as_primitive::<Int32Type>().values().to_vec(),
            vec![3, -1, 4, 2, -1, 0]
        );
        let valid = leaves(&selected, "valid");
        let valid: Vec<bool> = valid.as_boolean().values().iter().collect();
        assert_eq!(valid, vec![true, false, true, true, false, false]);
    }

    #[test]
    fn nothing_removed_keeps_batch() {
        let cuts = Cuts::from_list(["numberOfPixelHits >= 0"]).unwrap();
        let batch = tracks();
        assert_eq!(TrackSelector::new(cuts).apply(&batch).unwrap(), batch);
    }

    #[test]
    fn padding_is_left_alone() {
        let cuts = Cuts::from_list(["numberOfPixelHits > 0"]).unwrap();
        let selected = TrackSelector::new(cuts).apply(&tracks()).unwrap();
        assert_eq!(selected, tracks());
    }

    #[test]
    fn layout_errors() {
        let cuts = Cuts::from_list(["d0 < 1"]).unwrap();
        let batch = tracks();
        assert!(matches!(
            TrackSelector::new(cuts.clone()).with_valid("isValid").apply(&batch),
            Err(Error::MissingColumn { .. })
        ));
        let flat = RecordBatch::try_new(
            Arc::new(Schema::new(vec![Field::new("d0", DataType::Float32, true)])),
            vec![Arc::new(Float32Array::from(vec![0.5]))],
        )
        .unwrap();
        assert!(matches!(
            TrackSelector::new(cuts).apply(&flat),
            Err(Error::ShapeMismatch { .. })
        ));
    }
}
