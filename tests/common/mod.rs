#![allow(dead_code)]

use std::path::{Path, PathBuf};

use arrow::array::AsArray;
use arrow::datatypes::{Float32Type, Int32Type, Int64Type};
use arrow::record_batch::RecordBatch;
use tagsel::data::{Reader, ReaderConfig};
use tagsel::mock::{write_mock_container, MockConfig};

pub fn mock(dir: &Path, name: &str, num_jets: usize, seed: u64) -> PathBuf {
    write_mock_container(&dir.join(name), &MockConfig::new(num_jets).with_seed(seed)).unwrap()
}

/// Unshuffled reader config over the given sources.
pub fn config(sources: &[&Path], batch_size: usize) -> ReaderConfig {
    ReaderConfig::new(sources.iter().map(|p| p.to_string_lossy().into_owned()))
        .with_batch_size(batch_size)
        .with_shuffle(false)
}

pub fn open(sources: &[&Path], batch_size: usize) -> Reader {
    config(sources, batch_size).open().unwrap()
}

pub fn f32s(batch: &RecordBatch, column: &str) -> Vec<f32> {
    batch
        .column_by_name(column)
        .unwrap()
        .as_primitive::<Float32Type>()
        .values()
        .to_vec()
}

pub fn i32s(batch: &RecordBatch, column: &str) -> Vec<i32> {
    batch
        .column_by_name(column)
        .unwrap()
        .as_primitive::<Int32Type>()
        .values()
        .to_vec()
}

pub fn i64s(batch: &RecordBatch, column: &str) -> Vec<i64> {
    batch
        .column_by_name(column)
        .unwrap()
        .as_primitive::<Int64Type>()
        .values()
        .to_vec()
}
