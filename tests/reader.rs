mod common;

use std::sync::Arc;

use arrow::array::{AsArray, Int32Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use indexmap::IndexMap;
use tagsel::cuts::Cuts;
use tagsel::data::{
    Compression, ContainerWriter, EstimateConfig, Precision, TrackSelector, TransformConfig,
    Variables,
};
use tagsel::labels::{LabelContainer, Labeller, LABELS_COLUMN};
use tagsel::Error;

use common::{config, f32s, i32s, i64s, mock, open};

#[test]
fn soft_limit_returns_what_is_available() {
    let dir = tempfile::tempdir().unwrap();
    let src = mock(dir.path(), "sample", 120, 1);
    let reader = open(&[&src], 50);

    let batch = reader.load(&Variables::all("jets"), Some(1_000), None).unwrap();
    assert_eq!(batch.len(), 120);
    assert_eq!(i64s(batch.get("jets").unwrap(), "eventNumber"), (0..120).collect::<Vec<_>>());
}

#[test]
fn stream_stops_at_target() {
    let dir = tempfile::tempdir().unwrap();
    let src = mock(dir.path(), "sample", 100, 1);
    let reader = open(&[&src], 30);

    let mut stream = reader.stream(&Variables::all("jets"), Some(50), None).unwrap();
    let sizes: Vec<usize> = stream.by_ref().map(|b| b.unwrap().len()).collect();
    assert_eq!(sizes, vec![30, 20]);
    assert_eq!(stream.yielded(), 50);
    assert!(stream.next().is_none());
}

#[test]
fn default_variables_are_the_primary_group() {
    let dir = tempfile::tempdir().unwrap();
    let src = mock(dir.path(), "sample", 10, 1);
    let reader = open(&[&src], 4);

    let batch = reader.load(&Variables::new(), None, None).unwrap();
    assert_eq!(batch.groups().collect::<Vec<_>>(), vec!["jets"]);
    assert_eq!(batch.len(), 10);
}

#[test]
fn cuts_select_rows_in_every_group() {
    let dir = tempfile::tempdir().unwrap();
    let src = mock(dir.path(), "sample", 300, 3);
    let reader = open(&[&src], 64);
    let variables = Variables::new()
        .with_columns("jets", ["HadronConeExclTruthLabelID", "eventNumber"])
        .with_all("tracks");
    let full = reader.load(&variables, None, None).unwrap();

    let cuts = Cuts::from_list(["HadronConeExclTruthLabelID == 5"]).unwrap();
    let selected = reader.load(&variables, None, Some(&cuts)).unwrap();
    selected.check_aligned().unwrap();
    assert!(!selected.is_empty());

    let jets = selected.get("jets").unwrap();
    assert!(i32s(jets, "HadronConeExclTruthLabelID").iter().all(|&l| l == 5));
    let tracks = selected.get("tracks").unwrap();
    let all_tracks = full.get("tracks").unwrap();
    for (row, event) in i64s(jets, "eventNumber").into_iter().enumerate() {
        assert_eq!(tracks.slice(row, 1), all_tracks.slice(event as usize, 1));
    }
}

#[test]
fn cut_only_columns_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let src = mock(dir.path(), "sample", 100, 1);
    let reader = open(&[&src], 32);

    let cuts = Cuts::from_list(["eventNumber % 2 == 0"]).unwrap();
    let variables = Variables::new().with_columns("jets", ["pt"]);
    let batch = reader.load(&variables, None, Some(&cuts)).unwrap();
    let jets = batch.get("jets").unwrap();
    assert_eq!(jets.num_columns(), 1);
    assert_eq!(jets.schema().field(0).name(), "pt");
    assert_eq!(batch.len(), 50);

    let dtypes = reader.dtypes(&variables).unwrap();
    assert_eq!(dtypes["jets"].fields().len(), 1);
}

#[test]
fn cuts_on_an_unread_primary_group() {
    let dir = tempfile::tempdir().unwrap();
    let src = mock(dir.path(), "sample", 60, 1);
    let reader = open(&[&src], 25);

    let cuts = Cuts::from_list(["eventNumber < 10"]).unwrap();
    let batch = reader.load(&Variables::all("tracks"), None, Some(&cuts)).unwrap();
    assert_eq!(batch.groups().collect::<Vec<_>>(), vec!["tracks"]);
    assert_eq!(batch.len(), 10);
}

#[test]
fn transform_sees_raw_values_in_cuts() {
    let dir = tempfile::tempdir().unwrap();
    let src = mock(dir.path(), "sample", 200, 5);
    let raw_reader = open(&[&src], 64);
    let raw = raw_reader.load(&Variables::all("jets"), None, None).unwrap();
    let raw = raw.get("jets").unwrap();

    let transform = TransformConfig {
        variable_map: IndexMap::from([(
            "jets".to_string(),
            IndexMap::from([("HadronConeExclTruthLabelID".to_string(), "flavour".to_string())]),
        )]),
        ints_map: IndexMap::from([(
            "jets".to_string(),
            IndexMap::from([(
                "flavour".to_string(),
                IndexMap::from([(5_i64, 1_i64), (4, 2), (0, 3)]),
            )]),
        )]),
        floats_map: IndexMap::from([(
            "jets".to_string(),
            IndexMap::from([("pt".to_string(), "log".to_string())]),
        )]),
    };
    let reader = config(&[&src], 64).with_transform(transform).open().unwrap();
    let variables = Variables::new().with_columns("jets", ["flavour", "pt", "eventNumber"]);

    for spelling in ["HadronConeExclTruthLabelID == 5", "flavour == 5"] {
        let cuts = Cuts::from_list([spelling]).unwrap();
        let batch = reader.load(&variables, None, Some(&cuts)).unwrap();
        let jets = batch.get("jets").unwrap();
        assert!(!batch.is_empty());
        assert!(jets.column_by_name("HadronConeExclTruthLabelID").is_none());
        assert!(i32s(jets, "flavour").iter().all(|&f| f == 1));

        let raw_pt = f32s(raw, "pt");
        for (pt, event) in f32s(jets, "pt").into_iter().zip(i64s(jets, "eventNumber")) {
            assert_eq!(pt, (raw_pt[event as usize] as f64).ln() as f32);
        }
    }

    let dtypes = reader.dtypes(&variables).unwrap();
    assert_eq!(dtypes["jets"].field(0).name(), "flavour");
    assert_eq!(dtypes["jets"].field(0).data_type(), &DataType::Int32);
}

#[test]
fn shuffle_is_seeded() {
    let dir = tempfile::tempdir().unwrap();
    let src = mock(dir.path(), "sample", 100, 1);
    let reader = config(&[&src], 10).with_shuffle(true).with_seed(7).open().unwrap();
    let variables = Variables::new().with_columns("jets", ["eventNumber"]);

    let events = |reader: &tagsel::data::Reader| -> Vec<i64> {
        reader
            .stream(&variables, None, None)
            .unwrap()
            .flat_map(|b| i64s(b.unwrap().get("jets").unwrap(), "eventNumber"))
            .collect()
    };
    let first = events(&reader);
    let again = events(&reader);
    assert_eq!(first, again);
    assert_ne!(first, (0..100).collect::<Vec<_>>());

    // Rows keep their order inside a chunk.
    for chunk in first.chunks(10) {
        assert_eq!(chunk[0] % 10, 0);
        assert!(chunk.windows(2).all(|w| w[1] == w[0] + 1));
    }
    let mut sorted = first;
    sorted.sort_unstable();
    assert_eq!(sorted, (0..100).collect::<Vec<_>>());
}

#[test]
fn estimate_scales_the_sample() {
    let dir = tempfile::tempdir().unwrap();
    let src = mock(dir.path(), "sample", 2_000, 1);
    let mut reader = config(&[&src], 128)
        .with_estimate(EstimateConfig {
            sample_rows: 500,
            round_to: 10,
        })
        .open()
        .unwrap();

    let all = reader.estimate_available(None).unwrap();
    assert_eq!((all.rows, all.exact), (2_000, true));

    let cuts = Cuts::from_list(["eventNumber % 2 == 0"]).unwrap();
    let estimate = reader.estimate_available(Some(&cuts)).unwrap();
    assert_eq!((estimate.rows, estimate.exact), (1_000, false));
    assert_eq!(reader.estimate_available(Some(&cuts)).unwrap(), estimate);

    reader.invalidate_estimates();
    let mut full = config(&[&src], 128)
        .with_estimate(EstimateConfig {
            sample_rows: 10_000,
            round_to: 1_000,
        })
        .open()
        .unwrap();
    let cuts = Cuts::from_list(["eventNumber < 123"]).unwrap();
    let exact = full.estimate_available(Some(&cuts)).unwrap();
    assert_eq!((exact.rows, exact.exact), (123, true));
}

#[test]
fn half_precision_on_read() {
    let dir = tempfile::tempdir().unwrap();
    let src = mock(dir.path(), "sample", 20, 1);
    let reader = config(&[&src], 8).with_precision(Precision::Half).open().unwrap();
    let variables = Variables::new().with_columns("jets", ["pt", "n_tracks"]);

    let batch = reader.load(&variables, None, None).unwrap();
    let schema = batch.get("jets").unwrap().schema();
    assert_eq!(schema.field(0).data_type(), &DataType::Float16);
    assert_eq!(schema.field(1).data_type(), &DataType::Int32);
    let dtypes = reader.dtypes(&variables).unwrap();
    assert_eq!(dtypes["jets"].field(0).data_type(), &DataType::Float16);
}

#[test]
fn unknown_columns_and_groups() {
    let dir = tempfile::tempdir().unwrap();
    let src = mock(dir.path(), "sample", 20, 1);
    let reader = open(&[&src], 8);

    let missing = Variables::new().with_columns("jets", ["not_a_column"]);
    assert!(matches!(
        reader.load(&missing, None, None),
        Err(Error::MissingColumn { .. })
    ));
    assert!(matches!(
        reader.load(&Variables::all("hits"), None, None),
        Err(Error::MissingGroup(_))
    ));
    let cuts = Cuts::from_list(["nothing > 1"]).unwrap();
    assert!(matches!(
        reader.load(&Variables::all("jets"), None, Some(&cuts)),
        Err(Error::MissingColumn { .. })
    ));
}

fn ints(name: &str, values: Vec<i32>) -> RecordBatch {
    let schema = Schema::new(vec![Field::new(name, DataType::Int32, true)]);
    RecordBatch::try_new(Arc::new(schema), vec![Arc::new(Int32Array::from(values))]).unwrap()
}

#[test]
fn misaligned_groups_fail() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken");
    let mut writer = ContainerWriter::create(&path).unwrap();
    for (group, rows) in [("jets", 10), ("tracks", 8)] {
        let batch = ints("x", (0..rows).collect());
        writer.create_group(group, batch.schema(), Compression::None).unwrap();
        writer.write_slice(group, &batch).unwrap();
    }
    writer.close().unwrap();

    let reader = open(&[&path], 4);
    let variables = Variables::all("jets").with_all("tracks");
    assert!(matches!(
        reader.stream(&variables, None, None),
        Err(Error::GroupAlignment { .. })
    ));
    assert_eq!(reader.load(&Variables::all("jets"), None, None).unwrap().len(), 10);
}

#[test]
fn merged_sources_read_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let a = mock(dir.path(), "part_a", 50, 1);
    let b = mock(dir.path(), "part_b", 70, 2);
    let pattern = dir.path().join("part_*").to_string_lossy().into_owned();
    let reader = tagsel::data::ReaderConfig::new([pattern])
        .with_batch_size(30)
        .with_shuffle(false)
        .open()
        .unwrap();
    assert_eq!(reader.files(), &[a.clone(), b.clone()]);
    assert_eq!(reader.num_rows().unwrap(), 120);

    let merged = reader.load(&Variables::all("jets"), None, None).unwrap();
    let from_a = open(&[&a], 100).load(&Variables::all("jets"), None, None).unwrap();
    let from_b = open(&[&b], 100).load(&Variables::all("jets"), None, None).unwrap();
    let mut expected = f32s(from_a.get("jets").unwrap(), "pt");
    expected.extend(f32s(from_b.get("jets").unwrap(), "pt"));
    assert_eq!(f32s(merged.get("jets").unwrap(), "pt"), expected);

    assert_eq!(
        reader.attr("generator", None),
        Some(&serde_json::Value::from("tagsel-mock"))
    );
}

#[test]
fn groups_missing_from_a_source_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let a = mock(dir.path(), "a", 10, 1);
    let b = dir.path().join("b");
    let mut writer = ContainerWriter::create(&b).unwrap();
    let jets = tagsel::mock::mock_batch(&tagsel::mock::MockConfig::new(5)).unwrap();
    let jets = jets.get("jets").unwrap();
    writer.create_group("jets", jets.schema(), Compression::None).unwrap();
    writer.write_slice("jets", jets).unwrap();
    writer.close().unwrap();

    let reader = open(&[&a, &b], 4);
    assert_eq!(reader.view().groups().collect::<Vec<_>>(), vec!["jets"]);
    assert_eq!(reader.num_rows().unwrap(), 15);
    assert!(matches!(
        reader.load(&Variables::all("tracks"), None, None),
        Err(Error::MissingGroup(_))
    ));
}

/// A container whose `jets` and `tracks` groups both hold `x = values`.
fn numbered(dir: &std::path::Path, name: &str, values: std::ops::Range<i32>) -> std::path::PathBuf {
    let path = dir.join(name);
    let mut writer = ContainerWriter::create(&path).unwrap();
    let batch = ints("x", values.collect());
    for group in ["jets", "tracks"] {
        writer.create_group(group, batch.schema(), Compression::None).unwrap();
        writer.write_slice(group, &batch).unwrap();
    }
    writer.close().unwrap();
    path
}

#[test]
fn weighted_sources_are_mixed_per_batch() {
    let dir = tempfile::tempdir().unwrap();
    let a = numbered(dir.path(), "a", 0..60);
    let b = numbered(dir.path(), "b", 1000..1030);
    let reader = config(&[&a, &b], 20).with_weights([1.0, 0.5]).open().unwrap();
    assert_eq!(reader.num_rows().unwrap(), 90);

    let batches: Vec<Vec<i32>> = reader
        .stream(&Variables::all("jets"), None, None)
        .unwrap()
        .map(|batch| i32s(batch.unwrap().get("jets").unwrap(), "x"))
        .collect();
    let expected: Vec<Vec<i32>> = (0..3)
        .map(|i| (20 * i..20 * (i + 1)).chain(1000 + 10 * i..1010 + 10 * i).collect())
        .collect();
    assert_eq!(batches, expected);
}

#[test]
fn weighted_target_split_by_source_size() {
    let dir = tempfile::tempdir().unwrap();
    let a = numbered(dir.path(), "a", 0..60);
    let b = numbered(dir.path(), "b", 1000..1030);
    let reader = config(&[&a, &b], 20).with_weights([1.0, 0.5]).open().unwrap();

    let mut stream = reader.stream(&Variables::all("jets"), Some(45), None).unwrap();
    let sizes: Vec<usize> = stream.by_ref().map(|b| b.unwrap().len()).collect();
    assert_eq!(sizes, vec![30, 15]);
    assert_eq!(stream.yielded(), 45);

    let batch = reader.load(&Variables::all("jets"), Some(45), None).unwrap();
    let x = i32s(batch.get("jets").unwrap(), "x");
    assert_eq!(x.iter().filter(|v| **v < 1000).count(), 30);
    assert_eq!(x.iter().filter(|v| **v >= 1000).count(), 15);
}

#[test]
fn weighted_shuffle_keeps_groups_aligned() {
    let dir = tempfile::tempdir().unwrap();
    let a = numbered(dir.path(), "a", 0..60);
    let b = numbered(dir.path(), "b", 1000..1030);
    let reader = config(&[&a, &b], 20)
        .with_weights([1.0, 0.5])
        .with_shuffle(true)
        .with_seed(5)
        .open()
        .unwrap();

    let variables = Variables::all("jets").with_all("tracks");
    let batch = reader.load(&variables, None, None).unwrap();
    let jets = i32s(batch.get("jets").unwrap(), "x");
    assert_eq!(jets, i32s(batch.get("tracks").unwrap(), "x"));

    let mut sorted = jets.clone();
    sorted.sort();
    assert_ne!(jets, sorted);
    assert_eq!(sorted, (0..60).chain(1000..1030).collect::<Vec<_>>());
    let again = reader.load(&variables, None, None).unwrap();
    assert_eq!(i32s(again.get("jets").unwrap(), "x"), jets);
}

#[test]
fn invalid_weights_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let a = numbered(dir.path(), "a", 0..10);
    let b = numbered(dir.path(), "b", 0..10);
    let cases = [
        vec![1.0],
        vec![1.0, 0.0],
        vec![1.0, -0.5],
        vec![1.0, 0.01],
        vec![f64::NAN, 1.0],
    ];
    for weights in cases {
        let result = config(&[&a, &b], 20).with_weights(weights.clone()).open();
        assert!(
            matches!(result, Err(Error::InvalidWeights(_))),
            "{weights:?}"
        );
    }
}

#[test]
fn track_selection_on_read_tracks() {
    let dir = tempfile::tempdir().unwrap();
    let src = mock(dir.path(), "sample", 40, 6);
    let reader = open(&[&src], 16);
    let tracks = reader.load(&Variables::all("tracks"), None, None).unwrap();
    let tracks = tracks.get("tracks").unwrap();

    let cuts = Cuts::from_list(["numberOfPixelHits >= 3"]).unwrap();
    let selected = TrackSelector::new(cuts).apply(tracks).unwrap();
    assert_eq!(selected.num_rows(), 40);

    let leaves = |batch: &RecordBatch, column: &str| {
        batch
            .column_by_name(column)
            .unwrap()
            .as_fixed_size_list()
            .values()
            .clone()
    };
    let hits = leaves(&selected, "numberOfPixelHits");
    let hits = hits.as_primitive::<arrow::datatypes::Int32Type>();
    let valid = leaves(&selected, "valid");
    let valid = valid.as_boolean();
    let d0 = leaves(&selected, "d0");
    let d0 = d0.as_primitive::<arrow::datatypes::Float32Type>();
    let before = leaves(tracks, "valid");
    let before = before.as_boolean();
    assert!(valid.true_count() < before.true_count());
    for i in 0..valid.len() {
        if valid.value(i) {
            assert!(hits.value(i) >= 3);
        } else if before.value(i) {
            assert_eq!(hits.value(i), -1);
            assert!(d0.value(i).is_nan());
        }
    }
}

#[test]
fn labels_for_read_jets() {
    let dir = tempfile::tempdir().unwrap();
    let src = mock(dir.path(), "sample", 200, 8);
    let reader = open(&[&src], 64);
    let flavours = LabelContainer::flavours().unwrap();
    let names = ["bjets", "cjets", "ujets", "taujets"];
    let labeller = Labeller::from_names(&flavours, &names, true).unwrap();

    let variables = Variables::new().with_columns("jets", ["HadronConeExclTruthLabelID", "pt"]);
    let batch = reader.load(&variables, None, None).unwrap();
    let jets = labeller.add_labels(batch.get("jets").unwrap(), LABELS_COLUMN).unwrap();
    let ids = i32s(&jets, "HadronConeExclTruthLabelID");
    let classes = i32s(&jets, LABELS_COLUMN);
    let expected: Vec<i32> = ids
        .iter()
        .map(|id| [5, 4, 0, 15].iter().position(|x| x == id).unwrap() as i32)
        .collect();
    assert_eq!(classes, expected);
}
