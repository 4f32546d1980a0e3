//! Properties of the label-driven reshaper on randomly filled tables.
//!
//! 1. `flatten(reshape(t))` reproduces every column of a dense, column-major table.
//! 2. Reshaping the flattened output gives back the same arrays.
//! 3. The worked `B[i,j]` example over three draws.

use mlnfit::reshape::{flatten, reshape, DrawTable};
use ndarray::{Array2, IxDyn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Dense table with `lp__`, a scalar `tau`, `mu[1..k]` and `B[1..r, 1..c]` in engine order.
fn dense_table(draws: usize, k: usize, r: usize, c: usize, seed: u64) -> DrawTable {
    let mut columns = vec!["lp__".to_string(), "tau".to_string()];
    columns.extend((1..=k).map(|i| format!("mu[{i}]")));
    for j in 1..=c {
        for i in 1..=r {
            columns.push(format!("B[{i},{j}]"));
        }
    }
    let mut rng = SmallRng::seed_from_u64(seed);
    let values = Array2::from_shape_simple_fn((draws, columns.len()), || rng.sample(StandardNormal));
    DrawTable::new(columns, values).expect("labels are unique")
}

#[test]
fn test_round_trip_reproduces_columns() {
    for seed in 0..5 {
        let table = dense_table(7, 3, 2, 4, seed);
        let flat = flatten(&reshape(&table, None).unwrap()).unwrap();
        assert_eq!(flat.n_draws(), table.n_draws());
        assert_eq!(flat.n_columns(), table.n_columns());
        for label in table.columns() {
            assert_eq!(
                flat.column(label).unwrap(),
                table.column(label).unwrap(),
                "column {label} differs after the round trip"
            );
        }
    }
}

#[test]
fn test_reshape_is_idempotent_on_flattened_output() {
    let table = dense_table(5, 4, 3, 3, 99);
    let once = reshape(&table, None).unwrap();
    let twice = reshape(&flatten(&once).unwrap(), None).unwrap();
    assert_eq!(once, twice);
}

#[test]
fn test_shapes_follow_largest_index() {
    let table = dense_table(6, 3, 2, 5, 1);
    let out = reshape(&table, None).unwrap();
    assert_eq!(out["lp__"].shape(), &[6]);
    assert_eq!(out["tau"].shape(), &[6]);
    assert_eq!(out["mu"].shape(), &[6, 3]);
    assert_eq!(out["B"].shape(), &[6, 2, 5]);
    assert!(out.values().all(|a| a.iter().all(|v| v.is_finite())));
}

#[test]
fn test_worked_matrix_example() {
    let columns: Vec<String> = ["B[1,1]", "B[2,1]", "B[1,2]", "B[2,2]"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let values = ndarray::arr2(&[
        [0.11, 0.21, 0.12, 0.22],
        [1.11, 1.21, 1.12, 1.22],
        [2.11, 2.21, 2.12, 2.22],
    ]);
    let table = DrawTable::new(columns, values).unwrap();
    let out = reshape(&table, None).unwrap();
    let b = &out["B"];
    assert_eq!(b.shape(), &[3, 2, 2]);
    for d in 0..3 {
        for i in 1..=2 {
            for j in 1..=2 {
                let expected = d as f64 + (10 * i + j) as f64 / 100.0;
                assert!((b[IxDyn(&[d, i - 1, j - 1])] - expected).abs() < 1e-12);
            }
        }
    }
}

#[test]
fn test_filter_keeps_only_named_parameters() {
    let table = dense_table(4, 2, 2, 2, 3);
    let out = reshape(&table, Some(&["B", "tau", "absent"])).unwrap();
    assert_eq!(out.keys().map(String::as_str).collect::<Vec<_>>(), vec!["B", "tau"]);

    let none = reshape(&table, Some(&[])).unwrap();
    assert!(none.is_empty());
}

#[test]
fn test_zero_draw_table() {
    let table = DrawTable::new(
        vec!["a[1]".into(), "a[2]".into()],
        Array2::zeros((0, 2)),
    )
    .unwrap();
    let out = reshape(&table, None).unwrap();
    assert_eq!(out["a"].shape(), &[0, 2]);
}
