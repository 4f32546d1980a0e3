/*!
# Flat draw tables and their reshaping into labeled arrays

The engine hands back one scalar column per parameter cell, labeled
`name[i,j,...]` with 1-based indices. This module regroups those columns by
base name into N-dimensional arrays whose first axis is the draw and whose
remaining axes follow the bracket indices in their original order.

## Example

```rust
use mlnfit::reshape::{reshape, DrawTable};
use ndarray::arr2;

let table = DrawTable::new(
    vec!["lp__".into(), "B[1,1]".into(), "B[2,1]".into(), "B[1,2]".into(), "B[2,2]".into()],
    arr2(&[[-1.0, 11.0, 21.0, 12.0, 22.0], [-2.0, 11.5, 21.5, 12.5, 22.5]]),
)?;
let arrays = reshape(&table, None)?;

assert_eq!(arrays["B"].shape(), &[2, 2, 2]);
assert_eq!(arrays["B"][[1, 0, 1]], 12.5);
assert_eq!(arrays["lp__"].shape(), &[2]);
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use ndarray::{Array2, ArrayD, ArrayView1, ArrayView2, Axis, Dimension, IxDyn};

use crate::error::ReshapeError;

/// A flat table of draws: one row per draw, one column per scalar label.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawTable {
    columns: Vec<String>,
    values: Array2<f64>,
    chain_ids: Option<Vec<usize>>,
}

impl DrawTable {
    /// Builds a table from column labels and a `[draws, columns]` value matrix.
    ///
    /// Fails if the label count does not match the number of value columns or
    /// if a label is repeated.
    pub fn new(columns: Vec<String>, values: Array2<f64>) -> Result<Self, ReshapeError> {
        if columns.len() != values.ncols() {
            return Err(ReshapeError::ShapeMismatch {
                columns: columns.len(),
                values: values.ncols(),
            });
        }
        let mut seen = HashSet::with_capacity(columns.len());
        for label in &columns {
            if !seen.insert(label.as_str()) {
                return Err(ReshapeError::DuplicateColumn(label.clone()));
            }
        }
        Ok(Self {
            columns,
            values,
            chain_ids: None,
        })
    }

    /// Attaches the (1-based) chain id of every row.
    pub fn with_chain_ids(mut self, chain_ids: Vec<usize>) -> Result<Self, ReshapeError> {
        if chain_ids.len() != self.n_draws() {
            return Err(ReshapeError::ChainIds {
                rows: self.n_draws(),
                ids: chain_ids.len(),
            });
        }
        self.chain_ids = Some(chain_ids);
        Ok(self)
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }

    pub fn chain_ids(&self) -> Option<&[usize]> {
        self.chain_ids.as_deref()
    }

    pub fn n_draws(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    /// Returns the values of one column, if the label exists.
    pub fn column(&self, label: &str) -> Option<ArrayView1<'_, f64>> {
        self.columns
            .iter()
            .position(|c| c == label)
            .map(|i| self.values.column(i))
    }

    /// Drops the first `n` rows (and their chain ids).
    pub fn skip_rows(&self, n: usize) -> Self {
        let n = n.min(self.n_draws());
        Self {
            columns: self.columns.clone(),
            values: self.values.slice(ndarray::s![n.., ..]).to_owned(),
            chain_ids: self.chain_ids.as_ref().map(|ids| ids[n..].to_vec()),
        }
    }
}

/// A column label split into its base name and 1-based index tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParamLabel {
    pub base: String,
    pub indices: Vec<usize>,
}

impl ParamLabel {
    pub fn arity(&self) -> usize {
        self.indices.len()
    }
}

impl fmt::Display for ParamLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.indices.is_empty() {
            return write!(f, "{}", self.base);
        }
        let joined: Vec<String> = self.indices.iter().map(|i| i.to_string()).collect();
        write!(f, "{}[{}]", self.base, joined.join(","))
    }
}

/**
Splits a label of the form `name` or `name[i1,i2,...]` into a [`ParamLabel`].

Whitespace around the label and around each index is ignored.

# Errors

- [`ReshapeError::MalformedLabel`] for an empty name, unbalanced or nested
  brackets, trailing text after `]`, or an index that is not a non-negative
  integer.
- [`ReshapeError::ZeroIndex`] if any index is 0.

# Examples

```rust
use mlnfit::reshape::parse_label;

let label = parse_label("Sigma[2, 3]")?;
assert_eq!(label.base, "Sigma");
assert_eq!(label.indices, vec![2, 3]);
assert!(parse_label("lp__")?.indices.is_empty());
assert!(parse_label("B[1,").is_err());
# Ok::<(), mlnfit::error::ReshapeError>(())
```
*/
pub fn parse_label(label: &str) -> Result<ParamLabel, ReshapeError> {
    let malformed = || ReshapeError::MalformedLabel(label.to_string());
    let trimmed = label.trim();

    let Some(open) = trimmed.find('[') else {
        if trimmed.is_empty() || trimmed.contains(']') {
            return Err(malformed());
        }
        return Ok(ParamLabel {
            base: trimmed.to_string(),
            indices: Vec::new(),
        });
    };

    let base = trimmed[..open].trim_end();
    let inner = trimmed[open + 1..]
        .strip_suffix(']')
        .ok_or_else(malformed)?;
    if base.is_empty() || base.contains(']') || inner.contains(['[', ']']) {
        return Err(malformed());
    }

    let indices = inner
        .split(',')
        .map(|s| s.trim().parse::<usize>().map_err(|_| malformed()))
        .collect::<Result<Vec<_>, _>>()?;
    if indices.contains(&0) {
        return Err(ReshapeError::ZeroIndex(label.to_string()));
    }

    Ok(ParamLabel {
        base: base.to_string(),
        indices,
    })
}

/// Rewrites CmdStan's dotted labels (`B.1.2`) into bracket form (`B[1,2]`).
///
/// Labels that already use brackets, or whose dotted suffixes are not all
/// integers, are returned unchanged.
pub fn normalize_cmdstan_label(label: &str) -> String {
    let label = label.trim();
    if label.contains('[') {
        return label.to_string();
    }
    let mut parts = label.split('.');
    let base = parts.next().unwrap_or_default();
    let rest: Vec<&str> = parts.collect();
    if base.is_empty() || rest.is_empty() || !rest.iter().all(|p| p.parse::<usize>().is_ok()) {
        return label.to_string();
    }
    format!("{}[{}]", base, rest.join(","))
}

/**
Regroups the columns of a [`DrawTable`] into one array per base name.

Each output array has shape `[draws, extent_1, ..., extent_k]`, where
`extent_j` is the largest index found on axis `j` among that base name's
columns. Element `[d, i - 1, j - 1]` of `B` holds column `B[i,j]` at draw `d`.
Columns without brackets become 1-axis arrays. Cells not covered by any
column are `NaN`.

If `selected` is given, only base names in it are kept.

# Errors

- Any malformed label.
- [`ReshapeError::ArityMismatch`] when two columns of the same base name
  disagree on the number of indices.
- [`ReshapeError::DuplicateColumn`] when two labels name the same cell
  (`B[1]` and `B[01]`).
- [`ReshapeError::TooLarge`] when the indices span far more cells than
  there are columns to fill them.
*/
pub fn reshape(
    table: &DrawTable,
    selected: Option<&[&str]>,
) -> Result<BTreeMap<String, ArrayD<f64>>, ReshapeError> {
    let mut groups: BTreeMap<String, Vec<(usize, Vec<usize>)>> = BTreeMap::new();
    let mut cells: HashSet<ParamLabel> = HashSet::with_capacity(table.n_columns());

    for (col, label) in table.columns.iter().enumerate() {
        let parsed = parse_label(label)?;
        if let Some(names) = selected {
            if !names.contains(&parsed.base.as_str()) {
                continue;
            }
        }
        // `B[1]` and `B[01]` are different strings but the same cell.
        if !cells.insert(parsed.clone()) {
            return Err(ReshapeError::DuplicateColumn(label.clone()));
        }
        let ParamLabel { base, indices } = parsed;
        let members = groups.entry(base.clone()).or_default();
        if let Some((_, first)) = members.first() {
            if first.len() != indices.len() {
                return Err(ReshapeError::ArityMismatch {
                    name: base,
                    label: label.clone(),
                    expected: first.len(),
                    found: indices.len(),
                });
            }
        }
        members.push((col, indices));
    }

    let n_draws = table.n_draws();
    let mut out = BTreeMap::new();
    for (name, members) in groups {
        let arity = members.first().map_or(0, |(_, idx)| idx.len());
        let extents: Vec<usize> = (0..arity)
            .map(|k| members.iter().map(|(_, idx)| idx[k]).max().unwrap_or(0))
            .collect();
        check_extents(&name, &extents, members.len(), n_draws)?;
        let mut shape = Vec::with_capacity(arity + 1);
        shape.push(n_draws);
        shape.extend_from_slice(&extents);

        let mut array = ArrayD::from_elem(IxDyn(&shape), f64::NAN);
        for (col, idx) in &members {
            let mut cell = array.view_mut();
            // Fixing axis 1 each time walks down the index tuple in order.
            for &i in idx {
                cell = cell.index_axis_move(Axis(1), i - 1);
            }
            cell.assign(&table.values.column(*col));
        }
        out.insert(name, array);
    }
    Ok(out)
}

/// Largest number of cells a parameter may span per column that fills it.
const MAX_CELLS_PER_COLUMN: usize = 64;

/// Rejects groups whose array would be mostly `NaN` or would not fit in memory.
fn check_extents(
    name: &str,
    extents: &[usize],
    columns: usize,
    n_draws: usize,
) -> Result<(), ReshapeError> {
    let too_large = || ReshapeError::TooLarge {
        name: name.to_string(),
        extents: extents.to_vec(),
        columns,
    };
    let cells = extents
        .iter()
        .try_fold(1usize, |acc, &e| acc.checked_mul(e))
        .ok_or_else(too_large)?;
    if cells > columns.saturating_mul(MAX_CELLS_PER_COLUMN) {
        return Err(too_large());
    }
    let bytes = cells
        .checked_mul(n_draws.max(1))
        .and_then(|n| n.checked_mul(std::mem::size_of::<f64>()))
        .ok_or_else(too_large)?;
    if bytes > isize::MAX as usize {
        return Err(too_large());
    }
    Ok(())
}

/**
Flattens labeled arrays back into a [`DrawTable`].

Base names are emitted in sorted order. Within a base name, cells are
emitted in column-major index order (first index varies fastest), which is
the order the engine itself writes.

# Errors

[`ReshapeError::DrawCountMismatch`] if the arrays disagree on the length of
the draw axis, or if an array has no draw axis at all.
*/
pub fn flatten(arrays: &BTreeMap<String, ArrayD<f64>>) -> Result<DrawTable, ReshapeError> {
    let n_draws = arrays.values().next().map_or(0, |a| a.shape().first().copied().unwrap_or(0));

    let mut columns = Vec::new();
    let mut sources = Vec::new();
    for (name, array) in arrays {
        match array.shape().first() {
            Some(&n) if n == n_draws => {}
            found => {
                return Err(ReshapeError::DrawCountMismatch {
                    name: name.clone(),
                    expected: n_draws,
                    found: found.copied().unwrap_or(0),
                })
            }
        }
        let reversed: Vec<usize> = array.shape()[1..].iter().rev().copied().collect();
        for rev_idx in ndarray::indices(IxDyn(&reversed)) {
            let zero_based: Vec<usize> = rev_idx.slice().iter().rev().copied().collect();
            let label = ParamLabel {
                base: name.clone(),
                indices: zero_based.iter().map(|i| i + 1).collect(),
            };
            columns.push(label.to_string());
            sources.push((array, zero_based));
        }
    }

    let mut values = Array2::<f64>::zeros((n_draws, columns.len()));
    for (col, (array, idx)) in sources.into_iter().enumerate() {
        let mut cell = array.view();
        for &i in &idx {
            cell = cell.index_axis_move(Axis(1), i);
        }
        values.column_mut(col).assign(&cell);
    }

    DrawTable::new(columns, values)
}
