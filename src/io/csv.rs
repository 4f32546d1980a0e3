/*!
# CSV input and output for draw tables

CmdStan writes one CSV file per chain. Lines starting with `#` carry the run
configuration, adaptation results and the elapsed-time block; everything
else is a header of dotted labels (`B.1.2`) followed by one row per draw.

[`read_stan_csv`] and [`read_stan_csv_chains`] turn such files into a
[`DrawTable`] with bracketed labels, and [`save_csv`] writes a draw table
back out with a leading `draw` column.
*/

use std::error::Error;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use csv::{ReaderBuilder, Writer};
use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::reshape::{normalize_cmdstan_label, DrawTable};

/// Wall-clock seconds CmdStan reports for one chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineTiming {
    pub warmup: f64,
    pub sampling: f64,
    pub total: f64,
}

/// A parsed CmdStan output file (or several chains concatenated).
#[derive(Debug, Clone, PartialEq)]
pub struct StanCsv {
    pub table: DrawTable,
    /// One entry per chain that reported an elapsed-time block.
    pub timings: Vec<EngineTiming>,
    pub comments: Vec<String>,
}

/// Reads a single CmdStan CSV file.
pub fn read_stan_csv<P: AsRef<Path>>(path: P) -> Result<StanCsv, EngineError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    parse_stan_csv(&text, path)
}

/**
Reads one CmdStan CSV file per chain and stacks their rows.

Rows keep the order of `paths`; row `r` of chain `k` (1-based, following
`paths`) gets chain id `k`. All files must share the same header.
*/
pub fn read_stan_csv_chains<P: AsRef<Path>>(paths: &[P]) -> Result<StanCsv, EngineError> {
    let mut columns: Option<Vec<String>> = None;
    let mut blocks = Vec::with_capacity(paths.len());
    let mut chain_ids = Vec::new();
    let mut timings = Vec::new();
    let mut comments = Vec::new();

    for (k, path) in paths.iter().enumerate() {
        let path = path.as_ref();
        let parsed = read_stan_csv(path)?;
        match &columns {
            None => columns = Some(parsed.table.columns().to_vec()),
            Some(expected) if expected.as_slice() != parsed.table.columns() => {
                return Err(bad_output(path, "header differs from the first chain"));
            }
            Some(_) => {}
        }
        chain_ids.extend(std::iter::repeat(k + 1).take(parsed.table.n_draws()));
        timings.extend(parsed.timings);
        comments.extend(parsed.comments);
        blocks.push(parsed.table.values().to_owned());
    }

    let columns = columns.unwrap_or_default();
    let views: Vec<_> = blocks.iter().map(|b| b.view()).collect();
    let values = if views.is_empty() {
        Array2::zeros((0, columns.len()))
    } else {
        ndarray::concatenate(Axis(0), &views)
            .map_err(|e| bad_output(Path::new(""), &e.to_string()))?
    };
    let table = DrawTable::new(columns, values)
        .and_then(|t| t.with_chain_ids(chain_ids))
        .map_err(|e| bad_output(Path::new(""), &e.to_string()))?;

    Ok(StanCsv {
        table,
        timings,
        comments,
    })
}

/// Parses the text of a CmdStan CSV file; `origin` is only used in error messages.
pub fn parse_stan_csv(text: &str, origin: &Path) -> Result<StanCsv, EngineError> {
    let comments: Vec<String> = text
        .lines()
        .filter(|l| l.trim_start().starts_with('#'))
        .map(|l| l.trim_start().trim_start_matches('#').trim().to_string())
        .collect();
    let timings = parse_timing(&comments).into_iter().collect();

    let mut rdr = ReaderBuilder::new()
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());
    let columns: Vec<String> = rdr
        .headers()?
        .iter()
        .map(normalize_cmdstan_label)
        .collect();
    if columns.is_empty() {
        return Err(bad_output(origin, "no header row"));
    }

    let mut flat = Vec::new();
    let mut n_rows = 0;
    for record in rdr.records() {
        let record = record?;
        for field in record.iter() {
            let value = field.parse::<f64>().map_err(|_| {
                bad_output(origin, &format!("row {}: `{}` is not a number", n_rows + 1, field))
            })?;
            flat.push(value);
        }
        n_rows += 1;
    }

    let values = Array2::from_shape_vec((n_rows, columns.len()), flat)
        .map_err(|e| bad_output(origin, &e.to_string()))?;
    let table = DrawTable::new(columns, values).map_err(|e| bad_output(origin, &e.to_string()))?;

    Ok(StanCsv {
        table,
        timings,
        comments,
    })
}

/// Extracts the `Elapsed Time` block, if all three lines are present.
fn parse_timing(comments: &[String]) -> Option<EngineTiming> {
    let mut warmup = None;
    let mut sampling = None;
    let mut total = None;
    for line in comments {
        let line = line.strip_prefix("Elapsed Time:").unwrap_or(line).trim();
        let mut tokens = line.split_whitespace();
        let (Some(value), Some("seconds"), Some(kind)) = (tokens.next(), tokens.next(), tokens.next())
        else {
            continue;
        };
        let Ok(value) = value.parse::<f64>() else {
            continue;
        };
        match kind {
            "(Warm-up)" => warmup = Some(value),
            "(Sampling)" => sampling = Some(value),
            "(Total)" => total = Some(value),
            _ => {}
        }
    }
    Some(EngineTiming {
        warmup: warmup?,
        sampling: sampling?,
        total: total?,
    })
}

fn bad_output(path: &Path, reason: &str) -> EngineError {
    EngineError::BadOutput {
        path: PathBuf::from(path),
        reason: reason.to_string(),
    }
}

/**
Saves a draw table as a CSV file.

The header row is `"draw"`, then `"chain"` if the table carries chain ids,
then one column per label. Draw numbers start at 1.

# Examples

```rust
use mlnfit::io::csv::save_csv;
use mlnfit::reshape::DrawTable;
use ndarray::arr2;

let table = DrawTable::new(vec!["mu".into(), "B[1,1]".into()], arr2(&[[0.5, 1.0], [0.6, 1.1]]))?;
save_csv(&table, "/tmp/mlnfit_draws.csv")?;
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/
pub fn save_csv(table: &DrawTable, filename: &str) -> Result<(), Box<dyn Error>> {
    let mut wtr = Writer::from_writer(File::create(filename)?);
    let chain_ids = table.chain_ids();

    let mut header: Vec<String> = vec!["draw".to_string()];
    if chain_ids.is_some() {
        header.push("chain".to_string());
    }
    header.extend(table.columns().iter().cloned());
    wtr.write_record(&header)?;

    for (draw_idx, draw) in table.values().axis_iter(Axis(0)).enumerate() {
        let mut row = vec![(draw_idx + 1).to_string()];
        if let Some(ids) = chain_ids {
            row.push(ids[draw_idx].to_string());
        }
        row.extend(draw.iter().map(|v| v.to_string()));
        wtr.write_record(&row)?;
    }

    wtr.flush()?;
    Ok(())
}
