/*!
# Parquet output for draw tables

Enable via the `parquet` feature. Uses the same schema as the Arrow writer.
*/

use std::error::Error;
use std::fs::File;

use parquet::{arrow::ArrowWriter, file::properties::WriterProperties};

use crate::io::arrow::record_batch;
use crate::reshape::DrawTable;

/// Saves a draw table to a Parquet file.
///
/// # Example
///
/// ```rust
/// # use mlnfit::io::parquet::save_parquet;
/// # use mlnfit::reshape::DrawTable;
/// let table = DrawTable::new(vec!["mu".into()], ndarray::arr2(&[[42.0]]))?;
/// save_parquet(&table, "/tmp/mlnfit_draws.parquet")?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn save_parquet(table: &DrawTable, filename: &str) -> Result<(), Box<dyn Error>> {
    let (schema, batch) = record_batch(table)?;

    let file = File::create(filename)?;
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;

    writer.write(&batch)?;
    // Metadata is only written on close.
    writer.close()?;

    Ok(())
}
