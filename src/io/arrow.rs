/*!
# Arrow IPC output for draw tables

Enable via the `arrow` feature. The schema is a `draw` column (UInt32,
1-based), an optional `chain` column (UInt32) and one Float64 column per
parameter label.
*/

use std::error::Error;
use std::fs::File;
use std::sync::Arc;

use arrow::{
    array::{ArrayRef, Float64Builder, UInt32Builder},
    datatypes::{DataType, Field, Schema},
    error::ArrowError,
    ipc::writer::FileWriter,
    record_batch::RecordBatch,
};

use crate::reshape::DrawTable;

/// Converts a draw table into a single record batch and its schema.
pub(crate) fn record_batch(table: &DrawTable) -> Result<(Arc<Schema>, RecordBatch), ArrowError> {
    let chain_ids = table.chain_ids();

    let mut fields = vec![Field::new("draw", DataType::UInt32, false)];
    if chain_ids.is_some() {
        fields.push(Field::new("chain", DataType::UInt32, false));
    }
    for label in table.columns() {
        fields.push(Field::new(label.as_str(), DataType::Float64, false));
    }
    let schema = Arc::new(Schema::new(fields));

    let mut draw_builder = UInt32Builder::new();
    let mut chain_builder = UInt32Builder::new();
    let mut value_builders: Vec<Float64Builder> =
        (0..table.n_columns()).map(|_| Float64Builder::new()).collect();

    for (draw_idx, draw) in table.values().outer_iter().enumerate() {
        draw_builder.append_value(draw_idx as u32 + 1);
        if let Some(ids) = chain_ids {
            chain_builder.append_value(ids[draw_idx] as u32);
        }
        for (builder, value) in value_builders.iter_mut().zip(draw.iter()) {
            builder.append_value(*value);
        }
    }

    let mut arrays = vec![Arc::new(draw_builder.finish()) as ArrayRef];
    if chain_ids.is_some() {
        arrays.push(Arc::new(chain_builder.finish()) as ArrayRef);
    }
    for mut builder in value_builders {
        arrays.push(Arc::new(builder.finish()) as ArrayRef);
    }

    let batch = RecordBatch::try_new(schema.clone(), arrays)?;
    Ok((schema, batch))
}

/// Saves a draw table as an Apache Arrow (IPC) file.
///
/// An empty table still produces a valid file holding one zero-row batch.
pub fn save_arrow(table: &DrawTable, filename: &str) -> Result<(), Box<dyn Error>> {
    let (schema, batch) = record_batch(table)?;

    let file = File::create(filename)?;
    let mut writer = FileWriter::try_new(file, &schema)?;
    writer.write(&batch)?;
    writer.finish()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Float64Array, UInt32Array};
    use arrow::ipc::reader::FileReader;
    use ndarray::{arr2, Array2};
    use tempfile::NamedTempFile;

    #[test]
    fn test_save_arrow_empty_table() -> Result<(), Box<dyn Error>> {
        let table = DrawTable::new(vec![], Array2::zeros((0, 0)))?;
        let file = NamedTempFile::new()?;
        let filename = file.path().to_str().unwrap();

        save_arrow(&table, filename)?;

        let mut reader = FileReader::try_new(File::open(filename)?, None)?;
        let batch = reader.next().expect("No record batch found")?;
        assert_eq!(batch.num_rows(), 0);
        assert_eq!(batch.num_columns(), 1);
        assert!(reader.next().is_none());
        Ok(())
    }

    #[test]
    fn test_save_arrow_with_chains() -> Result<(), Box<dyn Error>> {
        let table = DrawTable::new(
            vec!["lp__".into(), "B[1,1]".into()],
            arr2(&[[-1.0, 0.5], [-2.0, 0.75], [-3.0, 1.25]]),
        )?
        .with_chain_ids(vec![1, 1, 2])?;
        let file = NamedTempFile::new()?;
        let filename = file.path().to_str().unwrap();

        save_arrow(&table, filename)?;

        let mut reader = FileReader::try_new(File::open(filename)?, None)?;
        let batch = reader.next().expect("No record batch found")?;
        assert_eq!(batch.num_rows(), 3);
        assert_eq!(batch.schema().field(3).name(), "B[1,1]");

        let draws = batch.column(0).as_any().downcast_ref::<UInt32Array>().unwrap();
        let chains = batch.column(1).as_any().downcast_ref::<UInt32Array>().unwrap();
        let b = batch.column(3).as_any().downcast_ref::<Float64Array>().unwrap();
        assert_eq!(draws.values().to_vec(), vec![1, 2, 3]);
        assert_eq!(chains.values().to_vec(), vec![1, 1, 2]);
        assert_eq!(b.values().to_vec(), vec![0.5, 0.75, 1.25]);
        Ok(())
    }
}
