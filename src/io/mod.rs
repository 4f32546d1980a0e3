/*!
# Reading engine output and saving draw tables

- [`csv`]: parse CmdStan CSV output into a [`DrawTable`](crate::reshape::DrawTable)
  and save draw tables as CSV.
- `arrow` (feature `arrow`): save draw tables as Arrow IPC files.
- `parquet` (feature `parquet`): save draw tables as Parquet files.
*/

#[cfg(feature = "arrow")]
pub mod arrow;

pub mod csv;

#[cfg(feature = "parquet")]
pub mod parquet;
