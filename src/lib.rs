/*!
# mlnfit

Fit multinomial logistic-normal (MLN) regression models through a compiled
CmdStan model and get the draws back as labeled N-dimensional arrays.

The crate does not implement inference itself. It prepares the data payload
and initial values, picks the model executable for the requested
parameterization, runs the engine, and reshapes the flat draw table it
writes (`B[1,1]`, `B[2,1]`, ...) into one array per parameter, with run
metadata (timing, effective sample size, error against known truth).

## Modules

- [`reshape`]: flat draw tables and the label-driven reshaper.
- [`io`]: reading CmdStan CSV output; saving draw tables.
- [`config`], [`data`], [`init`]: what goes into the engine.
- [`engine`]: the engine boundary and the CmdStan driver.
- [`stats`]: ESS and R-hat.
- [`fit`]: the end-to-end pipeline and its result record.
- [`simulate`]: synthetic datasets with ground truth.
*/

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod fit;
pub mod init;
pub mod io;
pub mod reshape;
pub mod simulate;
pub mod stats;
