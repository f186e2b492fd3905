//! Measurement/KPI value types: NA semantics, QCI-indexed arrays,
//! `MeasurementLog`, and the `Calc` windowed-KPI calculator.
//!
//! Kept free of I/O and async runtime dependencies so it can be reused by
//! anything that needs to reason about measurements without pulling in a
//! WebSocket client or a filesystem writer.

pub mod aggregate;
pub mod calc;
pub mod interval;
pub mod measurement;
pub mod mlog;
pub mod na;
pub mod stat;

pub use aggregate::{AggField, AggStat, AggStatT, Aggregate};
pub use calc::Calc;
pub use interval::Interval;
pub use measurement::Measurement;
pub use mlog::{AppendError, MeasurementLog};
pub use na::Na;
pub use stat::{QciArray, Stat, StatT};
