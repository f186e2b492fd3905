//! DRB (Data Radio Bearer) throughput sampling: pure, allocation-light
//! translations of the counter-realignment algorithms `xlte-collector`
//! drives from live eNB/gNB polling data. No I/O lives here.

mod bitsync;
mod qci_flow;
mod sample;
mod sampler;
mod splitter;

pub use bitsync::{BitSync, BitSync1, HarqMode, Unimplemented};
pub use qci_flow::QciFlow;
pub use sample::Sample;
pub use sampler::{CellObs, ErabObs, Sampler, UeTick, TTI};
pub use splitter::CtxBytesSplitter;
