pub mod block_reader;
pub mod buffer;
pub mod commands;
pub mod comparer;
pub mod config;
pub mod error;
pub mod rolling;
pub mod signature;
pub mod streams;
pub mod strong;

pub use commands::{CommandList, DeltaCommand, Source};
pub use comparer::compare;
pub use error::{Error, Result};
pub use signature::{build_signature, SignatureEntry, SignatureTable};
pub use streams::{ReconstructedPart, Stream};
