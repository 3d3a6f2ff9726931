//! Payload pipeline: result extraction, TOON compression, and schema
//! rendering for diagnostic text.

pub mod compress;
pub mod extract;
pub mod schema_ts;
pub mod toon;

pub use compress::ToonCompressor;
pub use extract::{Payload, extract_call_result};
