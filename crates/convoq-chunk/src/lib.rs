//! Deterministic chunking of parsed document spans.
//!
//! Text spans are split on sentence boundaries with a configurable trailing
//! overlap carried onto the next chunk. Table rows are atomic: a row is never
//! split across chunks, and consecutive rows from the same sheet are packed
//! together until the token budget is reached.

mod splitter;

pub use splitter::SpanChunker;
