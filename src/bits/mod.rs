//! Bit-granular binary codec: every header field is packed to its exact bit width rather
//!  than rounded up to whole bytes.

pub mod bit_vector;
pub mod bit_reader;
pub mod bit_writer;
