//! Run-length zero compression for double-precision vectors.
//!
//! The wire form of an encoded vector is still a sequence of `f64` slots.
//! Non-zero (and isolated zero) elements travel verbatim as literals; a run
//! of two or more zeros collapses into a single *run marker*, an `f64` slot
//! whose exponent bits are all set and whose 52 mantissa bits carry the run
//! length. Input vectors must be finite, so markers can never collide with
//! payload data.
//!
//! On top of the codec sits a streaming merge-add engine: elementwise sums
//! of mixed dense/encoded operands inside bounded output buffers, resumable
//! across packet boundaries via a [`RunCarry`].

mod codec;
mod merge;
mod token;

pub use codec::{compress, compress_bounded, decoded_len, decompress};
pub use merge::{merge_add_in_place, merge_add_stream, InPlaceMode, MergeSplit, RunCarry, TailMerge};
pub use token::{Token, MAX_RUN_LEN};
