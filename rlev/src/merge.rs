//! Streaming elementwise-sum merges over mixed dense/encoded operands.
//!
//! Two entry points cover the six operator shapes the schedulers need:
//!
//! * [`merge_add_in_place`]: whole-packet merges whose output lands inside
//!   the first operand's own buffer, either packed backward at the tail,
//!   expanded backward at the tail, or packed forward from the front.
//! * [`merge_add_stream`]: capacity-bounded forward merges into a separate
//!   buffer, resumable across calls through a [`RunCarry`].
//!
//! Wherever the encoded operand holds a run marker of length `k`, the merge
//! adds the next `k` elements of the dense operand unchanged (summing with
//! zero is the identity) and re-collapses any zero run it meets while doing
//! so. Literal slots are added elementwise; a literal sum is written as-is
//! even when it happens to be zero, which the decoder copes with.

use crate::token::Token;

/// Output placement for [`merge_add_in_place`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InPlaceMode {
    /// encoded ⊕ dense → encoded, written backward into `buf[..cap]`.
    PackTail,
    /// encoded ⊕ dense → dense, written backward into `buf[..cap]`.
    UnpackTail,
    /// dense ⊕ encoded → dense, written backward into `buf[..cap]`; with
    /// `cap == len0` this is an in-place accumulate over the dense operand.
    DenseUnpackTail,
    /// dense ⊕ dense → encoded, written forward from `buf[0]`; `cap` is
    /// ignored. The write cursor trails the read cursors, so the first
    /// operand doubles as the output buffer.
    PackForward,
}

/// Result of an in-place merge: the output occupies `buf[start..start + len]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailMerge {
    pub start: usize,
    pub len: usize,
}

/// Unfinished run marker left over when a bounded merge ran out of output
/// capacity (or dense input) mid-run. Must be threaded into the next call on
/// the same logical stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunCarry(u64);

impl RunCarry {
    #[inline]
    pub fn new() -> Self {
        RunCarry(0)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    fn take(&mut self) -> u64 {
        std::mem::take(&mut self.0)
    }

    #[inline]
    fn put(&mut self, remaining: u64) {
        self.0 = remaining;
    }
}

/// Consumed/written accounting of one bounded streaming merge call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeSplit {
    /// Encoded slots consumed from the first operand.
    pub consumed0: usize,
    /// Dense elements consumed from the second operand.
    pub consumed1: usize,
    /// Output slots written.
    pub written: usize,
}

/// Merge the operand held in `buf` with `other`, placing the result inside
/// `buf[..cap]` as described by `mode`.
///
/// `buf[..len0]` holds the first operand (encoded or dense per `mode`);
/// `other` is the second operand, dense except for `DenseUnpackTail` where
/// it is encoded. Backward modes require `cap >= len0`: writes proceed from
/// `buf[cap - 1]` downward and stay strictly behind the unread portion of
/// both inputs, because an encoding is never longer than the dense vector it
/// replaces.
pub fn merge_add_in_place(mode: InPlaceMode, buf: &mut [f64], len0: usize, other: &[f64], cap: usize) -> TailMerge {
    match mode {
        InPlaceMode::PackTail => pack_tail(buf, len0, other, cap),
        InPlaceMode::UnpackTail => unpack_tail(buf, len0, other, cap),
        InPlaceMode::DenseUnpackTail => dense_unpack_tail(buf, len0, other, cap),
        InPlaceMode::PackForward => pack_forward(buf, len0, other),
    }
}

/// encoded ⊕ dense → encoded at the tail of `buf`.
fn pack_tail(buf: &mut [f64], enc_len: usize, dense: &[f64], cap: usize) -> TailMerge {
    debug_assert!(enc_len <= cap && cap <= buf.len());

    let total = dense.len();
    let mut r0 = enc_len; // backward read cursor, one past the next token
    let mut r1 = total; // backward read cursor into `dense`
    let mut w = cap; // backward write cursor, one past the next slot
    let mut m = 0; // dense elements covered so far, counted from the high end

    while m < total {
        debug_assert!(w >= r0, "write cursor overtook unread encoded input");
        match Token::from_f64(buf[r0 - 1]) {
            Token::Literal(v) => {
                r0 -= 1;
                r1 -= 1;
                w -= 1;
                buf[w] = v + dense[r1];
                m += 1;
            }
            Token::Run(len) => {
                r0 -= 1;
                let n = m + len as usize;
                while m < n {
                    if dense[r1 - 1] != 0.0 {
                        r1 -= 1;
                        w -= 1;
                        buf[w] = dense[r1];
                        m += 1;
                        continue;
                    }
                    let m0 = m;
                    r1 -= 1;
                    m += 1;
                    while m < n && dense[r1 - 1] == 0.0 {
                        r1 -= 1;
                        m += 1;
                    }
                    w -= 1;
                    buf[w] = Token::for_zero_run((m - m0) as u64).to_f64();
                }
            }
        }
    }

    TailMerge { start: w, len: cap - w }
}

/// encoded ⊕ dense → dense at the tail of `buf`; writes exactly
/// `dense.len()` elements ending at `buf[cap - 1]`.
fn unpack_tail(buf: &mut [f64], enc_len: usize, dense: &[f64], cap: usize) -> TailMerge {
    debug_assert!(enc_len <= cap && cap <= buf.len() && dense.len() <= cap);

    let total = dense.len();
    let mut r0 = enc_len;
    let mut r1 = total;
    let mut w = cap;
    let mut m = 0;

    while m < total {
        debug_assert!(w >= r0, "write cursor overtook unread encoded input");
        match Token::from_f64(buf[r0 - 1]) {
            Token::Literal(v) => {
                r0 -= 1;
                r1 -= 1;
                w -= 1;
                buf[w] = v + dense[r1];
                m += 1;
            }
            Token::Run(len) => {
                r0 -= 1;
                let n = m + len as usize;
                while m < n {
                    r1 -= 1;
                    w -= 1;
                    buf[w] = dense[r1];
                    m += 1;
                }
            }
        }
    }

    TailMerge { start: w, len: cap - w }
}

/// dense ⊕ encoded → dense at the tail of `buf`. The dense operand lives in
/// `buf[..len0]` and the encoded one is read backward from `enc`.
fn dense_unpack_tail(buf: &mut [f64], len0: usize, enc: &[f64], cap: usize) -> TailMerge {
    debug_assert!(len0 <= cap && cap <= buf.len());

    let mut r0 = len0;
    let mut r1 = enc.len();
    let mut w = cap;
    let mut m = 0;

    while m < len0 {
        match Token::from_f64(enc[r1 - 1]) {
            Token::Literal(v) => {
                r1 -= 1;
                r0 -= 1;
                w -= 1;
                buf[w] = buf[r0] + v;
                m += 1;
            }
            Token::Run(len) => {
                r1 -= 1;
                let n = m + len as usize;
                while m < n {
                    r0 -= 1;
                    w -= 1;
                    buf[w] = buf[r0];
                    m += 1;
                }
            }
        }
    }

    TailMerge { start: w, len: cap - w }
}

/// dense ⊕ dense → encoded, forward over `buf[..len0]`. The write cursor
/// never passes the read cursor, so the sum can be packed in place.
fn pack_forward(buf: &mut [f64], len0: usize, dense: &[f64]) -> TailMerge {
    debug_assert!(dense.len() >= len0);

    let mut r = 0;
    let mut w = 0;
    while r < len0 {
        let v = buf[r] + dense[r];
        r += 1;
        if v != 0.0 {
            buf[w] = v;
            w += 1;
            continue;
        }

        let z = r - 1;
        while r < len0 && buf[r] + dense[r] == 0.0 {
            r += 1;
        }
        buf[w] = Token::for_zero_run((r - z) as u64).to_f64();
        w += 1;
    }

    TailMerge { start: 0, len: w }
}

/// Bounded forward merge of `enc` (encoded) with `dense` into `out`,
/// resumable through `carry`.
///
/// With `pack` the output is re-encoded; otherwise it is dense. The call
/// stops at whichever runs out first: encoded input, dense input, or output
/// capacity. A run marker whose expansion does not fit has its consumed part
/// emitted and the remainder parked in `carry`; the next call drains the
/// carry before reading further tokens. Capacity 0 consumes and writes
/// nothing.
pub fn merge_add_stream(pack: bool, enc: &[f64], dense: &[f64], out: &mut [f64], carry: &mut RunCarry) -> MergeSplit {
    let mut acc = MergeSplit::default();
    let mut r1 = 0;
    let mut w = 0;

    let pending = carry.take();
    if pending > 0 {
        let left = run_region(pack, pending, dense, &mut r1, out, &mut w);
        carry.put(left);
    }

    let mut r0 = 0;
    while r0 < enc.len() && r1 < dense.len() && w < out.len() {
        match Token::from_f64(enc[r0]) {
            Token::Literal(v) => {
                out[w] = v + dense[r1];
                r0 += 1;
                r1 += 1;
                w += 1;
            }
            Token::Run(len) => {
                r0 += 1;
                let left = run_region(pack, len, dense, &mut r1, out, &mut w);
                carry.put(left);
            }
        }
    }

    acc.consumed0 = r0;
    acc.consumed1 = r1;
    acc.written = w;
    acc
}

/// Expand (the remainder of) a zero run against `dense`, emitting packed
/// tokens or dense elements; returns the run length still outstanding.
fn run_region(pack: bool, len: u64, dense: &[f64], r1: &mut usize, out: &mut [f64], w: &mut usize) -> u64 {
    let mut n = len;

    if pack {
        while n > 0 && *r1 < dense.len() && *w < out.len() {
            if dense[*r1] != 0.0 {
                out[*w] = dense[*r1];
                *r1 += 1;
                *w += 1;
                n -= 1;
                continue;
            }
            let z = *r1;
            *r1 += 1;
            n -= 1;
            while n > 0 && *r1 < dense.len() && dense[*r1] == 0.0 {
                *r1 += 1;
                n -= 1;
            }
            out[*w] = Token::for_zero_run((*r1 - z) as u64).to_f64();
            *w += 1;
        }
    } else {
        while n > 0 && *r1 < dense.len() && *w < out.len() {
            out[*w] = dense[*r1];
            *r1 += 1;
            *w += 1;
            n -= 1;
        }
    }

    n
}
