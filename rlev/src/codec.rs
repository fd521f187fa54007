use crate::token::Token;

/// Encode `src` into `dst`, returning the number of slots written.
///
/// Single left-to-right scan: non-zero elements are copied verbatim, maximal
/// zero runs collapse per [`Token::for_zero_run`]. `dst` must hold at least
/// `src.len()` slots; an encoding is never longer than its dense source.
pub fn compress(src: &[f64], dst: &mut [f64]) -> usize {
    let mut r = 0;
    let mut w = 0;
    while r < src.len() {
        if src[r] != 0.0 {
            dst[w] = src[r];
            r += 1;
            w += 1;
            continue;
        }

        let z = r;
        r += 1;
        while r < src.len() && src[r] == 0.0 {
            r += 1;
        }
        dst[w] = Token::for_zero_run((r - z) as u64).to_f64();
        w += 1;
    }
    w
}

/// Bounded, resumable encode: stop once `dst` is full and report
/// `(consumed, written)` so a later call can pick up at `src[consumed..]`.
///
/// A zero run is always consumed in full; the marker occupies one slot
/// regardless of the run length, so capacity is only checked per token.
pub fn compress_bounded(src: &[f64], dst: &mut [f64]) -> (usize, usize) {
    let mut r = 0;
    let mut w = 0;
    while r < src.len() && w < dst.len() {
        if src[r] != 0.0 {
            dst[w] = src[r];
            r += 1;
            w += 1;
            continue;
        }

        let z = r;
        r += 1;
        while r < src.len() && src[r] == 0.0 {
            r += 1;
        }
        dst[w] = Token::for_zero_run((r - z) as u64).to_f64();
        w += 1;
    }
    (r, w)
}

/// Expand an encoded vector into `dst`, returning the number of elements
/// written. Always succeeds given a `dst` large enough for the expansion.
pub fn decompress(src: &[f64], dst: &mut [f64]) -> usize {
    let mut w = 0;
    for &slot in src {
        match Token::from_f64(slot) {
            Token::Literal(v) => {
                dst[w] = v;
                w += 1;
            }
            Token::Run(len) => {
                let len = len as usize;
                dst[w..w + len].fill(0.0);
                w += len;
            }
        }
    }
    w
}

/// Number of dense elements an encoded vector expands to.
pub fn decoded_len(src: &[f64]) -> usize {
    src.iter().map(|&slot| Token::from_f64(slot).span()).sum()
}
