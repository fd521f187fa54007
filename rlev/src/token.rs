/// Exponent bits of an IEEE-754 double. All ones marks the NaN/Inf range,
/// which finite vector data never occupies.
const EXPONENT_MASK: u64 = 0x7FF0_0000_0000_0000;

/// The 52 mantissa bits, used as the run-length payload of a marker.
const FRACTION_MASK: u64 = 0x000F_FFFF_FFFF_FFFF;

/// Bit pattern of a run marker with a zero payload: sign and exponent bits
/// all set.
const RUN_TAG: u64 = !FRACTION_MASK;

/// Largest run length a single marker can carry.
pub const MAX_RUN_LEN: u64 = FRACTION_MASK;

/// One slot of an encoded vector.
///
/// The bit-level contract is explicit: (de)serialization goes through
/// [`Token::to_bits`]/[`Token::from_bits`] with plain 64-bit reinterpretation
/// and never through floating-point arithmetic, so a runtime that quiets or
/// canonicalizes NaNs cannot corrupt the payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Token {
    /// A finite value copied verbatim, possibly a literal `0.0`.
    Literal(f64),
    /// `len` consecutive zero elements, `len >= 2` in canonical encodings.
    Run(u64),
}

impl Token {
    /// Classify a raw 64-bit slot.
    #[inline]
    pub fn from_bits(bits: u64) -> Self {
        if bits & EXPONENT_MASK == EXPONENT_MASK {
            Token::Run(bits & FRACTION_MASK)
        } else {
            Token::Literal(f64::from_bits(bits))
        }
    }

    /// Serialize back into a raw 64-bit slot.
    #[inline]
    pub fn to_bits(self) -> u64 {
        match self {
            Token::Literal(v) => v.to_bits(),
            Token::Run(len) => RUN_TAG | (len & FRACTION_MASK),
        }
    }

    #[inline]
    pub fn from_f64(slot: f64) -> Self {
        Self::from_bits(slot.to_bits())
    }

    #[inline]
    pub fn to_f64(self) -> f64 {
        f64::from_bits(self.to_bits())
    }

    /// Canonical token for a run of `len` zeros: a length-1 run costs one
    /// slot either way and stays a literal, anything longer becomes a marker.
    #[inline]
    pub fn for_zero_run(len: u64) -> Self {
        if len > 1 {
            Token::Run(len)
        } else {
            Token::Literal(0.0)
        }
    }

    /// Number of dense elements this token expands to.
    #[inline]
    pub fn span(self) -> usize {
        match self {
            Token::Literal(_) => 1,
            Token::Run(len) => len as usize,
        }
    }
}
