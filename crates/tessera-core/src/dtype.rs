use std::fmt;

use num_traits::Float;

// DType: element types the kernels are specialised for
//
// Storage types are the four float formats loss kernels run on, plus I32 for
// label tensors (cosine-embedding-loss targets):
//
//   F16   16-bit IEEE half float, accumulated in f32
//   BF16  16-bit brain float, accumulated in f32
//   F32   32-bit float, accumulated in f32
//   F64   64-bit float, accumulated in f64
//   I32   signed 32-bit labels, never accumulated
//
// A kernel is generic over `Element`; its associated `Accum` type is where
// all arithmetic happens.

/// Runtime tag of a tensor's element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F16,
    BF16,
    F32,
    F64,
    I32,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F16 | DType::BF16 => 2,
            DType::F32 | DType::I32 => 4,
            DType::F64 => 8,
        }
    }

    pub fn is_float(&self) -> bool {
        !matches!(self, DType::I32)
    }

    /// Whether this is a half-precision type (F16 or BF16).
    pub fn is_half(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
            DType::I32 => "i32",
        };
        write!(f, "{}", s)
    }
}

/// Rust types that can live in a tensor buffer.
pub trait WithDType: Copy + Send + Sync + fmt::Debug + 'static {
    /// The corresponding DType enum variant.
    const DTYPE: DType;
}

impl WithDType for i32 {
    const DTYPE: DType = DType::I32;
}

// Accum: the wider type arithmetic happens in
//
// Block reductions keep partials in shared scratch cells. Those cells are
// `AtomicU64`s so any accumulator must round-trip through 64 bits.

/// Floating-point accumulation type used inside kernel bodies.
pub trait Accum: Float + Send + Sync + fmt::Debug + 'static {
    /// Lossless conversion of an `f32` literal (0.0, 1.0, -1.0, ...).
    fn lit(v: f32) -> Self;

    fn as_f64(self) -> f64;

    fn from_f64(v: f64) -> Self;

    fn to_bits64(self) -> u64;

    fn from_bits64(bits: u64) -> Self;
}

impl Accum for f32 {
    fn lit(v: f32) -> Self {
        v
    }
    fn as_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
    fn to_bits64(self) -> u64 {
        self.to_bits() as u64
    }
    fn from_bits64(bits: u64) -> Self {
        f32::from_bits(bits as u32)
    }
}

impl Accum for f64 {
    fn lit(v: f32) -> Self {
        v as f64
    }
    fn as_f64(self) -> f64 {
        self
    }
    fn from_f64(v: f64) -> Self {
        v
    }
    fn to_bits64(self) -> u64 {
        self.to_bits()
    }
    fn from_bits64(bits: u64) -> Self {
        f64::from_bits(bits)
    }
}

/// Floating-point storage type a kernel can be instantiated for.
///
/// Every read widens through `to_accum`; every write rounds back once
/// through `from_accum`.
pub trait Element: WithDType + PartialEq {
    type Accum: Accum;

    fn to_accum(self) -> Self::Accum;

    fn from_accum(v: Self::Accum) -> Self;

    /// Machine epsilon of the storage format.
    fn epsilon() -> f64;

    fn to_f64(self) -> f64 {
        self.to_accum().as_f64()
    }

    fn from_f64(v: f64) -> Self {
        Self::from_accum(Self::Accum::from_f64(v))
    }

    fn zero() -> Self {
        Self::from_f64(0.0)
    }
}

impl WithDType for f32 {
    const DTYPE: DType = DType::F32;
}

impl Element for f32 {
    type Accum = f32;
    fn to_accum(self) -> f32 {
        self
    }
    fn from_accum(v: f32) -> Self {
        v
    }
    fn epsilon() -> f64 {
        f32::EPSILON as f64
    }
}

impl WithDType for f64 {
    const DTYPE: DType = DType::F64;
}

impl Element for f64 {
    type Accum = f64;
    fn to_accum(self) -> f64 {
        self
    }
    fn from_accum(v: f64) -> Self {
        v
    }
    fn epsilon() -> f64 {
        f64::EPSILON
    }
}

impl WithDType for half::f16 {
    const DTYPE: DType = DType::F16;
}

impl Element for half::f16 {
    type Accum = f32;
    fn to_accum(self) -> f32 {
        self.to_f32()
    }
    fn from_accum(v: f32) -> Self {
        half::f16::from_f32(v)
    }
    fn epsilon() -> f64 {
        half::f16::EPSILON.to_f64()
    }
}

impl WithDType for half::bf16 {
    const DTYPE: DType = DType::BF16;
}

impl Element for half::bf16 {
    type Accum = f32;
    fn to_accum(self) -> f32 {
        self.to_f32()
    }
    fn from_accum(v: f32) -> Self {
        half::bf16::from_f32(v)
    }
    fn epsilon() -> f64 {
        half::bf16::EPSILON.to_f64()
    }
}
