//! Typed output binding.
//!
//! Each declared output column implements [`ColumnOut`]: it knows which
//! server types it accepts, how large an output buffer it needs, and how to
//! decode the fetched bytes. Row tuples implement [`RowOut`] (generated for
//! arities 1..=16), which validates the declared shape against result
//! metadata and reconstructs one typed row per fetch.

use crate::field::{ColumnMeta, FieldType};
use crate::results::ResultMode;
use crate::value::{Blob, TimeValue, TIME_WIRE_LEN};

/// Initial buffer size for variable-length output columns. 64 bytes covers
/// the common case; longer cells grow the buffer on DATA_TRUNCATED.
pub const DYNAMIC_BUFFER_INIT_SIZE: usize = 64;

/// How a column's output buffer is sized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Fixed-width scalar: the buffer never grows.
    Fixed(usize),
    /// Variable-length cell: starts at the configured initial size and is
    /// a truncation candidate.
    Dynamic,
}

/// One output binding descriptor: the buffer the driver fetches into plus
/// the cell state it reports back.
#[derive(Debug, Clone)]
pub struct OutputSlot {
    /// Wire type the driver decodes into the buffer. Copied from result
    /// metadata, except where the output type forces it (strings).
    pub buffer_type: FieldType,
    /// UNSIGNED flag of the underlying column.
    pub is_unsigned: bool,
    /// Fetch destination.
    pub buffer: Vec<u8>,
    /// Real cell length reported by the last fetch. May exceed
    /// `buffer.len()` when the cell was truncated.
    pub length: usize,
    /// NULL flag of the last fetched cell.
    pub is_null: bool,
}

impl OutputSlot {
    /// The valid prefix of the buffer for the current cell.
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.length.min(self.buffer.len())]
    }
}

/// The complete output binding for one statement execution.
#[derive(Debug)]
pub struct OutputBinding {
    pub slots: Vec<OutputSlot>,
    /// Indexes of variable-length columns, the only ones that can report
    /// DATA_TRUNCATED.
    pub dynamic_columns: Vec<usize>,
}

/// A scalar that can be declared as a typed output column.
pub trait ColumnOut: Sized + Send + 'static {
    /// When set, the slot's buffer type is forced to this wire type
    /// regardless of what the server reported.
    const FORCED_TYPE: Option<FieldType> = None;

    /// Buffer sizing for this output.
    fn buffer_kind() -> BufferKind;

    /// Whether a column of `field_type` may be read into this output.
    fn accepts(field_type: FieldType) -> bool;

    /// Decode the fetched cell. Called after a successful fetch; NULL cells
    /// yield the type's default.
    fn decode(slot: &OutputSlot) -> Self;
}

/// Integer cells arrive in the column's wire width; widen with the correct
/// sign behaviour before casting to the declared output.
fn decode_integer(slot: &OutputSlot) -> i64 {
    let width = slot
        .buffer_type
        .fixed_width()
        .unwrap_or(8)
        .min(slot.buffer.len());
    let mut raw = [0u8; 8];
    raw[..width].copy_from_slice(&slot.buffer[..width]);
    let unsigned = u64::from_le_bytes(raw);
    if slot.is_unsigned || width == 8 {
        unsigned as i64
    } else {
        let shift = (8 - width) * 8;
        ((unsigned << shift) as i64) >> shift
    }
}

macro_rules! impl_integer_out {
    ($($ty:ty),+) => {
        $(
            impl ColumnOut for $ty {
                fn buffer_kind() -> BufferKind {
                    // Widest integer wire image; the driver writes the
                    // column's own width into the front of the buffer.
                    BufferKind::Fixed(8)
                }

                fn accepts(field_type: FieldType) -> bool {
                    field_type.is_integer()
                }

                fn decode(slot: &OutputSlot) -> Self {
                    decode_integer(slot) as $ty
                }
            }
        )+
    };
}

impl_integer_out!(i8, u8, i16, u16, i32, u32, i64, u64);

impl ColumnOut for f32 {
    fn buffer_kind() -> BufferKind {
        BufferKind::Fixed(4)
    }

    fn accepts(field_type: FieldType) -> bool {
        field_type == FieldType::Float
    }

    fn decode(slot: &OutputSlot) -> Self {
        let mut raw = [0u8; 4];
        let n = slot.buffer.len().min(4);
        raw[..n].copy_from_slice(&slot.buffer[..n]);
        f32::from_le_bytes(raw)
    }
}

impl ColumnOut for f64 {
    fn buffer_kind() -> BufferKind {
        BufferKind::Fixed(8)
    }

    fn accepts(field_type: FieldType) -> bool {
        field_type == FieldType::Double
    }

    fn decode(slot: &OutputSlot) -> Self {
        let mut raw = [0u8; 8];
        let n = slot.buffer.len().min(8);
        raw[..n].copy_from_slice(&slot.buffer[..n]);
        f64::from_le_bytes(raw)
    }
}

impl ColumnOut for String {
    // Any column can be read back as text once the buffer type is forced.
    const FORCED_TYPE: Option<FieldType> = Some(FieldType::String);

    fn buffer_kind() -> BufferKind {
        BufferKind::Dynamic
    }

    fn accepts(field_type: FieldType) -> bool {
        field_type.is_text()
            || field_type.is_blob()
            || field_type.is_decimal()
            || field_type.is_temporal()
    }

    fn decode(slot: &OutputSlot) -> Self {
        if slot.is_null {
            return String::new();
        }
        String::from_utf8_lossy(slot.data()).into_owned()
    }
}

impl ColumnOut for Blob {
    fn buffer_kind() -> BufferKind {
        BufferKind::Dynamic
    }

    fn accepts(field_type: FieldType) -> bool {
        field_type.is_blob()
    }

    fn decode(slot: &OutputSlot) -> Self {
        if slot.is_null {
            return Blob::default();
        }
        Blob::from(slot.data())
    }
}

impl ColumnOut for TimeValue {
    fn buffer_kind() -> BufferKind {
        BufferKind::Fixed(TIME_WIRE_LEN)
    }

    fn accepts(field_type: FieldType) -> bool {
        field_type.is_temporal()
    }

    fn decode(slot: &OutputSlot) -> Self {
        TimeValue::from_wire_bytes(&slot.buffer).unwrap_or_default()
    }
}

/// A tuple of [`ColumnOut`] scalars declared as a query's output row.
pub trait RowOut: Sized + Send + 'static {
    /// Declared column count.
    const ARITY: usize;

    /// Validate the declared shape against result metadata. Returns a
    /// diagnostic naming the offending columns on mismatch.
    fn check_fields(meta: &[ColumnMeta]) -> Option<String>;

    /// Build the output binding for one execution. `dynamic_init` is the
    /// starting size of variable-length buffers.
    fn bind_outputs(meta: &[ColumnMeta], dynamic_init: usize) -> OutputBinding;

    /// Reconstruct one typed row from the fetched slots.
    fn decode_row(slots: &[OutputSlot]) -> Self;
}

macro_rules! impl_row_out {
    ($arity:literal; $($name:ident),+) => {
        impl<$($name: ColumnOut),+> RowOut for ($($name,)+) {
            const ARITY: usize = $arity;

            fn check_fields(meta: &[ColumnMeta]) -> Option<String> {
                if meta.len() != Self::ARITY {
                    return Some(format!(
                        "the query returned {} columns but {} outputs were declared",
                        meta.len(),
                        Self::ARITY
                    ));
                }

                let mut rejected: Vec<&str> = Vec::new();
                let mut index = 0;
                $(
                    if !$name::accepts(meta[index].field_type) {
                        rejected.push(meta[index].name.as_str());
                    }
                    index += 1;
                )+
                let _ = index;

                if rejected.is_empty() {
                    None
                } else {
                    Some(format!(
                        "output binding rejected for columns: ({})",
                        rejected.join(", ")
                    ))
                }
            }

            fn bind_outputs(meta: &[ColumnMeta], dynamic_init: usize) -> OutputBinding {
                let mut slots = Vec::with_capacity(Self::ARITY);
                let mut dynamic_columns = Vec::new();
                let mut index = 0;
                $(
                    let buffer = match $name::buffer_kind() {
                        BufferKind::Fixed(n) => vec![0u8; n],
                        BufferKind::Dynamic => {
                            dynamic_columns.push(index);
                            vec![0u8; dynamic_init]
                        }
                    };
                    slots.push(OutputSlot {
                        buffer_type: $name::FORCED_TYPE.unwrap_or(meta[index].field_type),
                        is_unsigned: meta[index].is_unsigned,
                        buffer,
                        length: 0,
                        is_null: false,
                    });
                    index += 1;
                )+
                let _ = index;

                OutputBinding {
                    slots,
                    dynamic_columns,
                }
            }

            fn decode_row(slots: &[OutputSlot]) -> Self {
                let mut index = 0;
                let row = ($(
                    {
                        let value = $name::decode(&slots[index]);
                        index += 1;
                        value
                    },
                )+);
                let _ = index;
                row
            }
        }

        impl<$($name: ColumnOut),+> ResultMode for ($($name,)+) {
            type RowSet = Vec<($($name,)+)>;
        }
    };
}

impl_row_out!(1; A);
impl_row_out!(2; A, B);
impl_row_out!(3; A, B, C);
impl_row_out!(4; A, B, C, D);
impl_row_out!(5; A, B, C, D, E);
impl_row_out!(6; A, B, C, D, E, F);
impl_row_out!(7; A, B, C, D, E, F, G);
impl_row_out!(8; A, B, C, D, E, F, G, H);
impl_row_out!(9; A, B, C, D, E, F, G, H, I);
impl_row_out!(10; A, B, C, D, E, F, G, H, I, J);
impl_row_out!(11; A, B, C, D, E, F, G, H, I, J, K);
impl_row_out!(12; A, B, C, D, E, F, G, H, I, J, K, L);
impl_row_out!(13; A, B, C, D, E, F, G, H, I, J, K, L, M);
impl_row_out!(14; A, B, C, D, E, F, G, H, I, J, K, L, M, N);
impl_row_out!(15; A, B, C, D, E, F, G, H, I, J, K, L, M, N, O);
impl_row_out!(16; A, B, C, D, E, F, G, H, I, J, K, L, M, N, O, P);
