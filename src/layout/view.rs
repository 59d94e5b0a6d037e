use crate::{layout::StructSchema, Result};

/// Tagged result of decoding one field from a [`StructView`].
///
/// Integer kinds (`Int32`, `Ptr`, `Word`) decode to [`FieldValue::Scalar`] or, for
/// array fields, [`FieldValue::Array`]. Byte-like kinds (`Bool`, `Byte`, `Char`) decode
/// to their raw bytes regardless of count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// A single little-endian unsigned integer, zero-extended to 64 bits
    Scalar(u64),
    /// An array of little-endian unsigned integers
    Array(Vec<u64>),
    /// Raw bytes for non-integer kinds
    Bytes(Vec<u8>),
}

/// A [`StructSchema`] bound to a concrete byte buffer and base address.
///
/// The view owns a copy of the captured bytes (zero-extended to the schema size) and
/// never mutates them; reading a field is side-effect free and every view is
/// independently constructed. Views are created per read and either discarded after
/// use or decoded into plain model values that a snapshot retains.
///
/// # Examples
///
/// ```rust
/// use heapscope::layout::{FieldDef, FieldKind, StructSchema};
/// use heapscope::profile::Arch;
///
/// let schema = StructSchema::new(
///     Arch::Bits64,
///     vec![
///         FieldDef::scalar(FieldKind::Word, "prev_size"),
///         FieldDef::scalar(FieldKind::Word, "size"),
///     ],
/// );
/// let bytes = [0u8, 0, 0, 0, 0, 0, 0, 0, 0x21, 0, 0, 0, 0, 0, 0, 0];
/// let view = schema.bind(&bytes, 0x555000);
/// assert_eq!(view.get_word("size")?, 0x21);
/// assert_eq!(view.address_of("size", 0)?, 0x555008);
/// # Ok::<(), heapscope::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct StructView<'a> {
    schema: &'a StructSchema,
    bytes: Vec<u8>,
    base: u64,
}

impl<'a> StructView<'a> {
    pub(crate) fn new(schema: &'a StructSchema, bytes: Vec<u8>, base: u64) -> Self {
        StructView { schema, bytes, base }
    }

    /// The address the bound buffer was captured at.
    #[must_use]
    pub fn base(&self) -> u64 {
        self.base
    }

    /// The schema this view decodes through.
    #[must_use]
    pub fn schema(&self) -> &StructSchema {
        self.schema
    }

    /// Absolute address of `name[index]` in the target's address space.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownField`] for a name or index the schema does not
    /// define.
    pub fn address_of(&self, name: &str, index: usize) -> Result<u64> {
        Ok(self.base + self.schema.offset_of(name, index)? as u64)
    }

    /// Decode a field into a tagged value.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownField`] for a name the schema does not define.
    pub fn get(&self, name: &str) -> Result<FieldValue> {
        let field = self.schema.field(name)?;
        let width = field.kind.width(self.schema.arch());
        let offset = self.schema.offset_of(name, 0)?;

        if !field.kind.is_integer() {
            let end = offset + width * field.count;
            return Ok(FieldValue::Bytes(self.bytes[offset..end].to_vec()));
        }

        if field.count == 1 {
            Ok(FieldValue::Scalar(self.decode_at(offset, width)))
        } else {
            let values = (0..field.count)
                .map(|i| self.decode_at(offset + i * width, width))
                .collect();
            Ok(FieldValue::Array(values))
        }
    }

    /// Decode a scalar integer field.
    ///
    /// Array fields yield their first element.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownField`] for a name the schema does not define.
    pub fn get_word(&self, name: &str) -> Result<u64> {
        let field = self.schema.field(name)?;
        let width = field.kind.width(self.schema.arch());
        let offset = self.schema.offset_of(name, 0)?;
        Ok(self.decode_at(offset, width))
    }

    /// Decode every element of an integer array field.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownField`] for a name the schema does not define.
    pub fn get_words(&self, name: &str) -> Result<Vec<u64>> {
        let field = self.schema.field(name)?;
        let width = field.kind.width(self.schema.arch());
        let offset = self.schema.offset_of(name, 0)?;
        Ok((0..field.count)
            .map(|i| self.decode_at(offset + i * width, width))
            .collect())
    }

    /// Raw bytes of a byte-like field.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownField`] for a name the schema does not define.
    pub fn get_bytes(&self, name: &str) -> Result<Vec<u8>> {
        let field = self.schema.field(name)?;
        let width = field.kind.width(self.schema.arch());
        let offset = self.schema.offset_of(name, 0)?;
        let end = offset + width * field.count;
        Ok(self.bytes[offset..end].to_vec())
    }

    // Little-endian decode of `width` bytes, zero-extended to u64. The buffer is
    // always schema-sized, so the range is in bounds.
    fn decode_at(&self, offset: usize, width: usize) -> u64 {
        let mut value = 0u64;
        for (i, byte) in self.bytes[offset..offset + width].iter().enumerate() {
            value |= u64::from(*byte) << (8 * i);
        }
        value
    }
}
