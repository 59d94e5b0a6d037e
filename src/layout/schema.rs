use crate::{layout::StructView, profile::Arch, Result};

/// The type vocabulary of the layout engine.
///
/// Widths follow the C ABI of the target: `Bool`, `Byte` and `Char` are one byte,
/// `Int32` is four bytes, and `Ptr`/`Word` are four bytes on 32-bit targets and eight
/// on 64-bit targets. `Word` models `size_t`; `Ptr` models any pointer-typed slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// One-byte boolean
    Bool,
    /// One raw byte
    Byte,
    /// One-byte character
    Char,
    /// Fixed four-byte unsigned integer
    Int32,
    /// Pointer-width slot (4 or 8 bytes by architecture)
    Ptr,
    /// `size_t`-width slot (4 or 8 bytes by architecture)
    Word,
}

impl FieldKind {
    /// Byte width of this kind under the given architecture.
    #[must_use]
    pub fn width(self, arch: Arch) -> usize {
        match self {
            FieldKind::Bool | FieldKind::Byte | FieldKind::Char => 1,
            FieldKind::Int32 => 4,
            FieldKind::Ptr | FieldKind::Word => arch.word(),
        }
    }

    /// `true` for kinds decoded as little-endian unsigned integers.
    #[must_use]
    pub fn is_integer(self) -> bool {
        matches!(self, FieldKind::Int32 | FieldKind::Ptr | FieldKind::Word)
    }
}

/// One named field of a [`StructSchema`]: a kind, a name and an element count.
///
/// A count greater than one models a C array; its elements are laid out back to back
/// and can be addressed individually through [`StructSchema::offset_of`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// The field's type tag
    pub kind: FieldKind,
    /// The field's name, unique within its schema
    pub name: &'static str,
    /// Number of array elements (1 for scalars)
    pub count: usize,
}

impl FieldDef {
    /// A single-element field.
    #[must_use]
    pub fn scalar(kind: FieldKind, name: &'static str) -> Self {
        FieldDef { kind, name, count: 1 }
    }

    /// An array field with `count` elements.
    #[must_use]
    pub fn array(kind: FieldKind, name: &'static str, count: usize) -> Self {
        FieldDef { kind, name, count }
    }
}

/// An architecture-parameterized, ordered field table describing one allocator control
/// structure.
///
/// The schema is pure data: total size is the sum of `width(kind) * count` over all
/// fields, and the offset of field N is the sum of the sizes of the fields before it.
/// The same field table produces different offsets under the 32- and 64-bit width
/// tables, which is how one description covers both target architectures.
///
/// Binding a schema to captured bytes with [`StructSchema::bind`] yields a
/// [`StructView`] for decoding. The schema holds no global state and never mutates.
///
/// # Examples
///
/// ```rust
/// use heapscope::layout::{FieldDef, FieldKind, StructSchema};
/// use heapscope::profile::Arch;
///
/// let schema = StructSchema::new(
///     Arch::Bits32,
///     vec![
///         FieldDef::scalar(FieldKind::Word, "prev_size"),
///         FieldDef::scalar(FieldKind::Word, "size"),
///         FieldDef::scalar(FieldKind::Ptr, "fd"),
///     ],
/// );
/// assert_eq!(schema.size_of(), 12);
/// assert_eq!(schema.offset_of("fd", 0)?, 8);
/// # Ok::<(), heapscope::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructSchema {
    arch: Arch,
    fields: Vec<FieldDef>,
}

impl StructSchema {
    /// Create a schema from an ordered field table for the given architecture.
    #[must_use]
    pub fn new(arch: Arch, fields: Vec<FieldDef>) -> Self {
        StructSchema { arch, fields }
    }

    /// The architecture whose width table this schema resolves under.
    #[must_use]
    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// The ordered field table.
    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Total size in bytes of the described structure.
    #[must_use]
    pub fn size_of(&self) -> usize {
        self.fields
            .iter()
            .map(|f| f.kind.width(self.arch) * f.count)
            .sum()
    }

    /// Look up a field definition by name.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownField`] if the schema defines no such field.
    pub fn field(&self, name: &str) -> Result<&FieldDef> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| crate::Error::UnknownField(name.to_string()))
    }

    /// Byte offset of `name[index]` from the structure start.
    ///
    /// Pass `index = 0` for scalar fields.
    ///
    /// # Errors
    /// Returns [`crate::Error::UnknownField`] if the field does not exist or `index`
    /// is outside the field's element count.
    pub fn offset_of(&self, name: &str, index: usize) -> Result<usize> {
        let mut offset = 0;
        for field in &self.fields {
            let width = field.kind.width(self.arch);
            if field.name == name {
                if index >= field.count {
                    return Err(crate::Error::UnknownField(format!("{name}[{index}]")));
                }
                return Ok(offset + index * width);
            }
            offset += width * field.count;
        }
        Err(crate::Error::UnknownField(name.to_string()))
    }

    /// Bind this schema to a byte buffer captured at `base`, producing a decodable view.
    ///
    /// A buffer shorter than [`StructSchema::size_of`] is zero-extended; missing trailing
    /// bytes decode as zero. Bytes beyond the schema size are ignored.
    #[must_use]
    pub fn bind(&self, bytes: &[u8], base: u64) -> StructView<'_> {
        let size = self.size_of();
        let mut buffer = bytes.to_vec();
        buffer.resize(size.max(bytes.len()), 0);
        buffer.truncate(size);
        StructView::new(self, buffer, base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair_schema(arch: Arch) -> StructSchema {
        StructSchema::new(
            arch,
            vec![
                FieldDef::scalar(FieldKind::Int32, "mutex"),
                FieldDef::scalar(FieldKind::Int32, "flags"),
                FieldDef::array(FieldKind::Ptr, "heads", 4),
                FieldDef::scalar(FieldKind::Word, "top"),
            ],
        )
    }

    #[test]
    fn size_depends_on_arch() {
        assert_eq!(pair_schema(Arch::Bits64).size_of(), 4 + 4 + 4 * 8 + 8);
        assert_eq!(pair_schema(Arch::Bits32).size_of(), 4 + 4 + 4 * 4 + 4);
    }

    #[test]
    fn offsets_accumulate_in_declaration_order() {
        let schema = pair_schema(Arch::Bits64);
        assert_eq!(schema.offset_of("mutex", 0).unwrap(), 0);
        assert_eq!(schema.offset_of("flags", 0).unwrap(), 4);
        assert_eq!(schema.offset_of("heads", 0).unwrap(), 8);
        assert_eq!(schema.offset_of("heads", 3).unwrap(), 8 + 3 * 8);
        assert_eq!(schema.offset_of("top", 0).unwrap(), 8 + 4 * 8);
    }

    #[test]
    fn same_name_resolves_differently_per_arch() {
        assert_eq!(pair_schema(Arch::Bits64).offset_of("top", 0).unwrap(), 40);
        assert_eq!(pair_schema(Arch::Bits32).offset_of("top", 0).unwrap(), 24);
    }

    #[test]
    fn unknown_field_is_an_error() {
        let schema = pair_schema(Arch::Bits64);
        assert!(matches!(
            schema.offset_of("nope", 0),
            Err(crate::Error::UnknownField(_))
        ));
        assert!(matches!(
            schema.offset_of("heads", 4),
            Err(crate::Error::UnknownField(_))
        ));
    }

    #[test]
    fn short_buffer_zero_extends() {
        let schema = pair_schema(Arch::Bits64);
        let view = schema.bind(&[0xAA, 0, 0, 0], 0x1000);
        assert_eq!(view.get_word("mutex").unwrap(), 0xAA);
        assert_eq!(view.get_word("top").unwrap(), 0);
    }
}
