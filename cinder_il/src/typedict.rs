//! The type dictionary: primitive, pointer, struct and union types.
//!
//! Struct and union layouts are registered by name, field by field, and
//! frozen with `close_struct` / `close_union`. Builders consult the
//! dictionary for field offsets and sizes; values themselves only ever see
//! the [`DataType`] a type collapses to.

use rustc_hash::FxHashMap;

use crate::arena::{Arena, Id};
use crate::types::DataType;

// =============================================================================
// Types
// =============================================================================

/// A field of a struct or union.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub name: String,
    pub ty: TypeRef,
    pub offset: u32,
}

/// Layout of an aggregate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Layout {
    pub fields: Vec<Field>,
    pub size: u32,
    pub align: u32,
    pub closed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Primitive(DataType),
    Pointer(TypeRef),
    Struct(Layout),
    Union(Layout),
}

/// A registered type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IlType {
    pub name: String,
    pub kind: TypeKind,
}

/// Type identifier.
pub type TypeRef = Id<IlType>;

/// Resolved location of a field, relative to the start of its aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRef {
    pub offset: u32,
    pub ty: TypeRef,
    /// The value type loads and stores of this field use.
    pub data_type: DataType,
}

// =============================================================================
// Type Dictionary
// =============================================================================

/// Registry of the types one method (or a family of methods) uses.
#[derive(Debug, Clone)]
pub struct TypeDictionary {
    types: Arena<IlType>,
    by_name: FxHashMap<String, TypeRef>,
    primitives: FxHashMap<DataType, TypeRef>,
    pointers: FxHashMap<TypeRef, TypeRef>,
}

const PRIMITIVES: [DataType; 14] = [
    DataType::NoType,
    DataType::Int8,
    DataType::Int16,
    DataType::Int32,
    DataType::Int64,
    DataType::Float,
    DataType::Double,
    DataType::Address,
    DataType::VectorInt8,
    DataType::VectorInt16,
    DataType::VectorInt32,
    DataType::VectorInt64,
    DataType::VectorFloat,
    DataType::VectorDouble,
];

impl TypeDictionary {
    /// A dictionary pre-populated with every primitive type.
    pub fn new() -> Self {
        let mut dict = TypeDictionary {
            types: Arena::new(),
            by_name: FxHashMap::default(),
            primitives: FxHashMap::default(),
            pointers: FxHashMap::default(),
        };
        for ty in PRIMITIVES {
            let id = dict.register(ty.to_string(), TypeKind::Primitive(ty));
            dict.primitives.insert(ty, id);
        }
        dict
    }

    fn register(&mut self, name: String, kind: TypeKind) -> TypeRef {
        let id = self.types.alloc(IlType {
            name: name.clone(),
            kind,
        });
        self.by_name.insert(name, id);
        id
    }

    pub fn primitive(&self, ty: DataType) -> TypeRef {
        self.primitives[&ty]
    }

    /// Pointer to `base`; repeated requests return the same type.
    pub fn pointer_to(&mut self, base: TypeRef) -> TypeRef {
        if let Some(&ptr) = self.pointers.get(&base) {
            return ptr;
        }
        let name = format!("{}*", self.types[base].name);
        let ptr = self.register(name, TypeKind::Pointer(base));
        self.pointers.insert(base, ptr);
        ptr
    }

    #[inline]
    pub fn get(&self, ty: TypeRef) -> &IlType {
        &self.types[ty]
    }

    /// Look up a type by name.
    pub fn lookup(&self, name: &str) -> Option<TypeRef> {
        self.by_name.get(name).copied()
    }

    // =========================================================================
    // Aggregates
    // =========================================================================

    /// Begin a struct definition.
    ///
    /// # Panics
    ///
    /// Panics if a type with this name already exists.
    pub fn define_struct(&mut self, name: &str) -> TypeRef {
        assert!(
            !self.by_name.contains_key(name),
            "type {} is already defined",
            name
        );
        self.register(name.to_owned(), TypeKind::Struct(Layout::default()))
    }

    /// Append a field at the next naturally aligned offset.
    pub fn define_field(&mut self, struct_name: &str, field: &str, ty: TypeRef) -> Option<u32> {
        let size = self.size_of(ty);
        let align = self.align_of(ty);
        let layout = self.open_layout(struct_name, false)?;
        let offset = layout.size.next_multiple_of(align.max(1));
        Self::add_field(layout, field, ty, offset, size, align);
        Some(offset)
    }

    /// Add a field at an explicit offset.
    pub fn define_field_at(
        &mut self,
        struct_name: &str,
        field: &str,
        ty: TypeRef,
        offset: u32,
    ) -> Option<u32> {
        let size = self.size_of(ty);
        let align = self.align_of(ty);
        let layout = self.open_layout(struct_name, false)?;
        Self::add_field(layout, field, ty, offset, size, align);
        Some(offset)
    }

    /// Freeze a struct; its size is rounded up to its alignment.
    pub fn close_struct(&mut self, name: &str) -> Option<u32> {
        let layout = self.open_layout(name, false)?;
        layout.size = layout.size.next_multiple_of(layout.align.max(1));
        layout.closed = true;
        Some(layout.size)
    }

    /// Begin a union definition.
    ///
    /// # Panics
    ///
    /// Panics if a type with this name already exists.
    pub fn define_union(&mut self, name: &str) -> TypeRef {
        assert!(
            !self.by_name.contains_key(name),
            "type {} is already defined",
            name
        );
        self.register(name.to_owned(), TypeKind::Union(Layout::default()))
    }

    /// Add a union member; all members live at offset 0.
    pub fn union_field(&mut self, union_name: &str, field: &str, ty: TypeRef) -> Option<u32> {
        let size = self.size_of(ty);
        let align = self.align_of(ty);
        let layout = self.open_layout(union_name, true)?;
        Self::add_field(layout, field, ty, 0, size, align);
        Some(0)
    }

    pub fn close_union(&mut self, name: &str) -> Option<u32> {
        let layout = self.open_layout(name, true)?;
        layout.size = layout.size.next_multiple_of(layout.align.max(1));
        layout.closed = true;
        Some(layout.size)
    }

    fn open_layout(&mut self, name: &str, union: bool) -> Option<&mut Layout> {
        let id = *self.by_name.get(name)?;
        let layout = match (&mut self.types[id].kind, union) {
            (TypeKind::Struct(layout), false) | (TypeKind::Union(layout), true) => layout,
            _ => return None,
        };
        assert!(!layout.closed, "type {} is already closed", name);
        Some(layout)
    }

    fn add_field(layout: &mut Layout, field: &str, ty: TypeRef, offset: u32, size: u32, align: u32) {
        layout.fields.push(Field {
            name: field.to_owned(),
            ty,
            offset,
        });
        layout.size = layout.size.max(offset + size);
        layout.align = layout.align.max(align);
    }

    fn layout(&self, name: &str) -> Option<&Layout> {
        match &self.types[*self.by_name.get(name)?].kind {
            TypeKind::Struct(layout) | TypeKind::Union(layout) => Some(layout),
            _ => None,
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Byte offset of a field.
    pub fn offset_of(&self, aggregate: &str, field: &str) -> Option<u32> {
        self.field_reference(aggregate, field).map(|f| f.offset)
    }

    /// Location and type of a field.
    pub fn field_reference(&self, aggregate: &str, field: &str) -> Option<FieldRef> {
        let field = self
            .layout(aggregate)?
            .fields
            .iter()
            .find(|f| f.name == field)?;
        Some(FieldRef {
            offset: field.offset,
            ty: field.ty,
            data_type: self.data_type(field.ty),
        })
    }

    /// Size in bytes of a value of type `ty`.
    pub fn size_of(&self, ty: TypeRef) -> u32 {
        match &self.types[ty].kind {
            TypeKind::Primitive(p) => p.size(),
            TypeKind::Pointer(_) => DataType::Address.size(),
            TypeKind::Struct(layout) | TypeKind::Union(layout) => layout.size,
        }
    }

    fn align_of(&self, ty: TypeRef) -> u32 {
        match &self.types[ty].kind {
            TypeKind::Primitive(p) => p.size().clamp(1, 8),
            TypeKind::Pointer(_) => 8,
            TypeKind::Struct(layout) | TypeKind::Union(layout) => layout.align.max(1),
        }
    }

    /// The value type loads and stores of `ty` use.
    pub fn data_type(&self, ty: TypeRef) -> DataType {
        match &self.types[ty].kind {
            TypeKind::Primitive(p) => *p,
            TypeKind::Pointer(_) => DataType::Address,
            TypeKind::Struct(_) | TypeKind::Union(_) => DataType::NoType,
        }
    }

    /// Pointee of a pointer type.
    pub fn pointee(&self, ty: TypeRef) -> Option<TypeRef> {
        match self.types[ty].kind {
            TypeKind::Pointer(base) => Some(base),
            _ => None,
        }
    }
}

impl Default for TypeDictionary {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitives_are_registered() {
        let dict = TypeDictionary::new();
        let i32_ty = dict.primitive(DataType::Int32);
        assert_eq!(dict.lookup("Int32"), Some(i32_ty));
        assert_eq!(dict.size_of(i32_ty), 4);
        assert_eq!(dict.data_type(i32_ty), DataType::Int32);
    }

    #[test]
    fn test_pointer_to_is_memoized() {
        let mut dict = TypeDictionary::new();
        let base = dict.primitive(DataType::Double);
        let p1 = dict.pointer_to(base);
        let p2 = dict.pointer_to(base);
        assert_eq!(p1, p2);
        assert_eq!(dict.get(p1).name, "Double*");
        assert_eq!(dict.pointee(p1), Some(base));
        assert_eq!(dict.data_type(p1), DataType::Address);
    }

    #[test]
    fn test_struct_layout_uses_natural_alignment() {
        let mut dict = TypeDictionary::new();
        let i8_ty = dict.primitive(DataType::Int8);
        let i64_ty = dict.primitive(DataType::Int64);
        let i32_ty = dict.primitive(DataType::Int32);

        dict.define_struct("Frame");
        assert_eq!(dict.define_field("Frame", "tag", i8_ty), Some(0));
        assert_eq!(dict.define_field("Frame", "sp", i64_ty), Some(8));
        assert_eq!(dict.define_field("Frame", "pc", i32_ty), Some(16));
        assert_eq!(dict.close_struct("Frame"), Some(24));

        assert_eq!(dict.offset_of("Frame", "pc"), Some(16));
        let sp = dict.field_reference("Frame", "sp").unwrap();
        assert_eq!(sp.data_type, DataType::Int64);
        assert_eq!(dict.offset_of("Frame", "missing"), None);
        assert_eq!(dict.offset_of("Nope", "pc"), None);
    }

    #[test]
    fn test_explicit_offsets() {
        let mut dict = TypeDictionary::new();
        let i16_ty = dict.primitive(DataType::Int16);
        let s = dict.define_struct("Packed");
        dict.define_field_at("Packed", "a", i16_ty, 2);
        dict.close_struct("Packed");
        assert_eq!(dict.offset_of("Packed", "a"), Some(2));
        assert_eq!(dict.size_of(s), 4);
    }

    #[test]
    fn test_union_members_overlap() {
        let mut dict = TypeDictionary::new();
        let f = dict.primitive(DataType::Double);
        let i = dict.primitive(DataType::Int32);
        let u = dict.define_union("Bits");
        dict.union_field("Bits", "d", f);
        dict.union_field("Bits", "i", i);
        dict.close_union("Bits");
        assert_eq!(dict.offset_of("Bits", "i"), Some(0));
        assert_eq!(dict.size_of(u), 8);
        // not a struct
        assert_eq!(dict.define_field("Bits", "x", i), None);
    }

    #[test]
    #[should_panic(expected = "already closed")]
    fn test_closed_struct_rejects_fields() {
        let mut dict = TypeDictionary::new();
        let i = dict.primitive(DataType::Int32);
        dict.define_struct("S");
        dict.close_struct("S");
        dict.define_field("S", "late", i);
    }
}
