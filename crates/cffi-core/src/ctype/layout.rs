//! Native record layout.

use super::{CTypeRef, Field};
use crate::errors::{FfiError, Result};

/// Completed layout of a struct or union
#[derive(Debug, Clone)]
pub struct RecordBody {
    pub fields: Vec<Field>,
    pub size: usize,
    pub align: usize,
}

fn align_up(offset: usize, align: usize) -> usize {
    offset.div_ceil(align) * align
}

/// Lay out `members` the way the C ABI does: each struct field at the next
/// multiple of its alignment, every union member at offset 0, and the total
/// size rounded up to the strictest member alignment.
///
/// A trailing unbounded array (flexible array member) is allowed in structs
/// and contributes no size.
pub fn compute_layout(members: Vec<(String, CTypeRef)>, is_union: bool) -> Result<RecordBody> {
    let mut fields = Vec::with_capacity(members.len());
    let mut offset = 0usize;
    let mut size = 0usize;
    let mut align = 1usize;
    let count = members.len();

    for (i, (name, ty)) in members.into_iter().enumerate() {
        let flexible = ty.is_array() && ty.alloc_size() == 0 && i + 1 == count && !is_union;
        if ty.is_unbounded() && !flexible {
            return Err(FfiError::declaration(format!(
                "field '{}' has incomplete type '{}'",
                name,
                ty.serialize()
            )));
        }
        if fields.iter().any(|f: &Field| !name.is_empty() && f.name == name) {
            return Err(FfiError::declaration(format!("duplicate member '{name}'")));
        }

        let field_align = ty.align();
        align = align.max(field_align);
        let too_large = || FfiError::declaration(format!("record member '{name}' is too large"));
        let field_size = ty.checked_size().ok_or_else(too_large)?;

        if is_union {
            size = size.max(field_size);
            fields.push(Field { name, ty, offset: 0 });
        } else {
            offset = align_up(offset, field_align);
            let end = offset
                .checked_add(field_size)
                .filter(|end| *end <= isize::MAX as usize / 2)
                .ok_or_else(too_large)?;
            fields.push(Field { name, ty, offset });
            offset = end;
            size = offset;
        }
    }

    Ok(RecordBody {
        fields,
        size: align_up(size, align),
        align,
    })
}
