//! Partitioning of the executable output sections into stub groups. Each
//! group's address span must stay well inside the branch displacement
//! window so that every branch in the group can reach stubs appended after
//! the group's owner section. Grouping runs once up front; only a full
//! relaxation restart with a reduced window redoes it.

use crate::model::InputObject;
use crate::model::ObjectId;
use ppclink_utils::elf::RelocationKind;
use std::ops::Range;

/// An executable section's place in the output ordering.
pub type CodeSectionRef = (ObjectId, usize);

/// Deterministic output order of the executable sections: object order as
/// given, section order within each object. Slot numbering and stub
/// placement both derive from this, so it must never depend on hash maps.
#[must_use]
pub fn code_section_order(objects: &[InputObject]) -> Vec<CodeSectionRef> {
    let mut order = Vec::new();
    for (object_index, object) in objects.iter().enumerate() {
        for (section_index, section) in object.sections.iter().enumerate() {
            if section.is_executable() && section.is_alloc() {
                order.push((ObjectId(object_index as u32), section_index));
            }
        }
    }
    order
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubGroup {
    /// Indexes into the code section order.
    pub sections: Range<usize>,
    /// Index of the section the group's stub table is appended after.
    /// Always the last section of the group, so the table lands between
    /// this group and the next.
    pub owner: usize,
}

impl StubGroup {
    #[must_use]
    pub fn contains(&self, code_index: usize) -> bool {
        self.sections.contains(&code_index)
    }
}

fn section_uses_cond_branches<F>(relocation_kind_of: &F, object: &InputObject, index: usize) -> bool
where
    F: Fn(u32) -> Option<RelocationKind>,
{
    object.sections[index]
        .relocations
        .iter()
        .any(|rel| relocation_kind_of(rel.r_type) == Some(RelocationKind::CondBranch))
}

/// Walks the executable sections in output order and closes a group
/// whenever adding the next section would push the group's span past the
/// window. The window is halved for a group containing 16-bit conditional
/// branches, whose reach is much shorter than the 26-bit window the default
/// span is derived from.
#[must_use]
pub fn group_code_sections<F>(
    objects: &[InputObject],
    order: &[CodeSectionRef],
    group_span: u64,
    relocation_kind_of: &F,
) -> Vec<StubGroup>
where
    F: Fn(u32) -> Option<RelocationKind>,
{
    let mut groups = Vec::new();
    let mut start = 0usize;
    let mut span = 0u64;
    let mut group_has_cond_branches = false;

    for (index, &(object_id, section_index)) in order.iter().enumerate() {
        let object = &objects[object_id.as_usize()];
        let section = &object.sections[section_index];
        let aligned_len = aligned_size(section.bytes.len() as u64, section.alignment);
        let has_cond_branches =
            section_uses_cond_branches(relocation_kind_of, object, section_index);

        // The window the group must satisfy if this section joins it.
        let window = if has_cond_branches || group_has_cond_branches {
            group_span / 2
        } else {
            group_span
        };

        if index > start && span + aligned_len > window {
            groups.push(StubGroup {
                sections: start..index,
                owner: index - 1,
            });
            start = index;
            span = 0;
            group_has_cond_branches = false;
        }
        group_has_cond_branches |= has_cond_branches;
        span += aligned_len;
    }

    if start < order.len() {
        groups.push(StubGroup {
            sections: start..order.len(),
            owner: order.len() - 1,
        });
    }

    tracing::debug!(
        groups = groups.len(),
        sections = order.len(),
        group_span,
        "stub grouping"
    );
    groups
}

/// Which group a code section belongs to, if any.
#[must_use]
pub fn group_of(groups: &[StubGroup], code_index: usize) -> Option<usize> {
    groups.iter().position(|g| g.contains(code_index))
}

pub(crate) fn aligned_size(size: u64, alignment: u64) -> u64 {
    let alignment = alignment.max(1);
    size.next_multiple_of(alignment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InputSection;
    use ppclink_utils::elf::SectionFlags;
    use ppclink_utils::elf::shf;
    use ppclink_utils::powerpc64;

    fn exec_section(len: usize) -> InputSection {
        InputSection {
            name: ".text".to_owned(),
            bytes: vec![0; len],
            flags: SectionFlags::empty().with(shf::ALLOC).with(shf::EXECINSTR),
            alignment: 4,
            relocations: Vec::new(),
        }
    }

    fn object_with_sections(lens: &[usize]) -> InputObject {
        InputObject {
            name: "test.o".to_owned(),
            sections: lens.iter().map(|&len| exec_section(len)).collect(),
            local_symbols: Vec::new(),
            attributes: Default::default(),
        }
    }

    fn kind_of(r_type: u32) -> Option<RelocationKind> {
        powerpc64::relocation_type_from_raw(r_type).map(|info| info.kind)
    }

    #[test]
    fn test_everything_fits_one_group() {
        let objects = vec![object_with_sections(&[100, 100, 100])];
        let order = code_section_order(&objects);
        let groups = group_code_sections(&objects, &order, 0x1000, &kind_of);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].sections, 0..3);
        assert_eq!(groups[0].owner, 2);
    }

    #[test]
    fn test_group_closes_at_span_boundary() {
        let objects = vec![object_with_sections(&[0x800, 0x800, 0x800])];
        let order = code_section_order(&objects);
        let groups = group_code_sections(&objects, &order, 0x1000, &kind_of);
        // 0x800 + 0x800 fits exactly; the third section starts a new group.
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].sections, 0..2);
        assert_eq!(groups[0].owner, 1);
        assert_eq!(groups[1].sections, 2..3);
    }

    #[test]
    fn test_one_section_never_splits() {
        // A single section larger than the window still forms a group of
        // its own; its stubs are never divided across two tables.
        let objects = vec![object_with_sections(&[0x4000, 0x100])];
        let order = code_section_order(&objects);
        let groups = group_code_sections(&objects, &order, 0x1000, &kind_of);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].sections, 0..1);
    }

    #[test]
    fn test_cond_branches_halve_the_window() {
        let mut objects = vec![object_with_sections(&[0x700, 0x700])];
        // Without conditional branches both sections fit the 0x1000 window.
        let order = code_section_order(&objects);
        let groups = group_code_sections(&objects, &order, 0x1000, &kind_of);
        assert_eq!(groups.len(), 1);

        objects[0].sections[0]
            .relocations
            .push(crate::model::RelocationRecord {
                offset: 0,
                r_type: object::elf::R_PPC64_REL14,
                symbol: crate::model::SymbolRef::Global(crate::model::SymbolId(0)),
                addend: 0,
            });
        // 0x700 + 0x700 > 0x1000 / 2, so the group closes after the first.
        let groups = group_code_sections(&objects, &order, 0x1000, &kind_of);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].sections, 0..1);
    }
}
