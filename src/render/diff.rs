use crate::{
    block_id,
    mc::BlockRecord,
    world::{Chunk, Section, SECTIONS_PER_CHUNK, SECTION_VOLUME},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellChange {
    pub index: usize,
    pub block_state: u16,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SectionDiff {
    /// The client has nothing to diff against.
    FullResend,
    Changes(Vec<CellChange>),
}

/// Compares two sections by block id only. Cells that differ only in meta
/// (orientation, fill level) count as equal.
pub fn diff(target: &Section, baseline: Option<&Section>) -> SectionDiff {
    let baseline = match baseline {
        Some(baseline) => baseline,
        None => return SectionDiff::FullResend,
    };

    let changes = (0..SECTION_VOLUME)
        .filter(|&i| block_id!(target.data[i]) != block_id!(baseline.data[i]))
        .map(|index| CellChange {
            index,
            block_state: target.data[index],
        })
        .collect();
    SectionDiff::Changes(changes)
}

pub fn diff_chunk(target: &Chunk, baseline: &Chunk) -> Vec<(usize, Vec<BlockRecord>)> {
    let mut out = Vec::new();
    for section_idx in 0..SECTIONS_PER_CHUNK {
        let changes = match diff(target.section(section_idx), Some(baseline.section(section_idx))) {
            SectionDiff::Changes(changes) if !changes.is_empty() => changes,
            _ => continue,
        };

        let records = changes
            .into_iter()
            .map(|change| {
                let (x, y, z) = Section::coords(change.index);
                BlockRecord {
                    x,
                    y: (section_idx as u8) * 16 + y,
                    z,
                    block_state: change.block_state,
                }
            })
            .collect();
        out.push((section_idx, records));
    }
    out
}
