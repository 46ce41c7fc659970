//! # Block Planner
//!
//! The bus only supports contiguous reads, and every read costs a fixed
//! overhead plus a per-byte time. The planner turns a set of wanted fields
//! into the cheapest list of contiguous physical reads, never spanning a
//! range the device does not have, and falls back to one full DCB read when
//! the plan would cost about as much.

use crate::config::TimingModel;
use crate::dcb::address_map::AddressMap;
use crate::dcb::field::{FieldId, FieldTable};
use log::debug;
use std::time::Duration;

/// One contiguous physical read covering fields `first..=last`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadBlock {
    pub first: FieldId,
    pub last: FieldId,
    /// Physical DCB offset of `first`.
    pub start: u16,
    /// Bytes from the start of `first` to the end of `last`.
    pub length: usize,
}

/// How a request will be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadPlan {
    /// Read the whole DCB in one transaction.
    Full,
    Blocks(Vec<ReadBlock>),
}

pub struct Planner<'a> {
    table: &'a FieldTable,
    map: &'a AddressMap,
    timing: &'a TimingModel,
}

impl<'a> Planner<'a> {
    pub fn new(table: &'a FieldTable, map: &'a AddressMap, timing: &'a TimingModel) -> Self {
        Planner { table, map, timing }
    }

    fn block_for(&self, id: FieldId, start: u16) -> ReadBlock {
        ReadBlock {
            first: id,
            last: id,
            start,
            length: self.table.get(id).length,
        }
    }

    /// Splits `first..=last` into runs of present, physically adjacent fields.
    pub fn plan_range(&self, first: FieldId, last: FieldId) -> Vec<ReadBlock> {
        let mut blocks = Vec::new();
        let mut current: Option<ReadBlock> = None;

        for i in first.0..=last.0 {
            let id = FieldId(i);
            let field = self.table.get(id);
            match self.map.resolve(field.address) {
                None => {
                    if let Some(block) = current.take() {
                        blocks.push(block);
                    }
                }
                Some(offset) => match current.as_mut() {
                    Some(block) if block.start as usize + block.length == offset as usize => {
                        block.last = id;
                        block.length += field.length;
                    }
                    _ => {
                        if let Some(block) = current.replace(self.block_for(id, offset)) {
                            blocks.push(block);
                        }
                    }
                },
            }
        }
        blocks.extend(current);
        blocks
    }

    /// Cheapest reads covering `ids`.
    ///
    /// Each run from [`plan_range`](Self::plan_range) is decided as a whole:
    /// the requested fields in it become one read spanning all of them when
    /// that is estimated no slower than reading each field on its own,
    /// otherwise one read per field.
    pub fn plan_set(&self, ids: &[FieldId]) -> Vec<ReadBlock> {
        let mut wanted: Vec<(FieldId, u16)> = ids
            .iter()
            .filter_map(|&id| self.map.resolve(self.table.get(id).address).map(|o| (id, o)))
            .collect();
        wanted.sort();
        wanted.dedup();
        let (Some(&(min, _)), Some(&(max, _))) = (wanted.first(), wanted.last()) else {
            return Vec::new();
        };

        let mut reads = Vec::new();
        for run in self.plan_range(min, max) {
            let singles: Vec<ReadBlock> = wanted
                .iter()
                .filter(|(id, _)| (run.first..=run.last).contains(id))
                .map(|&(id, offset)| self.block_for(id, offset))
                .collect();
            let (Some(first), Some(last)) = (singles.first(), singles.last()) else {
                continue;
            };
            let span = ReadBlock {
                first: first.first,
                last: last.last,
                start: first.start,
                length: last.start as usize + last.length - first.start as usize,
            };
            if self.estimate(&[span]) <= self.estimate(&singles) {
                reads.push(span);
            } else {
                debug!(
                    "Splitting {:?}..{:?} into {} reads",
                    span.first,
                    span.last,
                    singles.len()
                );
                reads.extend(singles);
            }
        }
        reads
    }

    /// Estimated bus time of `blocks`, including the gaps between them.
    pub fn estimate(&self, blocks: &[ReadBlock]) -> Duration {
        let reads: Duration = blocks.iter().map(|b| self.timing.read_time(b.length)).sum();
        reads + self.timing.between_reads * blocks.len().saturating_sub(1) as u32
    }

    /// Replaces `blocks` by a full read when that costs about the same.
    pub fn choose(&self, blocks: Vec<ReadBlock>, dcb_length: usize) -> ReadPlan {
        if blocks.is_empty() {
            return ReadPlan::Blocks(blocks);
        }
        let estimate = self.estimate(&blocks);
        let full = self.timing.read_time(dcb_length);
        if estimate + self.timing.full_read_margin >= full {
            debug!(
                "Reading all, estimated {:?} against full read {:?}",
                estimate, full
            );
            ReadPlan::Full
        } else {
            ReadPlan::Blocks(blocks)
        }
    }
}
