//! Delta command list.
//!
//! The original `rsync_command` packed the source flag into the high bit
//! of `length` (`MiscTypes.h`). The in-memory representation here is an
//! explicit `(source, length)` pair instead;
//! [`DeltaCommand::to_packed`]/[`from_packed`] are kept only for callers
//! that want the packed persisted form.

use serde::{Deserialize, Serialize};

/// Where a command's bytes come from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Source {
    /// Bytes are copied from the old file at `offset`.
    Old,
    /// Bytes are a literal run embedded starting at `offset` in the new
    /// file.
    New,
}

/// One entry in a delta command list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaCommand {
    pub source: Source,
    pub offset: u64,
    pub length: u64,
}

impl DeltaCommand {
    const SOURCE_BIT: u64 = 1 << 63;

    pub fn old(offset: u64, length: u64) -> Self {
        Self {
            source: Source::Old,
            offset,
            length,
        }
    }

    pub fn new_literal(offset: u64, length: u64) -> Self {
        Self {
            source: Source::New,
            offset,
            length,
        }
    }

    /// Packs `(source, length)` into a single 64-bit field: the top bit
    /// marks `Old`, the low 63 bits hold the length.
    pub fn to_packed(&self) -> u64 {
        match self.source {
            Source::Old => self.length | Self::SOURCE_BIT,
            Source::New => self.length & !Self::SOURCE_BIT,
        }
    }

    pub fn from_packed(offset: u64, packed: u64) -> Self {
        let source = if packed & Self::SOURCE_BIT != 0 {
            Source::Old
        } else {
            Source::New
        };
        Self {
            source,
            offset,
            length: packed & !Self::SOURCE_BIT,
        }
    }
}

/// An ordered, immutable sequence of delta commands whose covered ranges
/// partition the new file's byte range.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandList {
    commands: Vec<DeltaCommand>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: DeltaCommand) {
        self.commands.push(command);
    }

    /// Mutable access to the last command, used by the comparer to extend
    /// an in-progress run without re-pushing.
    pub fn last_mut(&mut self) -> Option<&mut DeltaCommand> {
        self.commands.last_mut()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeltaCommand> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn as_slice(&self) -> &[DeltaCommand] {
        &self.commands
    }

    /// Total length covered by the command list; must equal the new
    /// file's size.
    pub fn total_length(&self) -> u64 {
        self.commands.iter().map(|c| c.length).sum()
    }

    /// Applies the command list against `old`, reconstructing the new
    /// file's bytes. Used both by the CLI's `materialize` path for plain
    /// (non-chained) deltas and by round-trip tests.
    pub fn apply(&self, old: &[u8], new: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.total_length() as usize);
        for command in &self.commands {
            let start = command.offset as usize;
            let end = start + command.length as usize;
            match command.source {
                Source::Old => out.extend_from_slice(&old[start..end]),
                Source::New => out.extend_from_slice(&new[start..end]),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_round_trips() {
        let old = DeltaCommand::old(42, 100);
        let packed = old.to_packed();
        assert_eq!(DeltaCommand::from_packed(42, packed), old);

        let new = DeltaCommand::new_literal(7, 5);
        let packed = new.to_packed();
        assert_eq!(DeltaCommand::from_packed(7, packed), new);
    }

    #[test]
    fn apply_reconstructs_from_mixed_sources() {
        let old = b"AAAABBBB".to_vec();
        let new = b"BBBBAAAA".to_vec();
        let mut list = CommandList::new();
        list.push(DeltaCommand::old(4, 4));
        list.push(DeltaCommand::old(0, 4));
        assert_eq!(list.apply(&old, &new), new);
    }

    #[test]
    fn total_length_sums_commands() {
        let mut list = CommandList::new();
        list.push(DeltaCommand::old(0, 10));
        list.push(DeltaCommand::new_literal(10, 3));
        assert_eq!(list.total_length(), 13);
    }
}
