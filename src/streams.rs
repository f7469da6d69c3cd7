//! Version-chain stream layer and reconstruction planner.
//!
//! Grounded on the original `rsync::Stream`/`NormalFile`/`SparseFile`/
//! `RsyncChainLink` (`Rsync.h`/`Rsync.cpp`). This is a sum type with static
//! dispatch rather than a virtual base class, and shared ownership uses `Rc`
//! (streams are single-threaded, never shared across threads) instead of
//! `shared_ptr`. Interior mutability (`RefCell`/`Cell`) stands in for the
//! original's plain mutable fields, since `seek`/`read` need to mutate
//! cursor state through a shared `Rc<Stream>`.
//!
//! Both parts structs (`SparsePart`, `ChainLinkPart`) use the same
//! `physical_offset`/`virtual_offset` convention the original's
//! `RsyncChainLink::part` uses; `SparseFile`'s constructor in the original
//! swaps these two fields relative to that convention, which would make its
//! `physical_offset` the *new*-file running sum instead of the *old*-file
//! command offset. That reads as a transcription slip rather than an
//! intentional asymmetry (`ChainLink` gets it right in the same file), so
//! this port uses the consistent convention for both.
//!
//! Distinct from the `it - parts.end()` vs. `it - parts.begin()` part-index
//! bug in the original's `SparseFile::transform_offset`, which this module
//! resolves by always computing a part's index as its distance from the
//! start of the parts vector, in [`find_containing_part`], used uniformly
//! by both `Sparse` and `ChainLink`.

use std::cell::{Cell, RefCell};
use std::path::Path;
use std::rc::Rc;

use crate::block_reader::BlockReader;
use crate::commands::{CommandList, Source};
use crate::config::DEFAULT_PREFETCH_BLOCK_SIZE;
use crate::error::{Error, Result};

/// Sentinel `unique_id` for a `ChainLink`, which has no single backing file.
pub const CHAIN_LINK_UNIQUE_ID: u64 = u64::MAX;

/// A terminal descriptor referring to a physical `Normal` file by its
/// `unique_id` and a byte range within it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconstructedPart {
    pub source_id: u64,
    pub offset_in_source: u64,
    pub size: u64,
}

/// One materialized physical file, read directly through a [`BlockReader`].
pub struct NormalFile {
    reader: RefCell<BlockReader>,
    unique_id: u64,
}

impl NormalFile {
    pub fn open(path: impl AsRef<Path>, unique_id: u64) -> Result<Self> {
        let reader = BlockReader::open(path, DEFAULT_PREFETCH_BLOCK_SIZE)?;
        Ok(Self {
            reader: RefCell::new(reader),
            unique_id,
        })
    }

    fn seek(&self, offset: u64) -> Result<()> {
        self.reader.borrow_mut().seek(offset)
    }

    fn read(&self, dst: &mut [u8]) -> Result<usize> {
        let mut reader = self.reader.borrow_mut();
        let mut filled = 0;
        while filled < dst.len() {
            match reader.next_byte()? {
                Some(byte) => {
                    dst[filled] = byte;
                    filled += 1;
                }
                None => break,
            }
        }
        Ok(filled)
    }

    fn eof(&self) -> bool {
        self.reader.borrow().at_eof()
    }

    fn reconstruct_section(&self, virtual_offset: u64, size: u64) -> Vec<ReconstructedPart> {
        vec![ReconstructedPart {
            source_id: self.unique_id,
            offset_in_source: virtual_offset,
            size,
        }]
    }
}

#[derive(Clone, Copy, Debug)]
struct SparsePart {
    physical_offset: u64,
    virtual_offset: u64,
    size: u64,
}

/// A literal-holes view over a physical file: only the `OLD`-sourced ranges
/// of a command list are materialized, addressed by their position in the
/// command list's virtual (new-file) offset space.
pub struct SparseFile {
    file: NormalFile,
    parts: Vec<SparsePart>,
    current: Cell<usize>,
    offset: Cell<u64>,
}

impl SparseFile {
    pub fn open(path: impl AsRef<Path>, unique_id: u64, commands: &CommandList) -> Result<Self> {
        let file = NormalFile::open(path, unique_id)?;
        let mut parts = Vec::new();
        let mut running = 0u64;
        for command in commands.iter() {
            if command.source == Source::Old {
                parts.push(SparsePart {
                    physical_offset: command.offset,
                    virtual_offset: running,
                    size: command.length,
                });
            }
            running += command.length;
        }
        parts.sort_by_key(|p| p.virtual_offset);

        let offset = parts.first().map(|p| p.virtual_offset).unwrap_or(0);
        if let Some(first) = parts.first() {
            file.seek(first.physical_offset)?;
        }

        Ok(Self {
            file,
            parts,
            current: Cell::new(0),
            offset: Cell::new(offset),
        })
    }

    fn seek(&self, offset: u64) -> Result<()> {
        let (idx, physical) = transform_offset(&self.parts, offset)?;
        self.file.seek(physical)?;
        self.current.set(idx);
        self.offset.set(offset);
        Ok(())
    }

    fn read(&self, dst: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < dst.len() {
            if self.current.get() >= self.parts.len() {
                break;
            }
            let part = self.parts[self.current.get()];
            let remaining_in_part = part.virtual_offset + part.size - self.offset.get();
            let want = (dst.len() - filled).min(remaining_in_part as usize);
            if want == 0 {
                break;
            }
            let n = self.file.read(&mut dst[filled..filled + want])?;
            filled += n;
            self.offset.set(self.offset.get() + n as u64);
            if n < want {
                break;
            }
            if self.offset.get() == part.virtual_offset + part.size {
                let next = self.current.get() + 1;
                self.current.set(next);
                if let Some(next_part) = self.parts.get(next) {
                    self.file.seek(next_part.physical_offset)?;
                    self.offset.set(next_part.virtual_offset);
                }
            }
        }
        Ok(filled)
    }

    fn eof(&self) -> bool {
        self.current.get() >= self.parts.len()
    }

    fn reconstruct_section(
        &self,
        unique_id: u64,
        mut virtual_offset: u64,
        mut size: u64,
    ) -> Vec<ReconstructedPart> {
        let mut out = Vec::new();
        while size > 0 {
            let Ok((idx, physical)) = transform_offset(&self.parts, virtual_offset) else {
                break;
            };
            let part = self.parts[idx];
            let consumed = size.min(part.virtual_offset + part.size - virtual_offset);
            out.push(ReconstructedPart {
                source_id: unique_id,
                offset_in_source: physical,
                size: consumed,
            });
            virtual_offset += consumed;
            size -= consumed;
        }
        out
    }
}

#[derive(Clone, Copy, Debug)]
struct ChainLinkPart {
    physical_offset: u64,
    virtual_offset: u64,
    size: u64,
    from_new: bool,
}

/// A virtual concatenation of an older stream and a new file's literal
/// bytes, addressed by a command list's running-length virtual offsets.
pub struct ChainLink {
    old: Rc<Stream>,
    new: Rc<Stream>,
    parts: Vec<ChainLinkPart>,
    current: Cell<usize>,
    offset: Cell<u64>,
}

impl ChainLink {
    pub fn new(old: Rc<Stream>, new: Rc<Stream>, commands: &CommandList) -> Self {
        let mut parts = Vec::new();
        let mut running = 0u64;
        for command in commands.iter() {
            parts.push(ChainLinkPart {
                physical_offset: command.offset,
                virtual_offset: running,
                size: command.length,
                from_new: command.source == Source::New,
            });
            running += command.length;
        }
        parts.sort_by_key(|p| p.virtual_offset);

        Self {
            old,
            new,
            parts,
            current: Cell::new(0),
            offset: Cell::new(0),
        }
    }

    fn child(&self, part: &ChainLinkPart) -> &Rc<Stream> {
        if part.from_new {
            &self.new
        } else {
            &self.old
        }
    }

    fn seek(&self, offset: u64) -> Result<()> {
        let (idx, physical) = transform_offset(&self.parts, offset)?;
        let part = self.parts[idx];
        self.child(&part).seek(physical)?;
        self.current.set(idx);
        self.offset.set(offset);
        Ok(())
    }

    fn read(&self, dst: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < dst.len() {
            if self.current.get() >= self.parts.len() {
                break;
            }
            let part = self.parts[self.current.get()];
            let remaining_in_part = part.virtual_offset + part.size - self.offset.get();
            let want = (dst.len() - filled).min(remaining_in_part as usize);
            if want == 0 {
                break;
            }
            let n = self.child(&part).read(&mut dst[filled..filled + want])?;
            filled += n;
            self.offset.set(self.offset.get() + n as u64);
            if n < want {
                break;
            }
            if self.offset.get() == part.virtual_offset + part.size {
                let next = self.current.get() + 1;
                self.current.set(next);
                if let Some(next_part) = self.parts.get(next).copied() {
                    self.child(&next_part).seek(next_part.physical_offset)?;
                    self.offset.set(next_part.virtual_offset);
                }
            }
        }
        Ok(filled)
    }

    fn eof(&self) -> bool {
        self.current.get() >= self.parts.len()
    }

    fn reconstruct_section(&self, mut virtual_offset: u64, mut size: u64) -> Result<Vec<ReconstructedPart>> {
        let mut out = Vec::new();
        while size > 0 {
            let Ok((idx, physical)) = transform_offset(&self.parts, virtual_offset) else {
                break;
            };
            let part = self.parts[idx];
            let consumed = size.min(part.virtual_offset + part.size - virtual_offset);
            out.extend(self.child(&part).reconstruct_section(physical, consumed)?);
            virtual_offset += consumed;
            size -= consumed;
        }
        Ok(out)
    }
}

/// Finds the unique part covering virtual offset `v`: binary-searches for
/// the first part starting at or after `v` and steps back one.
fn find_containing_part<P: PartLike>(parts: &[P], v: u64) -> Option<usize> {
    if parts.is_empty() {
        return None;
    }
    let idx = parts.partition_point(|p| p.virtual_offset() <= v);
    if idx == 0 {
        return None;
    }
    let candidate = idx - 1;
    let part = &parts[candidate];
    if v < part.virtual_offset() + part.size() {
        Some(candidate)
    } else {
        None
    }
}

trait PartLike {
    fn virtual_offset(&self) -> u64;
    fn size(&self) -> u64;
    fn physical_offset(&self) -> u64;
}

impl PartLike for SparsePart {
    fn virtual_offset(&self) -> u64 {
        self.virtual_offset
    }
    fn size(&self) -> u64 {
        self.size
    }
    fn physical_offset(&self) -> u64 {
        self.physical_offset
    }
}

impl PartLike for ChainLinkPart {
    fn virtual_offset(&self) -> u64 {
        self.virtual_offset
    }
    fn size(&self) -> u64 {
        self.size
    }
    fn physical_offset(&self) -> u64 {
        self.physical_offset
    }
}

fn transform_offset<P: PartLike>(parts: &[P], v: u64) -> Result<(usize, u64)> {
    let idx = find_containing_part(parts, v).ok_or(Error::InvalidOffset { offset: v })?;
    let part = &parts[idx];
    Ok((idx, part.physical_offset() + (v - part.virtual_offset())))
}

/// One version's byte stream: a whole physical file, a literal-holes view
/// over one, or a virtual concatenation of an older stream and a new
/// file's literal bytes.
pub enum Stream {
    Normal(NormalFile),
    Sparse(SparseFile),
    ChainLink(ChainLink),
}

impl Stream {
    pub fn normal(path: impl AsRef<Path>, unique_id: u64) -> Result<Rc<Self>> {
        Ok(Rc::new(Stream::Normal(NormalFile::open(path, unique_id)?)))
    }

    pub fn sparse(path: impl AsRef<Path>, unique_id: u64, commands: &CommandList) -> Result<Rc<Self>> {
        Ok(Rc::new(Stream::Sparse(SparseFile::open(
            path, unique_id, commands,
        )?)))
    }

    pub fn chain_link(old: Rc<Self>, new: Rc<Self>, commands: &CommandList) -> Rc<Self> {
        Rc::new(Stream::ChainLink(ChainLink::new(old, new, commands)))
    }

    pub fn seek(&self, offset: u64) -> Result<()> {
        match self {
            Stream::Normal(f) => f.seek(offset),
            Stream::Sparse(f) => f.seek(offset),
            Stream::ChainLink(f) => f.seek(offset),
        }
    }

    pub fn read(&self, dst: &mut [u8]) -> Result<usize> {
        match self {
            Stream::Normal(f) => f.read(dst),
            Stream::Sparse(f) => f.read(dst),
            Stream::ChainLink(f) => f.read(dst),
        }
    }

    pub fn eof(&self) -> bool {
        match self {
            Stream::Normal(f) => f.eof(),
            Stream::Sparse(f) => f.eof(),
            Stream::ChainLink(f) => f.eof(),
        }
    }

    pub fn unique_id(&self) -> u64 {
        match self {
            Stream::Normal(f) => f.unique_id,
            Stream::Sparse(f) => f.file.unique_id,
            Stream::ChainLink(_) => CHAIN_LINK_UNIQUE_ID,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            Stream::Normal(_) | Stream::Sparse(_) => 0,
            Stream::ChainLink(f) => f.old.version() + 1,
        }
    }

    pub fn reconstruct_section(&self, virtual_offset: u64, size: u64) -> Result<Vec<ReconstructedPart>> {
        match self {
            Stream::Normal(f) => Ok(f.reconstruct_section(virtual_offset, size)),
            Stream::Sparse(f) => Ok(f.reconstruct_section(f.file.unique_id, virtual_offset, size)),
            Stream::ChainLink(f) => f.reconstruct_section(virtual_offset, size),
        }
    }
}
