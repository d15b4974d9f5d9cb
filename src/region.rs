//! Address-range descriptors and the first-match region table.
//!
//! A region maps an inclusive address range either to a slice of an
//! arena-owned buffer or to one of the crate's handler devices. Regions are
//! immutable after configuration; only the buffer contents they point to
//! change. Overlapping ranges are legal and encode mirror priority through
//! registration order, since lookup is first-match.

/// Which access class a region answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    Code,
    Data,
}

/// Stable handle into the buffer arena owned by the bus. Regions refer to
/// buffers by id, never by pointer, so table growth cannot invalidate them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferId {
    Rom,
    Ram,
    Flash,
    EmuSeg,
}

/// Handler devices reachable through function-backed regions. The bus owns
/// the devices; the region only names which one answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// The special-function-register block at 0xF000..=0xFFFF.
    Sfr,
    /// The flash command automaton, addressed modulo the device size.
    Flash,
    /// Constant open-bus byte (0xFF). Used for the fx-5800P battery stub.
    OpenBus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backing {
    /// Direct buffer access at `address - addr_low + offset`.
    Array { buffer: BufferId, offset: u32 },
    /// Per-byte handler dispatch with the full (segment, offset) pair.
    Handler(HandlerKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    pub kind: RegionKind,
    pub writable: bool,
    /// Inclusive bounds in the `(segment << 16) | offset` address space.
    pub addr_low: u32,
    pub addr_high: u32,
    pub backing: Backing,
}

impl MemoryRegion {
    pub fn array(
        kind: RegionKind,
        writable: bool,
        addr_low: u32,
        addr_high: u32,
        buffer: BufferId,
        offset: u32,
    ) -> Self {
        Self {
            kind,
            writable,
            addr_low,
            addr_high,
            backing: Backing::Array { buffer, offset },
        }
    }

    pub fn handler(
        kind: RegionKind,
        writable: bool,
        addr_low: u32,
        addr_high: u32,
        handler: HandlerKind,
    ) -> Self {
        Self {
            kind,
            writable,
            addr_low,
            addr_high,
            backing: Backing::Handler(handler),
        }
    }

    pub fn contains(&self, address: u32) -> bool {
        address >= self.addr_low && address <= self.addr_high
    }
}

/// Append-only ordered collection of regions. Indices returned by
/// [`RegionTable::add_region`] stay valid for the table's lifetime.
#[derive(Debug, Clone, Default)]
pub struct RegionTable {
    regions: Vec<MemoryRegion>,
}

impl RegionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a region and returns its stable index.
    pub fn add_region(&mut self, region: MemoryRegion) -> usize {
        self.regions.push(region);
        self.regions.len() - 1
    }

    /// First region whose bounds contain `address`, in registration order.
    pub fn resolve(&self, address: u32) -> Option<&MemoryRegion> {
        self.regions.iter().find(|region| region.contains(address))
    }

    pub fn get(&self, index: usize) -> Option<&MemoryRegion> {
        self.regions.get(index)
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryRegion> {
        self.regions.iter()
    }
}
