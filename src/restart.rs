//! The checkpoint format. A checkpoint is a single seekable stream of
//! little-endian fixed-size records:
//!
//! 1. a header describing the mesh and the clock,
//! 2. a leaf table with one entry per block, in global id order, giving the
//!    block's address, its cost, and the offset of its record,
//! 3. one block record per leaf.
//!
//! Every block record has the same size, so each worker can compute the
//! offsets of its own blocks and write them without coordinating with the
//! others. On restart a worker reads the header and the leaf table, then
//! seeks straight to the blocks it owns.

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::config::{RegionSize, NGHOST};
use crate::error::{Error, IoErrorKind, Result};
use crate::logical_location::LogicalLocation;
use crate::mesh_block::{Coordinates, MeshBlock};
use crate::neighbor::{BoundaryFlag, Face, FaceNeighbor, NeighborBlock, NeighborTable};

const MAGIC: &[u8; 8] = b"OCTMESH1";

/// Bytes in a stored logical address: the level and three coordinates.
pub const ADDRESS_LEN: u64 = 4 + 3 * 8;

const LEAF_RECORD_LEN: u64 = ADDRESS_LEN + 8 + 8;
const NEIGHBOR_SLOT_LEN: u64 = 1 + 4 + 8;
const FACE_RECORD_LEN: u64 = 1 + 4 * NEIGHBOR_SLOT_LEN;




/**
 * Everything about a mesh needed before any block is read.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct Header {
    pub num_blocks: u64,
    pub root_level: u32,
    pub max_level: u32,
    pub root_blocks: [i64; 3],
    pub mesh: RegionSize,
    pub block_cells: [usize; 3],
    pub boundaries: [BoundaryFlag; 6],
    pub time: f64,
    pub dt: f64,
    pub cycle: u64,
    pub num_variables: usize,
    pub face_field: bool,
}

/**
 * One entry of the leaf table.
 */
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LeafRecord {
    pub loc: LogicalLocation,
    pub cost: f64,
    pub offset: u64,
}

/**
 * The stored state of one block. Neighbor records keep their level and
 * global id; rank and local id depend on the partition and are filled in
 * again on restart.
 */
#[derive(Clone, Debug, PartialEq)]
pub struct BlockRecord {
    pub size: RegionSize,
    pub bcs: [BoundaryFlag; 6],
    pub neighbors: NeighborTable,
    pub coords: Coordinates,
    pub cons: Vec<f64>,
    pub field: Option<[Vec<f64>; 3]>,
}




impl Header {
    /// Length of the encoded header, in bytes.
    pub fn encoded_len(&self) -> u64 {
        (8 + 8 + 8 + 4 + 4 + 3 * 8 + 12 * 8 + 3 * 8 + 6 * 4 + 8 + 8 + 8 + 8 + 1) as u64
    }

    /// Offset of the leaf table.
    pub fn table_offset(&self) -> u64 {
        self.encoded_len()
    }

    /// Offset of the record of block `gid`.
    pub fn block_offset(&self, gid: usize) -> u64 {
        self.encoded_len() + self.num_blocks * LEAF_RECORD_LEN + gid as u64 * self.block_record_len()
    }

    /// Length of the whole checkpoint.
    pub fn total_len(&self) -> u64 {
        self.block_offset(self.num_blocks as usize)
    }

    fn active(&self) -> [bool; 3] {
        [true, self.mesh.cells[1] > 1, self.mesh.cells[2] > 1]
    }

    fn axis_faces(&self, axis: usize) -> u64 {
        if self.active()[axis] {
            (self.block_cells[axis] + 2 * NGHOST + 1) as u64
        } else {
            2
        }
    }

    fn cell_count(&self) -> u64 {
        (0..3).map(|a| self.axis_faces(a) - 1).product()
    }

    fn face_count(&self, component: usize) -> u64 {
        (0..3)
            .map(|a| if a == component { self.axis_faces(a) } else { self.axis_faces(a) - 1 })
            .product()
    }

    /// Length of one block record, in bytes.
    pub fn block_record_len(&self) -> u64 {
        let size = 9 * 8 + 3 * 8;
        let bcs = 6 * 4;
        let neighbors = 6 * FACE_RECORD_LEN;
        let coords: u64 = (0..3).map(|a| 16 + 8 * (2 * self.axis_faces(a) - 1)).sum();
        let cons = 8 + 8 * self.num_variables as u64 * self.cell_count();
        let field = 1 + if self.face_field {
            (0..3).map(|c| 8 + 8 * self.face_count(c)).sum()
        } else {
            0
        };
        size + bcs + neighbors + coords + cons + field
    }
}




// ============================================================================
struct Encoder<W> {
    stream: W,
}

impl<W: Write> Encoder<W> {
    fn bytes(&mut self, data: &[u8]) -> Result<()> {
        self.stream
            .write_all(data)
            .map_err(|e| Error::io(IoErrorKind::ShortWrite, "writing a checkpoint record", e))
    }
    fn u8(&mut self, x: u8) -> Result<()> {
        self.bytes(&[x])
    }
    fn i32(&mut self, x: i32) -> Result<()> {
        self.bytes(&x.to_le_bytes())
    }
    fn u32(&mut self, x: u32) -> Result<()> {
        self.bytes(&x.to_le_bytes())
    }
    fn u64(&mut self, x: u64) -> Result<()> {
        self.bytes(&x.to_le_bytes())
    }
    fn i64(&mut self, x: i64) -> Result<()> {
        self.bytes(&x.to_le_bytes())
    }
    fn f64(&mut self, x: f64) -> Result<()> {
        self.bytes(&x.to_le_bytes())
    }
    fn f64s(&mut self, xs: &[f64]) -> Result<()> {
        self.u64(xs.len() as u64)?;
        let mut buffer = Vec::with_capacity(8 * xs.len());
        for x in xs {
            buffer.extend_from_slice(&x.to_le_bytes())
        }
        self.bytes(&buffer)
    }
    fn region(&mut self, r: &RegionSize) -> Result<()> {
        for a in 0..3 {
            self.f64(r.min[a])?;
            self.f64(r.max[a])?;
            self.f64(r.ratio[a])?;
        }
        for a in 0..3 {
            self.u64(r.cells[a] as u64)?;
        }
        Ok(())
    }
    fn address(&mut self, loc: &LogicalLocation) -> Result<()> {
        self.u32(loc.level)?;
        for a in 0..3 {
            self.i64(loc.lx[a])?;
        }
        Ok(())
    }
}

struct Decoder<R> {
    stream: R,
}

impl<R: Read> Decoder<R> {
    fn bytes<const N: usize>(&mut self, what: &str) -> Result<[u8; N]> {
        let mut buffer = [0; N];
        self.stream.read_exact(&mut buffer).map_err(|e| read_error(what, e))?;
        Ok(buffer)
    }
    fn u8(&mut self, what: &str) -> Result<u8> {
        Ok(self.bytes::<1>(what)?[0])
    }
    fn i32(&mut self, what: &str) -> Result<i32> {
        Ok(i32::from_le_bytes(self.bytes(what)?))
    }
    fn u32(&mut self, what: &str) -> Result<u32> {
        Ok(u32::from_le_bytes(self.bytes(what)?))
    }
    fn u64(&mut self, what: &str) -> Result<u64> {
        Ok(u64::from_le_bytes(self.bytes(what)?))
    }
    fn i64(&mut self, what: &str) -> Result<i64> {
        Ok(i64::from_le_bytes(self.bytes(what)?))
    }
    fn f64(&mut self, what: &str) -> Result<f64> {
        Ok(f64::from_le_bytes(self.bytes(what)?))
    }
    fn f64s(&mut self, expected: u64, what: &str) -> Result<Vec<f64>> {
        let n = self.u64(what)?;

        if n != expected {
            return Err(Error::structure(format!(
                "{} holds {} values but the mesh needs {}",
                what, n, expected
            )));
        }
        let len = n
            .checked_mul(8)
            .ok_or_else(|| Error::structure(format!("{} holds {} values", what, n)))?;
        let mut buffer = Vec::new();
        self.stream.by_ref().take(len).read_to_end(&mut buffer).map_err(|e| read_error(what, e))?;

        if buffer.len() as u64 != len {
            return Err(Error::short_read(format!("reading {}", what)));
        }

        Ok(buffer
            .chunks_exact(8)
            .map(|c| {
                let mut b = [0; 8];
                b.copy_from_slice(c);
                f64::from_le_bytes(b)
            })
            .collect())
    }
    fn region(&mut self, what: &str) -> Result<RegionSize> {
        let mut r = RegionSize {
            min: [0.0; 3],
            max: [0.0; 3],
            ratio: [1.0; 3],
            cells: [1; 3],
        };
        for a in 0..3 {
            r.min[a] = self.f64(what)?;
            r.max[a] = self.f64(what)?;
            r.ratio[a] = self.f64(what)?;
        }
        for a in 0..3 {
            r.cells[a] = self.u64(what)? as usize;
        }
        Ok(r)
    }
    fn address(&mut self, what: &str) -> Result<LogicalLocation> {
        let level = self.u32(what)?;
        let mut lx = [0; 3];
        for x in lx.iter_mut() {
            *x = self.i64(what)?;
        }
        Ok(LogicalLocation::new(lx, level))
    }
}

fn read_error(what: &str, e: io::Error) -> Error {
    let kind = if e.kind() == io::ErrorKind::UnexpectedEof {
        IoErrorKind::ShortRead
    } else {
        IoErrorKind::Other
    };
    Error::io(kind, format!("reading {}", what), e)
}

fn seek<S: Seek>(stream: &mut S, offset: u64) -> Result<()> {
    stream
        .seek(SeekFrom::Start(offset))
        .map(|_| ())
        .map_err(|e| Error::io(IoErrorKind::Seek, format!("seeking to offset {}", offset), e))
}




// ============================================================================

/**
 * Write the header and the leaf table at the start of the stream. Leaf
 * offsets are derived from the header.
 */
pub fn write_preamble<W: Write + Seek>(stream: &mut W, header: &Header, leaves: &[LogicalLocation], costs: &[f64]) -> Result<()> {
    seek(stream, 0)?;
    let mut e = Encoder { stream };

    e.bytes(MAGIC)?;
    e.u64(header.num_blocks)?;
    e.u64(ADDRESS_LEN)?;
    e.u32(header.root_level)?;
    e.u32(header.max_level)?;
    for a in 0..3 {
        e.i64(header.root_blocks[a])?;
    }
    e.region(&header.mesh)?;
    for a in 0..3 {
        e.u64(header.block_cells[a] as u64)?;
    }
    for b in &header.boundaries {
        e.i32(b.code())?;
    }
    e.f64(header.time)?;
    e.f64(header.dt)?;
    e.u64(header.cycle)?;
    e.u64(header.num_variables as u64)?;
    e.u8(header.face_field as u8)?;

    for (gid, (loc, cost)) in leaves.iter().zip(costs).enumerate() {
        e.address(loc)?;
        e.f64(*cost)?;
        e.u64(header.block_offset(gid))?;
    }
    Ok(())
}

/**
 * Read the header and leaf table from the start of the stream.
 */
pub fn read_preamble<R: Read + Seek>(stream: &mut R) -> Result<(Header, Vec<LeafRecord>)> {
    seek(stream, 0)?;
    let mut d = Decoder { stream };

    if &d.bytes::<8>("the checkpoint signature")? != MAGIC {
        return Err(Error::structure("the stream is not an octmesh checkpoint"));
    }
    let num_blocks = d.u64("the block count")?;
    let address_len = d.u64("the address length")?;

    if address_len != ADDRESS_LEN {
        return Err(Error::structure(format!(
            "stored addresses are {} bytes, expected {}",
            address_len, ADDRESS_LEN
        )));
    }
    let root_level = d.u32("the root level")?;
    let max_level = d.u32("the maximum level")?;
    let mut root_blocks = [0; 3];
    for n in root_blocks.iter_mut() {
        *n = d.i64("the root grid")?;
    }
    let mesh = d.region("the mesh extent")?;
    let mut block_cells = [0; 3];
    for n in block_cells.iter_mut() {
        *n = d.u64("the block size")? as usize;
    }
    let mut boundaries = [BoundaryFlag::Outflow; 6];
    for b in boundaries.iter_mut() {
        *b = BoundaryFlag::from_code(d.i32("the mesh boundaries")?)?;
    }
    let header = Header {
        num_blocks,
        root_level,
        max_level,
        root_blocks,
        mesh,
        block_cells,
        boundaries,
        time: d.f64("the time")?,
        dt: d.f64("the time step")?,
        cycle: d.u64("the cycle")?,
        num_variables: d.u64("the variable count")? as usize,
        face_field: d.u8("the face field switch")? != 0,
    };

    let mut leaves = Vec::new();

    for _ in 0..num_blocks {
        leaves.push(LeafRecord {
            loc: d.address("the leaf table")?,
            cost: d.f64("the leaf table")?,
            offset: d.u64("the leaf table")?,
        });
    }
    Ok((header, leaves))
}




/**
 * Write the record of one block at its offset.
 */
pub fn write_block<W: Write + Seek>(stream: &mut W, header: &Header, block: &MeshBlock) -> Result<()> {
    seek(stream, header.block_offset(block.gid))?;
    let mut e = Encoder { stream };

    e.region(&block.size)?;
    for b in &block.bcs {
        e.i32(b.code())?;
    }
    for &face in &Face::ALL {
        let (kind, slots) = match block.neighbors.get(face) {
            FaceNeighbor::Boundary => (0, [None; 4]),
            FaceNeighbor::Same(b) => (1, [Some(*b), None, None, None]),
            FaceNeighbor::Coarser(b) => (2, [Some(*b), None, None, None]),
            FaceNeighbor::Finer(slots) => (3, *slots),
        };
        e.u8(kind)?;

        for slot in &slots {
            match slot {
                Some(b) => {
                    e.u8(1)?;
                    e.u32(b.level)?;
                    e.u64(b.gid as u64)?;
                }
                None => {
                    e.u8(0)?;
                    e.u32(0)?;
                    e.u64(0)?;
                }
            }
        }
    }
    for axis in 0..3 {
        let faces = block.coords.faces(axis);
        e.u64(if faces.len() > 2 { NGHOST as u64 } else { 0 })?;
        e.u64(faces.len() as u64)?;
        for x in faces {
            e.f64(*x)?;
        }
        for dx in block.coords.spacings(axis) {
            e.f64(*dx)?;
        }
    }
    e.f64s(block.cons.data())?;

    match &block.field {
        Some(field) => {
            e.u8(1)?;
            for component in &field.x {
                e.f64s(component.data())?;
            }
        }
        None => e.u8(0)?,
    }
    Ok(())
}

/**
 * Read the record of one block from the offset given in its leaf entry.
 */
pub fn read_block<R: Read + Seek>(stream: &mut R, header: &Header, leaf: &LeafRecord) -> Result<BlockRecord> {
    seek(stream, leaf.offset)?;
    let mut d = Decoder { stream };

    let size = d.region("a block extent")?;
    let mut bcs = [BoundaryFlag::Block; 6];
    for b in bcs.iter_mut() {
        *b = BoundaryFlag::from_code(d.i32("a block boundary tag")?)?;
    }
    let mut neighbors = NeighborTable::default();

    for &face in &Face::ALL {
        let kind = d.u8("a neighbor record")?;
        let mut slots = [None; 4];

        for slot in slots.iter_mut() {
            let present = d.u8("a neighbor record")?;
            let level = d.u32("a neighbor record")?;
            let gid = d.u64("a neighbor record")? as usize;

            if present != 0 {
                *slot = Some(NeighborBlock { rank: 0, level, gid, lid: 0 });
            }
        }
        let record = match (kind, slots[0]) {
            (0, _) => FaceNeighbor::Boundary,
            (1, Some(b)) => FaceNeighbor::Same(b),
            (2, Some(b)) => FaceNeighbor::Coarser(b),
            (3, _) => FaceNeighbor::Finer(slots),
            _ => {
                return Err(Error::structure(format!(
                    "bad neighbor record of kind {} across {:?}",
                    kind, face
                )))
            }
        };
        neighbors.set(face, record);
    }

    let mut faces: [Vec<f64>; 3] = Default::default();
    let mut spacings: [Vec<f64>; 3] = Default::default();
    let mut ghosts = [0; 3];

    for axis in 0..3 {
        ghosts[axis] = d.u64("block coordinates")? as i64;
        let n = d.u64("block coordinates")? as usize;

        if n as u64 != header.axis_faces(axis) {
            return Err(Error::structure(format!(
                "stored block has {} faces along x{} but the mesh needs {}",
                n,
                axis + 1,
                header.axis_faces(axis)
            )));
        }
        for _ in 0..n {
            faces[axis].push(d.f64("block coordinates")?);
        }
        for _ in 0..n - 1 {
            spacings[axis].push(d.f64("block coordinates")?);
        }
    }
    let coords = Coordinates::from_arrays(faces, spacings, ghosts);
    let cons = d.f64s(header.num_variables as u64 * header.cell_count(), "the conserved variables")?;

    let field = if d.u8("the face field switch")? != 0 {
        Some([
            d.f64s(header.face_count(0), "the face field")?,
            d.f64s(header.face_count(1), "the face field")?,
            d.f64s(header.face_count(2), "the face field")?,
        ])
    } else {
        None
    };
    if field.is_some() != header.face_field {
        return Err(Error::structure("stored block disagrees with the header about the face field"));
    }
    Ok(BlockRecord { size, bcs, neighbors, coords, cons, field })
}
