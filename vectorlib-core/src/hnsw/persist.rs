//! Binary persistence of a whole index.
//!
//! All integers are little-endian. The stream is a fixed header, then one
//! packed base-layer record per node in id order (`[header, M0 links,
//! vector, label]`), then for each node a `u32` byte length followed by its
//! upper-layer link words.

use std::{
    fs::File,
    io::{self, BufReader, BufWriter, Read, Write},
    path::Path,
};

use tracing::{info, instrument};

use crate::{error::HnswError, space::Space};

use super::{
    arena::{RecordLayout, header_count},
    index::HnswIndex,
    params::{HnswParams, MAX_CONNECTIONS_CAP, MAX_LEVEL},
    types::EntryPoint,
};

const WORD_BYTES: usize = size_of::<u32>();

/// Fixed-size header at the start of a serialised index.
#[derive(Clone, Debug, PartialEq)]
pub struct IndexHeader {
    /// Offset of the link list inside a base-layer record (always zero).
    pub offset_level0: u64,
    /// Capacity of the index when it was saved.
    pub max_elements: u64,
    /// Number of stored nodes, deleted ones included.
    pub element_count: u64,
    /// Byte size of one base-layer record.
    pub record_size: u64,
    /// Offset of the label inside a base-layer record.
    pub label_offset: u64,
    /// Offset of the vector inside a base-layer record.
    pub data_offset: u64,
    /// Top layer of the graph, or `-1` when empty.
    pub max_level: i32,
    /// Internal id of the entry point, or `u32::MAX` when empty.
    pub entry_point: u32,
    /// Neighbour cap on upper layers.
    pub max_m: u64,
    /// Neighbour cap on the base layer.
    pub max_m0: u64,
    /// Configured `M`.
    pub m: u64,
    /// Level sampling multiplier.
    pub level_multiplier: f64,
    /// Construction search breadth.
    pub ef_construction: u64,
}

impl IndexHeader {
    /// Encoded size in bytes.
    pub const ENCODED_LEN: usize = 6 * 8 + 4 + 4 + 3 * 8 + 8 + 8;

    /// Decodes only the header from the start of a serialised index.
    ///
    /// # Errors
    /// Returns [`HnswError::Corrupted`] when the stream ends early and
    /// [`HnswError::StreamIo`] for other read failures.
    ///
    /// # Examples
    /// ```
    /// use vectorlib_core::{HnswIndex, HnswParams, IndexHeader, L2Space};
    ///
    /// let index = HnswIndex::new(L2Space::new(4), 8, HnswParams::default())
    ///     .expect("index must build");
    /// let mut bytes = Vec::new();
    /// index.write_to(&mut bytes).expect("write must succeed");
    /// let header = IndexHeader::read_from(bytes.as_slice()).expect("header must decode");
    /// assert_eq!(header.element_count, 0);
    /// assert_eq!(header.max_level, -1);
    /// ```
    pub fn read_from(mut reader: impl Read) -> Result<Self, HnswError> {
        let mut bytes = [0u8; Self::ENCODED_LEN];
        reader.read_exact(&mut bytes).map_err(stream_error)?;
        let mut fields = FieldReader::new(&bytes);
        Ok(Self {
            offset_level0: fields.u64(),
            max_elements: fields.u64(),
            element_count: fields.u64(),
            record_size: fields.u64(),
            label_offset: fields.u64(),
            data_offset: fields.u64(),
            max_level: fields.i32(),
            entry_point: fields.u32(),
            max_m: fields.u64(),
            max_m0: fields.u64(),
            m: fields.u64(),
            level_multiplier: fields.f64(),
            ef_construction: fields.u64(),
        })
    }

    fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        for value in [
            self.offset_level0,
            self.max_elements,
            self.element_count,
            self.record_size,
            self.label_offset,
            self.data_offset,
        ] {
            writer.write_all(&value.to_le_bytes())?;
        }
        writer.write_all(&self.max_level.to_le_bytes())?;
        writer.write_all(&self.entry_point.to_le_bytes())?;
        for value in [self.max_m, self.max_m0, self.m] {
            writer.write_all(&value.to_le_bytes())?;
        }
        writer.write_all(&self.level_multiplier.to_le_bytes())?;
        writer.write_all(&self.ef_construction.to_le_bytes())
    }

    /// Checks the record layout and link caps against `space`.
    fn validate(&self, data_size: usize) -> Result<HnswParams, HnswError> {
        if self.offset_level0 != 0 {
            return Err(HnswError::corrupted("base-layer links must start each record"));
        }
        let m = to_usize(self.m, "M")?;
        if !(2..=MAX_CONNECTIONS_CAP).contains(&m)
            || self.max_m != self.m
            || self.max_m0 != self.m * 2
        {
            return Err(HnswError::corrupted(format!(
                "unsupported neighbour caps (M={}, maxM={}, maxM0={})",
                self.m, self.max_m, self.max_m0
            )));
        }
        let expected = HnswParams::multiplier_for(m);
        let consistent = (self.level_multiplier - expected).abs() <= expected * 1.0e-9;
        if !consistent {
            return Err(HnswError::corrupted(format!(
                "level multiplier {} does not match 1/ln({m})",
                self.level_multiplier
            )));
        }
        let params = HnswParams::restored(
            m,
            to_usize(self.ef_construction, "ef_construction")?,
            self.level_multiplier,
        );
        let layout = RecordLayout::new(data_size, &params);
        if self.data_offset != layout.vector_offset() as u64
            || self.label_offset != layout.label_offset() as u64
            || self.record_size != layout.record_size() as u64
        {
            return Err(HnswError::corrupted(format!(
                "record layout (size {}, vector at {}, label at {}) does not match a {}-byte space",
                self.record_size, self.data_offset, self.label_offset, data_size
            )));
        }
        Ok(params)
    }
}

/// Options applied when loading a serialised index.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct LoadOptions {
    /// Capacity of the loaded index; zero keeps the stored capacity.
    pub max_elements: usize,
    /// Whether insertions may reuse deleted slots after loading.
    pub allow_replace_deleted: bool,
}

impl<S: Space> HnswIndex<S> {
    fn header(&self) -> IndexHeader {
        let layout = self.arena.layout();
        let entry = self.entry_point();
        IndexHeader {
            offset_level0: layout.links_offset() as u64,
            max_elements: self.capacity() as u64,
            element_count: self.arena.len() as u64,
            record_size: layout.record_size() as u64,
            label_offset: layout.label_offset() as u64,
            data_offset: layout.vector_offset() as u64,
            max_level: entry.map_or(-1, |ep| ep.level as i32),
            entry_point: entry.map_or(u32::MAX, |ep| ep.node),
            max_m: self.params.max_connections() as u64,
            max_m0: self.params.max_connections_level0() as u64,
            m: self.params.max_connections() as u64,
            level_multiplier: self.params.level_multiplier(),
            ef_construction: self.params.ef_construction() as u64,
        }
    }

    /// Serialises the index into `writer`.
    ///
    /// Writers running concurrently are not excluded; save a quiescent
    /// index to get a consistent snapshot.
    ///
    /// # Errors
    /// Returns [`HnswError::StreamIo`] when writing fails.
    pub fn write_to(&self, mut writer: impl Write) -> Result<(), HnswError> {
        self.write_stream(&mut writer)?;
        writer.flush().map_err(stream_error)
    }

    fn write_stream(&self, writer: &mut impl Write) -> Result<(), HnswError> {
        let header = self.header();
        header.write_to(writer).map_err(stream_error)?;
        let count = self.arena.len() as u32;
        for id in 0..count {
            for word in self.arena.level0_words(id) {
                writer.write_all(&word.to_le_bytes()).map_err(stream_error)?;
            }
            writer
                .write_all(&self.arena.read_vector(id)?)
                .map_err(stream_error)?;
            writer
                .write_all(&self.arena.label(id).to_le_bytes())
                .map_err(stream_error)?;
        }
        for id in 0..count {
            let words: Vec<u32> = self.arena.upper_words(id).collect();
            let byte_len = (words.len() * WORD_BYTES) as u32;
            writer
                .write_all(&byte_len.to_le_bytes())
                .map_err(stream_error)?;
            for word in words {
                writer.write_all(&word.to_le_bytes()).map_err(stream_error)?;
            }
        }
        Ok(())
    }

    /// Writes the index to `path`, replacing any existing file.
    ///
    /// # Errors
    /// Returns [`HnswError::Io`] when the file cannot be created or written.
    #[instrument(name = "hnsw.save", skip(self, path), fields(path = %path.as_ref().display()), err)]
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), HnswError> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| HnswError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        self.write_to(BufWriter::new(file))
            .map_err(|err| with_path(err, path))?;
        info!(elements = self.len(), "index saved");
        Ok(())
    }

    /// Rebuilds an index from a stream produced by [`HnswIndex::write_to`].
    ///
    /// The stream is read and checked in full before the arena is sized, so
    /// a header claiming more nodes than the stream holds fails without
    /// allocating for them.
    ///
    /// # Errors
    /// - [`HnswError::Corrupted`] when the stream is truncated, has trailing
    ///   bytes, or fails a structural check.
    /// - [`HnswError::CapacityExceeded`] when `options.max_elements` is
    ///   non-zero and below the stored element count.
    /// - [`HnswError::StreamIo`] for other read failures.
    pub fn read_from(space: S, reader: impl Read, options: LoadOptions) -> Result<Self, HnswError> {
        Self::read_stream(space, reader, options, None)
    }

    /// Loads an index previously written with [`HnswIndex::save`].
    ///
    /// # Errors
    /// Returns [`HnswError::Io`] when the file cannot be read, plus every
    /// error of [`HnswIndex::read_from`].
    #[instrument(name = "hnsw.load", skip(space, path), fields(path = %path.as_ref().display()), err)]
    pub fn load(space: S, path: impl AsRef<Path>, options: LoadOptions) -> Result<Self, HnswError> {
        let path = path.as_ref();
        let io_error = |source| HnswError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(io_error)?;
        let file_len = file.metadata().map_err(io_error)?.len();
        let index = Self::read_stream(space, BufReader::new(file), options, Some(file_len))
            .map_err(|err| with_path(err, path))?;
        info!(
            elements = index.len(),
            deleted = index.deleted_count(),
            max_level = ?index.max_level(),
            "index loaded"
        );
        Ok(index)
    }

    fn read_stream(
        space: S,
        mut reader: impl Read,
        options: LoadOptions,
        stream_len: Option<u64>,
    ) -> Result<Self, HnswError> {
        let header = IndexHeader::read_from(&mut reader)?;
        let params = header
            .validate(space.data_size())?
            .with_replace_deleted(options.allow_replace_deleted);

        let count = to_usize(header.element_count, "element count")?;
        let stored_capacity = to_usize(header.max_elements, "max_elements")?;
        let capacity = resolve_capacity(options.max_elements, stored_capacity, count)?;
        if capacity >= u32::MAX as usize {
            return Err(HnswError::corrupted("capacity exceeds the 32-bit id range"));
        }
        let entry = resolve_entry(&header, count)?;
        let layout = RecordLayout::new(space.data_size(), &params);

        let records_len = header
            .element_count
            .checked_mul(header.record_size)
            .ok_or_else(|| HnswError::corrupted("element count overflows the record block"))?;
        if let Some(stream_len) = stream_len {
            check_stream_len(stream_len, records_len, header.element_count)?;
        }
        let records = read_block(&mut reader, records_len)?;
        let top = entry.map_or(0, |ep| ep.level);
        let upper = read_upper_layers(&mut reader, &layout, &params, count, top)?;
        let mut extra = [0u8; 1];
        if reader.read(&mut extra).map_err(stream_error)? != 0 {
            return Err(HnswError::corrupted("trailing bytes after the last node"));
        }

        let index = Self::with_parts(space, params, capacity);
        index.restore_records(&records, count)?;
        for (id, words) in (0..count as u32).zip(upper) {
            index.arena.restore_upper(id, words)?;
        }
        if let Some(ep) = entry {
            if index.arena.level(ep.node) != ep.level {
                return Err(HnswError::corrupted(format!(
                    "entry point {} is not on the top layer {}",
                    ep.node, ep.level
                )));
            }
            index.set_entry_point(ep);
        }
        index.arena.restore_len(count);
        index.rebuild_registry(count)?;
        Ok(index)
    }

    fn restore_records(&self, records: &[u8], count: usize) -> Result<(), HnswError> {
        let layout = *self.arena.layout();
        let cap = self.params.max_connections_level0();
        let mut words = Vec::with_capacity(layout.level0_words());
        for (id, record) in (0..count as u32).zip(records.chunks_exact(layout.record_size())) {
            let mut fields = FieldReader::new(record);
            words.clear();
            words.extend((0..layout.level0_words()).map(|_| fields.u32()));
            check_list(id, 0, &words, cap, count)?;
            self.arena.restore_level0(id, &words);

            let vector_end = layout.label_offset();
            self.arena
                .write_vector(id, &record[layout.vector_offset()..vector_end])?;
            let mut label = FieldReader::new(&record[vector_end..]);
            self.arena.set_label(id, label.u64());
        }
        Ok(())
    }

    fn rebuild_registry(&self, count: usize) -> Result<(), HnswError> {
        let mut deleted = 0;
        for id in 0..count as u32 {
            if self.arena.is_deleted(id) {
                deleted += 1;
                if self.params.allow_replace_deleted() {
                    self.registry.push_vacant(id)?;
                }
            }
            self.registry.bind_restored(self.arena.label(id), id)?;
        }
        self.restore_deleted_count(deleted);
        Ok(())
    }
}

/// Reads every node's upper-layer words, rejecting nodes above `top`.
fn read_upper_layers(
    reader: &mut impl Read,
    layout: &RecordLayout,
    params: &HnswParams,
    count: usize,
    top: usize,
) -> Result<Vec<Vec<u32>>, HnswError> {
    let per_layer = layout.upper_layer_bytes();
    let cap = params.max_connections();
    let mut nodes = Vec::new();
    for id in 0..count as u32 {
        let mut len = [0u8; WORD_BYTES];
        reader.read_exact(&mut len).map_err(stream_error)?;
        let byte_len = u32::from_le_bytes(len) as usize;
        if byte_len % per_layer != 0 {
            return Err(HnswError::corrupted(format!(
                "node {id} has {byte_len} upper-layer bytes, not a multiple of {per_layer}"
            )));
        }
        let level = byte_len / per_layer;
        if level > top {
            return Err(HnswError::corrupted(format!(
                "node {id} reaches layer {level}, above the top layer {top}"
            )));
        }
        let bytes = read_block(reader, byte_len as u64)?;
        let mut fields = FieldReader::new(&bytes);
        let words: Vec<u32> = (0..byte_len / WORD_BYTES).map(|_| fields.u32()).collect();
        for (layer, list) in words.chunks_exact(layout.upper_words()).enumerate() {
            check_list(id, layer + 1, list, cap, count)?;
        }
        nodes.push(words);
    }
    Ok(nodes)
}

/// Reads exactly `len` bytes; the buffer grows only as data arrives.
fn read_block(reader: &mut impl Read, len: u64) -> Result<Vec<u8>, HnswError> {
    let mut block = Vec::new();
    let read = reader
        .by_ref()
        .take(len)
        .read_to_end(&mut block)
        .map_err(stream_error)?;
    if (read as u64) < len {
        return Err(HnswError::corrupted("unexpected end of data"));
    }
    Ok(block)
}

/// Rejects a stream too short to hold the records and length prefixes the
/// header announces.
fn check_stream_len(stream_len: u64, records_len: u64, count: u64) -> Result<(), HnswError> {
    let needed = count
        .checked_mul(WORD_BYTES as u64)
        .and_then(|prefixes| prefixes.checked_add(records_len))
        .and_then(|body| body.checked_add(IndexHeader::ENCODED_LEN as u64))
        .ok_or_else(|| HnswError::corrupted("element count overflows the stream length"))?;
    if stream_len < needed {
        return Err(HnswError::corrupted(format!(
            "stream holds {stream_len} bytes but {count} nodes need at least {needed}"
        )));
    }
    Ok(())
}

/// Validates one stored list: header count within `cap` and every link a
/// stored node other than `id`.
fn check_list(id: u32, layer: usize, list: &[u32], cap: usize, count: usize) -> Result<(), HnswError> {
    let len = header_count(list[0]);
    if len > cap {
        return Err(HnswError::corrupted(format!(
            "node {id} lists {len} neighbours on layer {layer}, above the cap of {cap}"
        )));
    }
    if let Some(&bad) = list[1..=len]
        .iter()
        .find(|&&link| link as usize >= count || link == id)
    {
        return Err(HnswError::corrupted(format!(
            "node {id} links to invalid node {bad} on layer {layer}"
        )));
    }
    Ok(())
}

fn resolve_capacity(requested: usize, stored: usize, count: usize) -> Result<usize, HnswError> {
    if requested == 0 {
        if stored < count {
            return Err(HnswError::corrupted(format!(
                "stored capacity {stored} is below the element count {count}"
            )));
        }
        return Ok(stored);
    }
    if requested < count {
        return Err(HnswError::CapacityExceeded {
            capacity: requested,
        });
    }
    Ok(requested)
}

fn resolve_entry(header: &IndexHeader, count: usize) -> Result<Option<EntryPoint>, HnswError> {
    if count == 0 {
        return Ok(None);
    }
    let level = usize::try_from(header.max_level)
        .map_err(|_| HnswError::corrupted("non-empty index without a top layer"))?;
    if level > MAX_LEVEL {
        return Err(HnswError::corrupted(format!(
            "top layer {level} exceeds the supported {MAX_LEVEL}"
        )));
    }
    if header.entry_point as usize >= count {
        return Err(HnswError::corrupted(format!(
            "entry point {} is outside the {count} stored nodes",
            header.entry_point
        )));
    }
    Ok(Some(EntryPoint {
        node: header.entry_point,
        level,
    }))
}

fn to_usize(value: u64, field: &str) -> Result<usize, HnswError> {
    usize::try_from(value)
        .map_err(|_| HnswError::corrupted(format!("{field} ({value}) does not fit in memory")))
}

fn stream_error(source: io::Error) -> HnswError {
    if source.kind() == io::ErrorKind::UnexpectedEof {
        HnswError::corrupted("unexpected end of data")
    } else {
        HnswError::StreamIo { source }
    }
}

fn with_path(err: HnswError, path: &Path) -> HnswError {
    match err {
        HnswError::StreamIo { source } => HnswError::Io {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    }
}

/// Sequential little-endian decoder over a buffer of known length.
struct FieldReader<'a> {
    bytes: &'a [u8],
}

impl<'a> FieldReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut out = [0u8; N];
        let (head, rest) = self.bytes.split_at(N.min(self.bytes.len()));
        out[..head.len()].copy_from_slice(head);
        self.bytes = rest;
        out
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }

    fn u64(&mut self) -> u64 {
        u64::from_le_bytes(self.take())
    }

    fn f64(&mut self) -> f64 {
        f64::from_le_bytes(self.take())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case(0, 10, 4, Ok(10))]
    #[case(6, 10, 4, Ok(6))]
    #[case(40, 10, 4, Ok(40))]
    #[case(3, 10, 4, Err("HNSW_CAPACITY_EXCEEDED"))]
    #[case(0, 2, 4, Err("HNSW_CORRUPTED"))]
    fn capacity_resolution(
        #[case] requested: usize,
        #[case] stored: usize,
        #[case] count: usize,
        #[case] expected: Result<usize, &str>,
    ) {
        let actual = resolve_capacity(requested, stored, count).map_err(|err| err.code().as_str());
        assert_eq!(actual, expected);
    }

    #[test]
    fn list_check_rejects_self_links_and_overflow() {
        assert!(check_list(1, 0, &[2, 0, 2, 0], 3, 4).is_ok());
        assert!(check_list(1, 0, &[1, 1, 0, 0], 3, 4).is_err());
        assert!(check_list(1, 0, &[1, 9, 0, 0], 3, 4).is_err());
        assert!(check_list(1, 0, &[4, 0, 2, 3], 3, 4).is_err());
    }

    #[rstest]
    #[case(96 + 2 * (48 + 4), 96, 2, true)]
    #[case(96 + 2 * 48 + 4, 96, 2, false)]
    #[case(96, 48 * 60_000_000, 60_000_000, false)]
    #[case(u64::MAX, u64::MAX, 2, false)]
    fn stream_length_covers_the_announced_nodes(
        #[case] stream_len: u64,
        #[case] records_len: u64,
        #[case] count: u64,
        #[case] accepted: bool,
    ) {
        assert_eq!(
            check_stream_len(stream_len, records_len, count).is_ok(),
            accepted
        );
    }

    #[test]
    fn header_is_fixed_width() {
        assert_eq!(IndexHeader::ENCODED_LEN, 96);
    }
}
