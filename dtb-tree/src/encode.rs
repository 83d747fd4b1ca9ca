//! Serialization back to the binary blob format.
//!
//! Encoding runs in two passes: a sizing pass ([`DeviceTree::encoded_size`])
//! and an emission pass that writes header, memory reservation block (with
//! its mandatory all-zero terminator), structure block and strings block.
//! Property names are deduplicated in the strings block, which leads with a
//! single NUL so offset 0 always names the empty string.

use alloc::string::String;
use alloc::{vec, vec::Vec};
use core::ops::Deref;

use crate::define::{FDT_LAST_COMP_VERSION, FDT_VERSION, MEM_RSV_ENTRY_SIZE};
use crate::header::HEADER_BYTES;
use crate::node::NodeId;
use crate::{DeviceTree, FDT_MAGIC, FdtError, Token};

/// An encoded blob.
///
/// Backed by a `Vec<u32>`, so the bytes are always 4-byte aligned and the
/// result can be handed straight back to [`DeviceTree::from_bytes`].
#[derive(Clone, Debug)]
pub struct DtbBlob(Vec<u32>);

impl DtbBlob {
    /// Returns the blob length in bytes.
    pub fn len(&self) -> usize {
        self.0.len() * 4
    }

    /// Returns true if the blob is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for DtbBlob {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        unsafe { core::slice::from_raw_parts(self.0.as_ptr() as *const u8, self.0.len() * 4) }
    }
}

impl AsRef<[u8]> for DtbBlob {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl<'a> DeviceTree<'a> {
    /// Returns the exact byte size [`encode`](Self::encode) will produce.
    pub fn encoded_size(&self) -> usize {
        // One trailing END cell; strings lead with a NUL byte.
        let mut struct_cells = 1usize;
        let mut strings_bytes = 1usize;
        let mut seen: Vec<&str> = Vec::new();
        for id in self.roots() {
            self.size_node(id, &mut struct_cells, &mut strings_bytes, &mut seen);
        }
        let rsv_bytes = (self.memory_reservations.len() + 1) * MEM_RSV_ENTRY_SIZE;
        let total = HEADER_BYTES + rsv_bytes + struct_cells * 4 + strings_bytes;
        (total + 3) & !3
    }

    fn size_node<'t>(
        &'t self,
        id: NodeId,
        cells: &mut usize,
        strings: &mut usize,
        seen: &mut Vec<&'t str>,
    ) {
        let node = self.node(id);
        // BEGIN/END tokens plus the NUL-terminated name padded to cells.
        *cells += 2 + (node.name().len() + 1).div_ceil(4);
        for pid in self.props(id) {
            let prop = self.prop(pid);
            *cells += 3 + prop.len().div_ceil(4);
            let name = prop.name();
            if !seen.iter().any(|s| *s == name) {
                seen.push(name);
                *strings += name.len() + 1;
            }
        }
        for child in self.children(id) {
            self.size_node(child, cells, strings, seen);
        }
    }

    /// Serializes the tree into a fresh blob.
    pub fn encode(&self) -> DtbBlob {
        Encoder::new(self).encode()
    }

    /// Serializes the tree into a caller-supplied buffer.
    ///
    /// Returns the number of bytes written, equal to
    /// [`encoded_size`](Self::encoded_size). Nothing is written unless the
    /// buffer is 4-byte aligned and large enough.
    ///
    /// # Errors
    ///
    /// `FdtError::UnalignedBuffer` for a misaligned buffer;
    /// `FdtError::BufferTooSmall` carrying the required size in `pos` for
    /// a buffer that cannot hold the blob.
    pub fn encode_to(&self, buf: &mut [u8]) -> Result<usize, FdtError> {
        if buf.as_ptr() as usize % 4 != 0 {
            return Err(FdtError::UnalignedBuffer);
        }
        let required = self.encoded_size();
        if buf.len() < required {
            return Err(FdtError::BufferTooSmall { pos: required });
        }
        let blob = self.encode();
        debug_assert_eq!(blob.len(), required);
        buf[..required].copy_from_slice(&blob);
        Ok(required)
    }
}

/// Walks the tree and emits the four blob regions.
struct Encoder<'t, 'a> {
    tree: &'t DeviceTree<'a>,
    struct_data: Vec<u32>,
    strings_data: Vec<u8>,
    string_offsets: Vec<(String, u32)>,
}

impl<'t, 'a> Encoder<'t, 'a> {
    fn new(tree: &'t DeviceTree<'a>) -> Self {
        Self {
            tree,
            struct_data: Vec::new(),
            // Leading NUL keeps offset 0 as the empty string.
            strings_data: vec![0],
            string_offsets: Vec::new(),
        }
    }

    fn encode(mut self) -> DtbBlob {
        let tree = self.tree;
        let mut next = tree.root();
        while let Some(id) = next {
            self.encode_node(id);
            next = tree.node(id).next_sibling();
        }
        self.struct_data.push(u32::from(Token::End).to_be());
        self.finalize()
    }

    fn encode_node(&mut self, id: NodeId) {
        let tree = self.tree;
        self.write_begin_node(tree.node(id).name());
        for pid in tree.props(id) {
            let prop = tree.prop(pid);
            self.write_property(prop.name(), prop.raw());
        }
        for child in tree.children(id) {
            self.encode_node(child);
        }
        self.write_end_node();
    }

    /// Gets or adds a name in the strings block, returning its offset.
    fn get_or_add_string(&mut self, s: &str) -> u32 {
        for (existing, offset) in &self.string_offsets {
            if existing == s {
                return *offset;
            }
        }

        let offset = self.strings_data.len() as u32;
        self.strings_data.extend_from_slice(s.as_bytes());
        self.strings_data.push(0);
        self.string_offsets.push((s.into(), offset));
        offset
    }

    fn write_begin_node(&mut self, name: &str) {
        self.struct_data.push(u32::from(Token::BeginNode).to_be());
        self.push_padded(name.as_bytes(), name.len() + 1);
    }

    fn write_end_node(&mut self) {
        self.struct_data.push(u32::from(Token::EndNode).to_be());
    }

    fn write_property(&mut self, name: &str, data: &[u8]) {
        self.struct_data.push(u32::from(Token::Prop).to_be());
        self.struct_data.push((data.len() as u32).to_be());
        let nameoff = self.get_or_add_string(name);
        self.struct_data.push(nameoff.to_be());
        if !data.is_empty() {
            self.push_padded(data, data.len());
        }
    }

    /// Pushes `bytes` into the structure block, zero-padded to whole
    /// cells. Bytes are already in wire order, so cells are pushed
    /// native-endian and come back out verbatim.
    fn push_padded(&mut self, bytes: &[u8], logical_len: usize) {
        let aligned = logical_len.div_ceil(4) * 4;
        let mut buf = vec![0u8; aligned];
        buf[..bytes.len()].copy_from_slice(bytes);
        for chunk in buf.chunks(4) {
            self.struct_data.push(u32::from_ne_bytes(chunk.try_into().unwrap()));
        }
    }

    fn finalize(self) -> DtbBlob {
        let reservations = &self.tree.memory_reservations;

        let header_size = HEADER_BYTES as u32;
        let mem_rsv_size = ((reservations.len() + 1) * MEM_RSV_ENTRY_SIZE) as u32;
        let struct_size = (self.struct_data.len() * 4) as u32;
        let strings_size = self.strings_data.len() as u32;

        let off_mem_rsvmap = header_size;
        let off_dt_struct = off_mem_rsvmap + mem_rsv_size;
        let off_dt_strings = off_dt_struct + struct_size;
        let totalsize = off_dt_strings + strings_size;
        let totalsize_aligned = (totalsize + 3) & !3;

        let mut data = Vec::with_capacity(totalsize_aligned as usize / 4);

        // Header
        data.push(FDT_MAGIC.to_be());
        data.push(totalsize_aligned.to_be());
        data.push(off_dt_struct.to_be());
        data.push(off_dt_strings.to_be());
        data.push(off_mem_rsvmap.to_be());
        data.push(FDT_VERSION.to_be());
        data.push(FDT_LAST_COMP_VERSION.to_be());
        data.push(self.tree.boot_cpuid.to_be());
        data.push(strings_size.to_be());
        data.push(struct_size.to_be());

        // Memory reservation block
        for rsv in reservations {
            data.push(((rsv.address >> 32) as u32).to_be());
            data.push((rsv.address as u32).to_be());
            data.push(((rsv.size >> 32) as u32).to_be());
            data.push((rsv.size as u32).to_be());
        }
        // Terminator
        data.push(0);
        data.push(0);
        data.push(0);
        data.push(0);

        // Structure block
        data.extend_from_slice(&self.struct_data);

        // Strings block, padded to cell width
        let strings_aligned_len = (self.strings_data.len() + 3) & !3;
        let mut strings_buf = vec![0u8; strings_aligned_len];
        strings_buf[..self.strings_data.len()].copy_from_slice(&self.strings_data);
        for chunk in strings_buf.chunks(4) {
            data.push(u32::from_ne_bytes(chunk.try_into().unwrap()));
        }

        DtbBlob(data)
    }
}
