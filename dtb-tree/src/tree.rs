//! The parsed device tree: arenas, the token-stream builder and the query
//! surface.

use alloc::borrow::Cow;
use alloc::string::String;
use alloc::{vec, vec::Vec};
use core::ffi::CStr;

use log::{debug, error, warn};

use crate::data::Reader;
use crate::header::HEADER_BYTES;
use crate::node::{Node, NodeId, NodeStat, PropId};
use crate::prop::Prop;
use crate::{FdtError, Header, MemoryReservation, Phandle, Token, TreeConfig};

/// Deepest node nesting the builder accepts.
pub const MAX_DEPTH: usize = 32;

/// A device tree parsed from a blob (or, with the `edit` feature, built
/// from scratch).
///
/// Nodes and properties live in two arenas addressed by [`NodeId`] and
/// [`PropId`]; names and payloads borrow from the blob for its lifetime
/// `'a`. A phandle index with one slot per node gives O(1) phandle
/// resolution for values below the node count.
///
/// The tree performs no interior mutation and no I/O; concurrent readers
/// are fine, concurrent writers must serialize externally.
pub struct DeviceTree<'a> {
    /// Physical ID of the boot CPU, copied into the header on encode.
    pub boot_cpuid: u32,
    /// Reserved physical memory ranges, re-emitted on encode.
    pub memory_reservations: Vec<MemoryReservation>,
    pub(crate) nodes: Vec<Node<'a>>,
    pub(crate) props: Vec<Prop<'a>>,
    pub(crate) phandles: Vec<Option<NodeId>>,
    pub(crate) root: Option<NodeId>,
    pub(crate) writable: bool,
}

/// Per-level builder state: the open node and the tails of its child and
/// property lists, so both lists stay in document order.
struct Frame {
    node: NodeId,
    last_child: Option<NodeId>,
    last_prop: Option<PropId>,
}

impl<'a> DeviceTree<'a> {
    /// Parses a device tree from a byte slice.
    ///
    /// The slice must contain a complete blob and must outlive the tree;
    /// node names and property payloads are views into it.
    ///
    /// # Errors
    ///
    /// Returns `FdtError` on a bad header, a truncated blob, or a
    /// malformed structure block. A failed parse constructs nothing.
    pub fn from_bytes(blob: &'a [u8]) -> Result<Self, FdtError> {
        Self::from_bytes_with_config(blob, TreeConfig::default())
    }

    /// Parses a device tree with an explicit configuration.
    ///
    /// The configuration is sanitised first, so flags newer than the
    /// caller's declared version are ignored.
    pub fn from_bytes_with_config(blob: &'a [u8], config: TreeConfig) -> Result<Self, FdtError> {
        let header = Header::from_bytes(blob)?;
        if blob.len() < header.totalsize as usize {
            return Err(FdtError::BufferTooSmall {
                pos: header.totalsize as usize,
            });
        }
        let config = config.sanitise();

        let structs = block(blob, header.off_dt_struct, header.size_dt_struct)?;
        let strings = block(blob, header.off_dt_strings, header.size_dt_strings)?;

        // Pre-pass: size both arenas and the phandle index exactly.
        let (node_count, prop_count) = survey(structs)?;

        let mut tree = DeviceTree {
            boot_cpuid: header.boot_cpuid_phys,
            memory_reservations: read_reservations(blob, header.off_mem_rsvmap as usize),
            nodes: Vec::with_capacity(node_count),
            props: Vec::with_capacity(prop_count),
            phandles: vec![None; node_count],
            root: None,
            writable: config.writable,
        };
        tree.build(structs, strings)?;
        debug!(
            "parsed {} nodes, {} properties",
            tree.nodes.len(),
            tree.props.len()
        );
        Ok(tree)
    }

    /// Parses a device tree from a raw pointer, as handed over by a
    /// bootloader.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a complete blob whose memory stays valid (and
    /// unmodified) for the lifetime `'a`.
    pub unsafe fn from_ptr(ptr: *const u8) -> Result<Self, FdtError> {
        let head = unsafe { core::slice::from_raw_parts(ptr, HEADER_BYTES) };
        let header = Header::from_bytes(head)?;
        let blob = unsafe { core::slice::from_raw_parts(ptr, header.totalsize as usize) };
        Self::from_bytes(blob)
    }

    /// Consumes the structure block, filling the arenas and linking the
    /// tree.
    fn build(&mut self, structs: &'a [u8], strings: &'a [u8]) -> Result<(), FdtError> {
        let mut reader = Reader::new(structs);
        let mut stack: heapless::Vec<Frame, MAX_DEPTH> = heapless::Vec::new();
        let mut last_root: Option<NodeId> = None;

        loop {
            let token = match reader.read_token() {
                Ok(token) => token,
                Err(_) => break,
            };
            match token {
                Token::BeginNode => {
                    let name = reader.read_cstr()?;
                    reader.align4();
                    let id = NodeId(self.nodes.len() as u32);
                    let parent = stack.last().map(|frame| frame.node);
                    self.nodes.push(Node::new(Cow::Borrowed(name), parent));
                    match stack.last_mut() {
                        Some(frame) => {
                            match frame.last_child {
                                Some(prev) => self.nodes[prev.index()].next_sibling = Some(id),
                                None => self.nodes[frame.node.index()].first_child = Some(id),
                            }
                            frame.last_child = Some(id);
                        }
                        None => {
                            // Top level: conformant blobs have exactly one
                            // node here, but extras are chained as siblings.
                            match last_root {
                                Some(prev) => self.nodes[prev.index()].next_sibling = Some(id),
                                None => self.root = Some(id),
                            }
                            last_root = Some(id);
                        }
                    }
                    let frame = Frame {
                        node: id,
                        last_child: None,
                        last_prop: None,
                    };
                    if stack.push(frame).is_err() {
                        return Err(FdtError::DepthExceeded);
                    }
                }
                Token::EndNode => {
                    if stack.pop().is_none() {
                        warn!("stray END_NODE at position {}", reader.position());
                    }
                }
                Token::Prop => {
                    let pos = reader.position();
                    let len = reader.read_u32().ok_or(FdtError::BufferTooSmall { pos })? as usize;
                    let nameoff =
                        reader.read_u32().ok_or(FdtError::BufferTooSmall { pos })? as usize;
                    let data = match len {
                        0 => &[][..],
                        _ => reader.read_bytes(len).ok_or(FdtError::BufferTooSmall {
                            pos: reader.position(),
                        })?,
                    };
                    reader.align4();
                    let name = prop_name(strings, nameoff)?;
                    let Some(frame) = stack.last_mut() else {
                        warn!("property `{}` outside of any node, skipping", name);
                        continue;
                    };
                    let pid = PropId(self.props.len() as u32);
                    self.props.push(Prop {
                        name: Cow::Borrowed(name),
                        data: Cow::Borrowed(data),
                        next: None,
                    });
                    match frame.last_prop {
                        Some(prev) => self.props[prev.index()].next = Some(pid),
                        None => self.nodes[frame.node.index()].first_prop = Some(pid),
                    }
                    frame.last_prop = Some(pid);
                    let owner = frame.node;
                    self.note_phandle(owner, name, data);
                }
                Token::Nop => {}
                Token::End => break,
                Token::Data(other) => {
                    warn!(
                        "unknown token {:#x} at position {}, skipping",
                        other,
                        reader.position()
                    );
                }
            }
        }

        if !stack.is_empty() {
            error!("structure block ended inside a node");
            return Err(FdtError::MissingEndNode);
        }
        Ok(())
    }

    /// Records the owner of a `phandle` / `linux,phandle` property in the
    /// index. Values past the index capacity stay resolvable through the
    /// linear scan in [`find_phandle`](Self::find_phandle).
    pub(crate) fn note_phandle(&mut self, node: NodeId, name: &str, data: &[u8]) {
        if name != "phandle" && name != "linux,phandle" {
            return;
        }
        let Ok(bytes) = <[u8; 4]>::try_from(data) else {
            return;
        };
        let value = u32::from_be_bytes(bytes) as usize;
        match self.phandles.get_mut(value) {
            Some(slot) => *slot = Some(node),
            None => debug!("phandle {:#x} exceeds index capacity, lookups will scan", value),
        }
    }

    /// Returns the root node, if the tree has one.
    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    /// Returns the node record for `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not come from this tree.
    pub fn node(&self, id: NodeId) -> &Node<'a> {
        &self.nodes[id.index()]
    }

    /// Returns the property record for `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` does not come from this tree.
    pub fn prop(&self, id: PropId) -> &Prop<'a> {
        &self.props[id.index()]
    }

    /// Returns the number of nodes in the arena.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Returns the number of properties in the arena.
    pub fn prop_count(&self) -> usize {
        self.props.len()
    }

    /// Returns true when the tree accepts edits.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Returns the parent of `id`; `None` for root-level nodes.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    /// Returns the next sibling of `id` in its parent's child list.
    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).next_sibling
    }

    /// Returns the first child of `id`.
    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).first_child
    }

    /// Returns an iterator over the direct children of `id`, in document
    /// order.
    pub fn children(&self, id: NodeId) -> Children<'_, 'a> {
        Children {
            tree: self,
            next: self.node(id).first_child,
        }
    }

    /// Returns an iterator over the top-level node chain.
    pub fn roots(&self) -> Children<'_, 'a> {
        Children {
            tree: self,
            next: self.root,
        }
    }

    /// Returns an iterator over the properties of `id`, in document order.
    pub fn props(&self, id: NodeId) -> Props<'_, 'a> {
        Props {
            tree: self,
            next: self.node(id).first_prop,
        }
    }

    /// Returns the `index`-th property of `id` in list order.
    pub fn prop_at(&self, id: NodeId, index: usize) -> Option<PropId> {
        self.props(id).nth(index)
    }

    /// Finds a property of `id` by exact name.
    pub fn find_prop(&self, id: NodeId, name: &str) -> Option<PropId> {
        self.props(id).find(|&pid| self.prop(pid).name() == name)
    }

    /// Finds a direct child of `parent` by its full name.
    ///
    /// No unit-address stripping: `find_child(soc, "uart")` does not match
    /// `uart@10000000`.
    pub fn find_child(&self, parent: NodeId, name: &str) -> Option<NodeId> {
        self.children(parent).find(|&c| self.node(c).name() == name)
    }

    /// Finds a node by path.
    ///
    /// Segments are separated by `/`; leading, repeated and trailing
    /// slashes are collapsed, so `find("/")` and `find("")` both return
    /// the root. A segment matches a child whose full name equals it, or
    /// whose name up to the `@` unit-address separator equals it
    /// (`"memory"` matches `memory@80000000`).
    pub fn find(&self, path: &str) -> Option<NodeId> {
        let mut current = self.root?;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = self
                .children(current)
                .find(|&c| segment_matches(self.node(c).name(), segment))?;
        }
        Some(current)
    }

    /// Finds the next node carrying a matching `compatible` entry.
    ///
    /// Scans the node arena starting after `start` (or from the first
    /// node when `start` is `None`); the `compatible` payload is a packed
    /// NUL-separated string list and `compatible` must equal one entry in
    /// full. Pass the previous result back in to iterate all matches.
    pub fn find_compatible(&self, start: Option<NodeId>, compatible: &str) -> Option<NodeId> {
        let begin = start.map(|id| id.index() + 1).unwrap_or(0);
        for index in begin..self.nodes.len() {
            let id = NodeId(index as u32);
            if self.nodes[index].detached {
                continue;
            }
            let Some(pid) = self.find_prop(id, "compatible") else {
                continue;
            };
            if self.prop(pid).strings().any(|s| s == compatible) {
                return Some(id);
            }
        }
        None
    }

    /// Resolves a phandle to its owning node.
    ///
    /// O(1) through the index for values below the node count; on an
    /// index miss the arena is scanned, which also serves values past the
    /// index capacity.
    pub fn find_phandle(&self, phandle: Phandle) -> Option<NodeId> {
        if let Some(Some(node)) = self.phandles.get(phandle.as_usize()) {
            return Some(*node);
        }
        (0..self.nodes.len())
            .map(|index| NodeId(index as u32))
            .find(|&id| !self.node(id).detached && self.node_phandle(id) == Some(phandle))
    }

    /// Returns the phandle declared by `id`, if any.
    pub(crate) fn node_phandle(&self, id: NodeId) -> Option<Phandle> {
        let pid = self
            .find_prop(id, "phandle")
            .or_else(|| self.find_prop(id, "linux,phandle"))?;
        self.prop(pid).as_u32().map(Phandle::from)
    }

    /// Summarizes a node: display name, property count, child count and
    /// the length of its parent's child list (including itself).
    pub fn stat(&self, id: NodeId) -> NodeStat<'_> {
        let node = self.node(id);
        let name = match node.name() {
            "" => "/",
            name => name,
        };
        let siblings = match node.parent {
            Some(parent) => self.children(parent).count(),
            None => self.roots().count(),
        };
        NodeStat {
            name,
            props: self.props(id).count(),
            children: self.children(id).count(),
            siblings,
        }
    }

    /// Returns the absolute path of `id`, `/` for the root.
    pub fn path(&self, id: NodeId) -> String {
        let mut components: Vec<&str> = Vec::new();
        let mut current = Some(id);
        while let Some(c) = current {
            let node = self.node(c);
            if !node.name().is_empty() {
                components.push(node.name());
            }
            current = node.parent;
        }
        if components.is_empty() {
            return String::from("/");
        }
        let mut out = String::new();
        for component in components.iter().rev() {
            out.push('/');
            out.push_str(component);
        }
        out
    }
}

/// Matches a path segment against a node name: either the full name or
/// the portion before the `@` unit-address separator, in full.
pub(crate) fn segment_matches(name: &str, segment: &str) -> bool {
    if name == segment {
        return true;
    }
    match name.split_once('@') {
        Some((base, _)) => base == segment,
        None => false,
    }
}

/// Extracts a sub-block of the blob, bounds-checked.
fn block(blob: &[u8], offset: u32, size: u32) -> Result<&[u8], FdtError> {
    let start = offset as usize;
    let end = start
        .checked_add(size as usize)
        .filter(|end| *end <= blob.len())
        .ok_or(FdtError::BufferTooSmall { pos: start })?;
    Ok(&blob[start..end])
}

/// Looks up a property name in the strings block.
fn prop_name(strings: &[u8], nameoff: usize) -> Result<&str, FdtError> {
    let bytes = strings
        .get(nameoff..)
        .ok_or(FdtError::BufferTooSmall { pos: nameoff })?;
    Ok(CStr::from_bytes_until_nul(bytes)?.to_str()?)
}

/// Pre-pass over the structure block counting `BEGIN_NODE` and `PROP`
/// tokens, so the arenas can be allocated to their exact sizes.
fn survey(structs: &[u8]) -> Result<(usize, usize), FdtError> {
    let mut reader = Reader::new(structs);
    let mut nodes = 0;
    let mut props = 0;
    loop {
        match reader.read_token() {
            Ok(Token::BeginNode) => {
                nodes += 1;
                reader.read_cstr()?;
                reader.align4();
            }
            Ok(Token::Prop) => {
                props += 1;
                let pos = reader.position();
                let len = reader.read_u32().ok_or(FdtError::BufferTooSmall { pos })? as usize;
                reader.read_u32().ok_or(FdtError::BufferTooSmall { pos })?;
                reader.read_bytes(len).ok_or(FdtError::BufferTooSmall {
                    pos: reader.position(),
                })?;
                reader.align4();
            }
            Ok(Token::EndNode) | Ok(Token::Nop) | Ok(Token::Data(_)) => {}
            Ok(Token::End) => break,
            // The builder reports truncation with a precise position.
            Err(_) => break,
        }
    }
    Ok((nodes, props))
}

/// Reads the memory reservation block up to its all-zero terminator.
fn read_reservations(blob: &[u8], offset: usize) -> Vec<MemoryReservation> {
    let mut out = Vec::new();
    let mut reader = Reader::new(blob.get(offset..).unwrap_or(&[]));
    while let (Some(address), Some(size)) = (reader.read_u64(), reader.read_u64()) {
        if address == 0 && size == 0 {
            break;
        }
        out.push(MemoryReservation { address, size });
    }
    out
}

/// Iterator over a sibling chain of nodes.
pub struct Children<'t, 'a> {
    tree: &'t DeviceTree<'a>,
    next: Option<NodeId>,
}

impl Iterator for Children<'_, '_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        self.next = self.tree.node(id).next_sibling;
        Some(id)
    }
}

/// Iterator over a node's property list.
pub struct Props<'t, 'a> {
    tree: &'t DeviceTree<'a>,
    next: Option<PropId>,
}

impl Iterator for Props<'_, '_> {
    type Item = PropId;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        self.next = self.tree.prop(id).next;
        Some(id)
    }
}
