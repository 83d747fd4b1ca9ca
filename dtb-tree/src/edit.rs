//! In-place tree mutation.
//!
//! Creation and removal keep the intrusive lists in document order, and
//! every write is gated by the `writable` configuration flag. Names and
//! payloads created here are owned by the tree and dropped with it;
//! removed records merely become unreachable, following the arena
//! discipline of never freeing individually.

use alloc::borrow::Cow;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::node::{Node, NodeId, PropId};
use crate::prop::Prop;
use crate::tree::segment_matches;
use crate::{DeviceTree, FdtError};

impl<'a> DeviceTree<'a> {
    /// Creates an empty, writable tree holding only an unnamed root.
    pub fn new() -> Self {
        let mut tree = DeviceTree {
            boot_cpuid: 0,
            memory_reservations: Vec::new(),
            nodes: Vec::new(),
            props: Vec::new(),
            phandles: Vec::new(),
            root: None,
            writable: true,
        };
        let root = NodeId(0);
        tree.nodes.push(Node::new(Cow::Owned(String::new()), None));
        tree.phandles.push(None);
        tree.root = Some(root);
        tree
    }

    fn ensure_writable(&self) -> Result<(), FdtError> {
        match self.writable {
            true => Ok(()),
            false => Err(FdtError::ReadOnly),
        }
    }

    /// Creates a child of `parent`, appended to its child list.
    ///
    /// # Errors
    ///
    /// `FdtError::DuplicateName` if a sibling already carries the full
    /// name; `FdtError::InvalidInput` for an empty name;
    /// `FdtError::ReadOnly` on a read-only tree.
    pub fn create_child(&mut self, parent: NodeId, name: &str) -> Result<NodeId, FdtError> {
        self.ensure_writable()?;
        if name.is_empty() {
            return Err(FdtError::InvalidInput);
        }
        if self.find_child(parent, name).is_some() {
            return Err(FdtError::DuplicateName);
        }
        let id = NodeId(self.nodes.len() as u32);
        self.nodes
            .push(Node::new(Cow::Owned(name.to_string()), Some(parent)));
        // Keep the phandle index at one slot per node.
        self.phandles.push(None);
        match self.children(parent).last() {
            Some(prev) => self.nodes[prev.index()].next_sibling = Some(id),
            None => self.nodes[parent.index()].first_child = Some(id),
        }
        Ok(id)
    }

    /// Creates a sibling of `node` under the same parent.
    ///
    /// Root-level nodes have no parent to attach a sibling to, so the
    /// call returns `FdtError::InvalidInput` for them.
    pub fn create_sibling(&mut self, node: NodeId, name: &str) -> Result<NodeId, FdtError> {
        let parent = self.node(node).parent().ok_or(FdtError::InvalidInput)?;
        self.create_child(parent, name)
    }

    /// Creates an empty-payload property on `node`, appended to its list.
    ///
    /// # Errors
    ///
    /// `FdtError::DuplicateName` if the node already carries the name.
    pub fn create_prop(&mut self, node: NodeId, name: &str) -> Result<PropId, FdtError> {
        self.ensure_writable()?;
        if name.is_empty() {
            return Err(FdtError::InvalidInput);
        }
        if self.find_prop(node, name).is_some() {
            return Err(FdtError::DuplicateName);
        }
        let id = PropId(self.props.len() as u32);
        self.props.push(Prop {
            name: Cow::Owned(name.to_string()),
            data: Cow::Owned(Vec::new()),
            next: None,
        });
        match self.props(node).last() {
            Some(prev) => self.props[prev.index()].next = Some(id),
            None => self.nodes[node.index()].first_prop = Some(id),
        }
        Ok(id)
    }

    /// Finds a node by path, creating any missing segments.
    ///
    /// Existing segments match with the same rules as
    /// [`find`](Self::find); missing segments are created with the
    /// literal segment text as their name.
    pub fn find_or_create(&mut self, path: &str) -> Result<NodeId, FdtError> {
        self.ensure_writable()?;
        let mut current = match self.root {
            Some(root) => root,
            None => {
                let id = NodeId(self.nodes.len() as u32);
                self.nodes.push(Node::new(Cow::Owned(String::new()), None));
                self.phandles.push(None);
                self.root = Some(id);
                id
            }
        };
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current = match self
                .children(current)
                .find(|&c| segment_matches(self.node(c).name(), segment))
            {
                Some(child) => child,
                None => self.create_child(current, segment)?,
            };
        }
        Ok(current)
    }

    /// Unlinks `id` and its subtree from the tree.
    ///
    /// Phandle index entries owned by the subtree are cleared. The arena
    /// records stay allocated but become unreachable; their ids must not
    /// be used afterwards. Removing a root-level node is
    /// `FdtError::InvalidInput`.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), FdtError> {
        self.ensure_writable()?;
        let parent = self.node(id).parent().ok_or(FdtError::InvalidInput)?;
        self.detach_below(id);
        self.unlink_child(parent, id);
        Ok(())
    }

    /// Removes a property from `node` by exact name.
    pub fn remove_prop(&mut self, node: NodeId, name: &str) -> Result<(), FdtError> {
        self.ensure_writable()?;
        let pid = self.find_prop(node, name).ok_or(FdtError::NotFound)?;
        if name == "phandle" || name == "linux,phandle" {
            if let Some(phandle) = self.prop(pid).as_u32() {
                if let Some(slot) = self.phandles.get_mut(phandle as usize) {
                    if *slot == Some(node) {
                        *slot = None;
                    }
                }
            }
        }
        let next = self.props[pid.index()].next;
        if self.nodes[node.index()].first_prop == Some(pid) {
            self.nodes[node.index()].first_prop = next;
        } else {
            let mut current = self.nodes[node.index()].first_prop;
            while let Some(p) = current {
                if self.props[p.index()].next == Some(pid) {
                    self.props[p.index()].next = next;
                    break;
                }
                current = self.props[p.index()].next;
            }
        }
        self.props[pid.index()].next = None;
        Ok(())
    }

    /// Sets a property payload, creating the property if missing.
    ///
    /// The payload is copied and owned by the tree. Writing a `phandle`
    /// or `linux,phandle` property keeps the phandle index current.
    pub fn set_prop(&mut self, node: NodeId, name: &str, data: &[u8]) -> Result<PropId, FdtError> {
        self.ensure_writable()?;
        let is_phandle = name == "phandle" || name == "linux,phandle";
        if is_phandle {
            // Drop the stale index entry before the value changes.
            if let Some(old) = self.node_phandle(node) {
                if let Some(slot) = self.phandles.get_mut(old.as_usize()) {
                    if *slot == Some(node) {
                        *slot = None;
                    }
                }
            }
        }
        let pid = match self.find_prop(node, name) {
            Some(pid) => pid,
            None => self.create_prop(node, name)?,
        };
        self.props[pid.index()].data = Cow::Owned(data.to_vec());
        if is_phandle {
            self.note_phandle(node, name, data);
        }
        Ok(pid)
    }

    /// Sets a property to a single big-endian u32.
    pub fn set_prop_u32(&mut self, node: NodeId, name: &str, value: u32) -> Result<PropId, FdtError> {
        self.set_prop(node, name, &value.to_be_bytes())
    }

    /// Sets a property to a single big-endian u64 (two cells).
    pub fn set_prop_u64(&mut self, node: NodeId, name: &str, value: u64) -> Result<PropId, FdtError> {
        self.set_prop(node, name, &value.to_be_bytes())
    }

    /// Sets a property to a NUL-terminated string.
    pub fn set_prop_str(&mut self, node: NodeId, name: &str, value: &str) -> Result<PropId, FdtError> {
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
        self.set_prop(node, name, &bytes)
    }

    /// Sets a property to a packed NUL-separated string list.
    pub fn set_prop_str_list(
        &mut self,
        node: NodeId,
        name: &str,
        values: &[&str],
    ) -> Result<PropId, FdtError> {
        let mut bytes = Vec::new();
        for value in values {
            bytes.extend_from_slice(value.as_bytes());
            bytes.push(0);
        }
        self.set_prop(node, name, &bytes)
    }

    /// Sets a property to an array of integers of `width` cells each.
    ///
    /// `width` must be 1 or 2.
    pub fn set_prop_cells(
        &mut self,
        node: NodeId,
        name: &str,
        values: &[u64],
        width: usize,
    ) -> Result<PropId, FdtError> {
        if width == 0 || width > 2 {
            return Err(FdtError::InvalidInput);
        }
        let mut bytes = Vec::with_capacity(values.len() * width * 4);
        for &value in values {
            if width == 2 {
                bytes.extend_from_slice(&((value >> 32) as u32).to_be_bytes());
            }
            bytes.extend_from_slice(&(value as u32).to_be_bytes());
        }
        self.set_prop(node, name, &bytes)
    }

    /// Marks a subtree detached and clears its phandle index entries.
    fn detach_below(&mut self, id: NodeId) {
        self.nodes[id.index()].detached = true;
        if let Some(phandle) = self.node_phandle(id) {
            if let Some(slot) = self.phandles.get_mut(phandle.as_usize()) {
                if *slot == Some(id) {
                    *slot = None;
                }
            }
        }
        let children: Vec<NodeId> = self.children(id).collect();
        for child in children {
            self.detach_below(child);
        }
    }

    /// Unlinks `id` from `parent`'s child list.
    fn unlink_child(&mut self, parent: NodeId, id: NodeId) {
        let next = self.nodes[id.index()].next_sibling;
        if self.nodes[parent.index()].first_child == Some(id) {
            self.nodes[parent.index()].first_child = next;
        } else {
            let mut current = self.nodes[parent.index()].first_child;
            while let Some(c) = current {
                if self.nodes[c.index()].next_sibling == Some(id) {
                    self.nodes[c.index()].next_sibling = next;
                    break;
                }
                current = self.nodes[c.index()].next_sibling;
            }
        }
        self.nodes[id.index()].next_sibling = None;
        self.nodes[id.index()].parent = None;
    }
}

impl Default for DeviceTree<'_> {
    fn default() -> Self {
        Self::new()
    }
}
