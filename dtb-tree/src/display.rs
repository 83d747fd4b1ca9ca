//! DTS-style text rendering of a tree.

use core::fmt;

use crate::node::NodeId;
use crate::DeviceTree;

fn write_indent(f: &mut fmt::Formatter<'_>, count: usize) -> fmt::Result {
    for _ in 0..count {
        write!(f, "    ")?;
    }
    Ok(())
}

impl fmt::Display for DeviceTree<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "/dts-v1/;")?;
        writeln!(f)?;
        for rsv in &self.memory_reservations {
            writeln!(f, "/memreserve/ {:#x} {:#x};", rsv.address, rsv.size)?;
        }
        for id in self.roots() {
            self.write_node(f, id, 0)?;
        }
        Ok(())
    }
}

impl DeviceTree<'_> {
    fn write_node(&self, f: &mut fmt::Formatter<'_>, id: NodeId, level: usize) -> fmt::Result {
        write_indent(f, level)?;
        let name = match self.node(id).name() {
            "" => "/",
            name => name,
        };
        writeln!(f, "{} {{", name)?;
        for pid in self.props(id) {
            write_indent(f, level + 1)?;
            writeln!(f, "{};", self.prop(pid))?;
        }
        for child in self.children(id) {
            self.write_node(f, child, level + 1)?;
        }
        write_indent(f, level)?;
        writeln!(f, "}};")
    }
}

impl fmt::Debug for DeviceTree<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceTree")
            .field("boot_cpuid", &self.boot_cpuid)
            .field("memory_reservations", &self.memory_reservations.len())
            .field("nodes", &self.node_count())
            .field("props", &self.prop_count())
            .finish()
    }
}
