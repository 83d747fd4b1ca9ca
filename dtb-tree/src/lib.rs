//! Parser, in-memory model and encoder for Flattened Device Tree (DTB) blobs.
//!
//! A blob is parsed into an arena-backed tree ([`DeviceTree`]) whose node
//! names and property payloads borrow from the input, queried through
//! index-based handles ([`NodeId`] / [`PropId`]), and optionally edited and
//! re-encoded into a fresh, spec-conformant blob.

#![no_std]

extern crate alloc;

mod config;
mod data;
mod define;
mod display;
#[cfg(feature = "edit")]
mod edit;
mod encode;
mod header;
mod node;
mod prop;
mod tree;

pub use config::{CONFIG_VERSION, TreeConfig};
pub use define::{FDT_MAGIC, FdtError, MemoryReservation, Phandle, Token};
pub use encode::DtbBlob;
pub use header::Header;
pub use node::{Node, NodeId, NodeStat, PropId};
pub use prop::{CellPairs, CellQuads, CellTriplets, CellValues, Prop, PropStrings};
pub use tree::{Children, DeviceTree, MAX_DEPTH, Props};
