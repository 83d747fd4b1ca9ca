//! Deterministic DTB fixtures for testing.
//!
//! Instead of embedding binary `.dtb` files, fixtures are produced by a
//! small hand-rolled [`BlobBuilder`] that emits the wire format directly.
//! The builder is deliberately independent of the parser crate, so parse
//! tests never depend on the encoder under test.

use core::ops::{Deref, DerefMut};

const FDT_MAGIC: u32 = 0xd00dfeed;
const FDT_BEGIN_NODE: u32 = 0x1;
const FDT_END_NODE: u32 = 0x2;
const FDT_PROP: u32 = 0x3;
const FDT_NOP: u32 = 0x4;
const FDT_END: u32 = 0x9;

/// Emits a DTB blob token by token.
///
/// Calls append to the structure block in order; `build` wraps the result
/// with a header, the memory reservation block and the strings block. The
/// builder does not validate nesting, which lets tests produce malformed
/// streams on purpose.
pub struct BlobBuilder {
    structure: Vec<u8>,
    strings: Vec<u8>,
    reservations: Vec<(u64, u64)>,
    boot_cpuid: u32,
    version: u32,
}

impl Default for BlobBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlobBuilder {
    pub fn new() -> Self {
        Self {
            structure: Vec::new(),
            strings: Vec::new(),
            reservations: Vec::new(),
            boot_cpuid: 0,
            version: 17,
        }
    }

    /// Overrides the header version field (default 17).
    pub fn version(&mut self, version: u32) -> &mut Self {
        self.version = version;
        self
    }

    /// Sets the boot CPU id written into the header.
    pub fn boot_cpuid(&mut self, id: u32) -> &mut Self {
        self.boot_cpuid = id;
        self
    }

    /// Adds a memory reservation entry.
    pub fn reserve(&mut self, address: u64, size: u64) -> &mut Self {
        self.reservations.push((address, size));
        self
    }

    /// Emits FDT_BEGIN_NODE with a padded NUL-terminated name.
    pub fn begin_node(&mut self, name: &str) -> &mut Self {
        self.push_u32(FDT_BEGIN_NODE);
        self.structure.extend_from_slice(name.as_bytes());
        self.structure.push(0);
        self.pad4();
        self
    }

    /// Emits FDT_END_NODE.
    pub fn end_node(&mut self) -> &mut Self {
        self.push_u32(FDT_END_NODE);
        self
    }

    /// Emits FDT_NOP.
    pub fn nop(&mut self) -> &mut Self {
        self.push_u32(FDT_NOP);
        self
    }

    /// Emits an arbitrary raw token cell.
    pub fn token(&mut self, raw: u32) -> &mut Self {
        self.push_u32(raw);
        self
    }

    /// Emits FDT_PROP with the given payload.
    pub fn prop(&mut self, name: &str, data: &[u8]) -> &mut Self {
        let nameoff = self.add_string(name);
        self.push_u32(FDT_PROP);
        self.push_u32(data.len() as u32);
        self.push_u32(nameoff);
        self.structure.extend_from_slice(data);
        self.pad4();
        self
    }

    /// Emits a property holding a single big-endian u32.
    pub fn prop_u32(&mut self, name: &str, value: u32) -> &mut Self {
        self.prop(name, &value.to_be_bytes())
    }

    /// Emits a property holding a NUL-terminated string.
    pub fn prop_str(&mut self, name: &str, value: &str) -> &mut Self {
        let mut data = value.as_bytes().to_vec();
        data.push(0);
        self.prop(name, &data)
    }

    /// Emits a property holding a packed NUL-separated string list.
    pub fn prop_str_list(&mut self, name: &str, values: &[&str]) -> &mut Self {
        let mut data = Vec::new();
        for value in values {
            data.extend_from_slice(value.as_bytes());
            data.push(0);
        }
        self.prop(name, &data)
    }

    /// Emits a property holding integers of `width` cells each.
    pub fn prop_cells(&mut self, name: &str, values: &[u64], width: usize) -> &mut Self {
        assert!(width == 1 || width == 2);
        let mut data = Vec::new();
        for &value in values {
            if width == 2 {
                data.extend_from_slice(&((value >> 32) as u32).to_be_bytes());
            }
            data.extend_from_slice(&(value as u32).to_be_bytes());
        }
        self.prop(name, &data)
    }

    /// Wraps the accumulated blocks into a complete blob.
    pub fn build(&self) -> Vec<u8> {
        let mut structure = self.structure.clone();
        structure.extend_from_slice(&FDT_END.to_be_bytes());

        let header_size = 40u32;
        let rsv_size = ((self.reservations.len() + 1) * 16) as u32;
        let off_mem_rsvmap = header_size;
        let off_dt_struct = off_mem_rsvmap + rsv_size;
        let off_dt_strings = off_dt_struct + structure.len() as u32;
        let totalsize = off_dt_strings + self.strings.len() as u32;

        let mut blob = Vec::with_capacity(totalsize as usize);
        for field in [
            FDT_MAGIC,
            totalsize,
            off_dt_struct,
            off_dt_strings,
            off_mem_rsvmap,
            self.version,
            16,
            self.boot_cpuid,
            self.strings.len() as u32,
            structure.len() as u32,
        ] {
            blob.extend_from_slice(&field.to_be_bytes());
        }
        for &(address, size) in &self.reservations {
            blob.extend_from_slice(&address.to_be_bytes());
            blob.extend_from_slice(&size.to_be_bytes());
        }
        blob.extend_from_slice(&[0u8; 16]);
        blob.extend_from_slice(&structure);
        blob.extend_from_slice(&self.strings);
        blob
    }

    fn add_string(&mut self, name: &str) -> u32 {
        let offset = self.strings.len() as u32;
        self.strings.extend_from_slice(name.as_bytes());
        self.strings.push(0);
        offset
    }

    fn push_u32(&mut self, value: u32) {
        self.structure.extend_from_slice(&value.to_be_bytes());
    }

    fn pad4(&mut self) {
        while self.structure.len() % 4 != 0 {
            self.structure.push(0);
        }
    }
}

/// Single root node carrying `compatible = "acme,board"`.
pub fn blob_minimal() -> Vec<u8> {
    let mut b = BlobBuilder::new();
    b.begin_node("")
        .prop_str("compatible", "acme,board")
        .end_node();
    b.build()
}

/// A small board: chosen, memory, and an soc bus with an interrupt
/// controller and two UARTs. One phandle (0x1) fits the index, one (0x2a)
/// exceeds the node count, and `uart@10001000` carries a `phandles`
/// property that must never be treated as a phandle.
pub fn blob_machine() -> Vec<u8> {
    let mut b = BlobBuilder::new();
    b.reserve(0x4000_0000, 0x1_0000);
    b.begin_node("")
        .prop_u32("#address-cells", 2)
        .prop_u32("#size-cells", 2)
        .prop_str("model", "acme,devboard")
        .prop_str_list("compatible", &["acme,devboard", "acme,board"]);
    {
        b.begin_node("chosen")
            .prop_str("bootargs", "console=ttyS0")
            .end_node();
        b.begin_node("memory@80000000")
            .prop_str("device_type", "memory")
            .prop_cells("reg", &[0x8000_0000, 0x1000_0000], 2)
            .end_node();
        b.begin_node("soc")
            .prop_u32("#address-cells", 2)
            .prop_u32("#size-cells", 2)
            .prop("ranges", &[]);
        {
            b.begin_node("intc@2000000")
                .prop_str("compatible", "acme,intc")
                .prop_u32("phandle", 0x1)
                .end_node();
            b.begin_node("uart@10000000")
                .prop_str_list("compatible", &["ns16550a", "ns16550"])
                .prop_cells("reg", &[0x1000_0000, 0x1000], 2)
                .prop_u32("interrupt-parent", 0x1)
                .prop_u32("phandle", 0x2a)
                .end_node();
            b.begin_node("uart@10001000")
                .prop_str_list("compatible", &["ns16550a", "ns16550"])
                .prop_cells("reg", &[0x1000_1000, 0x1000], 2)
                .prop_u32("phandles", 0x5)
                .end_node();
        }
        b.end_node();
        b.end_node();
    }
    b.build()
}

/// The minimal tree with NOP tokens sprinkled between every element.
pub fn blob_with_nops() -> Vec<u8> {
    let mut b = BlobBuilder::new();
    b.nop();
    b.begin_node("")
        .nop()
        .prop_str("compatible", "acme,board")
        .nop()
        .end_node();
    b.nop();
    b.build()
}

/// A zeroed, 4-byte aligned buffer for exercising caller-buffer encoding.
pub struct AlignedBuf {
    ptr: *mut u8,
    size: usize,
}

impl AlignedBuf {
    /// Allocates a zeroed buffer of `size` bytes aligned to 4.
    pub fn zeroed(size: usize) -> Self {
        assert!(size > 0);
        let layout = core::alloc::Layout::from_size_align(size, 4).unwrap();
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        AlignedBuf { ptr, size }
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        let layout = core::alloc::Layout::from_size_align(self.size, 4).unwrap();
        unsafe { std::alloc::dealloc(self.ptr, layout) };
    }
}

impl Deref for AlignedBuf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        unsafe { std::slice::from_raw_parts(self.ptr, self.size) }
    }
}

impl DerefMut for AlignedBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.size) }
    }
}
