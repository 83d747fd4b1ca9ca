use std::sync::Once;

use dtb_sample::{BlobBuilder, blob_machine, blob_minimal, blob_with_nops};
use dtb_tree::{DeviceTree, FdtError, MemoryReservation};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder()
            .is_test(true)
            .filter_level(log::LevelFilter::Trace)
            .try_init();
    });
}

#[test]
fn parse_minimal() {
    init_logging();
    let blob = blob_minimal();
    let tree = DeviceTree::from_bytes(&blob).unwrap();

    assert_eq!(tree.node_count(), 1);
    assert_eq!(tree.prop_count(), 1);

    let root = tree.root().unwrap();
    assert_eq!(tree.node(root).name(), "");
    assert_eq!(tree.find("/"), Some(root));
    assert!(tree.memory_reservations.is_empty());
}

#[test]
fn parse_machine_structure() {
    init_logging();
    let blob = blob_machine();
    let tree = DeviceTree::from_bytes(&blob).unwrap();

    assert_eq!(tree.node_count(), 7);

    let root = tree.root().unwrap();
    let children: Vec<&str> = tree
        .children(root)
        .map(|id| tree.node(id).name())
        .collect();
    assert_eq!(children, ["chosen", "memory@80000000", "soc"]);

    let soc = tree.find_child(root, "soc").unwrap();
    let soc_children: Vec<&str> = tree.children(soc).map(|id| tree.node(id).name()).collect();
    assert_eq!(soc_children, ["intc@2000000", "uart@10000000", "uart@10001000"]);

    // Every child's parent link points back at its list owner.
    for child in tree.children(soc) {
        assert_eq!(tree.parent(child), Some(soc));
        assert_eq!(
            tree.children(soc).filter(|&c| c == child).count(),
            1,
            "child appears exactly once in the parent's list"
        );
    }

    assert_eq!(
        tree.memory_reservations,
        [MemoryReservation {
            address: 0x4000_0000,
            size: 0x1_0000,
        }]
    );
}

#[test]
fn parse_tolerates_nops() {
    init_logging();
    let blob = blob_with_nops();
    let tree = DeviceTree::from_bytes(&blob).unwrap();
    assert_eq!(tree.node_count(), 1);
    assert_eq!(tree.prop_count(), 1);
}

#[test]
fn parse_skips_unknown_tokens() {
    init_logging();
    let mut b = BlobBuilder::new();
    b.begin_node("");
    b.token(0x77);
    b.prop_str("compatible", "acme,board");
    b.end_node();
    let blob = b.build();

    let tree = DeviceTree::from_bytes(&blob).unwrap();
    let root = tree.root().unwrap();
    assert!(tree.find_prop(root, "compatible").is_some());
}

#[test]
fn bad_magic_is_rejected() {
    init_logging();
    let mut blob = blob_minimal();
    blob[0] = 0xff;
    assert!(matches!(
        DeviceTree::from_bytes(&blob),
        Err(FdtError::InvalidMagic(_))
    ));
}

#[test]
fn short_header_is_rejected() {
    init_logging();
    let blob = blob_minimal();
    assert!(matches!(
        DeviceTree::from_bytes(&blob[..30]),
        Err(FdtError::BufferTooSmall { .. })
    ));
}

#[test]
fn truncated_blob_is_rejected() {
    init_logging();
    let blob = blob_machine();
    assert!(matches!(
        DeviceTree::from_bytes(&blob[..blob.len() - 8]),
        Err(FdtError::BufferTooSmall { .. })
    ));
}

#[test]
fn old_version_is_rejected() {
    init_logging();
    let mut b = BlobBuilder::new();
    b.version(7);
    b.begin_node("").end_node();
    let blob = b.build();
    assert_eq!(
        DeviceTree::from_bytes(&blob).unwrap_err(),
        FdtError::UnsupportedVersion(7)
    );
}

#[test]
fn missing_end_node_is_rejected() {
    init_logging();
    let mut b = BlobBuilder::new();
    b.begin_node("").begin_node("soc").end_node();
    let blob = b.build();
    assert_eq!(
        DeviceTree::from_bytes(&blob).unwrap_err(),
        FdtError::MissingEndNode
    );
}

#[test]
fn excessive_nesting_is_rejected() {
    init_logging();
    let mut b = BlobBuilder::new();
    for depth in 0..40 {
        b.begin_node(&format!("level{depth}"));
    }
    for _ in 0..40 {
        b.end_node();
    }
    let blob = b.build();
    assert_eq!(
        DeviceTree::from_bytes(&blob).unwrap_err(),
        FdtError::DepthExceeded
    );
}

#[test]
fn multiple_top_level_nodes_are_chained() {
    init_logging();
    let mut b = BlobBuilder::new();
    b.begin_node("").prop_str("model", "first").end_node();
    b.begin_node("extra").end_node();
    let blob = b.build();

    let tree = DeviceTree::from_bytes(&blob).unwrap();
    let roots: Vec<&str> = tree.roots().map(|id| tree.node(id).name()).collect();
    assert_eq!(roots, ["", "extra"]);
}

#[test]
fn from_ptr_matches_from_bytes() {
    init_logging();
    let blob = blob_machine();
    let tree = unsafe { DeviceTree::from_ptr(blob.as_ptr()) }.unwrap();
    assert_eq!(tree.node_count(), 7);
}

#[test]
fn reparse_is_idempotent() {
    init_logging();
    let blob = blob_machine();
    let first = DeviceTree::from_bytes(&blob).unwrap();
    let second = DeviceTree::from_bytes(&blob).unwrap();
    assert_eq!(first.node_count(), second.node_count());
    assert_eq!(first.prop_count(), second.prop_count());
    assert_eq!(first.find("/soc/uart"), second.find("/soc/uart"));
    assert_eq!(&*first.encode(), &*second.encode());
}
