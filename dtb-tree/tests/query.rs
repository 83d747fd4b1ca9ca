use std::sync::Once;

use dtb_sample::{blob_machine, blob_minimal};
use dtb_tree::{DeviceTree, Phandle};

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
fn find_root_and_compatible() {
    init_logging();
    let blob = blob_minimal();
    let tree = DeviceTree::from_bytes(&blob).unwrap();

    let root = tree.find("/").unwrap();
    let compatible = tree.find_prop(root, "compatible").unwrap();
    assert_eq!(tree.prop(compatible).string(0), Some("acme,board"));
    assert_eq!(tree.prop(compatible).string(1), None);
}

#[test]
fn find_with_unit_address() {
    init_logging();
    let blob = blob_machine();
    let tree = DeviceTree::from_bytes(&blob).unwrap();

    // A path segment matches the portion before `@`...
    let uart = tree.find("/soc/uart").unwrap();
    assert_eq!(tree.node(uart).name(), "uart@10000000");
    // ...or the full name.
    let uart2 = tree.find("/soc/uart@10001000").unwrap();
    assert_eq!(tree.node(uart2).name(), "uart@10001000");

    // find_child requires the full name.
    let soc = tree.find("/soc").unwrap();
    assert_eq!(tree.find_child(soc, "uart"), None);
    assert_eq!(tree.find_child(soc, "uart@10000000"), Some(uart));

    assert_eq!(tree.find("/soc/spi"), None);
}

#[test]
fn path_slashes_collapse() {
    init_logging();
    let blob = blob_machine();
    let tree = DeviceTree::from_bytes(&blob).unwrap();

    let uart = tree.find("/soc/uart@10000000").unwrap();
    assert_eq!(tree.find("//soc///uart@10000000/"), Some(uart));
    assert_eq!(tree.find(""), tree.root());
    assert_eq!(tree.find("soc/uart"), Some(uart));
}

#[test]
fn phandle_resolution() {
    init_logging();
    let blob = blob_machine();
    let tree = DeviceTree::from_bytes(&blob).unwrap();

    // In-range value resolved through the index.
    let intc = tree.find("/soc/intc").unwrap();
    assert_eq!(tree.find_phandle(Phandle::from(0x1)), Some(intc));

    // 0x2a exceeds the node count, so resolution falls back to a scan.
    let uart = tree.find("/soc/uart@10000000").unwrap();
    assert_eq!(tree.find_phandle(Phandle::from(0x2a)), Some(uart));

    assert_eq!(tree.find_phandle(Phandle::from(0x2b)), None);
}

#[test]
fn phandles_property_is_not_a_phandle() {
    init_logging();
    let blob = blob_machine();
    let tree = DeviceTree::from_bytes(&blob).unwrap();

    // uart@10001000 carries `phandles = <0x5>`; the name must match in
    // full, so 0x5 resolves to nothing.
    assert_eq!(tree.find_phandle(Phandle::from(0x5)), None);
}

#[test]
fn compatible_scan_resumes() {
    init_logging();
    let blob = blob_machine();
    let tree = DeviceTree::from_bytes(&blob).unwrap();

    let uart1 = tree.find("/soc/uart@10000000").unwrap();
    let uart2 = tree.find("/soc/uart@10001000").unwrap();

    let first = tree.find_compatible(None, "ns16550").unwrap();
    assert_eq!(first, uart1);
    let second = tree.find_compatible(Some(first), "ns16550").unwrap();
    assert_eq!(second, uart2);
    assert_eq!(tree.find_compatible(Some(second), "ns16550"), None);

    // Full-length equality: a prefix of an entry is not a match.
    assert_eq!(tree.find_compatible(None, "ns1655"), None);
}

#[test]
fn prop_order_and_indexing() {
    init_logging();
    let blob = blob_machine();
    let tree = DeviceTree::from_bytes(&blob).unwrap();

    let root = tree.root().unwrap();
    let names: Vec<&str> = tree
        .props(root)
        .map(|pid| tree.prop(pid).name())
        .collect();
    assert_eq!(names, ["#address-cells", "#size-cells", "model", "compatible"]);

    let model = tree.prop_at(root, 2).unwrap();
    assert_eq!(tree.prop(model).name(), "model");
    assert_eq!(tree.prop(model).as_str(), Some("acme,devboard"));
    assert_eq!(tree.prop_at(root, 4), None);
}

#[test]
fn stat_counts() {
    init_logging();
    let blob = blob_machine();
    let tree = DeviceTree::from_bytes(&blob).unwrap();

    let root = tree.root().unwrap();
    let stat = tree.stat(root);
    assert_eq!(stat.name, "/");
    assert_eq!(stat.props, 4);
    assert_eq!(stat.children, 3);
    assert_eq!(stat.siblings, 1);

    let uart = tree.find("/soc/uart@10000000").unwrap();
    let stat = tree.stat(uart);
    assert_eq!(stat.name, "uart@10000000");
    assert_eq!(stat.props, 4);
    assert_eq!(stat.children, 0);
    assert_eq!(stat.siblings, 3);
}

#[test]
fn link_accessors() {
    init_logging();
    let blob = blob_machine();
    let tree = DeviceTree::from_bytes(&blob).unwrap();

    let root = tree.root().unwrap();
    let soc = tree.find("/soc").unwrap();
    let intc = tree.find("/soc/intc").unwrap();
    let uart = tree.find("/soc/uart").unwrap();

    assert_eq!(tree.parent(root), None);
    assert_eq!(tree.parent(intc), Some(soc));
    assert_eq!(tree.first_child(soc), Some(intc));
    assert_eq!(tree.next_sibling(intc), Some(uart));
}

#[test]
fn absolute_paths() {
    init_logging();
    let blob = blob_machine();
    let tree = DeviceTree::from_bytes(&blob).unwrap();

    let root = tree.root().unwrap();
    assert_eq!(tree.path(root), "/");
    let uart = tree.find("/soc/uart").unwrap();
    assert_eq!(tree.path(uart), "/soc/uart@10000000");
}
