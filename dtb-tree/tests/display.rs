use dtb_sample::blob_machine;
use dtb_tree::DeviceTree;

#[test]
fn dts_rendering() {
    let blob = blob_machine();
    let tree = DeviceTree::from_bytes(&blob).unwrap();
    let text = format!("{}", tree);

    assert!(text.starts_with("/dts-v1/;"));
    assert!(text.contains("/memreserve/ 0x40000000 0x10000;"));
    assert!(text.contains("/ {"));
    assert!(text.contains("uart@10000000 {"));
    assert!(text.contains("model = \"acme,devboard\";"));
    assert!(text.contains("compatible = \"ns16550a\", \"ns16550\";"));
    assert!(text.contains("ranges;"));
    assert!(text.contains("#address-cells = <0x2>;"));
}

#[test]
fn debug_summary() {
    let blob = blob_machine();
    let tree = DeviceTree::from_bytes(&blob).unwrap();
    let text = format!("{:?}", tree);
    assert!(text.contains("nodes: 7"));
}
