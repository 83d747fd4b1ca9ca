//! Command-line tool for inspecting Device Tree Blob (DTB) files.
//!
//! Reads a DTB file and prints a DTS-style text rendering, or, with
//! `--compatible`, the paths of all nodes matching a compatible string.

use clap::Parser;
use dtb_tree::DeviceTree;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the input DTB file
    input: String,

    /// Print only the paths of nodes matching this compatible string
    #[arg(short, long)]
    compatible: Option<String>,

    /// Print header and size information instead of the tree
    #[arg(short, long)]
    stat: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    let data = std::fs::read(&args.input).expect("failed to read input file");
    let tree = match DeviceTree::from_bytes(&data) {
        Ok(tree) => tree,
        Err(err) => {
            log::error!("{}: {}", args.input, err);
            std::process::exit(1);
        }
    };

    if args.stat {
        println!(
            "{}: {} nodes, {} properties, {} reservations, re-encodes to {} bytes",
            args.input,
            tree.node_count(),
            tree.prop_count(),
            tree.memory_reservations.len(),
            tree.encoded_size(),
        );
        return;
    }

    match args.compatible {
        Some(compatible) => {
            let mut cursor = None;
            while let Some(id) = tree.find_compatible(cursor, &compatible) {
                println!("{}", tree.path(id));
                cursor = Some(id);
            }
        }
        None => print!("{}", tree),
    }
}
