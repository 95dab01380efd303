use std::fs::OpenOptions;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};

use clap::{App, Arg};
use log::info;
use sector_fs::{Dir, FileSystem, StatMode, SECTOR_SIZE};
use sector_fs_fuse::{copy_tree, BlockFile};

/// 16 MiB with 512-byte sectors
const DEFAULT_SECTORS: u32 = 32768;

fn main() {
    env_logger::init();
    if let Err(err) = sector_fs_pack() {
        eprintln!("sector-fs-packer: {}", err);
        std::process::exit(1);
    }
}

fn sector_fs_pack() -> io::Result<()> {
    let matches = App::new("SectorFileSystem packer")
        .arg(
            Arg::with_name("source")
                .short("s")
                .long("source")
                .takes_value(true)
                .required(true)
                .help("Host directory copied into the image"),
        )
        .arg(
            Arg::with_name("image")
                .short("i")
                .long("image")
                .takes_value(true)
                .required(true)
                .help("Image file to create"),
        )
        .arg(
            Arg::with_name("sectors")
                .short("n")
                .long("sectors")
                .takes_value(true)
                .help("Image size in sectors"),
        )
        .get_matches();
    let src_path = matches.value_of("source").unwrap();
    let image_path = matches.value_of("image").unwrap();
    let total_sectors = match matches.value_of("sectors") {
        Some(raw) => raw
            .parse::<u32>()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?,
        None => DEFAULT_SECTORS,
    };
    info!("src_path = {}\nimage_path = {}", src_path, image_path);

    let block_file = Arc::new(BlockFile(Mutex::new({
        let f = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(image_path)?;
        f.set_len(total_sectors as u64 * SECTOR_SIZE as u64)?;
        f
    })));
    let fs = FileSystem::format(block_file, total_sectors)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    let copied = copy_tree(&fs, Path::new(src_path), "")?;
    info!("copied {} entries", copied);
    list(&fs, &mut fs.root_dir(), "/");
    fs.done();
    Ok(())
}

fn list(fs: &FileSystem, dir: &mut Dir, prefix: &str) {
    while let Some(name) = dir.readdir() {
        let inode = match dir.lookup(&name) {
            Some(inode) => inode,
            None => continue,
        };
        let stat = inode.stat();
        println!(
            "{}{}{} {} bytes, {} sectors",
            prefix,
            name,
            if stat.mode.contains(StatMode::DIR) { "/" } else { "" },
            stat.size,
            stat.sectors
        );
        if stat.mode.contains(StatMode::DIR) {
            let mut child = Dir::open(fs.inodes(), inode);
            list(fs, &mut child, &format!("{}{}/", prefix, name));
        } else {
            fs.close(inode);
        }
    }
}
