//! Host-side tooling for sector-fs: a file-backed block device and an image packer.


use std::fs::{read_dir, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use log::warn;
use sector_fs::{BlockDevice, Error, FileSystem, SectorId, SECTOR_SIZE};

/// A block device backed by a host file, one sector per 512 bytes
pub struct BlockFile(pub Mutex<File>);

impl BlockDevice for BlockFile {
    fn read_sector(&self, sector: SectorId, buf: &mut [u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))
            .expect("seeking error");
        file.read_exact(buf).expect("not a complete sector!");
    }

    fn write_sector(&self, sector: SectorId, buf: &[u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))
            .expect("seeking error");
        file.write_all(buf).expect("not a complete sector!");
    }
}

fn to_io(err: Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, err.to_string())
}

/// Copy the host directory `host` into the image directory `image_dir`
/// (`""` for the root). Returns the number of files and directories copied.
///
/// Entries whose names the image cannot hold (not UTF-8, too long, or taken)
/// are skipped with a warning, files and directories alike. Running out of
/// space aborts the copy.
pub fn copy_tree(fs: &FileSystem, host: &Path, image_dir: &str) -> io::Result<usize> {
    let mut copied = 0;
    for dir_entry in read_dir(host)? {
        let dir_entry = dir_entry?;
        let host_path = dir_entry.path();
        let name = match dir_entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => {
                warn!("skip {}: name is not UTF-8", host_path.display());
                continue;
            }
        };
        let is_dir = dir_entry.file_type()?.is_dir();
        let image_path = format!("{}/{}", image_dir, name);
        match fs.create(&image_path, 0, is_dir, None) {
            Ok(()) => {}
            Err(err @ (Error::InvalidName | Error::AlreadyExists)) => {
                warn!("skip {}: {}", host_path.display(), err);
                continue;
            }
            Err(err) => return Err(to_io(err)),
        }
        copied += 1;
        if is_dir {
            copied += copy_tree(fs, &host_path, &image_path)?;
            continue;
        }
        let mut host_file = File::open(&host_path)?;
        let mut all_data: Vec<u8> = Vec::new();
        host_file.read_to_end(&mut all_data)?;
        let inode = fs.open(&image_path, None).map_err(to_io)?;
        let written = inode.write_at(0, &all_data);
        fs.close(inode);
        if written != all_data.len() {
            return Err(to_io(Error::NoSpace));
        }
    }
    Ok(copied)
}
