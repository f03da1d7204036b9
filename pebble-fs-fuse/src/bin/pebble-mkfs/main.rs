mod cli;

use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::sync::Arc;

use clap::Parser;
use cli::Cli;
use log::warn;
use pebble_fs::{PebbleFileSystem, ProcessFs, NAME_MAX_LEN, SECTOR_SIZE};
use pebble_fs_fuse::BlockFile;

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    println!("source={:?}\nimage={:?}", cli.source, cli.image);

    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&cli.image)?;
    fd.set_len(cli.sectors as u64 * SECTOR_SIZE as u64)?;

    let device = Arc::new(BlockFile::new(fd, cli.sectors));
    let fs = PebbleFileSystem::mount(device, true);
    let mut proc = ProcessFs::new(fs.clone());

    for entry in fs::read_dir(&cli.source)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            warn!("skipping non-utf8 name {name:?}");
            continue;
        };
        if name.len() > NAME_MAX_LEN {
            warn!("skipping {name:?}: name longer than {NAME_MAX_LEN} bytes");
            continue;
        }

        println!("packing: {name:?}");
        let data = fs::read(entry.path())?;

        assert!(proc.create(name, 0), "creating {name:?} failed");
        let fd = proc.open(name).unwrap();
        assert_eq!(proc.write(fd, &data), data.len() as isize);
        proc.close(fd);
    }

    proc.release_all();
    fs.lock().shutdown();
    Ok(())
}
