use std::{fs::File, path::PathBuf};

use anyhow::Result;
use clap::Parser;

use flatfs::fs::FlatFs;
use flatfs::storage::FileBackedDisk;

#[derive(Parser)]
struct Args {
    /// Disk image file
    image: PathBuf,
}

fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();

    let file = File::options().read(true).open(args.image)?;
    let mut fs = FlatFs::mount(FileBackedDisk::new(file))?;

    fs.check()?;
    println!("clean");

    Ok(())
}
