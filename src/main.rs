use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use flatfs::disk_format::sector::SECTOR_SIZE;
use flatfs::fs::{format, FlatFs, FormatOptions, INIT_PROC};
use flatfs::storage::FileBackedDisk;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a fresh filesystem onto an image file
    Mkfs {
        /// Disk image file
        image: PathBuf,
        /// Device size in sectors
        #[arg(long, default_value_t = 4096)]
        sectors: usize,
        /// Number of inodes
        #[arg(long, default_value_t = 128)]
        inodes: u32,
        /// Number of dev_tty device nodes to seed
        #[arg(long, default_value_t = 3)]
        tty_nodes: usize,
    },
    /// List the root directory of an image
    Ls {
        /// Disk image file
        image: PathBuf,
    },
    /// Refresh the content digests of every eligible file
    Refresh {
        /// Disk image file
        image: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();

    match Args::parse().command {
        Command::Mkfs {
            image,
            sectors,
            inodes,
            tty_nodes,
        } => {
            let file = File::options()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(image)
                .context("unable to create image file")?;
            file.set_len((sectors * SECTOR_SIZE) as u64)?;

            let disk = FileBackedDisk::new(file);
            format(
                &disk,
                &FormatOptions {
                    nr_sects: sectors,
                    nr_inodes: inodes,
                    tty_nodes,
                },
            )?;
        }
        Command::Ls { image } => {
            let file = File::options()
                .read(true)
                .open(image)
                .context("unable to open image file")?;

            let mut fs = FlatFs::mount(FileBackedDisk::new(file))?;
            for entry in fs.read_directory()? {
                let stat = fs.stat(format!("/{}", entry.name).as_bytes())?;
                println!("{:>4} {:>12} {:?} {}", stat.ino, stat.size, stat.mode, entry.name);
            }
        }
        Command::Refresh { image } => {
            let file = File::options()
                .read(true)
                .write(true)
                .open(image)
                .context("unable to open image file in read-write mode")?;

            let mut fs = FlatFs::mount(FileBackedDisk::new(file))?;
            let refreshed = fs.refresh_digests(INIT_PROC)?;
            println!("refreshed {refreshed} files");
        }
    }

    Ok(())
}
