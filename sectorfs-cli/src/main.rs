mod cli;

use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use cli::{Cli, Command};
use log::error;
use sectorfs::io::{FileBlockEmulator, FileBlockEmulatorBuilder};
use sectorfs::{FileSystem, FsError, Geometry, Kernel};

fn attach(cli: &Cli, clear: bool) -> io::Result<FileBlockEmulator> {
    let fd = OpenOptions::new()
        .read(true)
        .write(true)
        .create(clear)
        .open(&cli.disk)?;
    FileBlockEmulatorBuilder::from(fd)
        .with_sector_count(cli.sectors)
        .clear_medium(clear)
        .build()
}

fn run(cli: Cli) -> Result<bool, FsError> {
    let geometry = Geometry::new(cli.sectors, cli.dir_entries);
    if let Command::Format = cli.command {
        FileSystem::format(attach(&cli, true)?, geometry)?;
        println!("formatted {:?}", cli.disk);
        return Ok(true);
    }

    let mut kernel = Kernel::new(FileSystem::mount(attach(&cli, false)?, geometry)?);
    let ok = match &cli.command {
        Command::Format => unreachable!(),
        Command::Create { path, size } => kernel.create(path, *size) == 1,
        Command::Mkdir { path } => kernel.create_dir(path) == 1,
        Command::Put { source, path } => {
            let data = fs::read(source)?;
            kernel.create(path, data.len()) == 1 && {
                let id = kernel.open(path);
                let written = kernel.write(id, &data);
                kernel.close(id);
                written == data.len() as i32
            }
        }
        Command::Cat { path } => {
            let id = kernel.open(path);
            if id == 0 {
                false
            } else {
                let mut buf = [0; sectorfs::SECTOR_SIZE];
                let mut stdout = io::stdout();
                loop {
                    let read = kernel.read(id, &mut buf);
                    if read <= 0 {
                        break;
                    }
                    stdout.write_all(&buf[..read as usize])?;
                }
                kernel.close(id) == 1
            }
        }
        Command::Rm { recursive, path } => kernel.remove(path, *recursive) == 1,
        Command::Ls { recursive, path } => {
            let lines = kernel.list(path, *recursive);
            for line in &lines {
                println!("{}", line);
            }
            true
        }
        Command::Dump => {
            kernel.file_system().print(&mut io::stdout())?;
            true
        }
    };
    Ok(ok)
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{}", e);
            eprintln!("sectorfs: {}", e);
            ExitCode::FAILURE
        }
    }
}
