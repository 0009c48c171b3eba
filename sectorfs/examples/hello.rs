use sectorfs::io::FileBlockEmulatorBuilder;
use sectorfs::{FileSystem, Geometry};

pub fn main() {
    let tmp = tempfile::tempfile().unwrap();
    let dev = FileBlockEmulatorBuilder::from(tmp)
        .build()
        .expect("Could not initialize disk emulator.");

    // create a new file system on the device and fill in a small tree
    let mut fs = FileSystem::format(dev, Geometry::default()).expect("should format");
    fs.create_directory("/home").unwrap();
    fs.create("/home/hello", 13).unwrap();

    let mut hello = fs.open("/home/hello").unwrap();
    fs.write(&mut hello, b"hello, world\n").unwrap();

    for entry in fs.list("/", true).unwrap() {
        let entry = entry.unwrap();
        println!("{}{}", "  ".repeat(entry.depth), entry.name);
    }
}
