use std::sync::Arc;

use block_dev::{BlockDevice, SECTOR_SIZE};
use pebble_fs::layout::DiskInode;
use pebble_fs::{PebbleFileSystem, ProcessFs, MAX_LEN};

use crate::MemDisk;

fn setup(sectors: u32) -> (Arc<dyn BlockDevice>, ProcessFs) {
    let device: Arc<dyn BlockDevice> = Arc::new(MemDisk::new(sectors));
    let fs = PebbleFileSystem::mount(device.clone(), true);
    (device, ProcessFs::new(fs))
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// 描述符背后节点的扇区占用，由磁盘上的计数器推出
fn footprint(proc: &ProcessFs, device: &Arc<dyn BlockDevice>, fd: usize) -> usize {
    let sector = proc.inumber(fd);
    assert!(sector >= 0);
    DiskInode::load(device, sector as u32).data_sectors()
}

#[test]
fn grow_across_regions() {
    let (device, mut proc) = setup(4096);
    let data = pattern(200_000);

    assert!(proc.create("/big", 0));
    let fd = proc.open("/big").unwrap();
    assert_eq!(proc.write(fd, &data), 200_000);
    assert_eq!(proc.filesize(fd), 200_000);

    proc.seek(fd, 0);
    let mut back = vec![0u8; 200_000];
    assert_eq!(proc.read(fd, &mut back), 200_000);
    assert_eq!(back, data);

    // 200000字节 = 391个数据扇区：12直接 + 128一级间接 + 251二级间接
    assert_eq!(footprint(&proc, &device, fd), 391);
    proc.close(fd);
}

#[test]
fn truncate_by_remove() {
    let (_, mut proc) = setup(4096);
    let baseline = proc.fs().lock().allocated_sectors();

    assert!(proc.create("/a", 8192));
    let fd1 = proc.open("/a").unwrap();
    let fd2 = proc.open("/a").unwrap();
    assert_ne!(fd1, fd2);

    assert!(proc.remove("/a"));
    // 既有句柄在最后一次关闭前照常工作
    let mut buf = vec![0u8; 8192];
    assert_eq!(proc.read(fd1, &mut buf), 8192);
    assert_eq!(proc.write(fd2, b"still here"), 10);

    proc.close(fd1);
    proc.close(fd2);
    assert_eq!(proc.fs().lock().allocated_sectors(), baseline);
}

#[test]
fn directory_tree() {
    let (_, mut proc) = setup(4096);

    assert!(proc.mkdir("/x"));
    assert!(proc.mkdir("/x/y"));
    assert!(proc.mkdir("/x/y/z"));
    assert!(proc.chdir("/x/y"));

    let fd = proc.open("../y/z").unwrap();
    assert!(proc.isdir(fd));

    // 非空目录删不掉
    assert!(!proc.remove("/x/y"));

    proc.close(fd);
    assert!(proc.remove("/x/y/z"));
    // 还是某个进程的工作目录，删不掉
    assert!(!proc.remove("/x/y"));
    assert!(proc.chdir("/"));
    assert!(proc.remove("/x/y"));
    assert!(proc.remove("/x"));
}

#[test]
fn name_collision() {
    let (_, mut proc) = setup(4096);

    assert!(proc.create("/f", 0));
    assert!(!proc.create("/f", 0));
    assert!(!proc.mkdir("/f"));
}

#[test]
fn deny_write() {
    let (_, mut proc) = setup(4096);

    assert!(proc.create("/exe", 512));
    let fd1 = proc.open("/exe").unwrap();
    let fd2 = proc.open("/exe").unwrap();

    assert!(proc.deny_write(fd1));
    // 同一句柄至多拒写一次
    assert!(!proc.deny_write(fd1));
    assert_eq!(proc.write(fd2, b"blocked"), 0);

    assert!(proc.allow_write(fd1));
    assert_eq!(proc.write(fd2, b"allowed"), 7);

    proc.close(fd1);
    proc.close(fd2);
}

#[test]
fn max_size_boundary() {
    // 最大文件要16524个数据扇区外加130个索引扇区
    let (_, mut proc) = setup(20_000);

    assert!(proc.create("/m", 0));
    let fd = proc.open("/m").unwrap();

    let data = vec![0xA5u8; MAX_LEN];
    assert_eq!(proc.write(fd, &data), MAX_LEN as isize);
    assert_eq!(proc.filesize(fd), MAX_LEN as isize);

    // 再多一字节就越界：写失败，长度不变
    assert_eq!(proc.write(fd, b"x"), -1);
    assert_eq!(proc.filesize(fd), MAX_LEN as isize);

    proc.seek(fd, MAX_LEN - 3);
    let mut tail = [0u8; 3];
    assert_eq!(proc.read(fd, &mut tail), 3);
    assert_eq!(tail, [0xA5; 3]);

    proc.close(fd);
}

#[test]
fn round_trip_at_offsets() {
    // 覆盖扇区内、跨扇区、跨直接/间接/二级间接边界的各种组合
    let cases = [
        (0usize, 1usize),
        (0, 517),
        (511, 2),
        (200, 512),
        (12 * SECTOR_SIZE - 7, 19),
        (140 * SECTOR_SIZE - 100, 300),
    ];

    for (offset, len) in cases {
        let (_, mut proc) = setup(4096);
        let data = pattern(len);

        assert!(proc.create("/f", 0));
        let fd = proc.open("/f").unwrap();
        proc.seek(fd, offset);
        assert_eq!(proc.write(fd, &data), len as isize, "write at {offset}");
        assert_eq!(proc.filesize(fd), (offset + len) as isize);

        proc.seek(fd, offset);
        let mut back = vec![0u8; len];
        assert_eq!(proc.read(fd, &mut back), len as isize, "read at {offset}");
        assert_eq!(back, data);
        proc.close(fd);
    }
}

#[test]
fn sparse_extension_reads_zero() {
    let (_, mut proc) = setup(4096);

    assert!(proc.create("/s", 100));
    let fd = proc.open("/s").unwrap();
    proc.seek(fd, 5000);
    assert_eq!(proc.write(fd, &pattern(10)), 10);
    assert_eq!(proc.filesize(fd), 5010);

    // 旧末尾与写入点之间的空洞读出来全是零
    proc.seek(fd, 100);
    let mut hole = vec![0xFFu8; 4900];
    assert_eq!(proc.read(fd, &mut hole), 4900);
    assert!(hole.iter().all(|&b| b == 0));
    proc.close(fd);
}

#[test]
fn two_opens_share_one_inode() {
    let (_, mut proc) = setup(4096);

    assert!(proc.create("/shared", 0));
    let fd1 = proc.open("/shared").unwrap();
    let fd2 = proc.open("/shared").unwrap();
    assert_ne!(fd1, fd2);
    assert_eq!(proc.inumber(fd1), proc.inumber(fd2));

    // 一边写完，另一边立刻可见
    assert_eq!(proc.write(fd1, b"hello"), 5);
    let mut buf = [0u8; 5];
    assert_eq!(proc.read(fd2, &mut buf), 5);
    assert_eq!(&buf, b"hello");

    proc.close(fd1);
    proc.close(fd2);
}

#[test]
fn nonempty_dir_remove_is_a_noop() {
    let (_, mut proc) = setup(4096);

    assert!(proc.mkdir("/d"));
    assert!(proc.create("/d/keep", 0));
    assert!(!proc.remove("/d"));

    // 失败的删除不动目录
    let fd = proc.open("/d").unwrap();
    assert_eq!(proc.readdir(fd).as_deref(), Some("keep"));
    assert_eq!(proc.readdir(fd), None);
    proc.close(fd);
}

#[test]
fn equivalent_paths_resolve_alike() {
    let (_, mut proc) = setup(4096);

    assert!(proc.mkdir("/a"));
    assert!(proc.mkdir("/a/b"));
    assert!(proc.create("/a/b/c", 0));

    let fd1 = proc.open("/a/b/c").unwrap();
    let fd2 = proc.open("a/b/c").unwrap();
    let fd3 = proc.open("././a/./b/c").unwrap();
    assert_eq!(proc.inumber(fd1), proc.inumber(fd2));
    assert_eq!(proc.inumber(fd2), proc.inumber(fd3));

    assert!(proc.chdir("/a"));
    let fd4 = proc.open("b/c").unwrap();
    let fd5 = proc.open("../a/b/c").unwrap();
    assert_eq!(proc.inumber(fd1), proc.inumber(fd4));
    assert_eq!(proc.inumber(fd1), proc.inumber(fd5));

    for fd in [fd1, fd2, fd3, fd4, fd5] {
        proc.close(fd);
    }
}

#[test]
fn footprint_matches_length() {
    let (device, mut proc) = setup(4096);

    for len in [0usize, 1, 512, 513, 6144, 70_000, 200_000] {
        assert!(proc.create("/f", len));
        let fd = proc.open("/f").unwrap();
        assert_eq!(
            footprint(&proc, &device, fd),
            len.div_ceil(SECTOR_SIZE),
            "length {len}"
        );
        proc.close(fd);
        assert!(proc.remove("/f"));
    }
}

#[test]
fn readdir_skips_dot_entries_and_free_slots() {
    let (_, mut proc) = setup(4096);

    assert!(proc.mkdir("/d"));
    for name in ["one", "two", "three"] {
        assert!(proc.create(&format!("/d/{name}"), 0));
    }
    assert!(proc.remove("/d/two"));
    // 复用被释放的槽位，目录不加长
    assert!(proc.create("/d/four", 0));

    let fd = proc.open("/d").unwrap();
    let mut names = Vec::new();
    while let Some(name) = proc.readdir(fd) {
        names.push(name);
    }
    assert_eq!(names, ["one", "four", "three"]);
    proc.close(fd);
}

#[test]
fn opening_a_directory_itself() {
    let (_, mut proc) = setup(4096);

    assert!(proc.mkdir("/d"));
    assert!(proc.create("/d/f", 0));

    // 尾随`/`与`/`本身都是"目录自身"
    let root = proc.open("/").unwrap();
    assert!(proc.isdir(root));
    assert_eq!(proc.readdir(root).as_deref(), Some("d"));

    let d = proc.open("/d/").unwrap();
    assert!(proc.isdir(d));
    assert_eq!(proc.readdir(d).as_deref(), Some("f"));

    // 目录描述符拒绝字节读写
    let mut buf = [0u8; 4];
    assert_eq!(proc.read(d, &mut buf), -1);
    assert_eq!(proc.write(d, b"no"), -1);

    proc.close(root);
    proc.close(d);
}

#[test]
fn cwd_relative_operations() {
    let (_, mut proc) = setup(4096);

    assert!(proc.mkdir("/w"));
    assert!(proc.chdir("w"));
    assert!(proc.create("rel", 16));

    let fd = proc.open("/w/rel").unwrap();
    assert_eq!(proc.filesize(fd), 16);
    proc.close(fd);

    // 删除工作目录自身被挡下
    assert!(!proc.remove("/w"));
}

#[test]
fn out_of_space_write_reports_failure() {
    // 只留少量空闲扇区的小设备
    let (_, mut proc) = setup(64);

    assert!(proc.create("/t", 0));
    let fd = proc.open("/t").unwrap();
    let data = vec![1u8; 64 * SECTOR_SIZE];
    assert_eq!(proc.write(fd, &data), -1);

    // 系统照常可用
    assert_eq!(proc.write(fd, b"ok"), 2);
    proc.close(fd);
}

#[test]
fn survives_remount() {
    let device: Arc<dyn BlockDevice> = Arc::new(MemDisk::new(4096));
    let data = pattern(3000);

    {
        let fs = PebbleFileSystem::mount(device.clone(), true);
        let mut proc = ProcessFs::new(fs.clone());
        assert!(proc.mkdir("/keep"));
        assert!(proc.create("/keep/data", 0));
        let fd = proc.open("/keep/data").unwrap();
        assert_eq!(proc.write(fd, &data), 3000);
        proc.close(fd);
        proc.release_all();
        fs.lock().shutdown();
    }

    let fs = PebbleFileSystem::mount(device, false);
    let mut proc = ProcessFs::new(fs);
    let fd = proc.open("/keep/data").unwrap();
    let mut back = vec![0u8; 3000];
    assert_eq!(proc.read(fd, &mut back), 3000);
    assert_eq!(back, data);
    proc.close(fd);
}

#[test]
fn bad_fds_are_benign() {
    let (_, mut proc) = setup(4096);

    let mut buf = [0u8; 4];
    assert_eq!(proc.read(99, &mut buf), -1);
    assert_eq!(proc.write(99, b"x"), -1);
    assert_eq!(proc.filesize(99), -1);
    assert_eq!(proc.inumber(99), -1);
    assert_eq!(proc.tell(99), None);
    assert!(!proc.seek(99, 0));
    assert!(!proc.close(99));
    assert!(!proc.isdir(99));
    assert_eq!(proc.readdir(99), None);
}
