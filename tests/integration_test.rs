use respack::io_stream::{PackUnit, PackageReader, PackageWriter, ReaderOptions, SharedViews, WriterOptions};
use respack::package::Package;
use respack::{record, PackageError};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use tempfile::{tempdir, NamedTempFile};

fn pack_to_vec(files: &[(&str, &str)]) -> Vec<u8> {
    let mut w = PackageWriter::new();
    for (path, data) in files {
        w.add_bytes(data.as_bytes().to_vec(), path);
    }
    let mut buf = Vec::new();
    w.pack_all(&mut buf, 0).unwrap();
    buf
}

#[test]
fn test_pack_and_read_roundtrip() {
    let buf = pack_to_vec(&[("a.txt", "hello"), ("dir/b.txt", "world!")]);
    let reader = PackageReader::open(Cursor::new(buf)).unwrap();

    assert_eq!(reader.count(), 2);
    assert_eq!(reader.entries()[0].path, "a.txt");
    assert_eq!(reader.entries()[1].path, "dir/b.txt");
    assert_eq!(reader.read_all_bytes("a.txt").unwrap(), b"hello");
    assert_eq!(reader.read_all_bytes("dir/b.txt").unwrap(), b"world!");

    let mut out = Vec::new();
    assert_eq!(reader.copy_to(1, &mut out).unwrap(), 6);
    assert_eq!(out, b"world!");
}

#[test]
fn test_index_size_is_exact() {
    let paths = ["a.txt", "dir/b.txt"];
    let mut w = PackageWriter::new();
    w.add_bytes(b"hello".to_vec(), paths[0]);
    w.add_bytes(b"world!".to_vec(), paths[1]);

    let expected = (18 + 2 * 5) + (18 + 2 * 9) + 1;
    assert_eq!(w.index_size(), expected);
    assert_eq!(record::index_size(paths), expected);

    let mut buf = Vec::new();
    let summary = w.pack_all(&mut buf, 0).unwrap();
    assert_eq!(summary.index_size, expected);
    assert_eq!(summary.payload_bytes, 11);
    assert_eq!(summary.bytes_written, buf.len() as u64);

    // The terminator is the last index byte and the payload follows at once.
    assert_eq!(buf[expected as usize - 1], 0x00);
    assert_eq!(&buf[expected as usize..], b"helloworld!");

    let reader = PackageReader::open(Cursor::new(buf)).unwrap();
    assert_eq!(reader.entries()[0].position(), expected);
    assert_eq!(reader.index_size(), expected);
}

#[test]
fn test_directory_listing_is_one_level() {
    let buf = pack_to_vec(&[
        ("a.txt", "1"),
        ("dir/b.txt", "2"),
        ("dir/sub/c.txt", "3"),
        ("dir/d.txt", "4"),
        ("dirx/e.txt", "5"),
    ]);
    let reader = PackageReader::open(Cursor::new(buf)).unwrap();

    let dir: Vec<_> = reader.list_by_directory("dir").map(|e| e.path.as_str()).collect();
    assert_eq!(dir, ["dir/b.txt", "dir/d.txt"]);

    let slash: Vec<_> = reader.list_by_directory("dir/").map(|e| e.path.as_str()).collect();
    assert_eq!(slash, dir);

    let root: Vec<_> = reader.list_by_directory("").map(|e| e.path.as_str()).collect();
    assert_eq!(root, ["a.txt"]);

    assert_eq!(reader.list_by_directory("nope").count(), 0);
}

#[test]
fn test_malformed_index_is_rejected() {
    for bad in [
        vec![0x7Fu8],
        vec![0xFF, 0x02, b'a', 0x00],
        vec![0xFF, 0x01, b'a', 0x00, 1, 2, 3],
        vec![],
    ] {
        assert!(matches!(
            PackageReader::open(Cursor::new(bad)),
            Err(PackageError::InvalidFormat(_))
        ));
    }
}

#[test]
fn test_bounds_are_checked_on_access() {
    let buf = pack_to_vec(&[("a", "0123456789"), ("b", "xyz")]);
    let cut = buf.len() - 2;
    let reader = PackageReader::open(Cursor::new(buf[..cut].to_vec())).unwrap();

    // Opening succeeds; only the entry running past the end fails.
    assert_eq!(reader.read_all_bytes("a").unwrap(), b"0123456789");
    match reader.read_all_bytes("b") {
        Err(PackageError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
        other => panic!("expected UnexpectedEof, got {other:?}"),
    }
    assert!(reader.open_stream("b").is_err());
}

#[test]
fn test_truncation_after_open_is_detected() {
    let tmp = NamedTempFile::new().unwrap();
    {
        let mut w = PackageWriter::new();
        w.add_bytes(b"first".to_vec(), "first");
        w.add_bytes(b"second".to_vec(), "second");
        w.pack_all(File::create(tmp.path()).unwrap(), 0).unwrap();
    }

    let reader = PackageReader::open_file(tmp.path(), ReaderOptions::default()).unwrap();
    assert_eq!(reader.read_all_bytes("second").unwrap(), b"second");

    let len = fs::metadata(tmp.path()).unwrap().len();
    OpenOptions::new().write(true).open(tmp.path()).unwrap().set_len(len - 3).unwrap();

    assert_eq!(reader.read_all_bytes("first").unwrap(), b"first");
    assert!(matches!(reader.read_all_bytes("second"), Err(PackageError::Io(_))));
    assert!(matches!(reader.open_stream("second"), Err(PackageError::Io(_))));
}

#[test]
fn test_invalid_paths_write_nothing() {
    for bad in ["", "/abs", "a/", "a//b", "../up", "a/../b", "what?", "bad\u{1}name", "..\\x", "\\x", "a\\\\b"] {
        let mut w = PackageWriter::new();
        w.add_bytes(b"x".to_vec(), "ok.txt");
        w.add_bytes(b"x".to_vec(), bad);
        let mut buf = Vec::new();
        let err = w.pack_all(&mut buf, 0).unwrap_err();
        assert!(matches!(err, PackageError::InvalidPath { .. }), "{bad:?}: {err}");
        assert!(buf.is_empty(), "{bad:?} wrote {} bytes", buf.len());
    }

    let mut w = PackageWriter::new();
    w.add_bytes(b"x".to_vec(), &"a".repeat(257));
    assert!(matches!(w.pack_all(Vec::new(), 0), Err(PackageError::InvalidFormat(_))));

    let mut w = PackageWriter::new();
    w.add_bytes(b"x".to_vec(), &"a".repeat(256));
    assert!(w.pack_all(Vec::new(), 0).is_ok());
}

#[test]
fn test_backslashes_become_separators() {
    let buf = pack_to_vec(&[("dir\\b.txt", "w")]);
    let reader = PackageReader::open(Cursor::new(buf)).unwrap();
    assert_eq!(reader.entries()[0].path, "dir/b.txt");
    assert_eq!(reader.list_by_directory("dir").count(), 1);
}

#[test]
fn test_duplicate_paths_are_rejected_by_writer() {
    let mut w = PackageWriter::new();
    w.add_bytes(b"1".to_vec(), "same");
    w.add_bytes(b"2".to_vec(), "same");
    let mut buf = Vec::new();
    assert!(matches!(w.pack_all(&mut buf, 0), Err(PackageError::DuplicatePath(p)) if p == "same"));
    assert!(buf.is_empty());
}

#[test]
fn test_missing_source_is_rejected() {
    let dir = tempdir().unwrap();
    let mut w = PackageWriter::new();
    w.add_file(dir.path().join("not-there.bin"), "gone.bin");
    assert!(matches!(w.pack_all(Vec::new(), 0), Err(PackageError::MissingSource(p)) if p == "gone.bin"));
}

#[test]
fn test_reopen_is_idempotent() {
    let tmp = NamedTempFile::new().unwrap();
    {
        let mut w = PackageWriter::new();
        w.add_bytes(b"abc".to_vec(), "x/y");
        w.add_bytes(Vec::<u8>::new(), "empty");
        w.pack_all(File::create(tmp.path()).unwrap(), 0).unwrap();
    }

    let first  = PackageReader::open_file(tmp.path(), ReaderOptions::default()).unwrap();
    let second = PackageReader::open_file(tmp.path(), ReaderOptions::default()).unwrap();
    assert_eq!(first.count(), second.count());
    for (a, b) in first.iter().zip(second.iter()) {
        assert_eq!(a.path, b.path);
        assert_eq!(a.block, b.block);
    }
    assert_eq!(second.read_all_bytes("empty").unwrap(), b"");
}

#[test]
fn test_pack_at_nonzero_start() {
    let mut cur = Cursor::new(Vec::new());
    cur.write_all(b"PREFIX").unwrap();

    let mut w = PackageWriter::new();
    w.add_bytes(b"payload".to_vec(), "p");
    w.pack_seekable(&mut cur).unwrap().finish().unwrap();

    cur.seek(SeekFrom::Start(6)).unwrap();
    let reader = PackageReader::open(cur).unwrap();
    assert_eq!(reader.index_start(), 6);
    assert_eq!(reader.entries()[0].position(), 6 + record::index_size(["p"]));
    assert_eq!(reader.read_all_bytes("p").unwrap(), b"payload");
}

#[test]
fn test_header_roundtrip() {
    let mut w = PackageWriter::with_options(WriterOptions { write_header: true, ..Default::default() });
    w.add_bytes(b"hdr".to_vec(), "h");
    let mut buf = Vec::new();
    w.pack_all(&mut buf, 0).unwrap();
    assert_eq!(&buf[..9], b"RESPACKV1");

    let opts = ReaderOptions { verify_header: true, ..Default::default() };
    let reader = PackageReader::open_with(Cursor::new(buf.clone()), opts, SharedViews).unwrap();
    assert_eq!(reader.read_all_bytes("h").unwrap(), b"hdr");

    // Without the flag the magic bytes are not a valid record.
    assert!(PackageReader::open(Cursor::new(buf)).is_err());
}

#[test]
fn test_step_machine_reports_progress() {
    let mut w = PackageWriter::with_options(WriterOptions { buffer_size: 4, ..Default::default() });
    w.add_bytes(b"0123456789".to_vec(), "ten");
    w.add_bytes(Vec::<u8>::new(), "zero");

    let mut buf = Vec::new();
    let mut job = w.pack(&mut buf, 0);
    let units: Vec<PackUnit> = job.by_ref().collect();
    assert!(job.last_error().is_none());
    assert!(!job.is_packing());

    let chunks: Vec<usize> = units
        .iter()
        .filter_map(|u| match u {
            PackUnit::PayloadChunk { bytes, .. } => Some(*bytes),
            _ => None,
        })
        .collect();
    assert_eq!(chunks, [4, 4, 2]);

    let done: Vec<&str> = units
        .iter()
        .filter_map(|u| match u {
            PackUnit::FileComplete { path, .. } => Some(path.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(done, ["ten", "zero"]);
    assert!(matches!(units[0], PackUnit::Validated { entries: 2 }));
}

#[test]
fn test_unseekable_stream_is_unsupported() {
    struct Pipe(Cursor<Vec<u8>>);

    impl Read for Pipe {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.read(buf)
        }
    }

    impl Seek for Pipe {
        fn seek(&mut self, _: SeekFrom) -> io::Result<u64> {
            Err(io::Error::new(io::ErrorKind::Unsupported, "pipe"))
        }
    }

    assert!(matches!(
        PackageReader::open(Pipe(Cursor::new(vec![0]))),
        Err(PackageError::Unsupported(_))
    ));
}

#[test]
fn test_file_views_read_concurrently() {
    let tmp = NamedTempFile::new().unwrap();
    let blobs: Vec<Vec<u8>> = (0..8u8).map(|i| vec![i; 4096 + i as usize]).collect();
    {
        let mut w = PackageWriter::new();
        for (i, b) in blobs.iter().enumerate() {
            w.add_bytes(b.clone(), &format!("blob/{i}"));
        }
        w.pack_all(File::create(tmp.path()).unwrap(), 0).unwrap();
    }

    let reader = PackageReader::open_file(tmp.path(), ReaderOptions::default()).unwrap();
    assert!(reader.views_are_independent());

    std::thread::scope(|s| {
        for (i, expected) in blobs.iter().enumerate() {
            let reader = &reader;
            s.spawn(move || {
                let mut stream = reader.open_stream(i).unwrap();
                let mut out = Vec::new();
                stream.read_to_end(&mut out).unwrap();
                assert_eq!(&out, expected);
            });
        }
    });
}

#[test]
fn test_shared_views_interleave() {
    let buf = pack_to_vec(&[("a", "aaaa"), ("b", "bbbb")]);
    let reader = PackageReader::open(Cursor::new(buf)).unwrap();
    assert!(!reader.views_are_independent());

    let mut a = reader.open_stream("a").unwrap();
    let mut b = reader.open_stream("b").unwrap();
    let mut x = [0u8; 2];
    let mut y = [0u8; 2];
    a.read_exact(&mut x).unwrap();
    b.read_exact(&mut y).unwrap();
    assert_eq!(&x, b"aa");
    assert_eq!(&y, b"bb");
    a.seek(SeekFrom::Start(0)).unwrap();
    let mut all = Vec::new();
    a.read_to_end(&mut all).unwrap();
    assert_eq!(all, b"aaaa");
}

#[test]
fn test_package_create_open_extract() {
    let dir = tempdir().unwrap();
    let src = dir.path().join("src");
    fs::create_dir_all(src.join("nested")).unwrap();
    fs::write(src.join("top.txt"), b"top").unwrap();
    fs::write(src.join("nested").join("deep.txt"), b"deep").unwrap();

    let out = dir.path().join("assets.pak");
    let mut pkg = Package::create(&out, WriterOptions::default()).unwrap();
    assert_eq!(pkg.add_directory(&src, None, true).unwrap(), 2);
    pkg.add_bytes("extra.bin", &[1, 2, 3]).unwrap();
    assert!(matches!(pkg.read_file("top.txt"), Err(PackageError::Unsupported(_))));
    assert!(!out.exists());

    let summary = pkg.finalize().unwrap();
    assert_eq!(summary.entries, 3);
    assert!(out.exists());
    assert_eq!(pkg.read_file("nested/deep.txt").unwrap(), b"deep");
    assert!(matches!(pkg.add_bytes("late", b"x"), Err(PackageError::Unsupported(_))));

    let pkg = Package::open(&out).unwrap();
    let paths: Vec<_> = pkg.list().unwrap().iter().map(|e| e.path.clone()).collect();
    assert_eq!(paths, ["nested/deep.txt", "top.txt", "extra.bin"]);
    assert_eq!(pkg.stat("extra.bin").unwrap().length(), 3);

    let mut two = [0u8; 2];
    assert_eq!(pkg.read_at("top.txt", 1, &mut two).unwrap(), 2);
    assert_eq!(&two, b"op");

    let dest = dir.path().join("out");
    assert_eq!(pkg.extract_all(&dest).unwrap(), 3);
    assert_eq!(fs::read(dest.join("nested").join("deep.txt")).unwrap(), b"deep");
    assert_eq!(fs::read(dest.join("extra.bin")).unwrap(), [1u8, 2, 3]);
}

#[test]
fn test_failed_finalize_leaves_no_file() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("broken.pak");
    let mut pkg = Package::create(&out, WriterOptions::default()).unwrap();
    pkg.add_bytes("dup", b"1").unwrap();
    pkg.add_bytes("dup", b"2").unwrap();

    assert!(matches!(pkg.finalize(), Err(PackageError::DuplicatePath(_))));
    assert!(!out.exists());
    assert!(matches!(pkg.list(), Err(PackageError::Unsupported(_))));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[cfg(unix)]
#[test]
fn test_created_package_is_world_readable() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempdir().unwrap();
    let out = dir.path().join("shared.pak");
    let mut pkg = Package::create(&out, WriterOptions::default()).unwrap();
    pkg.add_bytes("a", b"a").unwrap();
    pkg.finalize().unwrap();
    assert_eq!(fs::metadata(&out).unwrap().permissions().mode() & 0o777, 0o644);

    // Replacing an existing package keeps its mode.
    fs::set_permissions(&out, fs::Permissions::from_mode(0o640)).unwrap();
    let mut pkg = Package::create(&out, WriterOptions::default()).unwrap();
    pkg.add_bytes("b", b"b").unwrap();
    pkg.finalize().unwrap();
    assert_eq!(fs::metadata(&out).unwrap().permissions().mode() & 0o777, 0o640);
}
