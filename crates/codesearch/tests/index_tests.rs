use anyhow::Result;
use std::fs;

use codesearch::index::{IndexReader, IndexWriter};
use codesearch::query::Query;
use codesearch::trigram::Trigram;

mod common;
use common::{build_index, build_index_at, id_of};

fn tri(s: &[u8; 3]) -> Trigram {
    Trigram::from_bytes(s[0], s[1], s[2])
}

#[test]
fn write_read_roundtrip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let files: &[(&str, &[u8])] = &[
        ("a.txt", b"hello world\n"),
        ("b.txt", b"goodbye world\n"),
        ("sub/c.txt", b"hello again\n"),
    ];
    let (ix, root) = build_index(dir.path(), files)?;

    assert_eq!(ix.paths(), [root.to_string_lossy().into_owned()]);
    assert_eq!(ix.num_names(), 3);
    assert_eq!(ix.name(id_of(files, "a.txt"))?, root.join("a.txt").to_string_lossy());
    assert_eq!(
        ix.name(id_of(files, "sub/c.txt"))?,
        root.join("sub/c.txt").to_string_lossy()
    );

    // "hel" appears in a.txt and sub/c.txt, "wor" in a.txt and b.txt.
    let hel = ix.posting_list(tri(b"hel"))?;
    assert_eq!(
        hel,
        vec![id_of(files, "a.txt"), id_of(files, "sub/c.txt")]
    );
    let wor = ix.posting_list(tri(b"wor"))?;
    assert_eq!(wor, vec![id_of(files, "a.txt"), id_of(files, "b.txt")]);
    assert_eq!(ix.posting_list(tri(b"zzz"))?, Vec::<u32>::new());
    Ok(())
}

#[test]
fn posting_lists_are_strictly_ascending() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let files: Vec<(String, Vec<u8>)> = (0..50)
        .map(|i| (format!("f{:02}.txt", i), format!("shared text {}\n", i).into_bytes()))
        .collect();
    let files_ref: Vec<(&str, &[u8])> = files
        .iter()
        .map(|(n, c)| (n.as_str(), c.as_slice()))
        .collect();
    let (ix, _root) = build_index(dir.path(), &files_ref)?;

    // every file shares "shared text", so those trigrams cover all 50 ids
    for t in [tri(b"sha"), tri(b"tex"), tri(b"ed "), tri(b"d t")] {
        let list = ix.posting_list(t)?;
        assert_eq!(list, (0..50).collect::<Vec<u32>>());
        assert!(list.windows(2).all(|w| w[0] < w[1]));
    }
    // per-file digits appear in single files only
    let list = ix.posting_list(tri(b" 42"))?;
    assert_eq!(list, vec![42]);
    Ok(())
}

#[test]
fn empty_file_gets_no_id_but_tiny_files_do() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().join("src");
    fs::create_dir_all(&root)?;
    fs::write(root.join("empty.txt"), b"")?;
    fs::write(root.join("one.txt"), b"x")?;
    fs::write(root.join("two.txt"), b"xy")?;
    fs::write(root.join("real.txt"), b"hello\n")?;

    let index_path = dir.path().join("csearchindex");
    let mut w = IndexWriter::create(&index_path)?;
    w.add_paths([root.to_string_lossy().into_owned()]);
    assert!(!w.add_file(0, &root.join("empty.txt"))?);
    assert!(w.add_file(0, &root.join("one.txt"))?);
    assert!(w.add_file(0, &root.join("two.txt"))?);
    assert!(w.add_file(0, &root.join("real.txt"))?);
    w.flush()?;

    let ix = IndexReader::open(&index_path)?;
    assert_eq!(ix.num_names(), 3);
    // 1- and 2-byte files contribute no trigrams, so only ALL reaches them.
    let all = ix.posting_query(&Query::All)?;
    assert_eq!(all, vec![0, 1, 2]);
    let hel = ix.posting_query(&Query::Trigrams([tri(b"hel")].into()))?;
    assert_eq!(hel, vec![2]);
    Ok(())
}

#[test]
fn skips_files_over_size_and_line_limits() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().join("src");
    fs::create_dir_all(&root)?;
    fs::write(root.join("big.txt"), vec![b'a'; 64])?;
    let mut long_line = vec![b'x'; 3000];
    long_line.push(b'\n');
    fs::write(root.join("longline.txt"), &long_line)?;
    fs::write(root.join("ok.txt"), b"short line\n")?;

    let index_path = dir.path().join("csearchindex");
    let mut w = IndexWriter::create(&index_path)?;
    w.add_paths([root.to_string_lossy().into_owned()]);
    w.max_file_len = 32;
    w.max_line_len = 2000;
    assert!(!w.add_file(0, &root.join("big.txt"))?, "over max_file_len");
    w.max_file_len = 1 << 20;
    assert!(
        !w.add_file(0, &root.join("longline.txt"))?,
        "over max_line_len"
    );
    assert!(w.add_file(0, &root.join("ok.txt"))?);
    w.flush()?;

    let ix = IndexReader::open(&index_path)?;
    assert_eq!(ix.num_names(), 1);
    assert_eq!(ix.name(0)?, root.join("ok.txt").to_string_lossy());
    Ok(())
}

#[test]
fn trigram_budget_boundary() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().join("src");
    fs::create_dir_all(&root)?;
    // "abcdefghijkl" has exactly 10 distinct trigrams; one more byte makes 11.
    fs::write(root.join("at.txt"), b"abcdefghijkl")?;
    fs::write(root.join("over.txt"), b"abcdefghijklm")?;

    let index_path = dir.path().join("csearchindex");
    let mut w = IndexWriter::create(&index_path)?;
    w.add_paths([root.to_string_lossy().into_owned()]);
    w.max_text_trigrams = 10;
    assert!(w.add_file(0, &root.join("at.txt"))?);
    assert!(!w.add_file(0, &root.join("over.txt"))?);
    w.flush()?;
    Ok(())
}

#[test]
fn skips_binary_files_by_invalid_utf8_ratio() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().join("src");
    fs::create_dir_all(&root)?;
    fs::write(root.join("binary.bin"), b"\x00\x00\x00\x00binarydata")?;
    let mut mostly_text = b"mostly text but one nul \x00 in a big file\n".to_vec();
    mostly_text.extend_from_slice(&[b'a'; 400]);
    mostly_text.push(b'\n');
    fs::write(root.join("almost.txt"), &mostly_text)?;

    let index_path = dir.path().join("csearchindex");
    let mut w = IndexWriter::create(&index_path)?;
    w.add_paths([root.to_string_lossy().into_owned()]);
    assert!(!w.add_file(0, &root.join("binary.bin"))?);
    // one NUL in ~440 bytes is under the 10% default ratio
    assert!(w.add_file(0, &root.join("almost.txt"))?);
    w.flush()?;
    Ok(())
}

#[test]
fn reader_rejects_corrupt_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let files: &[(&str, &[u8])] = &[("a.txt", b"hello world\n")];
    let (_, _) = build_index(dir.path(), files)?;
    let index_path = dir.path().join("csearchindex");

    // bad magic prefix
    let mut bytes = fs::read(&index_path)?;
    bytes[0] ^= 0xFF;
    let bad = dir.path().join("bad-magic");
    fs::write(&bad, &bytes)?;
    assert!(IndexReader::open(&bad).is_err());

    // truncated trailer
    let bytes = fs::read(&index_path)?;
    let cut = dir.path().join("truncated");
    fs::write(&cut, &bytes[..bytes.len() - 7])?;
    assert!(IndexReader::open(&cut).is_err());

    // not an index at all
    let junk = dir.path().join("junk");
    fs::write(&junk, b"not an index")?;
    assert!(IndexReader::open(&junk).is_err());
    Ok(())
}

#[test]
fn reindexing_is_byte_identical() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let files: &[(&str, &[u8])] = &[
        ("a.txt", b"alpha beta\n"),
        ("b.txt", b"beta gamma\n"),
        ("c.txt", b"gamma alpha\n"),
    ];
    let first = dir.path().join("index1");
    let second = dir.path().join("index2");
    build_index_at(dir.path(), &first, files)?;
    build_index_at(dir.path(), &second, files)?;
    assert_eq!(fs::read(&first)?, fs::read(&second)?);
    Ok(())
}

#[test]
fn empty_index_is_valid() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let index_path = dir.path().join("csearchindex");
    let w = IndexWriter::create(&index_path)?;
    w.flush()?;
    let ix = IndexReader::open(&index_path)?;
    assert_eq!(ix.num_names(), 0);
    assert_eq!(ix.num_trigrams(), 0);
    assert_eq!(ix.posting_query(&Query::All)?, Vec::<u32>::new());
    assert!(ix.paths().is_empty());
    Ok(())
}

#[test]
fn full_path_entries_for_unrooted_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let elsewhere = dir.path().join("elsewhere.txt");
    fs::write(&elsewhere, b"outside any root\n")?;
    let index_path = dir.path().join("csearchindex");
    let mut w = IndexWriter::create(&index_path)?;
    w.add_paths([dir.path().join("src").to_string_lossy().into_owned()]);
    assert!(w.add_file(-1, &elsewhere)?);
    w.flush()?;
    let ix = IndexReader::open(&index_path)?;
    assert_eq!(ix.name(0)?, elsewhere.to_string_lossy());
    Ok(())
}

#[test]
fn dump_renders_summary() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let files: &[(&str, &[u8])] = &[("a.txt", b"hello\n")];
    let (ix, _root) = build_index(dir.path(), files)?;
    let mut out = Vec::new();
    ix.dump(
        &codesearch::index::DumpOptions {
            names: true,
            postings: false,
        },
        &mut out,
    )?;
    let text = String::from_utf8(out)?;
    assert!(text.contains("names: 1"));
    assert!(text.contains("a.txt"));
    assert!(text.contains("trigrams:"));
    Ok(())
}
