use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use codesearch::index::{IndexReader, IndexWriter};

/// Write `files` under `dir/src`, index them in sorted-name order (so file-ids
/// are stable), and open the sealed index. Returns the reader and the root.
pub fn build_index(dir: &Path, files: &[(&str, &[u8])]) -> Result<(IndexReader, PathBuf)> {
    let index_path = dir.join("csearchindex");
    build_index_at(dir, &index_path, files)
}

pub fn build_index_at(
    dir: &Path,
    index_path: &Path,
    files: &[(&str, &[u8])],
) -> Result<(IndexReader, PathBuf)> {
    let root = dir.join("src");
    fs::create_dir_all(&root)?;
    for (name, content) in files {
        let p = root.join(name);
        if let Some(parent) = p.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&p, content)?;
    }
    let mut w = IndexWriter::create(index_path)?;
    w.add_paths([root.to_string_lossy().into_owned()]);
    let mut names: Vec<&str> = files.iter().map(|(n, _)| *n).collect();
    names.sort();
    names.dedup();
    for n in names {
        w.add_file(0, &root.join(n))?;
    }
    w.flush()?;
    Ok((IndexReader::open(index_path)?, root))
}

/// The file-ids assigned by `build_index`, keyed by file name.
pub fn id_of(files: &[(&str, &[u8])], name: &str) -> u32 {
    let mut names: Vec<&str> = files.iter().map(|(n, _)| *n).collect();
    names.sort();
    names.dedup();
    names
        .iter()
        .position(|n| *n == name)
        .expect("unknown file name") as u32
}
