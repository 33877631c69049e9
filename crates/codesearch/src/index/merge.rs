use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use super::reader::IndexReader;
use super::writer::{copy_section, section_offset};
use super::writer_utils::write_post_list;
use super::{MAGIC, TRAILER_MAGIC};

/// Combine two sealed indices into a new sealed index at `dst`.
///
/// The merged file-id space is `[0, |src1|+|src2|)`: src1's ids are kept and
/// src2's are shifted by `|src1|`. The root-path list is the concatenation of
/// both lists (src2's stored root indices are shifted accordingly), and each
/// trigram's posting list is src1's followed by src2's shifted list, which
/// preserves the strictly-ascending invariant.
pub fn merge(dst: &Path, src1: &Path, src2: &Path) -> Result<()> {
    let ix1 = IndexReader::open(src1)?;
    let ix2 = IndexReader::open(src2)?;
    let id_shift = ix1.num_names();
    let root_shift = ix1.paths().len() as i32;

    let out = File::create(dst).with_context(|| format!("create index file {}", dst.display()))?;
    let mut out = BufWriter::new(out);
    out.write_all(MAGIC)?;
    let mut off = [0u32; 5];
    off[0] = section_offset(&mut out)?;
    for p in ix1.paths().iter().chain(ix2.paths()) {
        out.write_all(p.as_bytes())?;
        out.write_all(b"\n")?;
    }
    out.write_all(b"\n")?;

    off[1] = section_offset(&mut out)?;
    let mut name_offs: Vec<u32> = Vec::with_capacity((ix1.num_names() + ix2.num_names()) as usize);
    let mut name_off: u32 = 0;
    for (ix, shift) in [(&ix1, 0), (&ix2, root_shift)] {
        for i in 0..ix.num_names() {
            let (root, rel) = ix.name_parts(i)?;
            let root = if root < 0 { -1 } else { root + shift };
            name_offs.push(name_off);
            let entry = format!("{}\0{}\0", root, rel);
            out.write_all(entry.as_bytes())?;
            name_off = name_off
                .checked_add(entry.len() as u32)
                .context("name table too large")?;
        }
    }
    out.write_all(b"\0")?;

    off[2] = section_offset(&mut out)?;
    let mut post_index =
        BufWriter::new(tempfile::tempfile().context("create posting index buffer")?);
    let mut pos = off[2];
    let mut num_post: u32 = 0;
    let (mut i, mut j) = (0u32, 0u32);
    while i < ix1.num_trigrams() || j < ix2.num_trigrams() {
        let t1 = (i < ix1.num_trigrams()).then(|| ix1.post_entry(i).0);
        let t2 = (j < ix2.num_trigrams()).then(|| ix2.post_entry(j).0);
        let (tri, ids) = match (t1, t2) {
            (Some(a), Some(b)) if a == b => {
                let mut ids = ix1.posting_list(a)?;
                ids.extend(ix2.posting_list(b)?.iter().map(|id| id + id_shift));
                i += 1;
                j += 1;
                (a, ids)
            }
            (Some(a), Some(b)) if a < b => {
                i += 1;
                (a, ix1.posting_list(a)?)
            }
            (Some(a), None) => {
                i += 1;
                (a, ix1.posting_list(a)?)
            }
            (_, Some(b)) => {
                j += 1;
                let ids: Vec<u32> = ix2.posting_list(b)?.iter().map(|id| id + id_shift).collect();
                (b, ids)
            }
            (None, None) => break,
        };
        post_index.write_all(&tri.bytes())?;
        let len = write_post_list(&mut out, &ids)? as u32;
        post_index.write_all(&len.to_le_bytes())?;
        post_index.write_all(&pos.to_le_bytes())?;
        pos = pos
            .checked_add(len)
            .context("posting-list section too large")?;
        num_post += 1;
    }

    off[3] = section_offset(&mut out)?;
    for o in &name_offs {
        out.write_all(&o.to_le_bytes())?;
    }

    off[4] = section_offset(&mut out)?;
    copy_section(&mut out, post_index)?;
    section_offset(&mut out)?;

    for o in off {
        out.write_all(&o.to_le_bytes())?;
    }
    out.write_all(&num_post.to_le_bytes())?;
    out.write_all(TRAILER_MAGIC)?;
    out.flush()?;
    Ok(())
}
