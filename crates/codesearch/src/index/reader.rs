use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::{bail, Context, Result};
use memmap2::Mmap;

use crate::query::Query;
use crate::trigram::Trigram;

use super::writer_utils::{decode_post_list, PostListIter};
use super::{
    intersect_sorted, union_sorted, MAGIC, POST_ENTRY_LEN, TRAILER_LEN, TRAILER_MAGIC,
};

/// Memory-mapped access to a sealed index file.
///
/// The reader is immutable after `open`; concurrent reads from multiple
/// threads are fine. The mapping is released on drop.
pub struct IndexReader {
    mmap: Mmap,
    name_data: u32,
    post_data: u32,
    name_index: u32,
    post_index: u32,
    num_name: u32,
    num_post: u32,
    paths: Vec<String>,
    pub verbose: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DumpOptions {
    /// Also list every indexed file name.
    pub names: bool,
    /// Also list every trigram with its posting-list length.
    pub postings: bool,
}

impl IndexReader {
    /// Validate the magic prefix and trailer and map the file read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file =
            File::open(path).with_context(|| format!("open index {}", path.display()))?;
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("mmap index {}", path.display()))?;
        let n = mmap.len();
        if n < MAGIC.len() + TRAILER_LEN {
            bail!("{}: index truncated (len={})", path.display(), n);
        }
        if &mmap[..MAGIC.len()] != MAGIC {
            bail!("{}: not a csearch index (bad magic)", path.display());
        }
        if &mmap[n - TRAILER_MAGIC.len()..] != TRAILER_MAGIC {
            bail!("{}: corrupt index (bad trailer magic)", path.display());
        }
        let trailer = n - TRAILER_LEN;
        if trailer > u32::MAX as usize {
            bail!("{}: index too large for 32-bit offsets", path.display());
        }
        let path_data = u32_at(&mmap, trailer);
        let name_data = u32_at(&mmap, trailer + 4);
        let post_data = u32_at(&mmap, trailer + 8);
        let name_index = u32_at(&mmap, trailer + 12);
        let post_index = u32_at(&mmap, trailer + 16);
        let num_post = u32_at(&mmap, trailer + 20);

        let sections = [
            MAGIC.len() as u32,
            path_data,
            name_data,
            post_data,
            name_index,
            post_index,
        ];
        if sections.windows(2).any(|w| w[0] > w[1]) || post_index as usize > trailer {
            bail!("{}: corrupt index (section offsets out of order)", path.display());
        }
        if (post_index - name_index) % 4 != 0 {
            bail!("{}: corrupt index (ragged name-offset table)", path.display());
        }
        let num_name = (post_index - name_index) / 4;
        if post_index as usize + num_post as usize * POST_ENTRY_LEN != trailer {
            bail!("{}: corrupt index (posting-offset table truncated)", path.display());
        }

        let paths = parse_paths(&mmap, path_data as usize, name_data as usize)
            .with_context(|| format!("{}: corrupt path list", path.display()))?;

        Ok(Self {
            mmap,
            name_data,
            post_data,
            name_index,
            post_index,
            num_name,
            num_post,
            paths,
            verbose: false,
        })
    }

    /// Root paths recorded at build time, in the order supplied.
    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn num_names(&self) -> u32 {
        self.num_name
    }

    /// Number of distinct trigrams in the index.
    pub fn num_trigrams(&self) -> u32 {
        self.num_post
    }

    /// Reconstruct the full path of a file-id: `root + "/" + suffix`, or the
    /// stored name verbatim for rootIndex -1 entries.
    pub fn name(&self, fileid: u32) -> Result<String> {
        let (root, rel) = self.name_parts(fileid)?;
        if root < 0 {
            return Ok(rel.to_string());
        }
        let root = self
            .paths
            .get(root as usize)
            .with_context(|| format!("file {}: root index {} out of range", fileid, root))?;
        Ok(format!("{}/{}", root, rel))
    }

    /// Raw name-table entry: `(rootIndex, stored name)`.
    pub(crate) fn name_parts(&self, fileid: u32) -> Result<(i32, &str)> {
        if fileid >= self.num_name {
            bail!("file id {} out of range (have {})", fileid, self.num_name);
        }
        let ioff = self.name_index as usize + fileid as usize * 4;
        let off = self.name_data as usize + u32_at(&self.mmap, ioff) as usize;
        let end = self.post_data as usize;
        if off >= end {
            bail!("file {}: name offset out of range", fileid);
        }
        let entry = &self.mmap[off..end];
        let (root, rest) = split_nul(entry)
            .with_context(|| format!("file {}: unterminated root index", fileid))?;
        let root: i32 = std::str::from_utf8(root)
            .ok()
            .and_then(|s| s.parse().ok())
            .with_context(|| format!("file {}: malformed root index", fileid))?;
        let (rel, _) = split_nul(rest)
            .with_context(|| format!("file {}: unterminated name", fileid))?;
        let rel = std::str::from_utf8(rel)
            .with_context(|| format!("file {}: name is not valid UTF-8", fileid))?;
        Ok((root, rel))
    }

    /// Posting-offset record `i`: `(trigram, byte length, file offset)`.
    pub(crate) fn post_entry(&self, i: u32) -> (Trigram, u32, u32) {
        let base = self.post_index as usize + i as usize * POST_ENTRY_LEN;
        let t = Trigram::from_bytes(self.mmap[base], self.mmap[base + 1], self.mmap[base + 2]);
        (t, u32_at(&self.mmap, base + 3), u32_at(&self.mmap, base + 7))
    }

    fn find_post_entry(&self, t: Trigram) -> Option<(u32, u32)> {
        let mut lo = 0u32;
        let mut hi = self.num_post;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (tm, len, off) = self.post_entry(mid);
            if tm == t {
                return Some((len, off));
            } else if tm < t {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        None
    }

    /// The encoded bytes of a trigram's posting list, or `None` if the
    /// trigram does not appear in the index.
    fn post_list_bytes(&self, t: Trigram) -> Result<Option<&[u8]>> {
        let Some((len, off)) = self.find_post_entry(t) else {
            return Ok(None);
        };
        let start = off as usize;
        let end = start + len as usize;
        if start < self.post_data as usize || end > self.name_index as usize {
            bail!("posting list for {} out of bounds", t);
        }
        Ok(Some(&self.mmap[start..end]))
    }

    /// Decode the posting list for `t`; empty if the trigram is absent.
    pub fn posting_list(&self, t: Trigram) -> Result<Vec<u32>> {
        match self.post_list_bytes(t)? {
            Some(b) => decode_post_list(b),
            None => Ok(Vec::new()),
        }
    }

    /// Intersect `list` (sorted ascending) with `t`'s posting list, decoding
    /// the postings as they stream by.
    pub fn posting_and(&self, list: &[u32], t: Trigram) -> Result<Vec<u32>> {
        let Some(b) = self.post_list_bytes(t)? else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        let mut i = 0;
        for id in PostListIter::new(b) {
            let id = id?;
            while i < list.len() && list[i] < id {
                i += 1;
            }
            if i == list.len() {
                break;
            }
            if list[i] == id {
                out.push(id);
                i += 1;
            }
        }
        Ok(out)
    }

    /// Union `list` (sorted ascending) with `t`'s posting list.
    pub fn posting_or(&self, list: &[u32], t: Trigram) -> Result<Vec<u32>> {
        let Some(b) = self.post_list_bytes(t)? else {
            return Ok(list.to_vec());
        };
        let mut out = Vec::with_capacity(list.len());
        let mut i = 0;
        for id in PostListIter::new(b) {
            let id = id?;
            while i < list.len() && list[i] < id {
                out.push(list[i]);
                i += 1;
            }
            if i < list.len() && list[i] == id {
                i += 1;
            }
            out.push(id);
        }
        out.extend_from_slice(&list[i..]);
        Ok(out)
    }

    /// Evaluate a query tree to the sorted list of candidate file-ids.
    pub fn posting_query(&self, q: &Query) -> Result<Vec<u32>> {
        match q {
            Query::All => Ok((0..self.num_name).collect()),
            Query::None => Ok(Vec::new()),
            Query::Trigrams(ts) => {
                let mut it = ts.iter();
                let Some(first) = it.next() else {
                    return Ok((0..self.num_name).collect());
                };
                let mut list = self.posting_list(*first)?;
                for t in it {
                    if list.is_empty() {
                        break;
                    }
                    list = self.posting_and(&list, *t)?;
                }
                Ok(list)
            }
            Query::And(subs) => {
                // Evaluate the cheapest children first so the accumulator
                // shrinks as early as possible.
                let mut order: Vec<&Query> = subs.iter().collect();
                order.sort_by_key(|q| self.estimate(q));
                let mut list: Option<Vec<u32>> = None;
                for sub in order {
                    let l = self.posting_query(sub)?;
                    list = Some(match list {
                        None => l,
                        Some(prev) => intersect_sorted(&prev, &l),
                    });
                    if list.as_ref().map_or(false, Vec::is_empty) {
                        break;
                    }
                }
                Ok(list.unwrap_or_else(|| (0..self.num_name).collect()))
            }
            Query::Or(subs) => {
                let mut list = Vec::new();
                for sub in subs {
                    let l = self.posting_query(sub)?;
                    list = union_sorted(&list, &l);
                }
                Ok(list)
            }
        }
    }

    /// Rough upper bound on a query's result size, used to order AND
    /// evaluation. Posting byte lengths stand in for list lengths.
    fn estimate(&self, q: &Query) -> u64 {
        match q {
            Query::All => self.num_name as u64,
            Query::None => 0,
            Query::Trigrams(ts) => ts
                .iter()
                .map(|t| self.find_post_entry(*t).map_or(0, |(len, _)| len as u64))
                .min()
                .unwrap_or(self.num_name as u64),
            Query::And(subs) => subs.iter().map(|s| self.estimate(s)).min().unwrap_or(0),
            Query::Or(subs) => subs.iter().map(|s| self.estimate(s)).sum(),
        }
    }

    /// Human-readable rendering of the index. Purely observational.
    pub fn dump<W: Write>(&self, opts: &DumpOptions, out: &mut W) -> Result<()> {
        writeln!(out, "paths:")?;
        for p in &self.paths {
            writeln!(out, "\t{}", p)?;
        }
        writeln!(out, "names: {}", self.num_name)?;
        if opts.names {
            for i in 0..self.num_name {
                writeln!(out, "\t{}\t{}", i, self.name(i)?)?;
            }
        }
        writeln!(out, "trigrams: {}", self.num_post)?;
        let mut buckets = [0u64; 33];
        for i in 0..self.num_post {
            let (t, _, _) = self.post_entry(i);
            let n = self.posting_list(t)?.len() as u64;
            if opts.postings {
                writeln!(out, "\t{}\t{}", t, n)?;
            }
            buckets[64 - n.leading_zeros() as usize] += 1;
        }
        writeln!(out, "posting-list length histogram:")?;
        for (i, &count) in buckets.iter().enumerate() {
            if count > 0 {
                writeln!(out, "\t<{}:\t{}", 1u64 << i, count)?;
            }
        }
        Ok(())
    }
}

fn u32_at(data: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&data[off..off + 4]);
    u32::from_le_bytes(b)
}

fn split_nul(data: &[u8]) -> Option<(&[u8], &[u8])> {
    let i = data.iter().position(|&b| b == 0)?;
    Some((&data[..i], &data[i + 1..]))
}

fn parse_paths(mmap: &[u8], start: usize, end: usize) -> Result<Vec<String>> {
    let mut paths = Vec::new();
    let mut off = start;
    loop {
        if off >= end {
            bail!("path list missing terminator");
        }
        let rest = &mmap[off..end];
        let nl = rest
            .iter()
            .position(|&b| b == b'\n')
            .context("unterminated path entry")?;
        if nl == 0 {
            return Ok(paths);
        }
        let p = std::str::from_utf8(&rest[..nl]).context("path is not valid UTF-8")?;
        paths.push(p.to_string());
        off += nl + 1;
    }
}
