use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use fnv::FnvHashSet;

use super::writer_utils::{radix_sort_u64, write_post_list};
use super::{
    DEFAULT_MAX_FILE_LEN, DEFAULT_MAX_INVALID_UTF8_RATIO, DEFAULT_MAX_LINE_LEN,
    DEFAULT_MAX_TEXT_TRIGRAMS, MAGIC, TRAILER_MAGIC,
};

/// Cap on buffered `trigram<<32|fileid` entries before spilling a sorted run
/// to a temporary file (64 MiB of packed postings).
const NPOST: usize = (64 << 20) / 8;

const INBUF_LEN: usize = 1 << 16;

/// Incremental builder for a sealed index file.
///
/// Files are fed one at a time through [`IndexWriter::add_file`]; postings are
/// buffered in memory, spilled to sorted runs when the buffer fills, and
/// k-way merged into the final posting-list section on [`IndexWriter::flush`].
/// The writer is a single-threaded mutator.
pub struct IndexWriter {
    path: PathBuf,
    paths: Vec<String>,

    name_data: BufWriter<File>,
    name_index: BufWriter<File>,
    name_off: u32,
    num_name: u32,

    trigram: FnvHashSet<u32>,
    post: Vec<u64>,
    post_files: Vec<File>,

    inbuf: Vec<u8>,

    pub max_file_len: u64,
    pub max_line_len: usize,
    pub max_text_trigrams: usize,
    pub max_invalid_utf8_ratio: f64,
    pub verbose: bool,
    pub log_skip: bool,
}

impl IndexWriter {
    /// Start a new index that will be sealed at `path` by `flush`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            paths: Vec::new(),
            name_data: BufWriter::new(tempfile::tempfile().context("create name buffer")?),
            name_index: BufWriter::new(tempfile::tempfile().context("create name index buffer")?),
            name_off: 0,
            num_name: 0,
            trigram: FnvHashSet::default(),
            post: Vec::new(),
            post_files: Vec::new(),
            inbuf: vec![0u8; INBUF_LEN],
            max_file_len: DEFAULT_MAX_FILE_LEN,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            max_text_trigrams: DEFAULT_MAX_TEXT_TRIGRAMS,
            max_invalid_utf8_ratio: DEFAULT_MAX_INVALID_UTF8_RATIO,
            verbose: false,
            log_skip: false,
        })
    }

    /// Record the ordered list of root directories. File names added later are
    /// stored relative to one of these roots.
    pub fn add_paths<I, S>(&mut self, roots: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths.extend(roots.into_iter().map(Into::into));
    }

    /// Read `path`, decide whether it is indexable text, and if so assign it
    /// the next file-id and contribute its trigrams. Returns `Ok(true)` iff
    /// the file was indexed. Read errors on the candidate file are logged and
    /// reported as `Ok(false)`; errors on the index's own buffers are fatal.
    ///
    /// `root_index` selects the root the stored name is relative to; pass -1
    /// to store the full path.
    pub fn add_file(&mut self, root_index: i32, path: &Path) -> Result<bool> {
        let mut f = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("{}: skipped. {}", path.display(), e);
                return Ok(false);
            }
        };
        let size = match f.metadata() {
            Ok(m) => m.len(),
            Err(e) => {
                tracing::warn!("{}: skipped. {}", path.display(), e);
                return Ok(false);
            }
        };
        if size > self.max_file_len {
            self.log_skip(path, &format!("file too long ({} bytes)", size));
            return Ok(false);
        }
        match self.scan(&mut f) {
            Err(e) => {
                tracing::warn!("{}: skipped. {}", path.display(), e);
                Ok(false)
            }
            Ok(Some(reason)) => {
                self.log_skip(path, &reason);
                Ok(false)
            }
            Ok(None) => {
                let id = self.num_name;
                self.add_name(root_index, path)?;
                if self.post.len() + self.trigram.len() > NPOST {
                    self.flush_post()?;
                }
                for &t in &self.trigram {
                    self.post.push(((t as u64) << 32) | id as u64);
                }
                if self.verbose {
                    tracing::debug!(
                        "{}: added as file {} ({} trigrams)",
                        path.display(),
                        id,
                        self.trigram.len()
                    );
                }
                self.num_name += 1;
                Ok(true)
            }
        }
    }

    pub fn num_names(&self) -> u32 {
        self.num_name
    }

    /// Stream the file, collecting its distinct trigrams into `self.trigram`
    /// and applying the indexability policy. Returns `Ok(Some(reason))` when
    /// the file should be skipped.
    fn scan(&mut self, f: &mut File) -> Result<Option<String>> {
        self.trigram.clear();
        let mut tv: u32 = 0;
        let mut n: u64 = 0;
        let mut line_len: usize = 0;
        let mut invalid: u64 = 0;
        loop {
            let len = f.read(&mut self.inbuf)?;
            if len == 0 {
                break;
            }
            for &c in &self.inbuf[..len] {
                tv = ((tv << 8) | c as u32) & 0x00FF_FFFF;
                n += 1;
                if n >= 3 {
                    self.trigram.insert(tv);
                }
                if !valid_utf8_pair(((tv >> 8) & 0xFF) as u8, c) || c == 0x00 {
                    invalid += 1;
                }
                if c == b'\n' {
                    line_len = 0;
                } else {
                    line_len += 1;
                    if line_len > self.max_line_len {
                        return Ok(Some(format!("line longer than {} bytes", self.max_line_len)));
                    }
                }
            }
            if n > self.max_file_len {
                return Ok(Some(format!("file longer than {} bytes", self.max_file_len)));
            }
        }
        if n == 0 {
            return Ok(Some("empty file".to_string()));
        }
        if invalid as f64 / n as f64 > self.max_invalid_utf8_ratio {
            return Ok(Some(format!(
                "more than {:.0}% invalid UTF-8",
                self.max_invalid_utf8_ratio * 100.0
            )));
        }
        if self.trigram.len() > self.max_text_trigrams {
            return Ok(Some(format!("too many trigrams ({})", self.trigram.len())));
        }
        Ok(None)
    }

    fn log_skip(&self, path: &Path, reason: &str) {
        if self.log_skip {
            tracing::info!("{}: skipped. {}", path.display(), reason);
        }
    }

    /// Append one name-table entry: `"<rootIndex>\0<name>\0"` with the root
    /// index in decimal text, and record its offset in the name-offset table.
    fn add_name(&mut self, root_index: i32, path: &Path) -> Result<()> {
        let (root, rel) = match self.relative_name(root_index, path) {
            Some(rel) => (root_index, rel),
            None => (-1, path.to_string_lossy().into_owned()),
        };
        self.name_index.write_all(&self.name_off.to_le_bytes())?;
        let entry = format!("{}\0{}\0", root, rel);
        self.name_data.write_all(entry.as_bytes())?;
        self.name_off = self
            .name_off
            .checked_add(entry.len() as u32)
            .context("name table too large")?;
        Ok(())
    }

    fn relative_name(&self, root_index: i32, path: &Path) -> Option<String> {
        if root_index < 0 {
            return None;
        }
        let root = self.paths.get(root_index as usize)?;
        let rel = path.strip_prefix(root).ok()?;
        if rel.as_os_str().is_empty() {
            return None;
        }
        Some(rel.to_string_lossy().into_owned())
    }

    /// Sort the in-memory postings and write them to a temporary run file.
    fn flush_post(&mut self) -> Result<()> {
        radix_sort_u64(&mut self.post);
        if self.verbose {
            tracing::debug!("flushing {} postings to a temporary run", self.post.len());
        }
        let mut f = tempfile::tempfile().context("create posting run file")?;
        {
            let mut w = BufWriter::new(&mut f);
            for &e in &self.post {
                w.write_all(&e.to_le_bytes())?;
            }
            w.flush()?;
        }
        self.post_files.push(f);
        self.post.clear();
        Ok(())
    }

    /// Finalize and seal the index file, in section order: magic prefix, path
    /// list, name table, posting lists, name-offset table, posting-offset
    /// table, trailer.
    pub fn flush(mut self) -> Result<()> {
        radix_sort_u64(&mut self.post);

        let out = File::create(&self.path)
            .with_context(|| format!("create index file {}", self.path.display()))?;
        let mut out = BufWriter::new(out);
        out.write_all(MAGIC)?;
        let mut off = [0u32; 5];
        off[0] = section_offset(&mut out)?;
        for p in &self.paths {
            out.write_all(p.as_bytes())?;
            out.write_all(b"\n")?;
        }
        out.write_all(b"\n")?;

        off[1] = section_offset(&mut out)?;
        copy_section(&mut out, self.name_data)?;
        out.write_all(b"\0")?;

        off[2] = section_offset(&mut out)?;
        let sources = post_sources(std::mem::take(&mut self.post), &mut self.post_files)?;
        let mut post_index = BufWriter::new(tempfile::tempfile().context("create posting index buffer")?);
        let num_post = merge_post(sources, off[2], &mut out, &mut post_index)?;

        off[3] = section_offset(&mut out)?;
        copy_section(&mut out, self.name_index)?;

        off[4] = section_offset(&mut out)?;
        copy_section(&mut out, post_index)?;
        section_offset(&mut out)?; // bounds check before the trailer

        for o in off {
            out.write_all(&o.to_le_bytes())?;
        }
        out.write_all(&num_post.to_le_bytes())?;
        out.write_all(TRAILER_MAGIC)?;
        out.flush()?;
        Ok(())
    }
}

/// Byte pair validity check for streaming UTF-8 detection: is `c1` allowed to
/// be immediately followed by `c2`?
fn valid_utf8_pair(c1: u8, c2: u8) -> bool {
    if c1 < 0x80 {
        // 1-byte, must be followed by 1-byte or first of multi-byte
        c2 < 0x80 || (0xC0..0xF8).contains(&c2)
    } else if c1 < 0xC0 {
        // continuation byte, can be followed by nearly anything
        c2 < 0xF8
    } else if c1 < 0xF8 {
        // first of multi-byte, must be followed by continuation byte
        (0x80..0xC0).contains(&c2)
    } else {
        false
    }
}

/// Current output offset, checked against the u32 offsets the trailer stores.
pub(crate) fn section_offset<W: Write + Seek>(out: &mut BufWriter<W>) -> Result<u32> {
    let pos = out.stream_position()?;
    if pos > u32::MAX as u64 {
        bail!("index too large (section offset {} exceeds 4 GiB)", pos);
    }
    Ok(pos as u32)
}

pub(crate) fn copy_section<W: Write>(out: &mut W, src: BufWriter<File>) -> Result<()> {
    let mut f = src
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flush section buffer: {}", e))?;
    f.seek(SeekFrom::Start(0))?;
    io::copy(&mut f, out)?;
    Ok(())
}

enum PostSource {
    Mem(std::vec::IntoIter<u64>),
    Run(BufReader<File>),
}

impl PostSource {
    fn next_entry(&mut self) -> Result<Option<u64>> {
        match self {
            PostSource::Mem(it) => Ok(it.next()),
            PostSource::Run(r) => {
                let mut b = [0u8; 8];
                match r.read_exact(&mut b) {
                    Ok(()) => Ok(Some(u64::from_le_bytes(b))),
                    Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }
}

fn post_sources(mem: Vec<u64>, runs: &mut Vec<File>) -> Result<Vec<PostSource>> {
    let mut sources = vec![PostSource::Mem(mem.into_iter())];
    for mut f in runs.drain(..) {
        f.seek(SeekFrom::Start(0))?;
        sources.push(PostSource::Run(BufReader::new(f)));
    }
    Ok(sources)
}

/// K-way merge the sorted posting sources and emit one encoded posting list
/// per distinct trigram, together with its posting-offset record. Returns the
/// number of distinct trigrams.
fn merge_post<W: Write, V: Write>(
    mut sources: Vec<PostSource>,
    base: u32,
    out: &mut W,
    post_index: &mut V,
) -> Result<u32> {
    let mut heap: BinaryHeap<Reverse<(u64, usize)>> = BinaryHeap::new();
    for (i, src) in sources.iter_mut().enumerate() {
        if let Some(e) = src.next_entry()? {
            heap.push(Reverse((e, i)));
        }
    }

    let mut pos = base;
    let mut num_post: u32 = 0;
    let mut cur: Option<u32> = None;
    let mut ids: Vec<u32> = Vec::new();
    let mut emit = |tri: u32, ids: &[u32], pos: &mut u32, num_post: &mut u32| -> Result<()> {
        let t = crate::trigram::Trigram(tri);
        post_index.write_all(&t.bytes())?;
        let len = write_post_list(out, ids)? as u32;
        post_index.write_all(&len.to_le_bytes())?;
        post_index.write_all(&pos.to_le_bytes())?;
        *pos = pos
            .checked_add(len)
            .context("posting-list section too large")?;
        *num_post += 1;
        Ok(())
    };

    while let Some(Reverse((e, i))) = heap.pop() {
        let tri = (e >> 32) as u32;
        let id = e as u32;
        if cur != Some(tri) {
            if let Some(t) = cur {
                emit(t, &ids, &mut pos, &mut num_post)?;
            }
            cur = Some(tri);
            ids.clear();
        }
        if ids.last() != Some(&id) {
            ids.push(id);
        }
        if let Some(next) = sources[i].next_entry()? {
            heap.push(Reverse((next, i)));
        }
    }
    if let Some(t) = cur {
        emit(t, &ids, &mut pos, &mut num_post)?;
    }
    Ok(num_post)
}
