//! Grep driver: runs a compiled regexp over candidate files and formats
//! matching lines in the usual grep output modes.

use std::fs::File;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use memmap2::Mmap;
use regex::bytes::Regex;

/// Output-mode flags shared by the search front-ends.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct GrepFlags {
    /// Print only a count of matching lines per file
    #[arg(short = 'c', conflicts_with = "list")]
    pub count: bool,

    /// Print only the names of the files containing matches
    #[arg(short = 'l')]
    pub list: bool,

    /// With -l, separate file names with NUL instead of newline
    #[arg(short = '0')]
    pub null_sep: bool,

    /// Print each output line preceded by its 1-based line number
    #[arg(short = 'n')]
    pub line_numbers: bool,
}

#[derive(Debug, Default)]
struct GrepShared {
    matched: AtomicBool,
    done: AtomicBool,
    printed: AtomicI64,
}

/// A grep worker. Copies made with [`Grep::for_worker`] carry their own
/// compiled regexp but share the match/limit state, so a global print limit
/// trips every worker.
pub struct Grep<W> {
    regex: Regex,
    pub flags: GrepFlags,
    max_global: i64,
    max_per_file: i64,
    out: W,
    shared: Arc<GrepShared>,
}

impl<W: Write> Grep<W> {
    pub fn new(regex: Regex, flags: GrepFlags, out: W) -> Self {
        Self {
            regex,
            flags,
            max_global: 0,
            max_per_file: 0,
            out,
            shared: Arc::new(GrepShared::default()),
        }
    }

    /// Stop printing after `global` lines overall and `per_file` lines per
    /// file; 0 means unlimited.
    pub fn limit_print_count(&mut self, global: i64, per_file: i64) {
        self.max_global = global;
        self.max_per_file = per_file;
    }

    /// Whether any match has been printed by this driver or any worker copy.
    pub fn matched(&self) -> bool {
        self.shared.matched.load(Ordering::SeqCst)
    }

    /// Whether the global print limit has tripped.
    pub fn done(&self) -> bool {
        self.shared.done.load(Ordering::SeqCst)
    }

    /// Value copy for a parallel worker: fresh regexp clone and output handle,
    /// shared limit state.
    pub fn for_worker<W2: Write>(&self, out: W2) -> Grep<W2> {
        Grep {
            regex: self.regex.clone(),
            flags: self.flags.clone(),
            max_global: self.max_global,
            max_per_file: self.max_per_file,
            out,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Open, map, and match one file. Read errors are logged and swallowed;
    /// only output errors propagate.
    pub fn file(&mut self, name: &str) -> Result<()> {
        let mut f = match File::open(name) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!("{}: {}", name, e);
                return Ok(());
            }
        };
        match unsafe { Mmap::map(&f) } {
            Ok(m) => self.run(name, &m),
            Err(_) => {
                let mut buf = Vec::new();
                match f.read_to_end(&mut buf) {
                    Ok(_) => self.run(name, &buf),
                    Err(e) => {
                        tracing::warn!("{}: {}", name, e);
                        Ok(())
                    }
                }
            }
        }
    }

    /// Match a byte stream under the given display name.
    pub fn reader<R: Read>(&mut self, mut r: R, name: &str) -> Result<()> {
        let mut buf = Vec::new();
        r.read_to_end(&mut buf)
            .with_context(|| format!("read {}", name))?;
        self.run(name, &buf)
    }

    fn run(&mut self, name: &str, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let mut pos = 0usize;
        let mut lineno: u64 = 1;
        let mut counted_to = 0usize;
        let mut line_count: u64 = 0;
        let mut printed_here: i64 = 0;
        // A line is the byte range between two newlines; each matching line
        // is reported once, so the scan resumes at the end of the line.
        while pos < data.len() {
            if self.shared.done.load(Ordering::SeqCst) {
                break;
            }
            let m = match self.regex.find_at(data, pos) {
                Some(m) => m,
                None => break,
            };
            let line_start = data[..m.start()]
                .iter()
                .rposition(|&b| b == b'\n')
                .map_or(0, |i| i + 1);
            let line_end = data[m.end()..]
                .iter()
                .position(|&b| b == b'\n')
                .map_or(data.len(), |i| m.end() + i + 1);
            self.shared.matched.store(true, Ordering::SeqCst);
            line_count += 1;
            if self.flags.list {
                if self.reserve_print() {
                    let mut buf = Vec::with_capacity(name.len() + 1);
                    buf.extend_from_slice(name.as_bytes());
                    buf.push(if self.flags.null_sep { b'\0' } else { b'\n' });
                    self.out.write_all(&buf)?;
                }
                return Ok(());
            }
            if !self.flags.count {
                if !self.reserve_print() {
                    break;
                }
                let mut buf = Vec::with_capacity(name.len() + (line_end - line_start) + 16);
                buf.extend_from_slice(name.as_bytes());
                buf.push(b':');
                if self.flags.line_numbers {
                    lineno += data[counted_to..line_start]
                        .iter()
                        .filter(|&&b| b == b'\n')
                        .count() as u64;
                    counted_to = line_start;
                    buf.extend_from_slice(lineno.to_string().as_bytes());
                    buf.push(b':');
                }
                buf.extend_from_slice(&data[line_start..line_end]);
                if buf.last() != Some(&b'\n') {
                    buf.push(b'\n');
                }
                self.out.write_all(&buf)?;
                printed_here += 1;
                if self.max_per_file > 0 && printed_here >= self.max_per_file {
                    break;
                }
            }
            pos = line_end;
        }
        if self.flags.count && line_count > 0 && self.reserve_print() {
            writeln!(self.out, "{}:{}", name, line_count)?;
        }
        Ok(())
    }

    /// Claim one output line against the global limit. Trips `done` when the
    /// limit is reached and refuses prints past it.
    fn reserve_print(&self) -> bool {
        if self.max_global <= 0 {
            return true;
        }
        let v = self.shared.printed.fetch_add(1, Ordering::SeqCst) + 1;
        if v >= self.max_global {
            self.shared.done.store(true, Ordering::SeqCst);
        }
        v <= self.max_global
    }
}
