// Copyright 2025 the codesearch-rs authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::Sender;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing_subscriber::EnvFilter;

use codesearch::index::{
    index_file, merge, IndexReader, IndexWriter, DEFAULT_MAX_FILE_LEN,
    DEFAULT_MAX_INVALID_UTF8_RATIO, DEFAULT_MAX_LINE_LEN, DEFAULT_MAX_TEXT_TRIGRAMS,
};

#[derive(Parser, Debug)]
#[command(
    name = "cindex",
    about = "Build the trigram index used by csearch",
    long_about = "cindex prepares the trigram index for use by csearch. The index is the \
file named by $CSEARCHINDEX, or else $HOME/.csearchindex. Adding paths merges \
them into the existing index; with no paths, cindex re-indexes the paths that \
have already been added."
)]
struct Args {
    /// Directories or files to add to the index
    paths: Vec<PathBuf>,

    /// List indexed paths and exit
    #[arg(long)]
    list: bool,

    /// Discard the existing index
    #[arg(long)]
    reset: bool,

    /// Print extra information
    #[arg(long)]
    verbose: bool,

    /// Print why a file was skipped from indexing
    #[arg(long)]
    logskip: bool,

    /// Use FILE as the index path (overrides $CSEARCHINDEX)
    #[arg(long, value_name = "FILE")]
    indexpath: Option<PathBuf>,

    /// Do not follow symlinked files and directories
    #[arg(long = "no-follow-symlinks")]
    no_follow_symlinks: bool,

    /// Skip indexing a file longer than this size in bytes
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_FILE_LEN)]
    maxfilelen: u64,

    /// Skip indexing a file with a line longer than this size in bytes
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_MAX_LINE_LEN)]
    maxlinelen: usize,

    /// Skip indexing a file with more than this many distinct trigrams
    #[arg(long, value_name = "COUNT", default_value_t = DEFAULT_MAX_TEXT_TRIGRAMS)]
    maxtrigrams: usize,

    /// Skip indexing a file with more than this ratio of invalid UTF-8
    #[arg(long, value_name = "RATIO", default_value_t = DEFAULT_MAX_INVALID_UTF8_RATIO)]
    maxinvalidutf8ratio: f64,

    /// File containing a list of file patterns to exclude from indexing
    #[arg(long, value_name = "FILE")]
    exclude: Option<String>,

    /// File containing a list of file paths to index
    #[arg(long, value_name = "FILE")]
    filelist: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    let master = args.indexpath.clone().unwrap_or_else(index_file);

    if args.list {
        let ix = IndexReader::open(&master)?;
        for p in ix.paths() {
            println!("{}", p);
        }
        return Ok(());
    }

    if args.reset && args.paths.is_empty() && args.filelist.is_none() {
        match fs::remove_file(&master) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("remove {}", master.display())),
        }
        return Ok(());
    }

    let excludes = load_excludes(args.exclude.as_deref(), args.logskip)?;

    let mut roots: Vec<PathBuf> = args.paths.clone();
    if let Some(list) = &args.filelist {
        let path = expand_home(list);
        let data = fs::read_to_string(&path)
            .with_context(|| format!("read file list {}", path.display()))?;
        roots.extend(data.lines().map(str::trim).filter(|l| !l.is_empty()).map(PathBuf::from));
    }
    if roots.is_empty() {
        // Re-index the path set stored in the existing index.
        let ix = IndexReader::open(&master)
            .context("no paths given and no existing index to re-index")?;
        roots.extend(ix.paths().iter().map(PathBuf::from));
    }

    // Absolute paths, sorted, so the file list comes out in a stable order.
    let mut abs: Vec<String> = Vec::with_capacity(roots.len());
    for r in &roots {
        match std::path::absolute(r) {
            Ok(p) => abs.push(p.to_string_lossy().into_owned()),
            Err(e) => tracing::warn!("{}: {}", r.display(), e),
        }
    }
    abs.sort();
    abs.dedup();
    if abs.is_empty() {
        bail!("nothing to index");
    }

    let reset = args.reset || !master.exists();
    let file = if reset {
        master.clone()
    } else {
        tilde_path(&master)
    };

    let mut ix = IndexWriter::create(&file)?;
    ix.verbose = args.verbose;
    ix.log_skip = args.logskip;
    ix.max_file_len = args.maxfilelen;
    ix.max_line_len = args.maxlinelen;
    ix.max_text_trigrams = args.maxtrigrams;
    ix.max_invalid_utf8_ratio = args.maxinvalidutf8ratio;
    ix.add_paths(abs.iter().cloned());

    // The walk runs on a producer thread feeding a bounded channel; the
    // writer is a single-threaded mutator consuming on this thread.
    let (tx, rx) = crossbeam_channel::bounded::<(i32, PathBuf)>(10_000);
    let walk_roots = abs.clone();
    let follow = !args.no_follow_symlinks;
    let log_skip = args.logskip;
    let producer = thread::spawn(move || {
        let mut walker = Walker {
            tx,
            excludes,
            follow,
            log_skip,
            skipped: 0,
        };
        for (i, root) in walk_roots.iter().enumerate() {
            tracing::info!("index {}", root);
            let mut resolving = Vec::new();
            if !walker.walk(i as i32, Path::new(root), None, &mut resolving) {
                break;
            }
        }
        walker.skipped
    });

    let mut seen: HashSet<PathBuf> = HashSet::new();
    let mut n_added: u64 = 0;
    let mut n_processed: u64 = 0;
    for (root, path) in rx {
        if !seen.insert(path.clone()) {
            continue;
        }
        if ix.add_file(root, &path)? {
            n_added += 1;
        }
        n_processed += 1;
        if n_processed % 10_000 == 0 {
            tracing::info!("added {}/{} files", n_added, n_processed);
        }
    }
    let n_skipped = producer
        .join()
        .map_err(|_| anyhow::anyhow!("walker thread panicked"))?;
    tracing::info!(
        "walk done: {} files seen, {} skipped, {} indexed",
        n_processed,
        n_skipped,
        n_added
    );

    tracing::info!("flush index");
    ix.flush()?;

    if !reset {
        let dst = tilde_path(&file);
        tracing::info!("merge {} {}", master.display(), file.display());
        merge(&dst, &master, &file)?;
        fs::remove_file(&file).with_context(|| format!("remove {}", file.display()))?;
        fs::rename(&dst, &master)
            .with_context(|| format!("rename {} over {}", dst.display(), master.display()))?;
    }
    tracing::info!("done");
    Ok(())
}

/// `<path>~`, the scratch name used while merging into an existing index.
fn tilde_path(path: &Path) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_os_string();
    s.push("~");
    PathBuf::from(s)
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => codesearch::index::home_dir().join(rest),
        None => PathBuf::from(path),
    }
}

/// Directory walker feeding the index writer.
///
/// Symlinks are never descended in place: when one is encountered (and
/// following is enabled) its target is resolved and walked separately, and
/// every file found beyond the link is emitted with root index -1 under its
/// link-view full name, the path of the crossing plus the entry's path below
/// the resolved target.
struct Walker {
    tx: Sender<(i32, PathBuf)>,
    excludes: GlobSet,
    follow: bool,
    log_skip: bool,
    skipped: u64,
}

impl Walker {
    /// Walk `dir`, sending each regular file as `(root, path)`. `link_view`
    /// is the path `dir` is seen under when it was reached through a resolved
    /// symlink; entries below it go out with root index -1. `resolving`
    /// holds the canonical targets currently being walked, to cut symlink
    /// loops. Returns false once the consumer is gone.
    fn walk(
        &mut self,
        root: i32,
        dir: &Path,
        link_view: Option<&Path>,
        resolving: &mut Vec<PathBuf>,
    ) -> bool {
        let excl = self.excludes.clone();
        let mut builder = ignore::WalkBuilder::new(dir);
        builder
            .hidden(false)
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .parents(false)
            .follow_links(false)
            .filter_entry(move |e| !excl.is_match(Path::new(e.file_name())));
        for entry in builder.build() {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("skipped. {}", e);
                    self.skipped += 1;
                    continue;
                }
            };
            let ft = match entry.file_type() {
                Some(t) => t,
                None => {
                    if self.log_skip {
                        tracing::info!("{}: skipped. Could not stat", entry.path().display());
                    }
                    self.skipped += 1;
                    continue;
                }
            };
            if ft.is_symlink() {
                if !self.follow {
                    if self.log_skip {
                        tracing::info!("{}: skipped. Symlink", entry.path().display());
                    }
                    self.skipped += 1;
                    continue;
                }
                if !self.follow_symlink(&entry, dir, link_view, resolving) {
                    return false;
                }
                continue;
            }
            if !ft.is_file() {
                continue;
            }
            let sent = match link_view {
                Some(view) => {
                    let name = view_path(view, dir, entry.path());
                    self.tx.send((-1, name)).is_ok()
                }
                None => self.tx.send((root, entry.into_path())).is_ok(),
            };
            if !sent {
                return false;
            }
        }
        true
    }

    /// Resolve one symlink and walk (or emit) its target under the link-view
    /// name. Unresolvable targets and links back into a directory already
    /// being walked are skipped.
    fn follow_symlink(
        &mut self,
        entry: &ignore::DirEntry,
        dir: &Path,
        link_view: Option<&Path>,
        resolving: &mut Vec<PathBuf>,
    ) -> bool {
        let view = match link_view {
            Some(v) => view_path(v, dir, entry.path()),
            None => entry.path().to_path_buf(),
        };
        let target = match fs::canonicalize(entry.path()) {
            Ok(t) => t,
            Err(_) => {
                if self.log_skip {
                    tracing::info!("{}: skipped. Symlink could not be resolved", view.display());
                }
                self.skipped += 1;
                return true;
            }
        };
        if resolving.iter().any(|t| *t == target) {
            if self.log_skip {
                tracing::info!("{}: skipped. Symlink loop", view.display());
            }
            self.skipped += 1;
            return true;
        }
        if target.is_dir() {
            resolving.push(target.clone());
            let ok = self.walk(-1, &target, Some(&view), resolving);
            resolving.pop();
            ok
        } else if target.is_file() {
            self.tx.send((-1, view)).is_ok()
        } else {
            if self.log_skip {
                tracing::info!("{}: skipped. Unsupported path type", view.display());
            }
            self.skipped += 1;
            true
        }
    }
}

/// The path of `entry` as seen through a followed link: the link-view of the
/// directory being walked plus the entry's path below it.
fn view_path(view: &Path, dir: &Path, path: &Path) -> PathBuf {
    match path.strip_prefix(dir) {
        Ok(rel) => view.join(rel),
        Err(_) => path.to_path_buf(),
    }
}

/// The exclusion set: `.csearchindex` plus any patterns from `--exclude`,
/// matched against individual path elements.
fn load_excludes(exclude: Option<&str>, logskip: bool) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    builder.add(Glob::new(".csearchindex")?);
    if let Some(file) = exclude {
        let path = expand_home(file);
        if logskip {
            tracing::info!("loading exclude patterns from {}", path.display());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("read exclude file {}", path.display()))?;
        for line in data.lines() {
            let pat = line.trim();
            if pat.is_empty() || pat.starts_with('#') {
                continue;
            }
            builder.add(Glob::new(pat).with_context(|| format!("bad exclude pattern {:?}", pat))?);
        }
    }
    Ok(builder.build()?)
}
