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

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::Parser;
use rayon::prelude::*;
use tracing_subscriber::EnvFilter;

use codesearch::grep::{Grep, GrepFlags};
use codesearch::index::{index_file, IndexReader};
use codesearch::query::Query;
use codesearch::regex_analyze::regexp_query_str;

#[derive(Parser, Debug)]
#[command(
    name = "csearch",
    about = "Search the trigram index like grep",
    long_about = "csearch behaves like grep over all indexed files, searching for regexp, an \
RE2-style regular expression. It relies on the index created ahead of time by \
cindex, stored in $CSEARCHINDEX or $HOME/.csearchindex."
)]
struct Args {
    /// Regular expression to search for
    pattern: String,

    /// Search only files with names matching this regexp
    #[arg(short = 'f', value_name = "PATHREGEXP")]
    file_regex: Option<String>,

    /// Case-insensitive search
    #[arg(short = 'i')]
    ignore_case: bool,

    #[command(flatten)]
    grep: GrepFlags,

    /// Stop after this many printed results (0: no limit)
    #[arg(short = 'm', value_name = "MAXCOUNT", default_value_t = 0)]
    max_count: i64,

    /// Stop after this many printed results per file (0: no limit)
    #[arg(short = 'M', value_name = "MAXCOUNT", default_value_t = 0)]
    max_count_per_file: i64,

    /// Brute force: search every indexed file, bypassing the trigram filter
    #[arg(long)]
    brute: bool,

    /// Use a single worker and search files in index order
    #[arg(short = '1')]
    one_thread: bool,

    /// Use FILE as the index path (overrides $CSEARCHINDEX)
    #[arg(long, value_name = "FILE")]
    indexpath: Option<PathBuf>,

    /// Print extra information
    #[arg(long)]
    verbose: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    if (args.grep.list && args.grep.count)
        || (args.grep.list && args.max_count_per_file > 0)
        || (args.grep.count && args.max_count_per_file > 0)
    {
        eprintln!("csearch: -c, -l, and -M are mutually exclusive");
        return ExitCode::from(2);
    }
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("csearch: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn run(args: &Args) -> Result<bool> {
    let mut pat = format!("(?m){}", args.pattern);
    if args.ignore_case {
        pat = format!("(?i){}", pat);
    }
    let re = regex::bytes::RegexBuilder::new(&pat).build()?;
    let q = regexp_query_str(&pat)?;
    if args.verbose {
        tracing::info!("query: {}", q);
    }

    let master = args.indexpath.clone().unwrap_or_else(index_file);
    let mut ix = IndexReader::open(&master)?;
    ix.verbose = args.verbose;
    let post = if args.brute {
        ix.posting_query(&Query::All)?
    } else {
        ix.posting_query(&q)?
    };
    if args.verbose {
        tracing::info!("post query identified {} possible files", post.len());
    }

    let mut names = Vec::with_capacity(post.len());
    for id in post {
        names.push(ix.name(id)?);
    }
    if let Some(f) = &args.file_regex {
        let fre = regex::Regex::new(f)?;
        names.retain(|n| fre.is_match(n));
        if args.verbose {
            tracing::info!("filename regexp matched {} files", names.len());
        }
    }

    let mut grep = Grep::new(re, args.grep.clone(), io::stdout());
    grep.limit_print_count(args.max_count, args.max_count_per_file);

    if args.one_thread {
        for name in &names {
            grep.file(name)?;
            if grep.done() {
                break;
            }
        }
    } else {
        // One value copy of the driver (with a freshly cloned regexp) per
        // worker; ordering across files is unspecified in this mode.
        let ok = names
            .par_iter()
            .map_init(
                || grep.for_worker(io::stdout()),
                |g, name| {
                    if g.done() {
                        return Ok(());
                    }
                    g.file(name)
                },
            )
            .collect::<Result<Vec<()>>>();
        if let Err(e) = ok {
            bail!("search failed: {:#}", e);
        }
    }
    Ok(grep.matched())
}
