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
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use codesearch::grep::{Grep, GrepFlags};

#[derive(Parser, Debug)]
#[command(
    name = "cgrep",
    about = "Grep over the named files without the index",
    long_about = "cgrep behaves like grep, searching for regexp, an RE2-style regular \
expression, in the named files or on standard input."
)]
struct Args {
    /// Regular expression to search for
    pattern: String,

    /// Files to search; standard input when none are given
    files: Vec<String>,

    /// Case-insensitive match
    #[arg(short = 'i')]
    ignore_case: bool,

    #[command(flatten)]
    grep: GrepFlags,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
    let args = Args::parse();
    match run(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("cgrep: {:#}", e);
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
    let mut g = Grep::new(re, args.grep.clone(), io::stdout());
    if args.files.is_empty() {
        g.reader(io::stdin().lock(), "<standard input>")?;
    } else {
        for f in &args.files {
            g.file(f)?;
        }
    }
    Ok(g.matched())
}
