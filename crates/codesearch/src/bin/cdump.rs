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

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use codesearch::index::{index_file, DumpOptions, IndexReader};

#[derive(Parser, Debug)]
#[command(name = "cdump", about = "Print a human-readable rendering of the index")]
struct Args {
    /// Use FILE as the index path (overrides $CSEARCHINDEX)
    #[arg(long, value_name = "FILE")]
    indexpath: Option<PathBuf>,

    /// Also list every indexed file name
    #[arg(long)]
    names: bool,

    /// Also list every trigram with its posting-list length
    #[arg(long)]
    postings: bool,

    /// Emit the summary as JSON instead
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();
    let args = Args::parse();
    let master = args.indexpath.clone().unwrap_or_else(index_file);
    let ix = IndexReader::open(&master)?;
    if args.json {
        let summary = serde_json::json!({
            "index": master.display().to_string(),
            "paths": ix.paths(),
            "names": ix.num_names(),
            "trigrams": ix.num_trigrams(),
        });
        println!("{}", summary);
        return Ok(());
    }
    let opts = DumpOptions {
        names: args.names,
        postings: args.postings,
    };
    let stdout = io::stdout();
    let mut out = stdout.lock();
    ix.dump(&opts, &mut out)?;
    out.flush()?;
    Ok(())
}
