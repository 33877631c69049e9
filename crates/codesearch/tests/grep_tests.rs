use anyhow::Result;

use codesearch::grep::{Grep, GrepFlags};
use codesearch::regex_analyze::regexp_query_str;

mod common;
use common::build_index;

/// Index a corpus, plan the pattern, evaluate the posting query, and grep the
/// surviving files — the whole search pipeline, output captured in memory.
fn search(files: &[(&str, &[u8])], pattern: &str, flags: GrepFlags) -> Result<(String, bool)> {
    let dir = tempfile::tempdir()?;
    let (ix, _root) = build_index(dir.path(), files)?;
    let pat = format!("(?m){}", pattern);
    let q = regexp_query_str(&pat)?;
    let re = regex::bytes::RegexBuilder::new(&pat).build()?;
    let g = Grep::new(re, flags, Vec::new());
    let mut out = Vec::new();
    for id in ix.posting_query(&q)? {
        let name = ix.name(id)?;
        let mut worker = g.for_worker(&mut out);
        worker.file(&name)?;
        if worker.done() {
            break;
        }
    }
    let matched = g.matched();
    Ok((String::from_utf8(out)?, matched))
}

#[test]
fn single_file_literal_match() -> Result<()> {
    let files: &[(&str, &[u8])] = &[("a.txt", b"hello\n")];
    let (out, matched) = search(files, "hello", GrepFlags::default())?;
    assert!(matched);
    assert_eq!(out.lines().count(), 1);
    assert!(out.ends_with("/a.txt:hello\n") || out.contains("a.txt:hello"));
    Ok(())
}

#[test]
fn shared_trigram_matches_both_files() -> Result<()> {
    let files: &[(&str, &[u8])] = &[("a.txt", b"abcdef\n"), ("b.txt", b"xyzdef\n")];
    let (out, matched) = search(files, "def", GrepFlags::default())?;
    assert!(matched);
    assert!(out.contains("a.txt:abcdef"));
    assert!(out.contains("b.txt:xyzdef"));
    Ok(())
}

#[test]
fn class_match_reports_only_matching_file() -> Result<()> {
    let files: &[(&str, &[u8])] = &[("a.txt", b"abcdef\n"), ("b.txt", b"xyzdef\n")];
    let (out, matched) = search(files, "ab[cd]", GrepFlags::default())?;
    assert!(matched);
    assert!(out.contains("a.txt:abcdef"));
    assert!(!out.contains("b.txt"));
    Ok(())
}

#[test]
fn no_match_leaves_matched_unset() -> Result<()> {
    let files: &[(&str, &[u8])] = &[("a.txt", b"abcdef\n")];
    let (out, matched) = search(files, "zzzyyy", GrepFlags::default())?;
    assert!(!matched);
    assert!(out.is_empty());
    Ok(())
}

#[test]
fn count_and_list_modes_over_the_pipeline() -> Result<()> {
    let files: &[(&str, &[u8])] = &[
        ("a.txt", b"needle one\nneedle two\n"),
        ("b.txt", b"no such thing\n"),
        ("c.txt", b"needle three\n"),
    ];
    let flags = GrepFlags {
        count: true,
        ..Default::default()
    };
    let (out, _) = search(files, "needle", flags)?;
    assert!(out.contains("a.txt:2"));
    assert!(out.contains("c.txt:1"));
    assert!(!out.contains("b.txt"));

    let flags = GrepFlags {
        list: true,
        ..Default::default()
    };
    let (out, _) = search(files, "needle", flags)?;
    assert!(out.contains("a.txt\n"));
    assert!(out.contains("c.txt\n"));
    assert!(!out.contains(":needle"));
    Ok(())
}

#[test]
fn line_numbers_in_pipeline_output() -> Result<()> {
    let files: &[(&str, &[u8])] = &[("a.txt", b"zero\nneedle here\nmore\nneedle again\n")];
    let flags = GrepFlags {
        line_numbers: true,
        ..Default::default()
    };
    let (out, _) = search(files, "needle", flags)?;
    assert!(out.contains("a.txt:2:needle here"));
    assert!(out.contains("a.txt:4:needle again"));
    Ok(())
}

#[test]
fn global_limit_short_circuits_across_files() -> Result<()> {
    let files: &[(&str, &[u8])] = &[
        ("a.txt", b"needle\nneedle\n"),
        ("b.txt", b"needle\n"),
        ("c.txt", b"needle\n"),
    ];
    let dir = tempfile::tempdir()?;
    let (ix, _root) = build_index(dir.path(), files)?;
    let pat = "(?m)needle";
    let q = regexp_query_str(pat)?;
    let re = regex::bytes::Regex::new(pat)?;
    let mut g = Grep::new(re, GrepFlags::default(), Vec::new());
    g.limit_print_count(2, 0);
    let mut out = Vec::new();
    for id in ix.posting_query(&q)? {
        let name = ix.name(id)?;
        let mut worker = g.for_worker(&mut out);
        worker.file(&name)?;
        if worker.done() {
            break;
        }
    }
    assert!(g.done());
    assert_eq!(String::from_utf8(out)?.lines().count(), 2);
    Ok(())
}
