//! Translates a parsed regular expression into a trigram [`Query`].
//!
//! For every subexpression we track which strings it can match exactly (while
//! the sets stay small), the possible prefixes and suffixes of its matches,
//! whether it can match the empty string, and a query that any match must
//! satisfy. Combining these bottom-up keeps the final query sound: a file
//! containing a match always satisfies the query. It need not be tight; false
//! positives are eliminated by the regexp pass over the candidate files.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use regex_syntax::hir::{self, Hir, HirKind};

use crate::query::Query;
use crate::trigram::{trigrams, Trigram};

/// Exact-string sets larger than this are folded into the match query.
const MAX_EXACT: usize = 7;

/// Prefix and suffix sets larger than this are trimmed.
const MAX_SET: usize = 20;

/// Character classes wider than this contribute no trigram information.
const MAX_CLASS: usize = 10;

type StrSet = BTreeSet<Vec<u8>>;

/// Derive the trigram query for a regexp pattern. The pattern is parsed in
/// byte mode so it can describe non-UTF-8 haystacks, matching the grep pass.
pub fn regexp_query_str(pattern: &str) -> Result<Query> {
    let hir = regex_syntax::ParserBuilder::new()
        .utf8(false)
        .build()
        .parse(pattern)
        .with_context(|| format!("parse regexp {:?}", pattern))?;
    Ok(regexp_query(&hir))
}

/// Derive the trigram query for an already-parsed regexp.
pub fn regexp_query(hir: &Hir) -> Query {
    let mut info = analyze(hir);
    info.simplify(true);
    info.add_exact();
    info.match_q.simplify()
}

/// Analysis summary for one subexpression.
struct RegexInfo {
    /// Whether the subexpression can match the empty string.
    can_empty: bool,
    /// The set of strings the subexpression matches, when small enough to
    /// enumerate. `None` means unknown; then `prefix`/`suffix` apply.
    exact: Option<StrSet>,
    prefix: StrSet,
    suffix: StrSet,
    /// Query satisfied by any match of the subexpression.
    match_q: Query,
}

impl RegexInfo {
    /// Fold the exact set's trigram obligations into the match query.
    fn add_exact(&mut self) {
        if have(&self.exact) {
            let q = and_trigrams(self.exact.as_ref().expect("exact set present"));
            self.match_q = take(&mut self.match_q).and(q);
        }
    }

    /// Keep the string sets within bounds. Once the exact set holds strings
    /// long enough to carry trigrams (or `force` is set at the top level),
    /// it is folded into the match query and reduced to 2-byte prefix and
    /// suffix stubs.
    fn simplify(&mut self, force: bool) {
        let fold = match &self.exact {
            Some(ex) if !ex.is_empty() => {
                ex.len() > MAX_EXACT || ((min_len(ex) >= 3 || force) && max_len(ex) >= 4)
            }
            _ => false,
        };
        if fold {
            self.add_exact();
            let ex = self.exact.take().expect("exact set present");
            for s in ex {
                if s.len() < 3 {
                    self.prefix.insert(s.clone());
                    self.suffix.insert(s);
                } else {
                    self.prefix.insert(s[..2].to_vec());
                    self.suffix.insert(s[s.len() - 2..].to_vec());
                }
            }
        }
        if !have(&self.exact) {
            simplify_set(&mut self.prefix, &mut self.match_q, false);
            simplify_set(&mut self.suffix, &mut self.match_q, true);
        }
    }
}

fn take(q: &mut Query) -> Query {
    std::mem::replace(q, Query::All)
}

fn have(exact: &Option<StrSet>) -> bool {
    exact.as_ref().is_some_and(|s| !s.is_empty())
}

fn min_len(s: &StrSet) -> usize {
    s.iter().map(Vec::len).min().unwrap_or(0)
}

fn max_len(s: &StrSet) -> usize {
    s.iter().map(Vec::len).max().unwrap_or(0)
}

/// Matches only the empty string (also anchors and word boundaries).
fn empty_info() -> RegexInfo {
    RegexInfo {
        can_empty: true,
        exact: Some([Vec::new()].into()),
        prefix: StrSet::new(),
        suffix: StrSet::new(),
        match_q: Query::All,
    }
}

/// Matches nothing.
fn no_match_info() -> RegexInfo {
    RegexInfo {
        can_empty: false,
        exact: Some(StrSet::new()),
        prefix: StrSet::new(),
        suffix: StrSet::new(),
        match_q: Query::None,
    }
}

/// Matches some single character; nothing more is known.
fn any_char_info() -> RegexInfo {
    RegexInfo {
        can_empty: false,
        exact: None,
        prefix: [Vec::new()].into(),
        suffix: [Vec::new()].into(),
        match_q: Query::All,
    }
}

/// Matches anything, possibly empty (`x*` and friends).
fn any_match_info() -> RegexInfo {
    RegexInfo {
        can_empty: true,
        exact: None,
        prefix: [Vec::new()].into(),
        suffix: [Vec::new()].into(),
        match_q: Query::All,
    }
}

fn analyze(h: &Hir) -> RegexInfo {
    let mut info = match h.kind() {
        HirKind::Empty => empty_info(),
        HirKind::Look(_) => empty_info(),
        HirKind::Literal(lit) => RegexInfo {
            can_empty: lit.0.is_empty(),
            exact: Some([lit.0.to_vec()].into()),
            prefix: StrSet::new(),
            suffix: StrSet::new(),
            match_q: Query::All,
        },
        HirKind::Class(cls) => analyze_class(cls),
        HirKind::Repetition(rep) => analyze_repetition(rep),
        HirKind::Capture(cap) => return analyze(&cap.sub),
        HirKind::Concat(subs) => return fold_infos(subs, concat, empty_info),
        HirKind::Alternation(subs) => return fold_infos(subs, alternate, no_match_info),
    };
    info.simplify(false);
    info
}

fn fold_infos(
    subs: &[Hir],
    f: fn(RegexInfo, RegexInfo) -> RegexInfo,
    zero: fn() -> RegexInfo,
) -> RegexInfo {
    let mut it = subs.iter();
    let first = match it.next() {
        Some(h) => analyze(h),
        None => return zero(),
    };
    it.fold(first, |acc, h| f(acc, analyze(h)))
}

fn analyze_class(cls: &hir::Class) -> RegexInfo {
    let mut exact = StrSet::new();
    match cls {
        hir::Class::Unicode(u) => {
            let count: u64 = u
                .ranges()
                .iter()
                .map(|r| r.end() as u64 - r.start() as u64 + 1)
                .sum();
            if count == 0 {
                return no_match_info();
            }
            if count > MAX_CLASS as u64 {
                return any_char_info();
            }
            for r in u.ranges() {
                for c in r.start()..=r.end() {
                    let mut buf = [0u8; 4];
                    exact.insert(c.encode_utf8(&mut buf).as_bytes().to_vec());
                }
            }
        }
        hir::Class::Bytes(b) => {
            let count: u64 = b
                .ranges()
                .iter()
                .map(|r| r.end() as u64 - r.start() as u64 + 1)
                .sum();
            if count == 0 {
                return no_match_info();
            }
            if count > MAX_CLASS as u64 {
                return any_char_info();
            }
            for r in b.ranges() {
                for c in r.start()..=r.end() {
                    exact.insert(vec![c]);
                }
            }
        }
    }
    RegexInfo {
        can_empty: false,
        exact: Some(exact),
        prefix: StrSet::new(),
        suffix: StrSet::new(),
        match_q: Query::All,
    }
}

fn analyze_repetition(rep: &hir::Repetition) -> RegexInfo {
    if rep.min == 0 && rep.max == Some(1) {
        return alternate(analyze(&rep.sub), empty_info());
    }
    if rep.min == 0 {
        // x* — we know nothing about what a match contains.
        return any_match_info();
    }
    // x+ and x{n,m} with n >= 1: at least one copy's obligations hold; the
    // exact strings survive only as prefixes and suffixes of the repetition.
    let mut info = analyze(&rep.sub);
    if have(&info.exact) {
        let ex = info.exact.take().expect("exact set present");
        info.prefix = ex.clone();
        info.suffix = ex;
    }
    info.simplify(false);
    info
}

fn concat(x: RegexInfo, y: RegexInfo) -> RegexInfo {
    let mut xy = RegexInfo {
        can_empty: x.can_empty && y.can_empty,
        exact: None,
        prefix: StrSet::new(),
        suffix: StrSet::new(),
        match_q: x.match_q.clone().and(y.match_q.clone()),
    };
    let x_have = have(&x.exact);
    let y_have = have(&y.exact);
    if x_have && y_have {
        xy.exact = Some(cross(
            x.exact.as_ref().expect("exact set present"),
            y.exact.as_ref().expect("exact set present"),
        ));
    } else {
        if x_have {
            xy.prefix = cross(x.exact.as_ref().expect("exact set present"), &y.prefix);
        } else {
            xy.prefix = x.prefix.clone();
            if x.can_empty {
                xy.prefix.extend(y.prefix.iter().cloned());
            }
        }
        if y_have {
            xy.suffix = cross(&x.suffix, y.exact.as_ref().expect("exact set present"));
        } else {
            xy.suffix = y.suffix.clone();
            if y.can_empty {
                xy.suffix.extend(x.suffix.iter().cloned());
            }
        }
    }

    // If every string in the cross of x's suffixes and y's prefixes is long
    // enough to carry a trigram, one of those boundary trigrams must appear
    // in any match even though it spans the concatenation point.
    if !x_have
        && !y_have
        && x.suffix.len() <= MAX_SET
        && y.prefix.len() <= MAX_SET
        && min_len(&x.suffix) + min_len(&y.prefix) >= 3
    {
        let joined = cross(&x.suffix, &y.prefix);
        xy.match_q = take(&mut xy.match_q).and(and_trigrams(&joined));
    }

    xy.simplify(false);
    xy
}

fn alternate(mut x: RegexInfo, mut y: RegexInfo) -> RegexInfo {
    let mut xy = RegexInfo {
        can_empty: x.can_empty || y.can_empty,
        exact: None,
        prefix: StrSet::new(),
        suffix: StrSet::new(),
        match_q: Query::All,
    };
    let x_have = have(&x.exact);
    let y_have = have(&y.exact);
    if x_have && y_have {
        xy.exact = Some(union(
            x.exact.as_ref().expect("exact set present"),
            y.exact.as_ref().expect("exact set present"),
        ));
    } else if x_have {
        let ex = x.exact.as_ref().expect("exact set present");
        xy.prefix = union(ex, &y.prefix);
        xy.suffix = union(ex, &y.suffix);
        x.add_exact();
    } else if y_have {
        let ex = y.exact.as_ref().expect("exact set present");
        xy.prefix = union(&x.prefix, ex);
        xy.suffix = union(&x.suffix, ex);
        y.add_exact();
    } else {
        xy.prefix = union(&x.prefix, &y.prefix);
        xy.suffix = union(&x.suffix, &y.suffix);
    }
    xy.match_q = x.match_q.or(y.match_q);
    xy.simplify(false);
    xy
}

/// Trim a prefix or suffix set: absorb its trigram obligations into the match
/// query, then cut the strings down to 2-byte stubs (shorter if the set is
/// still too large).
fn simplify_set(s: &mut StrSet, match_q: &mut Query, is_suffix: bool) {
    *match_q = take(match_q).and(and_trigrams(s));
    let mut n = 3usize;
    while n == 3 || s.len() > MAX_SET {
        let mut w = StrSet::new();
        for str in s.iter() {
            if str.len() >= n {
                if is_suffix {
                    w.insert(str[str.len() - (n - 1)..].to_vec());
                } else {
                    w.insert(str[..n - 1].to_vec());
                }
            } else {
                w.insert(str.clone());
            }
        }
        *s = w;
        if n == 1 {
            break;
        }
        n -= 1;
    }
}

/// OR over the set's strings of the AND of each string's trigrams. `All` when
/// any string is too short to constrain the search.
fn and_trigrams(s: &StrSet) -> Query {
    if s.is_empty() || min_len(s) < 3 {
        return Query::All;
    }
    let mut q = Query::None;
    for str in s {
        let ts: BTreeSet<Trigram> = trigrams(str).collect();
        q = q.or(Query::Trigrams(ts));
    }
    q
}

fn cross(a: &StrSet, b: &StrSet) -> StrSet {
    let mut out = StrSet::new();
    for x in a {
        for y in b {
            let mut s = x.clone();
            s.extend_from_slice(y);
            out.insert(s);
        }
    }
    out
}

fn union(a: &StrSet, b: &StrSet) -> StrSet {
    a.union(b).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri(s: &[u8; 3]) -> Trigram {
        Trigram::from_bytes(s[0], s[1], s[2])
    }

    fn tris(ss: &[&[u8; 3]]) -> Query {
        Query::Trigrams(ss.iter().map(|s| tri(s)).collect())
    }

    #[test]
    fn literal_is_and_of_its_trigrams() {
        let q = regexp_query_str("abcdef").unwrap();
        assert_eq!(q, tris(&[b"abc", b"bcd", b"cde", b"def"]));
    }

    #[test]
    fn short_literals_cannot_constrain() {
        assert_eq!(regexp_query_str("ab").unwrap(), Query::All);
        assert_eq!(regexp_query_str("a.b").unwrap(), Query::All);
    }

    #[test]
    fn alternation_is_or() {
        let q = regexp_query_str("foobar|quux").unwrap();
        assert_eq!(
            q,
            tris(&[b"foo", b"oob", b"oba", b"bar"]).or(tris(&[b"quu", b"uux"]))
        );
    }

    #[test]
    fn small_class_expands_to_branches() {
        let q = regexp_query_str("ab[cd]").unwrap();
        assert_eq!(q, tris(&[b"abc"]).or(tris(&[b"abd"])));
    }

    #[test]
    fn unbounded_repetition_degrades_to_all() {
        assert_eq!(regexp_query_str(".*").unwrap(), Query::All);
        assert_eq!(regexp_query_str("\\w+\\d*").unwrap(), Query::All);
        assert_eq!(regexp_query_str("(abc)*").unwrap(), Query::All);
    }

    #[test]
    fn plus_keeps_one_copy() {
        let q = regexp_query_str("(abcd)+").unwrap();
        assert_eq!(q, tris(&[b"abc", b"bcd"]));
    }

    #[test]
    fn repetition_inside_literal_run() {
        // The "l+" splits the literal; "hel" is still required.
        let q = regexp_query_str("hel+o").unwrap();
        assert_eq!(q, tris(&[b"hel"]));
    }

    #[test]
    fn anchors_do_not_contribute() {
        let q = regexp_query_str("^hello$").unwrap();
        assert_eq!(q, tris(&[b"hel", b"ell", b"llo"]));
        let q = regexp_query_str("(?m)\\bhello\\b").unwrap();
        assert_eq!(q, tris(&[b"hel", b"ell", b"llo"]));
    }

    #[test]
    fn concat_joins_across_boundary() {
        // "abc" then "def": the query must also demand the spanning "cde"
        // after set trimming has cut the pieces to 2-byte stubs.
        let q = regexp_query_str("abc.?def").unwrap();
        match &q {
            Query::And(_) | Query::Trigrams(_) => {}
            other => panic!("expected a conjunction, got {}", other),
        }
        // At minimum the two literal runs' trigrams are required.
        for t in ["abc", "def"] {
            let b = t.as_bytes();
            let single = Query::Trigrams([Trigram::from_bytes(b[0], b[1], b[2])].into());
            assert_eq!(q.clone().and(single.clone()), q, "missing {}", t);
        }
    }

    #[test]
    fn case_insensitive_literal_branches() {
        let q = regexp_query_str("(?i)abc").unwrap();
        // Every case variant must be one of the OR branches.
        match &q {
            Query::Or(branches) => {
                assert!(branches.contains(&tris(&[b"abc"])));
                assert!(branches.contains(&tris(&[b"ABC"])));
            }
            other => panic!("expected OR of case variants, got {}", other),
        }
    }

    #[test]
    fn empty_and_impossible_patterns() {
        assert_eq!(regexp_query_str("").unwrap(), Query::All);
        assert_eq!(regexp_query_str("^$").unwrap(), Query::All);
    }
}
