use std::collections::BTreeSet;
use std::fmt;

use crate::trigram::{trigrams, Trigram};

/// A boolean filter over the trigrams a file contains.
///
/// `Trigrams` carries a sorted set that must *all* be present for the node to
/// match. The query is a necessary condition: every file whose contents match
/// the originating regexp satisfies it, but not necessarily vice versa.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    All,
    None,
    And(Vec<Query>),
    Or(Vec<Query>),
    Trigrams(BTreeSet<Trigram>),
}

impl Query {
    /// AND of all trigrams of `s`. `All` when `s` is too short to contribute.
    pub fn trigrams_of(s: &[u8]) -> Query {
        let ts: BTreeSet<Trigram> = trigrams(s).collect();
        if ts.is_empty() {
            Query::All
        } else {
            Query::Trigrams(ts)
        }
    }

    pub fn and(self, other: Query) -> Query {
        combine(self, other, true)
    }

    pub fn or(self, other: Query) -> Query {
        combine(self, other, false)
    }

    /// Recursively flatten nested same-op nodes, drop identity children,
    /// short-circuit on absorbing children, merge trigram sets, deduplicate,
    /// and collapse single-child AND/OR nodes.
    pub fn simplify(self) -> Query {
        match self {
            Query::And(xs) => {
                let mut children = Vec::new();
                for c in xs {
                    push_flat(c.simplify(), true, &mut children);
                }
                build(true, children)
            }
            Query::Or(xs) => {
                let mut children = Vec::new();
                for c in xs {
                    push_flat(c.simplify(), false, &mut children);
                }
                build(false, children)
            }
            q => q,
        }
    }
}

fn combine(q: Query, r: Query, is_and: bool) -> Query {
    let mut children = Vec::new();
    push_flat(q, is_and, &mut children);
    push_flat(r, is_and, &mut children);
    build(is_and, children)
}

fn push_flat(q: Query, is_and: bool, out: &mut Vec<Query>) {
    match q {
        Query::And(xs) if is_and => out.extend(xs),
        Query::Or(xs) if !is_and => out.extend(xs),
        x => out.push(x),
    }
}

fn build(is_and: bool, children: Vec<Query>) -> Query {
    let mut flat: Vec<Query> = Vec::with_capacity(children.len());
    let mut tris: Option<BTreeSet<Trigram>> = None;
    for c in children {
        match c {
            Query::All => {
                if !is_and {
                    return Query::All;
                }
            }
            Query::None => {
                if is_and {
                    return Query::None;
                }
            }
            // AND of trigram sets is the union of the sets. Under OR they
            // stay separate children (subset absorption happens below).
            Query::Trigrams(ts) if is_and => match tris.as_mut() {
                None => tris = Some(ts),
                Some(acc) => acc.extend(ts),
            },
            x => {
                if !flat.contains(&x) {
                    flat.push(x);
                }
            }
        }
    }
    if let Some(ts) = tris {
        flat.insert(0, Query::Trigrams(ts));
    }
    if !is_and {
        absorb_or(&mut flat);
    }
    match flat.len() {
        0 => {
            if is_and {
                Query::All
            } else {
                Query::None
            }
        }
        1 => flat.remove(0),
        _ => {
            if is_and {
                Query::And(flat)
            } else {
                Query::Or(flat)
            }
        }
    }
}

/// Within an OR, a trigram set that is a subset of another implies it, so the
/// superset child is redundant.
fn absorb_or(flat: &mut Vec<Query>) {
    let mut i = 0;
    while i < flat.len() {
        let mut removed = false;
        if let Query::Trigrams(a) = &flat[i] {
            for j in 0..flat.len() {
                if i == j {
                    continue;
                }
                if let Query::Trigrams(b) = &flat[j] {
                    if b.is_subset(a) {
                        flat.remove(i);
                        removed = true;
                        break;
                    }
                }
            }
        }
        if !removed {
            i += 1;
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::All => write!(f, "+"),
            Query::None => write!(f, "-"),
            Query::Trigrams(ts) => {
                for (i, t) in ts.iter().enumerate() {
                    if i > 0 {
                        write!(f, "&")?;
                    }
                    write!(f, "\"{}\"", t)?;
                }
                Ok(())
            }
            Query::And(xs) => {
                write!(f, "(")?;
                for (i, q) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " & ")?;
                    }
                    write!(f, "{}", q)?;
                }
                write!(f, ")")
            }
            Query::Or(xs) => {
                write!(f, "(")?;
                for (i, q) in xs.iter().enumerate() {
                    if i > 0 {
                        write!(f, " | ")?;
                    }
                    write!(f, "{}", q)?;
                }
                write!(f, ")")
            }
        }
    }
}
