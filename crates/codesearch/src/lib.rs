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

//! Trigram-indexed regexp search over source trees.
//!
//! A corpus is indexed once into a sealed on-disk inverted index keyed by
//! the distinct three-byte substrings of each file. A regexp query is then
//! translated into a boolean filter over those trigrams, the index prunes
//! the candidate file set, and the regexp runs only over the survivors.

pub mod grep;
pub mod index;
pub mod query;
pub mod regex_analyze;
pub mod trigram;

pub use crate::grep::{Grep, GrepFlags};
pub use crate::index::{index_file, merge, IndexReader, IndexWriter};
pub use crate::query::Query;
pub use crate::regex_analyze::{regexp_query, regexp_query_str};
pub use crate::trigram::{trigrams, Trigram};
