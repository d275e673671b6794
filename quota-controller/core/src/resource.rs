//! Operations over resource lists.
//!
//! The reconciler works on parsed lists so that every addition and comparison
//! is exact; wire lists only appear at the edges (spec hard limits in,
//! status out).

use crate::quantity::{self, ParseError, ParsedQuantity};
use crate::ResourceList;
use std::collections::{BTreeMap, BTreeSet};

/// Resource names mapped to exact quantities.
pub type ParsedList = BTreeMap<String, ParsedQuantity>;

/// Parses every entry of a wire list, failing on the first invalid quantity.
pub fn parse_list(list: &ResourceList) -> Result<ParsedList, ParseError> {
    list.iter()
        .map(|(name, q)| Ok((name.clone(), ParsedQuantity::parse(q)?)))
        .collect()
}

/// Parses a wire list, dropping entries that do not parse. Used when reading
/// back previously-written status, where an undecipherable entry is better
/// recomputed than fatal.
pub fn parse_list_lossy(list: &ResourceList) -> ParsedList {
    list.iter()
        .filter_map(|(name, q)| Some((name.clone(), ParsedQuantity::parse(q).ok()?)))
        .collect()
}

pub fn format_list(list: &ParsedList) -> ResourceList {
    list.iter()
        .map(|(name, q)| (name.clone(), q.to_quantity()))
        .collect()
}

/// Adds `other` into `acc` per resource name, inserting names `acc` lacks.
pub fn add_into(acc: &mut ParsedList, other: &ParsedList) {
    for (name, q) in other {
        let entry = acc.entry(name.clone()).or_insert_with(ParsedQuantity::zero);
        *entry = entry.add(*q);
    }
}

/// Restricts `list` to the given resource names.
pub fn mask(list: &ParsedList, names: &BTreeSet<String>) -> ParsedList {
    list.iter()
        .filter(|(name, _)| names.contains(*name))
        .map(|(name, q)| (name.clone(), *q))
        .collect()
}

pub fn zero_list<'a>(names: impl IntoIterator<Item = &'a String>) -> ParsedList {
    names
        .into_iter()
        .map(|name| (name.clone(), ParsedQuantity::zero()))
        .collect()
}

pub fn resource_names(list: &ResourceList) -> BTreeSet<String> {
    list.keys().cloned().collect()
}

/// Semantic equality of two optional wire lists: the same resource names with
/// the same values, where an absent list counts as empty.
pub fn equals_lists(a: Option<&ResourceList>, b: Option<&ResourceList>) -> bool {
    static EMPTY: ResourceList = ResourceList::new();
    let a = a.unwrap_or(&EMPTY);
    let b = b.unwrap_or(&EMPTY);
    a.len() == b.len()
        && a.iter().all(|(name, q)| {
            b.get(name)
                .map(|other| quantity::semantic_eq(q, other))
                .unwrap_or(false)
        })
}
