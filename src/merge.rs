//! Key-based merging of authoritative and provisional records.
//!
//! The primary collection always wins a key collision; the secondary
//! collection only fills gaps. Used to lay the narrower hero/snapshot dataset
//! under the broad selector metadata so every choice list is complete before
//! the full dataset arrives.

use std::collections::HashMap;
use std::hash::Hash;

use crate::model::{Dataset, Group, Pollutant, SeriesRow};

/// Identity of a record for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MergeKey {
    Id(i64),
    Name(String),
}

/// Records that can be resolved to a [`MergeKey`] by id, falling back to name.
pub trait Keyed {
    fn key_id(&self) -> Option<i64>;
    fn key_name(&self) -> &str;
}

impl Keyed for Pollutant {
    fn key_id(&self) -> Option<i64> {
        self.id
    }

    fn key_name(&self) -> &str {
        &self.name
    }
}

impl Keyed for Group {
    fn key_id(&self) -> Option<i64> {
        self.id
    }

    fn key_name(&self) -> &str {
        &self.title
    }
}

/// Trim, lowercase and collapse internal whitespace.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Default resolver: `id`, else normalized name, else nothing.
pub fn default_key<T: Keyed>(item: &T) -> Option<MergeKey> {
    if let Some(id) = item.key_id() {
        return Some(MergeKey::Id(id));
    }
    let name = normalize_name(item.key_name());
    (!name.is_empty()).then_some(MergeKey::Name(name))
}

/// Merge two collections by resolved key.
///
/// All primary entries are inserted first (a later primary duplicate replaces
/// an earlier one in place), then secondary entries whose key is still
/// absent. Entries that resolve to no key are dropped.
pub fn merge_by<T, K, F>(primary: &[T], secondary: &[T], resolve: F) -> Vec<T>
where
    T: Clone,
    K: Eq + Hash,
    F: Fn(&T) -> Option<K>,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut merged: Vec<T> = Vec::with_capacity(primary.len() + secondary.len());

    for item in primary {
        let Some(key) = resolve(item) else { continue };
        match index.get(&key) {
            Some(&pos) => merged[pos] = item.clone(),
            None => {
                index.insert(key, merged.len());
                merged.push(item.clone());
            }
        }
    }

    for item in secondary {
        let Some(key) = resolve(item) else { continue };
        if !index.contains_key(&key) {
            index.insert(key, merged.len());
            merged.push(item.clone());
        }
    }

    merged
}

/// Merge keyed records with the default resolver.
pub fn merge<T: Keyed + Clone>(primary: &[T], secondary: &[T]) -> Vec<T> {
    merge_by(primary, secondary, default_key::<T>)
}

/// Merge two datasets. Rows are keyed by (pollutant, group); years are unioned.
pub fn merge_datasets(primary: &Dataset, secondary: &Dataset) -> Dataset {
    let rows = merge_by(&primary.rows, &secondary.rows, |r: &SeriesRow| {
        Some((r.pollutant_id, r.group_id))
    });
    let years = primary
        .years
        .iter()
        .chain(secondary.years.iter())
        .copied()
        .collect();

    Dataset {
        pollutants: merge(&primary.pollutants, &secondary.pollutants),
        groups: merge(&primary.groups, &secondary.groups),
        rows,
        years: Vec::new(),
    }
    .with_years(years)
}
