//! Query parameters and filter-combination → view resolution.
//!
//! Every supported combination of structural filters has one specialized
//! materialized view per sort order. The lookup key is the sorted list of
//! active filter names; the physical view name follows a fixed column order.
//! Both sides are generated from the dimension list; the combinations are
//! never hand-enumerated.

use crate::store::rows::SortDir;
use crate::store::ViewId;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    HeightAsc,
    #[default]
    HeightDesc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::HeightAsc => "HEIGHT_ASC",
            SortOrder::HeightDesc => "HEIGHT_DESC",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "HEIGHT_ASC" => Some(SortOrder::HeightAsc),
            "HEIGHT_DESC" => Some(SortOrder::HeightDesc),
            _ => None,
        }
    }

    pub fn dir(self) -> SortDir {
        match self {
            SortOrder::HeightAsc => SortDir::Asc,
            SortOrder::HeightDesc => SortDir::Desc,
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tag filter: a name matched against any of the listed values.
#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    pub name: String,
    pub values: Vec<String>,
}

/// Inclusive height range bound.
#[derive(Debug, Clone, Copy, Default)]
pub struct BlockRange {
    pub min: Option<u64>,
    pub max: Option<u64>,
}

/// Transaction search parameters as they arrive from the query surface.
#[derive(Debug, Clone, Default)]
pub struct TxQueryParams {
    pub ids: Vec<String>,
    pub owners: Vec<String>,
    pub recipients: Vec<String>,
    pub data_roots: Vec<String>,
    pub bundled_in: Vec<String>,
    pub tags: Vec<TagFilter>,
    pub block: BlockRange,
    pub sort: SortOrder,
    pub first: Option<u32>,
    pub after: Option<String>,
}

/// Structural filter dimensions, in the fixed physical column order used by
/// view names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDim {
    Ids,
    Owners,
    Target,
    BundledIn,
    DataRoots,
}

impl FilterDim {
    const PHYSICAL_ORDER: [FilterDim; 5] = [
        FilterDim::Ids,
        FilterDim::Owners,
        FilterDim::Target,
        FilterDim::BundledIn,
        FilterDim::DataRoots,
    ];

    /// Filter name as it appears in the lookup key.
    pub fn name(self) -> &'static str {
        match self {
            FilterDim::Ids => "ids",
            FilterDim::Owners => "owners",
            FilterDim::Target => "target",
            FilterDim::BundledIn => "bundledIn",
            FilterDim::DataRoots => "dataRoots",
        }
    }

    /// Physical column the view is keyed by.
    pub fn column(self) -> &'static str {
        match self {
            FilterDim::Ids => "tx_id",
            FilterDim::Owners => "owner",
            FilterDim::Target => "target",
            FilterDim::BundledIn => "bundled_in",
            FilterDim::DataRoots => "data_root",
        }
    }
}

/// Active structural filters of a request. `recipients` maps to the `target`
/// dimension.
pub fn active_filters(params: &TxQueryParams) -> Vec<FilterDim> {
    let mut dims = Vec::new();
    if !params.ids.is_empty() {
        dims.push(FilterDim::Ids);
    }
    if !params.owners.is_empty() {
        dims.push(FilterDim::Owners);
    }
    if !params.recipients.is_empty() {
        dims.push(FilterDim::Target);
    }
    if !params.bundled_in.is_empty() {
        dims.push(FilterDim::BundledIn);
    }
    if !params.data_roots.is_empty() {
        dims.push(FilterDim::DataRoots);
    }
    dims
}

/// Lookup key: active filter names sorted lexicographically, joined by `_`.
pub fn filter_key(dims: &[FilterDim]) -> String {
    let mut names: Vec<&str> = dims.iter().map(|dim| dim.name()).collect();
    names.sort_unstable();
    names.join("_")
}

/// Physical view name for a filter combination and direction, following the
/// fixed column order.
pub fn filter_view_name(dims: &[FilterDim], dir: SortDir) -> String {
    let columns: Vec<&str> = FilterDim::PHYSICAL_ORDER
        .iter()
        .filter(|dim| dims.contains(*dim))
        .map(|dim| dim.column())
        .collect();
    format!("tx_gql_by_{}_{}", columns.join("_"), dir.suffix())
}

/// Height-bucketed view used when only tag filters are present.
pub fn tag_bucket_view(dir: SortDir) -> ViewId {
    ViewId {
        name: format!("tx_gql_tags_{}", dir.suffix()),
        dir,
    }
}

/// Height-bucketed full-scan view used when no filters are present at all.
pub fn full_scan_view(dir: SortDir) -> ViewId {
    ViewId {
        name: format!("txs_sorted_{}", dir.suffix()),
        dir,
    }
}

/// Registry over all 31 non-empty filter combinations per direction.
fn registry() -> &'static HashMap<(String, SortDir), String> {
    static REGISTRY: OnceLock<HashMap<(String, SortDir), String>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        let dims = FilterDim::PHYSICAL_ORDER;
        for mask in 1u32..(1 << dims.len()) {
            let subset: Vec<FilterDim> = dims
                .iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1 << bit) != 0)
                .map(|(_, dim)| *dim)
                .collect();
            for dir in [SortDir::Asc, SortDir::Desc] {
                map.insert(
                    (filter_key(&subset), dir),
                    filter_view_name(&subset, dir),
                );
            }
        }
        map
    })
}

/// Resolves a non-empty structural filter combination to its view.
pub fn resolve_filter_view(dims: &[FilterDim], dir: SortDir) -> Option<ViewId> {
    registry()
        .get(&(filter_key(dims), dir))
        .map(|name| ViewId {
            name: name.clone(),
            dir,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_holds_all_combinations_per_direction() {
        assert_eq!(registry().len(), 62);
    }

    #[test]
    fn lookup_key_is_lexicographic_while_view_name_is_physical() {
        let dims = vec![FilterDim::DataRoots, FilterDim::Ids, FilterDim::Owners];
        assert_eq!(filter_key(&dims), "dataRoots_ids_owners");
        assert_eq!(
            filter_view_name(&dims, SortDir::Asc),
            "tx_gql_by_tx_id_owner_data_root_asc"
        );
    }

    #[test]
    fn resolve_covers_single_and_full_combinations() {
        let single = resolve_filter_view(&[FilterDim::Owners], SortDir::Desc).unwrap();
        assert_eq!(single.name, "tx_gql_by_owner_desc");

        let full = resolve_filter_view(
            &[
                FilterDim::Ids,
                FilterDim::Owners,
                FilterDim::Target,
                FilterDim::BundledIn,
                FilterDim::DataRoots,
            ],
            SortDir::Asc,
        )
        .unwrap();
        assert_eq!(
            full.name,
            "tx_gql_by_tx_id_owner_target_bundled_in_data_root_asc"
        );
    }

    #[test]
    fn active_filters_map_recipients_to_target() {
        let params = TxQueryParams {
            recipients: vec!["addr".into()],
            ..TxQueryParams::default()
        };
        assert_eq!(active_filters(&params), vec![FilterDim::Target]);
    }

    #[test]
    fn sort_order_round_trips_wire_names() {
        for sort in [SortOrder::HeightAsc, SortOrder::HeightDesc] {
            assert_eq!(SortOrder::from_str(sort.as_str()), Some(sort));
        }
        assert_eq!(SortOrder::from_str("SIDEWAYS"), None);
    }
}
