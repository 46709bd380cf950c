//! Planner integration tests: view routing, cursor continuation, adaptive
//! bucket scans, and client-input rejection.

mod support;

use anyhow::Result;
use permagate::chain::types::Tag;
use permagate::query::QueryError;
use permagate::store::keys::{tx_index, GqlBucket};
use permagate::store::rows::{SortDir, TxGqlRow};
use permagate::store::GatewayStore;
use permagate::{BlockRange, Cursor, MemoryStore, SortOrder, TagFilter, TxQueryParams, TxSearcher};
use std::sync::Arc;

async fn seed_tx(
    store: &MemoryStore,
    height: u64,
    sub: u64,
    id: &str,
    owner: &str,
    tags: &[(&str, &str)],
) {
    let tag_pairs: Vec<String> = tags
        .iter()
        .map(|(name, value)| Tag::from_utf8(name, value).pair())
        .collect();
    for dir in [SortDir::Asc, SortDir::Desc] {
        store
            .put_tx_gql(
                dir,
                TxGqlRow {
                    bucket: GqlBucket::for_height(height),
                    tx_id: id.to_owned(),
                    tx_index: tx_index(height, sub),
                    data_item_index: 0,
                    owner: owner.to_owned(),
                    target: String::new(),
                    bundled_in: None,
                    data_root: String::new(),
                    tag_pairs: tag_pairs.clone(),
                },
            )
            .await
            .unwrap();
    }
}

fn owner_query(owner: &str, first: u32, sort: SortOrder) -> TxQueryParams {
    TxQueryParams {
        owners: vec![owner.to_owned()],
        first: Some(first),
        sort,
        ..TxQueryParams::default()
    }
}

fn ids(page: &permagate::TxPage) -> Vec<&str> {
    page.items.iter().map(|item| item.tx_id.as_str()).collect()
}

#[tokio::test]
async fn structural_filter_paginates_with_cursors() -> Result<()> {
    support::init_tracing();

    let store = Arc::new(MemoryStore::new());
    for height in 1..=5u64 {
        seed_tx(&store, height, 0, &format!("alice-{height}"), "alice", &[]).await;
    }
    seed_tx(&store, 3, 1, "bob-3", "bob", &[]).await;

    let searcher = TxSearcher::new(store.clone());

    let mut params = owner_query("alice", 2, SortOrder::HeightAsc);
    let first_page = searcher.find(10, &params).await?;
    assert_eq!(ids(&first_page), vec!["alice-1", "alice-2"]);
    assert!(first_page.has_next_page);

    params.after = first_page.items[1].cursor.clone();
    assert!(params.after.is_some(), "full page should carry a cursor");
    let second_page = searcher.find(10, &params).await?;
    assert_eq!(ids(&second_page), vec!["alice-3", "alice-4"]);
    assert!(second_page.has_next_page);

    params.after = second_page.items[1].cursor.clone();
    let last_page = searcher.find(10, &params).await?;
    assert_eq!(ids(&last_page), vec!["alice-5"]);
    assert!(!last_page.has_next_page);
    assert!(last_page.items[0].cursor.is_none());
    Ok(())
}

#[tokio::test]
async fn descending_sort_walks_height_backwards() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    for height in 1..=3u64 {
        seed_tx(&store, height, 0, &format!("tx-{height}"), "alice", &[]).await;
    }

    let searcher = TxSearcher::new(store);
    let page = searcher
        .find(10, &owner_query("alice", 10, SortOrder::HeightDesc))
        .await?;
    assert_eq!(ids(&page), vec!["tx-3", "tx-2", "tx-1"]);
    assert!(!page.has_next_page);
    Ok(())
}

#[tokio::test]
async fn exact_limit_yields_no_next_page() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    for height in 1..=3u64 {
        seed_tx(&store, height, 0, &format!("tx-{height}"), "alice", &[]).await;
    }

    let searcher = TxSearcher::new(store);
    let page = searcher
        .find(10, &owner_query("alice", 3, SortOrder::HeightAsc))
        .await?;
    assert_eq!(page.items.len(), 3);
    assert!(!page.has_next_page);
    Ok(())
}

#[tokio::test]
async fn zero_page_size_short_circuits() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    seed_tx(&store, 1, 0, "tx-1", "alice", &[]).await;

    let searcher = TxSearcher::new(store);
    let page = searcher
        .find(10, &owner_query("alice", 0, SortOrder::HeightAsc))
        .await?;
    assert!(page.items.is_empty());
    assert!(!page.has_next_page);
    Ok(())
}

#[tokio::test]
async fn mismatched_cursor_sort_order_is_rejected() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    for height in 1..=4u64 {
        seed_tx(&store, height, 0, &format!("tx-{height}"), "alice", &[]).await;
    }
    let searcher = TxSearcher::new(store);

    let asc_page = searcher
        .find(10, &owner_query("alice", 2, SortOrder::HeightAsc))
        .await?;
    let asc_cursor = asc_page.items[1].cursor.clone().expect("cursor");

    let mut desc_params = owner_query("alice", 2, SortOrder::HeightDesc);
    desc_params.after = Some(asc_cursor);
    let err = searcher.find(10, &desc_params).await.unwrap_err();
    assert!(
        matches!(err, QueryError::CursorSortMismatch { .. }),
        "expected sort mismatch, got {err}"
    );
    Ok(())
}

#[tokio::test]
async fn foreign_cursor_kind_is_rejected() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    seed_tx(&store, 1, 0, "tx-1", "alice", &[]).await;
    let searcher = TxSearcher::new(store);

    let foreign = Cursor {
        kind: "block_search".to_owned(),
        sort: SortOrder::HeightAsc,
        tx_index: 0,
        data_item_index: 0,
        bucket: -1,
    };
    let mut params = owner_query("alice", 2, SortOrder::HeightAsc);
    params.after = Some(foreign.encode());
    let err = searcher.find(10, &params).await.unwrap_err();
    assert!(matches!(err, QueryError::CursorKindMismatch { .. }));

    params.after = Some("!!garbage!!".to_owned());
    let err = searcher.find(10, &params).await.unwrap_err();
    assert!(matches!(err, QueryError::InvalidCursor { .. }));
    Ok(())
}

#[tokio::test]
async fn block_range_narrows_the_scan() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    for height in 1..=5u64 {
        seed_tx(&store, height, 0, &format!("tx-{height}"), "alice", &[]).await;
    }

    let searcher = TxSearcher::new(store);
    let params = TxQueryParams {
        owners: vec!["alice".to_owned()],
        block: BlockRange {
            min: Some(2),
            max: Some(4),
        },
        first: Some(10),
        sort: SortOrder::HeightAsc,
        ..TxQueryParams::default()
    };
    let page = searcher.find(10, &params).await?;
    assert_eq!(ids(&page), vec!["tx-2", "tx-3", "tx-4"]);
    Ok(())
}

#[tokio::test]
async fn full_scan_route_resumes_from_bucket_cursor() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    // Heights 10, 1500, and 2600 land in full-scan buckets 0, 1, and 2.
    seed_tx(&store, 10, 0, "tx-low", "a", &[]).await;
    seed_tx(&store, 1_500, 0, "tx-mid", "b", &[]).await;
    seed_tx(&store, 2_600, 0, "tx-high", "c", &[]).await;

    let searcher = TxSearcher::new(store);
    let mut params = TxQueryParams {
        first: Some(2),
        sort: SortOrder::HeightAsc,
        ..TxQueryParams::default()
    };

    let first_page = searcher.find(3_000, &params).await?;
    assert_eq!(ids(&first_page), vec!["tx-low", "tx-mid"]);
    assert!(first_page.has_next_page);

    params.after = first_page.items[1].cursor.clone();
    let second_page = searcher.find(3_000, &params).await?;
    assert_eq!(ids(&second_page), vec!["tx-high"]);
    assert!(!second_page.has_next_page);

    params.after = None;
    params.sort = SortOrder::HeightDesc;
    let desc_page = searcher.find(3_000, &params).await?;
    assert_eq!(ids(&desc_page), vec!["tx-high", "tx-mid"]);
    Ok(())
}

#[tokio::test]
async fn tag_route_matches_pairs_across_buckets() -> Result<()> {
    let store = Arc::new(MemoryStore::new());
    seed_tx(&store, 10, 0, "tagged-low", "a", &[("App-Name", "wanted")]).await;
    seed_tx(&store, 50, 0, "other", "b", &[("App-Name", "other")]).await;
    seed_tx(&store, 250, 0, "tagged-high", "c", &[("App-Name", "wanted")]).await;

    let searcher = TxSearcher::new(store);
    let params = TxQueryParams {
        tags: vec![TagFilter {
            name: "App-Name".to_owned(),
            values: vec!["wanted".to_owned()],
        }],
        first: Some(10),
        sort: SortOrder::HeightAsc,
        ..TxQueryParams::default()
    };
    let page = searcher.find(1_000, &params).await?;
    assert_eq!(ids(&page), vec!["tagged-low", "tagged-high"]);
    assert!(!page.has_next_page);
    Ok(())
}

#[tokio::test]
async fn round_trip_cap_is_a_visible_error() {
    // An enormous empty height range forces more than the allowed number of
    // bucket scans before the limit can be satisfied.
    let store = Arc::new(MemoryStore::new());
    let searcher = TxSearcher::new(store);
    let params = TxQueryParams {
        first: Some(10),
        sort: SortOrder::HeightAsc,
        ..TxQueryParams::default()
    };

    let err = searcher.find(40_000_000, &params).await.unwrap_err();
    assert!(matches!(err, QueryError::Timeout), "got {err}");
}
