//! Transaction search planner.
//!
//! Structural-filter queries resolve to one specialized view and run a
//! single bounded range scan. Queries without structural filters walk
//! height buckets in sort order, merging an adaptively sized window of
//! buckets into each scan: windows shrink as the bucket's approximate height
//! grows, because transaction density per bucket rises over the chain's
//! lifetime and a fixed window would fan out into unbounded read
//! amplification.

use crate::query::cursor::{Cursor, TX_SEARCH_CURSOR};
use crate::query::filter::{
    active_filters, full_scan_view, resolve_filter_view, tag_bucket_view, SortOrder, TxQueryParams,
};
use crate::query::QueryError;
use crate::runtime::telemetry::Telemetry;
use crate::store::keys::{bucket_approx_height, TAG_BUCKET_SPAN, TX_BUCKET_SPAN, TX_INDEX_STRIDE};
use crate::store::{BucketScan, FilterScan, GatewayStore, ViewHit, ViewId};
use crate::chain::types::encode_tag_component;
use std::sync::Arc;

/// Page size bounds.
pub const MAX_PAGE_SIZE: u32 = 100;
pub const DEFAULT_PAGE_SIZE: u32 = 10;

/// Hard cap on store round trips per request. Exceeding it is a
/// user-visible error, never silent truncation.
pub const MAX_SCAN_ROUND_TRIPS: usize = 100;

/// One returned row plus the cursor that resumes the scan after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxSearchHit {
    pub tx_id: String,
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxPage {
    pub items: Vec<TxSearchHit>,
    pub has_next_page: bool,
}

impl TxPage {
    fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_next_page: false,
        }
    }
}

enum ScanRoute {
    Filtered(ViewId),
    TagBuckets(ViewId),
    FullBuckets(ViewId),
}

pub struct TxSearcher {
    store: Arc<dyn GatewayStore>,
    telemetry: Option<Arc<Telemetry>>,
}

impl TxSearcher {
    pub fn new(store: Arc<dyn GatewayStore>) -> Self {
        Self {
            store,
            telemetry: None,
        }
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Executes one page of a transaction search bounded by the gateway's
    /// current max height.
    pub async fn find(
        &self,
        max_height: u64,
        params: &TxQueryParams,
    ) -> Result<TxPage, QueryError> {
        let dims = active_filters(params);
        let has_tags = !params.tags.is_empty();
        let dir = params.sort.dir();

        let route = if dims.is_empty() && has_tags {
            ScanRoute::TagBuckets(tag_bucket_view(dir))
        } else if dims.is_empty() {
            ScanRoute::FullBuckets(full_scan_view(dir))
        } else {
            let view = resolve_filter_view(&dims, dir).ok_or_else(|| QueryError::Backend {
                detail: "filter combination has no registered view".to_owned(),
            })?;
            ScanRoute::Filtered(view)
        };

        let cursor = match params.after.as_deref() {
            Some(encoded) if !encoded.is_empty() => Some(Cursor::decode(encoded)?),
            _ => None,
        };
        if let Some(cursor) = &cursor {
            if cursor.kind != TX_SEARCH_CURSOR {
                return Err(QueryError::CursorKindMismatch {
                    expected: TX_SEARCH_CURSOR,
                    got: cursor.kind.clone(),
                });
            }
            if cursor.sort != params.sort {
                return Err(QueryError::CursorSortMismatch {
                    expected: params.sort,
                    got: cursor.sort,
                });
            }
        }

        let limit = params
            .first
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE) as usize;
        if limit == 0 {
            return Ok(TxPage::empty());
        }

        let mut min_idx = params
            .block
            .min
            .map(|height| height.saturating_mul(TX_INDEX_STRIDE))
            .unwrap_or(0);
        let mut max_idx = params
            .block
            .max
            .map(|height| {
                height
                    .saturating_add(1)
                    .saturating_mul(TX_INDEX_STRIDE)
                    .saturating_sub(1)
            })
            .unwrap_or_else(|| max_height.saturating_add(1).saturating_mul(TX_INDEX_STRIDE));

        // A valid cursor narrows the bound toward the continuation point;
        // the encoded position is the first unreturned row, so bounds stay
        // inclusive.
        if let Some(cursor) = &cursor {
            match params.sort {
                SortOrder::HeightAsc => min_idx = min_idx.max(cursor.tx_index),
                SortOrder::HeightDesc => max_idx = cursor.tx_index,
            }
        }

        let tag_pairs = tag_pairs(params);

        let (rows, round_trips) = match &route {
            ScanRoute::Filtered(view) => {
                let scan = FilterScan {
                    min_tx_index: min_idx,
                    max_tx_index: max_idx,
                    ids: params.ids.clone(),
                    owners: params.owners.clone(),
                    targets: params.recipients.clone(),
                    data_roots: params.data_roots.clone(),
                    bundled_in: params.bundled_in.clone(),
                    tag_pairs,
                    limit: limit + 1,
                };
                let hits = self
                    .store
                    .scan_filter_view(view, scan)
                    .await
                    .map_err(backend)?;
                (
                    hits.into_iter().map(|hit| (hit, -1i64)).collect::<Vec<_>>(),
                    1usize,
                )
            }
            ScanRoute::TagBuckets(view) => {
                self.bucket_scan(BucketPlan {
                    view,
                    tag_view: true,
                    span: TAG_BUCKET_SPAN,
                    min_idx,
                    max_idx,
                    resume_bucket: cursor.as_ref().map(|cursor| cursor.bucket),
                    sort: params.sort,
                    tag_pairs,
                    limit,
                })
                .await?
            }
            ScanRoute::FullBuckets(view) => {
                self.bucket_scan(BucketPlan {
                    view,
                    tag_view: false,
                    span: TX_BUCKET_SPAN,
                    min_idx,
                    max_idx,
                    resume_bucket: cursor.as_ref().map(|cursor| cursor.bucket),
                    sort: params.sort,
                    tag_pairs: Vec::new(),
                    limit,
                })
                .await?
            }
        };

        if let Some(telemetry) = &self.telemetry {
            telemetry.record_query_page(round_trips as u64);
        }

        let has_next_page = rows.len() > limit;
        let encode_at = |row: &(ViewHit, i64)| {
            Cursor::tx_search(params.sort, row.0.tx_index, row.0.data_item_index, row.1).encode()
        };
        let items = rows
            .iter()
            .take(limit)
            .enumerate()
            .map(|(index, row)| TxSearchHit {
                tx_id: row.0.tx_id.clone(),
                cursor: rows.get(index + 1).map(encode_at),
            })
            .collect();

        Ok(TxPage {
            items,
            has_next_page,
        })
    }

    async fn bucket_scan(
        &self,
        plan: BucketPlan<'_>,
    ) -> Result<(Vec<(ViewHit, i64)>, usize), QueryError> {
        let bucket_stride = plan.span * TX_INDEX_STRIDE;
        let mut first_bucket = plan.min_idx / bucket_stride;
        let mut last_bucket = plan.max_idx / bucket_stride;

        if let Some(bucket) = plan.resume_bucket {
            if bucket >= 0 {
                match plan.sort {
                    SortOrder::HeightAsc => first_bucket = bucket as u64,
                    SortOrder::HeightDesc => last_bucket = bucket as u64,
                }
            }
        }

        if first_bucket > last_bucket {
            return Ok((Vec::new(), 0));
        }

        let mut buckets: Vec<u64> = (first_bucket..=last_bucket).collect();
        if plan.sort == SortOrder::HeightDesc {
            buckets.reverse();
        }

        let mut rows: Vec<(ViewHit, i64)> = Vec::new();
        let mut next_bucket = 0usize;
        let mut round_trips = 0usize;

        while next_bucket < buckets.len() && rows.len() < plan.limit {
            if round_trips >= MAX_SCAN_ROUND_TRIPS {
                return Err(QueryError::Timeout);
            }

            let approx = bucket_approx_height(buckets[next_bucket], plan.span);
            let window = bucket_window(plan.tag_view, approx, !rows.is_empty())
                .min(buckets.len() - next_bucket);
            let slice = buckets[next_bucket..next_bucket + window].to_vec();

            let hits = self
                .store
                .scan_bucket_view(
                    plan.view,
                    BucketScan {
                        min_tx_index: plan.min_idx,
                        max_tx_index: plan.max_idx,
                        buckets: slice,
                        span: plan.span,
                        tag_pairs: plan.tag_pairs.clone(),
                        limit: plan.limit - rows.len() + 1,
                    },
                )
                .await
                .map_err(backend)?;
            rows.extend(
                hits.into_iter()
                    .map(|bucket_hit| (bucket_hit.hit, bucket_hit.bucket as i64)),
            );

            next_bucket += window;
            round_trips += 1;
        }

        Ok((rows, round_trips))
    }
}

/// One bucket-route execution: bounds, resume position, and the view to walk.
struct BucketPlan<'a> {
    view: &'a ViewId,
    tag_view: bool,
    span: u64,
    min_idx: u64,
    max_idx: u64,
    resume_bucket: Option<i64>,
    sort: SortOrder,
    tag_pairs: Vec<String>,
    limit: usize,
}

/// Buckets merged into the next scan, as a monotone step function of the
/// bucket's approximate height. Tag views tolerate wider windows than full
/// scans; an empty result so far widens the window in both cases.
pub(crate) fn bucket_window(tag_view: bool, approx_height: u64, have_results: bool) -> usize {
    if approx_height < 500_000 {
        match (tag_view, have_results) {
            (false, true) => 20,
            (false, false) => 200,
            (true, true) => 200,
            (true, false) => 2000,
        }
    } else if approx_height < 600_000 {
        match (tag_view, have_results) {
            (false, true) => 10,
            (false, false) => 50,
            (true, true) => 100,
            (true, false) => 500,
        }
    } else if approx_height < 700_000 {
        match (tag_view, have_results) {
            (false, true) => 5,
            (false, false) => 40,
            (true, true) => 50,
            (true, false) => 400,
        }
    } else {
        match (tag_view, have_results) {
            (false, true) => 1,
            (false, false) => 30,
            (true, true) => 2,
            (true, false) => 300,
        }
    }
}

fn tag_pairs(params: &TxQueryParams) -> Vec<String> {
    let mut pairs = Vec::new();
    for tag in &params.tags {
        let name = encode_tag_component(&tag.name);
        for value in &tag.values {
            pairs.push(format!("{name}|{}", encode_tag_component(value)));
        }
    }
    pairs
}

fn backend(err: anyhow::Error) -> QueryError {
    QueryError::Backend {
        detail: format!("{err:#}"),
    }
}
