//! Query Planner (spec §4.G): picks one secondary index or a full scan for
//! a filter AST, producing a plan the Operation Layer executes against the
//! Storage Engine and Index Manager.

use crate::filter::ast::Filter;
use crate::index::{IndexKind, IndexManager, MIN_SUBSTRING_KEY_LEN};

pub const COST_FULL_SCAN: u64 = 10_000;
pub const COST_INDEX_LOOKUP: u64 = 10;
pub const COST_PRESENCE_INDEX: u64 = 30;
pub const COST_SUBSTRING_INDEX: u64 = 50;
pub const COST_POST_FILTER: u64 = 100;

/// The planner's output for one filter: which index (if any) drives
/// iteration, what residual predicate must still be checked per candidate,
/// and the cost that justified the choice.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub use_index: bool,
    pub index_attr: Option<String>,
    pub index_kind: Option<IndexKind>,
    pub index_key: Option<String>,
    pub substring_pattern: Option<String>,
    pub post_filter: Option<Filter>,
    pub estimated_cost: u64,
    /// Open Question 1: OR never drives an index union today (§9); this
    /// records what the union would have cost, for telemetry only — it is
    /// never used to pick an execution path.
    pub or_union_telemetry_cost: Option<u64>,
    pub original_filter: Filter,
}

/// Plans `filter` against `index`'s current catalog (rule order from spec
/// §4.G, cheapest-first).
pub fn plan(filter: &Filter, index: &IndexManager) -> QueryPlan {
    match filter {
        Filter::Equality { attr, value } => plan_equality(attr, value, filter, index),
        Filter::Present { attr } => plan_presence(attr, filter, index),
        Filter::Substring { attr, .. } => plan_substring(attr, filter, index),
        Filter::GreaterOrEqual { attr, value } => plan_range(attr, value, filter, index, true),
        Filter::LessOrEqual { attr, value } => plan_range(attr, value, filter, index, false),
        Filter::And(children) => plan_and(children, index),
        Filter::Or(children) => plan_or(children, index),
        Filter::Not(_) => full_scan(filter.clone()),
        Filter::ApproxMatch { .. } => full_scan(filter.clone()),
    }
}

fn full_scan(filter: Filter) -> QueryPlan {
    QueryPlan {
        use_index: false,
        index_attr: None,
        index_kind: None,
        index_key: None,
        substring_pattern: None,
        post_filter: Some(filter.clone()),
        estimated_cost: COST_FULL_SCAN,
        or_union_telemetry_cost: None,
        original_filter: filter,
    }
}

fn plan_equality(attr: &str, value: &[u8], filter: &Filter, index: &IndexManager) -> QueryPlan {
    if index.has_index(attr, IndexKind::Equality) {
        QueryPlan {
            use_index: true,
            index_attr: Some(attr.to_string()),
            index_kind: Some(IndexKind::Equality),
            index_key: Some(String::from_utf8_lossy(value).into_owned()),
            substring_pattern: None,
            post_filter: None,
            estimated_cost: COST_INDEX_LOOKUP,
            or_union_telemetry_cost: None,
            original_filter: filter.clone(),
        }
    } else {
        full_scan(filter.clone())
    }
}

fn plan_presence(attr: &str, filter: &Filter, index: &IndexManager) -> QueryPlan {
    if index.has_index(attr, IndexKind::Presence) {
        QueryPlan {
            use_index: true,
            index_attr: Some(attr.to_string()),
            index_kind: Some(IndexKind::Presence),
            index_key: None,
            substring_pattern: None,
            post_filter: None,
            estimated_cost: COST_PRESENCE_INDEX,
            or_union_telemetry_cost: None,
            original_filter: filter.clone(),
        }
    } else {
        full_scan(filter.clone())
    }
}

fn plan_substring(attr: &str, filter: &Filter, index: &IndexManager) -> QueryPlan {
    let Filter::Substring {
        initial,
        any,
        r#final,
        ..
    } = filter
    else {
        unreachable!("plan_substring called with non-substring filter")
    };
    if !index.has_index(attr, IndexKind::Substring) {
        return full_scan(filter.clone());
    }
    let mut candidates = initial
        .iter()
        .chain(any.iter())
        .chain(r#final.iter())
        .map(|v| String::from_utf8_lossy(v).into_owned());
    let Some(pattern) = candidates.find(|c| c.len() >= MIN_SUBSTRING_KEY_LEN) else {
        return full_scan(filter.clone());
    };
    QueryPlan {
        use_index: true,
        index_attr: Some(attr.to_string()),
        index_kind: Some(IndexKind::Substring),
        index_key: None,
        substring_pattern: Some(pattern),
        // The index returns a superset; the original substring predicate
        // must still be checked against each candidate (spec §4.G rule 3).
        post_filter: Some(filter.clone()),
        estimated_cost: COST_SUBSTRING_INDEX,
        or_union_telemetry_cost: None,
        original_filter: filter.clone(),
    }
}

fn plan_range(
    attr: &str,
    value: &[u8],
    filter: &Filter,
    index: &IndexManager,
    is_lower_bound: bool,
) -> QueryPlan {
    if !index.has_index(attr, IndexKind::Equality) {
        return full_scan(filter.clone());
    }
    let _ = is_lower_bound;
    QueryPlan {
        use_index: true,
        index_attr: Some(attr.to_string()),
        index_kind: Some(IndexKind::Equality),
        index_key: Some(String::from_utf8_lossy(value).into_owned()),
        substring_pattern: None,
        // The range scan over an ordered index is only a candidate set;
        // the exact lexicographic comparison is re-checked per candidate.
        post_filter: Some(filter.clone()),
        estimated_cost: 2 * COST_INDEX_LOOKUP,
        or_union_telemetry_cost: None,
        original_filter: filter.clone(),
    }
}

fn plan_and(children: &[Filter], index: &IndexManager) -> QueryPlan {
    let child_plans: Vec<QueryPlan> = children.iter().map(|c| plan(c, index)).collect();

    let driver_idx = child_plans
        .iter()
        .enumerate()
        .filter(|(_, p)| p.use_index)
        .min_by_key(|(_, p)| p.estimated_cost)
        .map(|(i, _)| i);

    let Some(driver_idx) = driver_idx else {
        return full_scan(Filter::And(children.to_vec()));
    };
    let driver = &child_plans[driver_idx];

    let mut residual = Vec::new();
    if let Some(driver_post) = &driver.post_filter {
        residual.push(driver_post.clone());
    }
    for (i, child) in children.iter().enumerate() {
        if i != driver_idx {
            residual.push(child.clone());
        }
    }

    QueryPlan {
        use_index: true,
        index_attr: driver.index_attr.clone(),
        index_kind: driver.index_kind,
        index_key: driver.index_key.clone(),
        substring_pattern: driver.substring_pattern.clone(),
        post_filter: combine_and(residual),
        estimated_cost: driver.estimated_cost + COST_POST_FILTER,
        or_union_telemetry_cost: None,
        original_filter: Filter::And(children.to_vec()),
    }
}

fn combine_and(mut filters: Vec<Filter>) -> Option<Filter> {
    match filters.len() {
        0 => None,
        1 => filters.pop(),
        _ => Some(Filter::And(filters)),
    }
}

/// OR only uses an index union when every child has one (otherwise the
/// union would miss non-indexed matches). The planner currently never
/// executes that union — it falls back to full scan and records the
/// would-be cost for telemetry only (spec §4.G rule 6, Open Question 1).
fn plan_or(children: &[Filter], index: &IndexManager) -> QueryPlan {
    let child_plans: Vec<QueryPlan> = children.iter().map(|c| plan(c, index)).collect();
    let telemetry_cost = if !child_plans.is_empty() && child_plans.iter().all(|p| p.use_index) {
        Some(
            child_plans.iter().map(|p| p.estimated_cost).sum::<u64>() + COST_POST_FILTER,
        )
    } else {
        None
    };
    QueryPlan {
        use_index: false,
        index_attr: None,
        index_kind: None,
        index_key: None,
        substring_pattern: None,
        post_filter: Some(Filter::Or(children.to_vec())),
        estimated_cost: COST_FULL_SCAN,
        or_union_telemetry_cost: telemetry_cost,
        original_filter: Filter::Or(children.to_vec()),
    }
}
