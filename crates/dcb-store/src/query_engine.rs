//! Resolves a [`Query`] to a set of candidate positions via the
//! indices, without touching any event file.

use std::collections::BTreeSet;

use dcb_types::{Position, Query, QueryItem, StoreError};

use crate::index::IndexManager;

/// Resolves `query` to the ascending set of positions strictly greater
/// than `after` that the indices say might match, for a context whose
/// ledger head is `head`.
///
/// This is a superset of the true match set in one sense only: an
/// empty type list or empty tag list within a clause is treated as
/// "every position in range", which can include positions whose event
/// file is missing (skipped later, by the caller) or whose
/// event does not actually carry every required tag from *other*
/// clauses that share the range. Callers re-check
/// [`QueryItem::matches`]/[`Query::matches`] against the loaded event
/// before returning it to a reader.
pub async fn resolve_positions(
    indices: &IndexManager,
    query: &Query,
    after: Position,
    head: Position,
) -> Result<BTreeSet<Position>, StoreError> {
    let mut result = BTreeSet::new();
    for item in &query.items {
        let candidates = resolve_item(indices, item, head).await?;
        result.extend(candidates.into_iter().filter(|p| *p > after));
    }
    Ok(result)
}

async fn resolve_item(
    indices: &IndexManager,
    item: &QueryItem,
    head: Position,
) -> Result<BTreeSet<Position>, StoreError> {
    let type_union = if item.event_types.is_empty() {
        full_range(head)
    } else {
        let mut union = BTreeSet::new();
        for event_type in &item.event_types {
            union.extend(indices.positions_for_type(event_type).await?);
        }
        union
    };

    if item.tags.is_empty() {
        return Ok(type_union);
    }

    let mut intersection: Option<BTreeSet<Position>> = None;
    for tag in &item.tags {
        let positions = indices.positions_for_tag(tag).await?;
        intersection = Some(match intersection {
            None => positions,
            Some(acc) => acc.intersection(&positions).copied().collect(),
        });
    }
    let tag_intersection = intersection.unwrap_or_default();

    Ok(type_union.intersection(&tag_intersection).copied().collect())
}

fn full_range(head: Position) -> BTreeSet<Position> {
    (1..=head.get()).map(Position).collect()
}
