//! Queries and the DCB append guard built on top of them.

use serde::{Deserialize, Serialize};

use crate::event::EventRecord;
use crate::position::Position;
use crate::tag::Tag;

/// One clause of a [`Query`]: matches events whose type is in
/// `event_types` (or any type, if empty) AND that carry every tag in
/// `tags` (or no constraint, if empty).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryItem {
    /// Event types this clause matches; empty means "any type".
    pub event_types: Vec<String>,
    /// Tags that must all be present; empty means "no tag constraint".
    pub tags: Vec<Tag>,
}

impl QueryItem {
    /// A clause that matches every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// A clause constrained to a single event type.
    pub fn of_type(event_type: impl Into<String>) -> Self {
        Self {
            event_types: vec![event_type.into()],
            tags: Vec::new(),
        }
    }

    /// Returns a copy of this clause with the given tags added.
    pub fn with_tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Returns a copy of this clause with the given event types added.
    pub fn with_event_types(mut self, event_types: impl IntoIterator<Item = String>) -> Self {
        self.event_types.extend(event_types);
        self
    }

    /// Whether this clause imposes no constraint at all.
    pub fn is_unconstrained(&self) -> bool {
        self.event_types.is_empty() && self.tags.is_empty()
    }

    /// Evaluates the matching predicate from the data model: type list
    /// is OR'd (empty = match-any), tag list is AND'd (empty = match-any).
    pub fn matches(&self, event: &EventRecord) -> bool {
        let type_matches = self.event_types.is_empty()
            || self.event_types.iter().any(|t| t == &event.event_type);
        let tags_match = self
            .tags
            .iter()
            .all(|tag| event.has_tag(&tag.key, &tag.value));
        type_matches && tags_match
    }
}

/// A query is the union ("OR") of one or more [`QueryItem`] clauses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// The clauses combined by this query.
    pub items: Vec<QueryItem>,
}

impl Query {
    /// Builds a query from an explicit set of clauses.
    ///
    /// # Panics
    /// Panics if `items` is empty; a query with no clauses can never
    /// match anything and is almost certainly a caller bug. Use
    /// [`Query::all`] to match every event.
    pub fn new(items: Vec<QueryItem>) -> Self {
        assert!(!items.is_empty(), "Query must have at least one item");
        Self { items }
    }

    /// The degenerate query that matches every event in a context.
    pub fn all() -> Self {
        Self {
            items: vec![QueryItem::all()],
        }
    }

    /// A query with a single clause.
    pub fn single(item: QueryItem) -> Self {
        Self { items: vec![item] }
    }

    /// `true` if this query is the degenerate `Query::all()` form:
    /// exactly one item, with no type or tag constraints.
    pub fn is_all(&self) -> bool {
        self.items.len() == 1 && self.items[0].is_unconstrained()
    }

    /// A query matches an event when any of its items matches.
    pub fn matches(&self, event: &EventRecord) -> bool {
        self.items.iter().any(|item| item.matches(event))
    }

    /// If this query has exactly one clause, and that clause names
    /// exactly one event type, returns `(event_type, tags)`. Used by
    /// the `readLast` fast path to decide whether the index-tail
    /// shortcut applies.
    ///
    /// Deliberately restricted to single-clause queries: a per-clause
    /// index tail only proves a clause's own maximum, not the true
    /// maximum across a multi-clause union. A losing clause's real
    /// newest match can sit well below its own tail (the position the
    /// tail points to may lack that clause's tags), while a different
    /// clause's cheap, verified tail is still returned as the answer
    /// for the whole query -- silently wrong.
    pub fn as_typed_clause(&self) -> Option<(&str, &[Tag])> {
        match self.items.as_slice() {
            [item] => match item.event_types.as_slice() {
                [single] => Some((single.as_str(), item.tags.as_slice())),
                _ => None,
            },
            _ => None,
        }
    }
}

/// The optimistic-concurrency guard evaluated atomically with
/// reservation at append time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendCondition {
    /// The query whose match would fail the append.
    pub fail_if_events_match: Query,
    /// Restrict the guard evaluation to positions strictly greater
    /// than this value; `None` means "evaluate over all positions".
    pub after_sequence_position: Option<Position>,
}

impl AppendCondition {
    /// Builds a condition that fails the append if `query` matches any
    /// event after `after`.
    pub fn new(query: Query, after: Option<Position>) -> Self {
        Self {
            fail_if_events_match: query,
            after_sequence_position: after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(event_type: &str, tags: Vec<Tag>) -> EventRecord {
        EventRecord {
            position: Position(1),
            event_type: event_type.to_string(),
            payload: vec![],
            payload_type: "test".to_string(),
            tags,
            metadata: crate::metadata::Metadata::now(),
        }
    }

    #[test]
    fn empty_item_matches_everything() {
        let item = QueryItem::all();
        assert!(item.matches(&event("Anything", vec![])));
    }

    #[test]
    fn type_list_is_or() {
        let item = QueryItem::of_type("A").with_event_types(["B".to_string()]);
        assert!(item.matches(&event("A", vec![])));
        assert!(item.matches(&event("B", vec![])));
        assert!(!item.matches(&event("C", vec![])));
    }

    #[test]
    fn tag_list_is_and() {
        let item = QueryItem::all().with_tags([Tag::new("k1", "v1"), Tag::new("k2", "v2")]);
        assert!(item.matches(&event("X", vec![Tag::new("k1", "v1"), Tag::new("k2", "v2")])));
        assert!(!item.matches(&event("X", vec![Tag::new("k1", "v1")])));
    }

    #[test]
    fn query_is_union_of_items() {
        let query = Query::new(vec![QueryItem::of_type("A"), QueryItem::of_type("B")]);
        assert!(query.matches(&event("A", vec![])));
        assert!(query.matches(&event("B", vec![])));
        assert!(!query.matches(&event("C", vec![])));
    }

    #[test]
    fn query_all_matches_everything_and_is_recognized() {
        let query = Query::all();
        assert!(query.is_all());
        assert!(query.matches(&event("Anything", vec![Tag::new("k", "v")])));
    }

    #[test]
    fn typed_clause_detects_single_type_queries() {
        let query = Query::single(QueryItem::of_type("InvoiceCreated"));
        assert_eq!(query.as_typed_clause().unwrap(), ("InvoiceCreated", &[][..]));

        let untyped = Query::all();
        assert!(untyped.as_typed_clause().is_none());
    }

    #[test]
    fn typed_clause_rejects_multi_clause_queries() {
        let query = Query::new(vec![
            QueryItem::of_type("A"),
            QueryItem::of_type("B").with_tags([Tag::new("k", "v")]),
        ]);
        assert!(query.as_typed_clause().is_none());
    }

    #[test]
    fn typed_clause_rejects_multi_type_single_clause() {
        let query = Query::single(QueryItem::of_type("A").with_event_types(["B".to_string()]));
        assert!(query.as_typed_clause().is_none());
    }
}
