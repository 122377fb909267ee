//! Filter expressions and store queries
//!
//! Typed filter values keep the store side free of string parsing: the query
//! engine converts raw request parameters once, and every store evaluates the
//! same [`FilterExpr`] list.

use serde::{Deserialize, Serialize};

use crate::{EntityKind, Timestamp};

/// Filter operator for field comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOperator {
    /// Equal to
    Eq,
    /// Case-insensitive substring match (strings only)
    Contains,
    /// Greater than or equal
    Gte,
    /// Less than or equal
    Lte,
}

/// Typed right-hand side of a filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum FilterValue {
    Text(String),
    Integer(i64),
    Timestamp(Timestamp),
    Bool(bool),
}

/// Filter over a dotted body path such as `reactions.total_count`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterExpr {
    /// Field to filter on
    pub field: String,
    /// Operator to apply
    pub operator: FilterOperator,
    /// Value to compare against
    pub value: FilterValue,
}

impl FilterExpr {
    /// Create a new filter expression.
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: FilterValue) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: FilterValue) -> Self {
        Self::new(field, FilterOperator::Eq, value)
    }

    /// Create a contains filter.
    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::Contains, FilterValue::Text(needle.into()))
    }

    pub fn gte(field: impl Into<String>, value: FilterValue) -> Self {
        Self::new(field, FilterOperator::Gte, value)
    }

    pub fn lte(field: impl Into<String>, value: FilterValue) -> Self {
        Self::new(field, FilterOperator::Lte, value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

/// Sort on a dotted body path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    pub direction: SortDirection,
}

impl SortField {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Filtered, ordered window over one entity kind.
///
/// Stores order by `order` and then always by record key ascending, so two
/// identical queries over unchanged data return identical windows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreQuery {
    pub kind: EntityKind,
    pub filters: Vec<FilterExpr>,
    pub order: Vec<SortField>,
    pub offset: usize,
    pub limit: usize,
}

impl StoreQuery {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            filters: Vec::new(),
            order: Vec::new(),
            offset: 0,
            limit: usize::MAX,
        }
    }

    pub fn filter(mut self, expr: FilterExpr) -> Self {
        self.filters.push(expr);
        self
    }

    pub fn order_by(mut self, field: SortField) -> Self {
        self.order.push(field);
        self
    }

    pub fn window(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = limit;
        self
    }

    /// All children of `parent_key` for a child kind. `None` for root kinds.
    pub fn children_of(kind: EntityKind, parent_key: &str) -> Option<Self> {
        let field = kind.parent_field()?;
        Some(Self::new(kind).filter(FilterExpr::eq(field, FilterValue::Text(parent_key.to_string()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_children_of_uses_parent_field() {
        let q = StoreQuery::children_of(EntityKind::Employee, "acme").unwrap();
        assert_eq!(q.filters[0].field, "company_page_id");
        assert_eq!(q.filters[0].value, FilterValue::Text("acme".into()));
        assert!(StoreQuery::children_of(EntityKind::Page, "acme").is_none());
    }

    #[test]
    fn test_builder_window() {
        let q = StoreQuery::new(EntityKind::Post)
            .order_by(SortField::desc("published_at"))
            .window(20, 10);
        assert_eq!(q.offset, 20);
        assert_eq!(q.limit, 10);
        assert_eq!(q.order[0].direction, SortDirection::Desc);
    }
}
