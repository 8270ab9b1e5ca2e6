//! Shared shape of the CRUD resources exposed under `/api/<resource>`.

use chrono::NaiveDate;
use serde::{de::DeserializeOwned, Serialize};
use sqlx::postgres::PgRow;
use sqlx::query_builder::Separated;
use sqlx::{FromRow, Postgres};
use uuid::Uuid;
use validator::Validate;

/// How a query parameter is parsed and compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Text,
    Id,
    Flag,
    /// Inclusive lower bound on a date or timestamp column.
    From,
    /// Inclusive upper bound on a date or timestamp column.
    To,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Filter {
    pub param: &'static str,
    pub column: &'static str,
    pub kind: FilterKind,
}

impl Filter {
    pub const fn text(param: &'static str, column: &'static str) -> Self {
        Self { param, column, kind: FilterKind::Text }
    }

    pub const fn id(param: &'static str, column: &'static str) -> Self {
        Self { param, column, kind: FilterKind::Id }
    }

    pub const fn flag(param: &'static str, column: &'static str) -> Self {
        Self { param, column, kind: FilterKind::Flag }
    }

    pub const fn from(param: &'static str, column: &'static str) -> Self {
        Self { param, column, kind: FilterKind::From }
    }

    pub const fn to(param: &'static str, column: &'static str) -> Self {
        Self { param, column, kind: FilterKind::To }
    }
}

/// A parsed filter value, ready to bind.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Text(String),
    Id(Uuid),
    Flag(bool),
    Date(NaiveDate),
}

/// A row type served by the generic list/get handlers.
pub trait Resource: for<'r> FromRow<'r, PgRow> + Serialize + Send + Unpin + 'static {
    const TABLE: &'static str;
    /// Response key for lists, e.g. `patients`.
    const COLLECTION: &'static str;
    /// Response key for single objects, e.g. `patient`.
    const SINGULAR: &'static str;
    /// Query parameters the list endpoint accepts. Anything else is ignored.
    const FILTERS: &'static [Filter];
    const ORDER_BY: &'static str;
    const DEFAULT_LIMIT: i64 = 50;
}

/// A validated request body that inserts one row of `Output`.
pub trait NewResource: DeserializeOwned + Validate + Send + 'static {
    type Output: Resource;

    const COLUMNS: &'static [&'static str];

    /// Push one bind per entry of `COLUMNS`, in the same order.
    fn bind_values(&self, values: &mut Separated<'_, '_, Postgres, &'static str>);
}
