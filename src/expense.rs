//! Expense endpoints: listing and recording expenses.
//!
//! `listExpenses` provides the `Expense` tag and `recordExpense` invalidates
//! it, so any listing that is being watched refreshes itself after a new
//! expense is recorded.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::client::{
    MutationEndpoint, MutationHandle, MutationTrigger, QueryClient, QueryEndpoint, QueryHandle,
    QueryResult, QuerySubscription, Tag,
};
use crate::error::{Error, ValidationError};
use crate::transport::RequestDescriptor;

/// Tag provided by every expense listing.
pub const EXPENSE_TAG: &str = "Expense";

pub const LIST_EXPENSES: &str = "listExpenses";
pub const RECORD_EXPENSE: &str = "recordExpense";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// A recorded expense as returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expense {
    pub id: String,
    /// Amount in yen.
    pub amount: i64,
    pub category: String,
    pub memo: String,
    /// Day the expense happened, `YYYY-MM-DD`.
    pub date: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordExpenseRequest {
    pub amount: i64,
    pub category: String,
    #[serde(default)]
    pub memo: String,
    pub date: String,
}

impl RecordExpenseRequest {
    pub fn new(
        amount: i64,
        category: impl Into<String>,
        memo: impl Into<String>,
        date: impl Into<String>,
    ) -> Self {
        Self {
            amount,
            category: category.into(),
            memo: memo.into(),
            date: date.into(),
        }
    }

    /// Applies the same rules the server enforces.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] listing every rule that failed.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut problems = Vec::new();
        if self.amount <= 0 {
            problems.push("amount must be positive".to_string());
        }
        if self.category.is_empty() {
            problems.push("category is required".to_string());
        }
        if NaiveDate::parse_from_str(&self.date, DATE_FORMAT).is_err() {
            problems.push("date must be in YYYY-MM-DD format".to_string());
        }
        ValidationError::check(problems)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordExpenseResponse {
    pub id: String,
}

/// Paging for `listExpenses`. Unset fields use the server's defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListExpensesParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

impl ListExpensesParams {
    #[must_use]
    pub const fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self { limit, offset }
    }

    /// Returns `None` when no field is set, so a bare listing and an empty
    /// page share one cache entry.
    #[must_use]
    pub const fn into_args(self) -> Option<Self> {
        if self.limit.is_none() && self.offset.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

pub type ListExpensesQuery = QueryHandle<Option<ListExpensesParams>, Vec<Expense>>;
pub type RecordExpenseMutation = MutationHandle<RecordExpenseRequest, RecordExpenseResponse>;

/// `GET /expenses`, providing [`EXPENSE_TAG`].
#[must_use]
pub fn list_expenses() -> QueryEndpoint<Option<ListExpensesParams>, Vec<Expense>> {
    QueryEndpoint::new(LIST_EXPENSES, |params: &Option<ListExpensesParams>| {
        RequestDescriptor::get("/expenses").query(params)
    })
    .provides([Tag::new(EXPENSE_TAG)])
}

/// `POST /expenses`, invalidating [`EXPENSE_TAG`]. Requests failing
/// [`RecordExpenseRequest::validate`] are rejected before they are sent.
#[must_use]
pub fn record_expense() -> MutationEndpoint<RecordExpenseRequest, RecordExpenseResponse> {
    MutationEndpoint::new(RECORD_EXPENSE, |body: &RecordExpenseRequest| {
        body.validate()?;
        RequestDescriptor::post("/expenses").json(body)
    })
    .invalidates([Tag::new(EXPENSE_TAG)])
}

/// The expense endpoints registered on one client.
#[derive(Debug, Clone)]
pub struct ExpenseApi {
    client: QueryClient,
    list: ListExpensesQuery,
    record: RecordExpenseMutation,
}

impl ExpenseApi {
    /// Registers both endpoints on `client`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateEndpoint`] if they are already registered.
    pub fn register(client: &QueryClient) -> Result<Self, Error> {
        Ok(Self {
            list: client.register_query(list_expenses())?,
            record: client.register_mutation(record_expense())?,
            client: client.clone(),
        })
    }

    #[must_use]
    pub const fn client(&self) -> &QueryClient {
        &self.client
    }

    #[must_use]
    pub const fn list_handle(&self) -> &ListExpensesQuery {
        &self.list
    }

    #[must_use]
    pub const fn record_handle(&self) -> &RecordExpenseMutation {
        &self.record
    }

    /// Lists expenses through the cache.
    ///
    /// # Errors
    ///
    /// See [`QueryClient::query`].
    pub async fn list(
        &self,
        params: ListExpensesParams,
    ) -> Result<QueryResult<Vec<Expense>>, Error> {
        self.client.query(&self.list, &params.into_args()).await
    }

    /// Subscribes to a listing.
    ///
    /// # Errors
    ///
    /// See [`QueryClient::subscribe`].
    pub fn watch_list(
        &self,
        params: ListExpensesParams,
    ) -> Result<QuerySubscription<Vec<Expense>>, Error> {
        self.client.subscribe(&self.list, &params.into_args())
    }

    /// Records an expense.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] without sending anything if `request` is
    /// invalid, otherwise see [`QueryClient::mutate`].
    pub async fn record(
        &self,
        request: &RecordExpenseRequest,
    ) -> Result<RecordExpenseResponse, Error> {
        self.client.mutate(&self.record, request).await
    }

    #[must_use]
    pub fn record_trigger(&self) -> MutationTrigger<RecordExpenseRequest, RecordExpenseResponse> {
        self.client.mutation(&self.record)
    }
}
