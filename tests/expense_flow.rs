// End-to-end tests for the expense endpoints against an in-memory server.

use std::sync::{Arc, Mutex};

use kakei::client::QueryClient;
use kakei::error::{Error, TransportError};
use kakei::expense::{
    Expense, ExpenseApi, ListExpensesParams, RecordExpenseRequest, RecordExpenseResponse,
};
use kakei::transport::mock::MockTransport;
use kakei::transport::{Method, RequestDescriptor};
use serde_json::{Value, json};

#[derive(Default)]
struct Server {
    rows: Mutex<Vec<Expense>>,
    requests: Mutex<Vec<String>>,
}

impl Server {
    fn handle(&self, request: &RequestDescriptor) -> Result<Value, TransportError> {
        self.requests.lock().expect("lock").push(request.to_string());

        match (request.method, request.path.as_str()) {
            (Method::Get, "/expenses") => {
                let rows = self.rows.lock().expect("lock");
                let param = |name: &str| {
                    request
                        .params
                        .iter()
                        .find(|(key, _)| key == name)
                        .and_then(|(_, value)| value.parse::<usize>().ok())
                };
                let offset = param("offset").unwrap_or(0);
                let limit = param("limit").unwrap_or(50);
                let page: Vec<_> = rows.iter().rev().skip(offset).take(limit).cloned().collect();
                Ok(json!(page))
            }
            (Method::Post, "/expenses") => {
                let body = request.body.clone().unwrap_or_default();
                let Ok(cmd) = serde_json::from_value::<RecordExpenseRequest>(body) else {
                    return Err(bad_request("invalid request body"));
                };
                if cmd.amount <= 0 {
                    return Err(bad_request("amount must be positive"));
                }
                let mut rows = self.rows.lock().expect("lock");
                let id = if rows.is_empty() {
                    "new-id".to_string()
                } else {
                    format!("id-{}", rows.len())
                };
                rows.push(Expense {
                    id: id.clone(),
                    amount: cmd.amount,
                    category: cmd.category,
                    memo: cmd.memo,
                    date: cmd.date,
                    created_at: "2026-02-20T12:00:00Z".to_string(),
                });
                Ok(json!({ "id": id }))
            }
            _ => Err(TransportError::Status {
                status: 404,
                body: json!({"error": "not found"}),
            }),
        }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().expect("lock").clone()
    }
}

fn bad_request(message: &str) -> TransportError {
    TransportError::Status {
        status: 400,
        body: json!({ "error": message }),
    }
}

fn setup() -> (Arc<Server>, ExpenseApi) {
    let server = Arc::new(Server::default());
    let transport = MockTransport::from_fn({
        let server = server.clone();
        move |request: &RequestDescriptor| server.handle(request)
    });
    let client = QueryClient::new(transport);
    let api = ExpenseApi::register(&client).expect("expense endpoints register");
    (server, api)
}

fn lunch() -> RecordExpenseRequest {
    RecordExpenseRequest::new(2000, "食費", "ランチ", "2026-02-20")
}

#[tokio::test]
async fn test_recorded_expense_appears_in_listing() -> Result<(), Error> {
    let (server, api) = setup();

    let mut listing = api.watch_list(ListExpensesParams::default())?;
    let initial = listing.settled().await.expect("listing is alive");
    assert_eq!(initial.data(), Some(&Vec::new()));

    let response = api.record(&lunch()).await?;
    assert_eq!(
        response,
        RecordExpenseResponse {
            id: "new-id".to_string()
        }
    );

    let refreshed = listing.settled().await.expect("listing is alive");
    let rows = refreshed.data().expect("listing has data");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, "new-id");
    assert_eq!(rows[0].amount, 2000);
    assert_eq!(rows[0].category, "食費");
    assert_eq!(rows[0].memo, "ランチ");
    assert_eq!(rows[0].date, "2026-02-20");

    assert_eq!(
        server.requests(),
        vec!["GET /expenses", "POST /expenses", "GET /expenses"]
    );
    Ok(())
}

#[tokio::test]
async fn test_every_listing_page_is_refreshed() -> Result<(), Error> {
    let (server, api) = setup();
    api.record(&lunch()).await?;

    let mut first_page = api.watch_list(ListExpensesParams::new(Some(1), None))?;
    let mut everything = api.watch_list(ListExpensesParams::default())?;
    first_page.settled().await.expect("listing is alive");
    everything.settled().await.expect("listing is alive");

    api.record(&RecordExpenseRequest::new(450, "交通費", "バス", "2026-02-21")).await?;

    let page = first_page.settled().await.expect("listing is alive");
    let all = everything.settled().await.expect("listing is alive");
    assert_eq!(page.data().map(Vec::len), Some(1));
    assert_eq!(page.data().expect("page has data")[0].category, "交通費");
    assert_eq!(all.data().map(Vec::len), Some(2));

    let requests = server.requests();
    assert!(requests.contains(&"GET /expenses?limit=1".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_invalid_request_is_never_sent() {
    let (server, api) = setup();

    let result = api
        .record(&RecordExpenseRequest::new(0, "", "", "20-02-2026"))
        .await;
    match result {
        Err(Error::Validation(err)) => assert_eq!(err.problems.len(), 3),
        other => panic!("expected a validation error, got {other:?}"),
    }
    assert!(server.requests().is_empty());
}

#[tokio::test]
async fn test_server_rejection_reaches_the_caller() {
    let transport = MockTransport::from_fn(|_| Err(bad_request("category is required")));
    let api =
        ExpenseApi::register(&QueryClient::new(transport)).expect("expense endpoints register");

    let result = api.record(&lunch()).await;
    match result {
        Err(Error::Transport(err)) => {
            assert_eq!(err.status(), Some(400));
            assert_eq!(err.message(), Some("category is required"));
        }
        other => panic!("expected a transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_record_trigger_reports_progress() -> Result<(), Error> {
    let (_server, api) = setup();
    let trigger = api.record_trigger();
    assert!(trigger.result().is_idle());

    let response = trigger.trigger(&lunch()).await?;
    assert_eq!(response.id, "new-id");
    assert_eq!(trigger.result().data(), Some(&response));

    let listing = api.list(ListExpensesParams::default()).await?;
    assert_eq!(listing.data().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn test_registering_twice_fails() {
    let (_server, api) = setup();
    let result = ExpenseApi::register(api.client());
    assert!(matches!(result, Err(Error::DuplicateEndpoint(name)) if name == "listExpenses"));
}
