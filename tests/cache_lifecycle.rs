// Integration tests for the query cache: de-duplication, ordering,
// invalidation and eviction.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use kakei::client::{
    MutationEndpoint, MutationHandle, QueryClient, QueryConfig, QueryEndpoint, QueryHandle, Tag,
};
use kakei::error::{Error, TransportError};
use kakei::transport::mock::MockTransport;
use kakei::transport::{Method, RequestDescriptor};
use serde_json::{Value, json};

struct Fixture {
    client: QueryClient,
    list_expenses: QueryHandle<(), Vec<String>>,
    get_budget: QueryHandle<(), u32>,
    add_expense: MutationHandle<String, Value>,
    set_budget: MutationHandle<u32, Value>,
}

fn fixture(transport: MockTransport) -> Fixture {
    fixture_with_config(transport, QueryConfig::default())
}

fn fixture_with_config(transport: MockTransport, config: QueryConfig) -> Fixture {
    let client = QueryClient::with_config(transport, config);
    let list_expenses = client
        .register_query(
            QueryEndpoint::new("listExpenses", |()| Ok(RequestDescriptor::get("/expenses")))
                .provides([Tag::new("Expense")]),
        )
        .expect("listExpenses registers");
    let get_budget = client
        .register_query(
            QueryEndpoint::new("getBudget", |()| Ok(RequestDescriptor::get("/budget")))
                .provides([Tag::new("Budget")]),
        )
        .expect("getBudget registers");
    let add_expense = client
        .register_mutation(
            MutationEndpoint::new("addExpense", |item: &String| {
                RequestDescriptor::post("/expenses").json(item)
            })
            .invalidates([Tag::new("Expense")]),
        )
        .expect("addExpense registers");
    let set_budget = client
        .register_mutation(
            MutationEndpoint::new("setBudget", |amount: &u32| {
                RequestDescriptor::put("/budget").json(amount)
            })
            .invalidates([Tag::new("Budget")]),
        )
        .expect("setBudget registers");

    Fixture {
        client,
        list_expenses,
        get_budget,
        add_expense,
        set_budget,
    }
}

/// A tiny in-memory server holding a list of expenses and a budget.
fn backend() -> MockTransport {
    let expenses = Arc::new(Mutex::new(Vec::<String>::new()));
    let budget = Arc::new(Mutex::new(0_u32));

    MockTransport::from_fn(move |request| match (request.method, request.path.as_str()) {
        (Method::Get, "/expenses") => Ok(json!(*expenses.lock().expect("lock"))),
        (Method::Post, "/expenses") => {
            let item = request
                .body
                .as_ref()
                .and_then(Value::as_str)
                .ok_or_else(|| TransportError::Status {
                    status: 400,
                    body: json!({"error": "invalid request body"}),
                })?;
            expenses.lock().expect("lock").push(item.to_string());
            Ok(json!({"ok": true}))
        }
        (Method::Get, "/budget") => Ok(json!(*budget.lock().expect("lock"))),
        (Method::Put, "/budget") => {
            let amount = request.body.as_ref().and_then(Value::as_u64).unwrap_or_default();
            *budget.lock().expect("lock") = u32::try_from(amount).unwrap_or(u32::MAX);
            Ok(json!({"ok": true}))
        }
        _ => Err(TransportError::Status {
            status: 404,
            body: json!({"error": "not found"}),
        }),
    })
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

/// Lets spawned fetch and eviction tasks run to completion.
async fn idle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test]
async fn test_concurrent_queries_share_one_request() {
    let (transport, mut server) = MockTransport::manual();
    let f = fixture(transport.clone());

    let spawn_query = || {
        let client = f.client.clone();
        let handle = f.list_expenses.clone();
        tokio::spawn(async move { client.query(&handle, &()).await })
    };
    let first = spawn_query();
    let second = spawn_query();

    let pending = server.next_request().await.expect("request should arrive");
    assert_eq!(pending.request().path, "/expenses");
    pending.ok(json!(["rent"]));

    let first = first.await.expect("task should not panic").expect("query should run");
    let second = second.await.expect("task should not panic").expect("query should run");
    assert_eq!(first.data(), Some(&strings(&["rent"])));
    assert_eq!(first, second);
    assert_eq!(transport.calls(), 1);
    assert!(server.try_next_request().is_none());
}

#[tokio::test]
async fn test_latest_issued_request_wins() {
    let (transport, mut server) = MockTransport::manual();
    let f = fixture(transport);

    let a = tokio::spawn({
        let client = f.client.clone();
        let handle = f.list_expenses.clone();
        async move { client.query(&handle, &()).await }
    });
    let request_a = server.next_request().await.expect("request A");

    let b = tokio::spawn({
        let client = f.client.clone();
        let handle = f.list_expenses.clone();
        async move { client.refetch(&handle, &()).await }
    });
    let request_b = server.next_request().await.expect("request B");

    // B completes first, then A.
    request_b.ok(json!(["b"]));
    let b = b.await.expect("task should not panic").expect("query should run");
    request_a.ok(json!(["a"]));
    let a = a.await.expect("task should not panic").expect("query should run");
    idle().await;

    assert_eq!(b.data(), Some(&strings(&["b"])));
    assert_eq!(a.data(), Some(&strings(&["b"])), "A's waiter sees the current entry");

    let cached = f
        .client
        .peek(&f.list_expenses, &())
        .expect("key encodes")
        .expect("entry is cached");
    assert!(cached.is_success());
    assert_eq!(cached.data(), Some(&strings(&["b"])));
}

#[tokio::test]
async fn test_mutation_refetches_subscribed_query() -> Result<(), Error> {
    let transport = backend();
    let f = fixture(transport.clone());

    let mut listing = f.client.subscribe(&f.list_expenses, &())?;
    let initial = listing.settled().await.expect("entry is alive");
    assert_eq!(initial.data(), Some(&Vec::new()));

    f.client.mutate(&f.add_expense, &"rent".to_string()).await?;

    let refreshed = listing.settled().await.expect("entry is alive");
    assert!(refreshed.is_success());
    assert_eq!(refreshed.data(), Some(&strings(&["rent"])));
    // GET, POST, GET
    assert_eq!(transport.calls(), 3);
    Ok(())
}

#[tokio::test]
async fn test_unsubscribed_query_stays_stale_until_read() -> Result<(), Error> {
    let transport = backend();
    let f = fixture(transport.clone());

    f.client.query(&f.list_expenses, &()).await?;
    f.client.mutate(&f.add_expense, &"rent".to_string()).await?;

    let cached = f.client.peek(&f.list_expenses, &())?.expect("entry is cached");
    assert!(cached.is_stale());
    assert_eq!(cached.data(), Some(&Vec::new()), "stale data is kept for display");
    assert_eq!(transport.calls(), 2, "no refetch without subscribers");

    let result = f.client.query(&f.list_expenses, &()).await?;
    assert_eq!(result.data(), Some(&strings(&["rent"])));
    assert_eq!(transport.calls(), 3);
    Ok(())
}

#[tokio::test]
async fn test_unrelated_tags_are_isolated() -> Result<(), Error> {
    let transport = backend();
    let f = fixture(transport.clone());

    let mut listing = f.client.subscribe(&f.list_expenses, &())?;
    listing.settled().await.expect("entry is alive");
    f.client.query(&f.get_budget, &()).await?;

    let calls = transport.calls();
    f.client.mutate(&f.set_budget, &30_000).await?;
    idle().await;

    assert!(listing.current().is_success(), "Expense entry is untouched");
    assert_eq!(transport.calls(), calls + 1, "only the PUT went out");

    let budget = f.client.peek(&f.get_budget, &())?.expect("entry is cached");
    assert!(budget.is_stale());
    Ok(())
}

#[tokio::test]
async fn test_fresh_entries_are_served_from_cache() -> Result<(), Error> {
    let transport = backend();
    let f = fixture_with_config(
        transport.clone(),
        QueryConfig::new(Duration::from_secs(60), Duration::from_secs(60)),
    );

    f.client.query(&f.list_expenses, &()).await?;
    f.client.query(&f.list_expenses, &()).await?;
    assert_eq!(transport.calls(), 1);

    f.client.refetch(&f.list_expenses, &()).await?;
    assert_eq!(transport.calls(), 2, "refetch ignores freshness");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_slow_response_is_fresh_when_it_lands() -> Result<(), Error> {
    let (transport, mut server) = MockTransport::manual();
    let f = fixture_with_config(
        transport.clone(),
        QueryConfig::new(Duration::from_millis(100), Duration::from_secs(60)),
    );

    let first = {
        let client = f.client.clone();
        let handle = f.list_expenses.clone();
        tokio::spawn(async move { client.query(&handle, &()).await })
    };
    let pending = server.next_request().await.expect("fetch starts");
    tokio::time::advance(Duration::from_millis(150)).await;
    pending.ok(json!(["slow"]));
    first.await.expect("query task completes")?;

    let again = f.client.query(&f.list_expenses, &()).await?;
    assert_eq!(again.data(), Some(&strings(&["slow"])));
    assert_eq!(transport.calls(), 1, "served from cache right after landing");
    Ok(())
}

#[tokio::test]
async fn test_zero_stale_time_refetches_every_query() -> Result<(), Error> {
    let transport = backend();
    let f = fixture(transport.clone());

    f.client.query(&f.list_expenses, &()).await?;
    f.client.query(&f.list_expenses, &()).await?;
    assert_eq!(transport.calls(), 2);
    Ok(())
}

#[tokio::test]
async fn test_query_errors_are_stored_not_raised() -> Result<(), Error> {
    let transport = MockTransport::from_fn(|_| {
        Err(TransportError::Status {
            status: 500,
            body: json!({"error": "internal server error"}),
        })
    });
    let f = fixture(transport);

    let result = f.client.query(&f.list_expenses, &()).await?;
    assert!(result.is_error());
    assert_eq!(result.data(), None);
    let error = result.error().expect("error is stored");
    assert_eq!(error.status(), Some(500));
    assert_eq!(error.message(), Some("internal server error"));
    Ok(())
}

#[tokio::test]
async fn test_failed_mutation_propagates_and_invalidates_nothing() -> Result<(), Error> {
    let (transport, mut server) = MockTransport::manual();
    let f = fixture(transport);

    let mut listing = f.client.subscribe(&f.list_expenses, &())?;
    server.next_request().await.expect("initial fetch").ok(json!([]));
    listing.settled().await.expect("entry is alive");

    let mutation = tokio::spawn({
        let client = f.client.clone();
        let handle = f.add_expense.clone();
        async move { client.mutate(&handle, &"rent".to_string()).await }
    });
    server
        .next_request()
        .await
        .expect("mutation request")
        .fail(400, json!({"error": "amount must be positive"}));

    let result = mutation.await.expect("task should not panic");
    match result {
        Err(Error::Transport(err)) => assert_eq!(err.message(), Some("amount must be positive")),
        other => panic!("expected a transport error, got {other:?}"),
    }
    idle().await;
    assert!(listing.current().is_success());
    assert!(server.try_next_request().is_none(), "no refetch after a failure");
    Ok(())
}

#[tokio::test]
async fn test_invalidation_supersedes_in_flight_refetch() -> Result<(), Error> {
    let (transport, mut server) = MockTransport::manual();
    let f = fixture(transport);

    let mut listing = f.client.subscribe(&f.list_expenses, &())?;
    server.next_request().await.expect("initial fetch").ok(json!(["old"]));
    listing.settled().await.expect("entry is alive");

    listing.refetch();
    let slow = server.next_request().await.expect("manual refetch");

    let matched = f.client.invalidate_tags([Tag::new("Expense")]);
    assert_eq!(matched, vec![listing.key().clone()]);
    let fresh = server.next_request().await.expect("refetch after invalidation");

    fresh.ok(json!(["new"]));
    slow.ok(json!(["outdated"]));

    let result = listing.settled().await.expect("entry is alive");
    idle().await;
    assert_eq!(result.data(), Some(&strings(&["new"])));
    assert_eq!(listing.current().data(), Some(&strings(&["new"])));
    assert!(listing.current().is_success());
    Ok(())
}

#[tokio::test]
async fn test_empty_invalidation_is_a_no_op() {
    let f = fixture(backend());
    assert!(f.client.invalidate_tags([]).is_empty());
    assert!(f.client.invalidate_tags([Tag::new("Category")]).is_empty());
}

#[tokio::test]
async fn test_stream_yields_current_then_updates() -> Result<(), Error> {
    use futures::StreamExt;

    let f = fixture(backend());
    let mut listing = f.client.subscribe(&f.list_expenses, &())?;
    listing.settled().await.expect("entry is alive");

    let mut states = Box::pin(listing.into_stream());
    let first = states.next().await.expect("stream yields the current state");
    assert!(first.is_success());

    f.client.mutate(&f.add_expense, &"rent".to_string()).await?;
    let mut last = None;
    while let Some(state) = states.next().await {
        if state.is_success() {
            last = Some(state);
            break;
        }
    }
    assert_eq!(last.and_then(|s| s.data), Some(strings(&["rent"])));
    Ok(())
}

#[test]
fn test_duplicate_registration_fails() {
    let f = fixture(backend());
    let result = f.client.register_query(QueryEndpoint::<(), Vec<String>>::new(
        "listExpenses",
        |()| Ok(RequestDescriptor::get("/expenses")),
    ));
    assert!(matches!(result, Err(Error::DuplicateEndpoint(name)) if name == "listExpenses"));
}

#[tokio::test(start_paused = true)]
async fn test_entry_is_evicted_after_grace_period() -> Result<(), Error> {
    let f = fixture(backend());

    let mut listing = f.client.subscribe(&f.list_expenses, &())?;
    listing.settled().await.expect("entry is alive");
    let key = listing.key().clone();
    drop(listing);

    tokio::time::advance(Duration::from_secs(59)).await;
    idle().await;
    assert!(f.client.store().contains(&key), "still inside the grace period");

    tokio::time::advance(Duration::from_secs(2)).await;
    idle().await;
    assert!(!f.client.store().contains(&key));
    assert!(f.client.store().tags().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_resubscribe_cancels_eviction_and_reuses_data() -> Result<(), Error> {
    let transport = backend();
    let f = fixture(transport.clone());

    let mut listing = f.client.subscribe(&f.list_expenses, &())?;
    listing.settled().await.expect("entry is alive");
    drop(listing);

    tokio::time::advance(Duration::from_secs(30)).await;
    let again = f.client.subscribe(&f.list_expenses, &())?;
    assert!(again.current().is_success());
    assert_eq!(transport.calls(), 1, "cached data reused without a call");

    tokio::time::advance(Duration::from_secs(120)).await;
    idle().await;
    assert!(f.client.store().contains(again.key()));

    let key = again.key().clone();
    again.release();
    tokio::time::advance(Duration::from_secs(61)).await;
    idle().await;
    assert!(!f.client.store().contains(&key));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribed_query_is_collected() -> Result<(), Error> {
    let f = fixture(backend());

    f.client.query(&f.list_expenses, &()).await?;
    assert_eq!(f.client.store().len(), 1);

    tokio::time::advance(Duration::from_secs(61)).await;
    idle().await;
    assert!(f.client.store().is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_eviction_waits_for_in_flight_request() -> Result<(), Error> {
    let (transport, mut server) = MockTransport::manual();
    let f = fixture(transport);

    let listing = f.client.subscribe(&f.list_expenses, &())?;
    let key = listing.key().clone();
    drop(listing);
    let pending = server.next_request().await.expect("fetch starts");

    tokio::time::advance(Duration::from_secs(61)).await;
    idle().await;
    assert!(f.client.store().contains(&key), "loading entries are not collected");

    pending.ok(json!(["late"]));
    idle().await;
    let cached = f.client.peek(&f.list_expenses, &())?.expect("entry is cached");
    assert_eq!(cached.data(), Some(&strings(&["late"])));

    tokio::time::advance(Duration::from_secs(61)).await;
    idle().await;
    assert!(!f.client.store().contains(&key));
    Ok(())
}

#[test]
fn test_calls_outside_a_runtime_fail_without_panicking() -> Result<(), Error> {
    let f = fixture(backend());
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime builds");
    let listing = runtime.block_on(async {
        let mut listing = f.client.subscribe(&f.list_expenses, &())?;
        listing.settled().await.expect("entry is alive");
        Ok::<_, Error>(listing)
    })?;
    drop(runtime);

    let result = f.client.subscribe(&f.get_budget, &());
    assert!(matches!(result, Err(Error::NoRuntime)));
    let budget_key = f.client.key(&f.get_budget, &())?;
    assert!(!f.client.store().contains(&budget_key), "no entry left behind");

    // Background refetches cannot start; the entry stays stale.
    let matched = f.client.invalidate_tags([Tag::new("Expense")]);
    assert_eq!(matched, vec![listing.key().clone()]);
    assert!(listing.current().is_stale());
    listing.refetch();
    assert!(listing.current().is_stale());
    assert_eq!(listing.current().data, Some(Vec::new()));

    let key = listing.key().clone();
    drop(listing);
    assert!(!f.client.store().contains(&key), "released without a runtime");
    Ok(())
}
