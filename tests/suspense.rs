// Integration tests for suspending bindings

use std::time::Duration;

use booklist_query::client::{
    ClientConfig, Endpoint, Preloaded, QueryBinding, QueryError, QueryOptions, QuerySnapshot,
    TransportError, Variables,
};
use booklist_query::mock::MockTransport;
use serde_json::json;
use tokio::time::timeout;

const BOOK: &str = "query Book($_id: String) { getBook(_id: $_id) { title } }";

fn book_id(id: &str) -> Variables {
    let mut variables = Variables::new();
    variables.insert("_id".into(), json!(id));
    variables
}

async fn render_until_ready(
    binding: &QueryBinding,
    variables: &Variables,
) -> (QuerySnapshot, usize) {
    let mut suspensions = 0;
    loop {
        match binding.render(BOOK, Some(variables)) {
            Ok(snapshot) => return (snapshot, suspensions),
            Err(suspended) => {
                suspensions += 1;
                timeout(Duration::from_secs(1), suspended).await.unwrap();
            }
        }
    }
}

#[tokio::test]
async fn test_repeated_renders_share_one_suspension() {
    let transport = MockTransport::new()
        .on_query(|uri, _| Ok(json!({ "data": { "uri": uri } })));
    transport.hold();
    let endpoint = Endpoint::new(ClientConfig::new("/graphql"), transport.clone());
    let binding = QueryBinding::new(endpoint.clone(), BOOK, QueryOptions::default().suspense(true));

    let handles: Vec<_> = (0..3)
        .map(|_| binding.render(BOOK, Some(&book_id("b1"))).unwrap_err())
        .collect();
    assert!(handles.windows(2).all(|pair| pair[0] == pair[1]));
    assert!(!handles[0].is_ready());

    tokio::task::yield_now().await;
    assert_eq!(transport.query_calls().len(), 1);
    transport.release();

    let (snapshot, suspensions) = render_until_ready(&binding, &book_id("b1")).await;
    assert_eq!(suspensions, 1);
    assert!(handles[0].is_ready());
    let key = endpoint.resolve_cache_key(BOOK, Some(&book_id("b1")));
    assert_eq!(snapshot.data, Some(json!({ "uri": key.as_str() })));
    assert_eq!(snapshot.current_query, Some(key));
}

#[tokio::test]
async fn test_preloaded_key_renders_without_suspending() {
    let transport = MockTransport::new().with_query_response(json!({ "data": "b1" }));
    let endpoint = Endpoint::new(ClientConfig::new("/graphql"), transport.clone());

    let Preloaded::Pending(pending) = endpoint.preload(BOOK, Some(&book_id("b1"))) else {
        panic!("first preload should issue the request");
    };
    timeout(Duration::from_secs(1), pending).await.unwrap();
    assert!(matches!(
        endpoint.preload(BOOK, Some(&book_id("b1"))),
        Preloaded::Settled(_)
    ));

    let binding = QueryBinding::new(
        endpoint.clone(),
        BOOK,
        QueryOptions::default().suspense(true).preload_only(true),
    );
    let snapshot = binding.render(BOOK, Some(&book_id("b1"))).unwrap();
    assert_eq!(snapshot.data, Some(json!("b1")));
    assert_eq!(transport.query_calls().len(), 1);

    // Not preloaded: nothing to wait on and nothing issued.
    let snapshot = binding.render(BOOK, Some(&book_id("b2"))).unwrap();
    assert_eq!(snapshot.data, Some(json!("b1")));
    assert_eq!(transport.query_calls().len(), 1);
}

#[tokio::test]
async fn test_switching_keys_suspends_per_key() {
    let transport = MockTransport::new().on_query(|_, index| Ok(json!({ "data": index })));
    let endpoint = Endpoint::new(ClientConfig::new("/graphql").with_cache_size(1), transport.clone());
    let binding = QueryBinding::new(endpoint.clone(), BOOK, QueryOptions::default().suspense(true));

    let (first, _) = render_until_ready(&binding, &book_id("b1")).await;
    let (second, suspensions) = render_until_ready(&binding, &book_id("b2")).await;
    assert_eq!(first.data, Some(json!(0)));
    assert_eq!(second.data, Some(json!(1)));
    assert_eq!(suspensions, 1);

    // Capacity one: "b1" was evicted and is fetched again.
    let (third, suspensions) = render_until_ready(&binding, &book_id("b1")).await;
    assert_eq!(third.data, Some(json!(2)));
    assert_eq!(suspensions, 1);
    assert_eq!(transport.query_calls().len(), 3);
}

#[tokio::test]
async fn test_errors_are_rendered_not_thrown() {
    let transport = MockTransport::new();
    transport.fail_queries(TransportError::Status {
        status: 500,
        url: "/graphql".into(),
    });
    let endpoint = Endpoint::new(ClientConfig::new("/graphql"), transport);
    let binding = QueryBinding::new(endpoint, BOOK, QueryOptions::default().suspense(true));

    let (snapshot, _) = render_until_ready(&binding, &book_id("b1")).await;
    assert!(snapshot.is_error());
    assert!(matches!(
        snapshot.error,
        Some(QueryError::Transport(TransportError::Status { status: 500, .. }))
    ));
    assert_eq!(snapshot.data, None);
    assert!(snapshot.loaded);
}

#[tokio::test]
async fn test_response_errors_settle_with_error() {
    let transport = MockTransport::new()
        .with_query_response(json!({ "errors": [{ "message": "no such book" }] }));
    let endpoint = Endpoint::new(ClientConfig::new("/graphql"), transport.clone());
    let binding = QueryBinding::new(endpoint, BOOK, QueryOptions::default().suspense(true));

    let (snapshot, _) = render_until_ready(&binding, &book_id("b1")).await;
    assert_eq!(
        snapshot.error,
        Some(QueryError::Response(json!([{ "message": "no such book" }])))
    );

    // Settled errors are cached like data.
    let (_, suspensions) = render_until_ready(&binding, &book_id("b1")).await;
    assert_eq!(suspensions, 0);
    assert_eq!(transport.query_calls().len(), 1);
}
