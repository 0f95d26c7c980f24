//! Forwarding through the resolved locator: error surfacing, the single
//! retry after an unreachable locator, and raw dispatch.

mod common;

use common::{Harness, MockLocator, config, hello, init_tracing, locator, settle};
use locator_discovery::{
    DiscoveryError, Identity, InvokeError, JsonCodec, MessageCodec, OperationMode, Request, ops,
};

fn hello_id() -> Identity {
    Identity::new("hello", "")
}

#[tokio::test(start_paused = true)]
async fn test_permanent_error_surfaces_without_retry() {
    init_tracing();
    let harness = Harness::start(config(1, 300, 2, 2000), MockLocator::answering(Some(hello())));
    harness.rpc.fail_next(InvokeError::AdapterDeactivated);

    let lookup = tokio::spawn({
        let facade = harness.discovery.facade().clone();
        async move { facade.find_object_by_id(&hello_id()).await }
    });
    settle().await;
    harness.reply(&locator("DemoGrid", &["10.0.0.5"]));

    let err = lookup.await.expect("join").expect_err("permanent error");
    assert!(matches!(
        err,
        DiscoveryError::Invoke(InvokeError::ObjectNotExist)
    ));
    assert_eq!(harness.rpc.calls().len(), 1);
    assert_eq!(harness.probe.sent(), 1);

    // The locator is still trusted.
    let snapshot = harness.discovery.facade().snapshot().await.expect("snapshot");
    assert!(snapshot.locator.is_some());
}

#[tokio::test(start_paused = true)]
async fn test_operation_not_exist_is_not_retried() {
    init_tracing();
    let harness = Harness::start(config(1, 300, 2, 2000), MockLocator::answering(None));
    harness
        .rpc
        .fail_next(InvokeError::OperationNotExist("findAdapterById".into()));

    let lookup = tokio::spawn({
        let facade = harness.discovery.facade().clone();
        async move { facade.find_adapter_by_id("HelloAdapter").await }
    });
    settle().await;
    harness.reply(&locator("DemoGrid", &["10.0.0.5"]));

    let err = lookup.await.expect("join").expect_err("permanent error");
    assert!(matches!(
        err,
        DiscoveryError::Invoke(InvokeError::OperationNotExist(op)) if op == "findAdapterById"
    ));
    assert_eq!(harness.rpc.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_locator_is_replaced_once() {
    init_tracing();
    let harness = Harness::start(config(1, 300, 2, 2000), MockLocator::answering(Some(hello())));
    harness
        .rpc
        .fail_next(InvokeError::ConnectionLost("reset by peer".into()));

    let lookup = tokio::spawn({
        let facade = harness.discovery.facade().clone();
        async move { facade.find_object_by_id(&hello_id()).await }
    });
    settle().await;
    let first = locator("DemoGrid", &["10.0.0.5"]);
    harness.reply(&first);
    settle().await;

    // The failed locator was dropped and a new round is probing.
    let snapshot = harness.discovery.facade().snapshot().await.expect("snapshot");
    assert!(snapshot.probing);
    assert_eq!(snapshot.locator, None);
    assert_eq!(harness.probe.sent(), 2);

    let second = locator("DemoGrid", &["10.0.0.6"]);
    harness.reply(&second);

    assert_eq!(lookup.await.expect("join").expect("lookup"), Some(hello()));
    assert_eq!(harness.rpc.targets(), vec![first, second]);
}

#[tokio::test(start_paused = true)]
async fn test_same_locator_after_failure_surfaces_first_error() {
    init_tracing();
    let harness = Harness::start(config(1, 300, 2, 2000), MockLocator::answering(Some(hello())));
    harness
        .rpc
        .fail_next(InvokeError::ConnectionRefused("10.0.0.5:4061".into()));

    let lookup = tokio::spawn({
        let facade = harness.discovery.facade().clone();
        async move { facade.find_object_by_id(&hello_id()).await }
    });
    settle().await;
    let only = locator("DemoGrid", &["10.0.0.5"]);
    harness.reply(&only);
    settle().await;
    harness.reply(&only);

    let err = lookup.await.expect("join").expect_err("no progress");
    assert!(matches!(
        err,
        DiscoveryError::Invoke(InvokeError::ConnectionRefused(addr)) if addr == "10.0.0.5:4061"
    ));
    assert_eq!(harness.rpc.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_second_unreachable_failure_surfaces() {
    init_tracing();
    let harness = Harness::start(config(1, 300, 2, 2000), MockLocator::answering(Some(hello())));
    harness
        .rpc
        .fail_next(InvokeError::ConnectionLost("reset by peer".into()));
    harness.rpc.fail_next(InvokeError::Timeout);

    let lookup = tokio::spawn({
        let facade = harness.discovery.facade().clone();
        async move { facade.find_object_by_id(&hello_id()).await }
    });
    settle().await;
    harness.reply(&locator("DemoGrid", &["10.0.0.5"]));
    settle().await;
    harness.reply(&locator("DemoGrid", &["10.0.0.6"]));

    let err = lookup.await.expect("join").expect_err("retry failed");
    assert!(matches!(err, DiscoveryError::Invoke(InvokeError::Timeout)));
    assert_eq!(harness.rpc.calls().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_falls_back_when_rediscovery_fails() {
    init_tracing();
    let harness = Harness::start(config(2, 300, 1, 2000), MockLocator::answering(Some(hello())));
    harness.rpc.fail_next(InvokeError::Other("broken".into()));

    let lookup = tokio::spawn({
        let facade = harness.discovery.facade().clone();
        async move { facade.find_object_by_id(&hello_id()).await }
    });
    settle().await;
    harness.reply(&locator("DemoGrid", &["10.0.0.5"]));

    // Nobody answers the second round: "not found".
    assert_eq!(lookup.await.expect("join").expect("lookup"), None);
    assert_eq!(harness.rpc.calls().len(), 1);
    assert_eq!(harness.probe.sent(), 2 + 4);
}

#[tokio::test(start_paused = true)]
async fn test_get_registry_is_answered_locally() {
    init_tracing();
    let harness = Harness::start(config(1, 300, 2, 2000), MockLocator::answering(Some(hello())));
    let facade = harness.discovery.facade();

    assert_eq!(facade.get_registry(), None);
    let bytes = facade
        .invoke_raw(Request::new(ops::GET_REGISTRY, Vec::new()))
        .await
        .expect("getRegistry");
    assert_eq!(bytes, b"null");

    settle().await;
    assert_eq!(harness.probe.sent(), 0);
    assert!(harness.rpc.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_raw_request_is_forwarded_unchanged() {
    init_tracing();
    let harness = Harness::start(config(1, 300, 2, 2000), MockLocator::answering(Some(hello())));
    let params = JsonCodec.encode(&hello_id()).expect("encode");
    let request = Request::new(ops::FIND_OBJECT_BY_ID, params)
        .idempotent()
        .with_context("tenant", "blue");

    let call = tokio::spawn({
        let facade = harness.discovery.facade().clone();
        let request = request.clone();
        async move { facade.invoke_raw(request).await }
    });
    settle().await;
    harness.reply(&locator("DemoGrid", &["10.0.0.5"]));

    let reply = call.await.expect("join").expect("invoke");
    let decoded: Option<locator_discovery::ObjectRef> = JsonCodec.decode(&reply).expect("decode");
    assert_eq!(decoded, Some(hello()));

    let calls = harness.rpc.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1, request);
    assert_eq!(calls[0].1.mode, OperationMode::Idempotent);
}

#[tokio::test(start_paused = true)]
async fn test_unknown_operation_on_fallback() {
    init_tracing();
    let harness = Harness::start(config(1, 300, 0, 2000), MockLocator::answering(None));

    let err = harness
        .discovery
        .facade()
        .invoke_raw(Request::new("setServerProcessProxy", Vec::new()))
        .await
        .expect_err("fallback has no such operation");
    assert!(matches!(
        err,
        DiscoveryError::Invoke(InvokeError::OperationNotExist(op)) if op == "setServerProcessProxy"
    ));
    assert!(harness.rpc.calls().is_empty());
}
