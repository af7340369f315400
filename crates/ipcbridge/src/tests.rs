use std::sync::Arc;
use std::time::Duration;

use crate::*;

crate::resource_kind!(Source => Arc<String>);
crate::resource_kind!(Scene => Arc<String>);

fn ranges(alloc: &IdAllocator) -> Vec<(u64, u64)> {
    alloc.intervals().iter().map(|r| (r.lo, r.hi)).collect()
}

// ============================================================================
//  ID ALLOCATOR
// ============================================================================

#[test]
fn test_allocate_counts_up_from_zero() {
    let mut alloc = IdAllocator::new();
    assert_eq!(alloc.allocate(), 0);
    assert_eq!(alloc.allocate(), 1);
    assert_eq!(alloc.allocate(), 2);
    assert_eq!(ranges(&alloc), vec![(0, 2)]);
    assert_eq!(alloc.count(false), 3);
}

#[test]
fn test_free_interior_splits() {
    let mut alloc = IdAllocator::new();
    for _ in 0..5 {
        alloc.allocate();
    }
    assert!(alloc.free(2));
    assert_eq!(ranges(&alloc), vec![(0, 1), (3, 4)]);
    assert!(!alloc.is_allocated(2));
    assert!(alloc.is_allocated(3));
}

#[test]
fn test_free_edges_shrink_and_singleton_disappears() {
    let mut alloc = IdAllocator::new();
    for _ in 0..3 {
        alloc.allocate();
    }
    assert!(alloc.free(0));
    assert_eq!(ranges(&alloc), vec![(1, 2)]);
    assert!(alloc.free(2));
    assert_eq!(ranges(&alloc), vec![(1, 1)]);
    assert!(alloc.free(1));
    assert!(alloc.intervals().is_empty());
}

#[test]
fn test_hole_is_refilled_and_merged() {
    let mut alloc = IdAllocator::new();
    for _ in 0..5 {
        alloc.allocate();
    }
    alloc.free(2);
    // The first interval grows upward into the hole and closes the gap.
    assert_eq!(alloc.allocate(), 2);
    assert_eq!(ranges(&alloc), vec![(0, 4)]);
}

#[test]
fn test_low_ids_are_reused_first() {
    let mut alloc = IdAllocator::new();
    for _ in 0..4 {
        alloc.allocate();
    }
    alloc.free(0);
    alloc.free(1);
    assert_eq!(ranges(&alloc), vec![(2, 3)]);
    assert_eq!(alloc.allocate(), 1);
    assert_eq!(alloc.allocate(), 0);
    assert_eq!(ranges(&alloc), vec![(0, 3)]);
}

#[test]
fn test_free_unknown_is_harmless() {
    let mut alloc = IdAllocator::new();
    assert!(!alloc.free(7));
    alloc.allocate();
    assert!(!alloc.free(7));
    assert!(!alloc.free(INVALID_HANDLE));
    assert!(alloc.free(0));
    assert!(!alloc.free(0));
}

#[test]
fn test_exhaustion_returns_sentinel_without_mutating() {
    let mut alloc = IdAllocator::with_capacity_limit(3);
    assert_eq!(alloc.allocate(), 0);
    assert_eq!(alloc.allocate(), 1);
    assert_eq!(alloc.allocate(), 2);
    assert_eq!(alloc.allocate(), INVALID_HANDLE);
    assert_eq!(alloc.allocate(), INVALID_HANDLE);
    assert_eq!(ranges(&alloc), vec![(0, 2)]);
    assert_eq!(alloc.count(true), 0);

    alloc.free(1);
    assert_eq!(alloc.count(true), 1);
    assert_eq!(alloc.allocate(), 1);
}

#[test]
fn test_zero_capacity_allocator() {
    let mut alloc = IdAllocator::with_capacity_limit(0);
    assert_eq!(alloc.allocate(), INVALID_HANDLE);
    assert_eq!(alloc.count(false), 0);
    assert_eq!(alloc.count(true), 0);
}

#[test]
fn test_free_count_of_unbounded_allocator() {
    let mut alloc = IdAllocator::new();
    alloc.allocate();
    alloc.allocate();
    assert_eq!(alloc.count(true), INVALID_HANDLE - 2);
}

// ============================================================================
//  HANDLES AND TABLES
// ============================================================================

#[test]
fn test_handle_formatting() {
    let handle = Handle::<Source>::from_raw(4);
    assert_eq!(format!("{:?}", handle), "Handle<Source>(4)");
    assert_eq!(handle.to_string(), "source-4");
    assert_eq!(format!("{:?}", Handle::<Source>::invalid()), "Handle<Source>(invalid)");
    assert_eq!(Value::from(handle), Value::UInt64(4));
    assert_eq!(Handle::<Source>::from_value(&Value::UInt64(4)), Some(handle));
    assert_eq!(Handle::<Source>::from_value(&Value::from("4")), None);
}

#[test]
fn test_table_allocate_find_free() {
    let table = ObjectTable::<Source>::new();
    let camera = Arc::new("camera".to_string());

    let handle = table.allocate(camera.clone()).unwrap();
    assert_eq!(table.find(handle), Some(camera.clone()));
    assert_eq!(table.with(handle, |s| s.len()), Some(6));
    assert_eq!(table.handle_of(&camera), Some(handle));

    let released = table.free(handle).unwrap();
    assert!(Arc::ptr_eq(&released, &camera));
    assert_eq!(table.find(handle), None);
    assert_eq!(table.free(handle), None);
    assert!(table.is_empty());
}

#[test]
fn test_table_exhaustion_hands_reference_back() {
    let table = ObjectTable::<Source>::with_capacity_limit(1);
    table.allocate(Arc::new("a".into())).unwrap();

    let err = table.allocate(Arc::new("b".into())).unwrap_err();
    assert_eq!(err.object.as_str(), "b");
    assert_eq!(table.len(), 1);
    assert_eq!(table.remaining(), 0);
}

#[test]
fn test_for_each_and_drain_are_ordered() {
    let table = ObjectTable::<Source>::new();
    let names = ["a", "b", "c", "d"];
    let handles: Vec<_> = names
        .iter()
        .map(|n| table.allocate(Arc::new(n.to_string())).unwrap())
        .collect();
    table.free(handles[1]);
    // Reuses id 1.
    let e = table.allocate(Arc::new("e".into())).unwrap();
    assert_eq!(e.raw(), 1);

    let mut seen = Vec::new();
    table.for_each(|h, s| seen.push((h.raw(), s.to_string())));
    assert_eq!(
        seen,
        vec![(0, "a".into()), (1, "e".into()), (2, "c".into()), (3, "d".into())]
    );

    let drained: Vec<u64> = table.drain().into_iter().map(|(h, _)| h.raw()).collect();
    assert_eq!(drained, vec![0, 1, 2, 3]);
    assert!(table.is_empty());
    assert_eq!(table.allocate(Arc::new("f".into())).unwrap().raw(), 0);
}

#[test]
fn test_context_tables_are_isolated() {
    let ctx = Context::new();
    let sources = ctx.table::<Source>();
    let scenes = ctx.table::<Scene>();

    let source = sources.allocate(Arc::new("mic".into())).unwrap();
    let scene = scenes.allocate(Arc::new("main".into())).unwrap();
    assert_eq!(source.raw(), scene.raw());

    scenes.free(scene);
    assert!(sources.contains(source));
    assert!(Arc::ptr_eq(&sources, &ctx.table::<Source>()));
}

#[test]
fn test_context_install_and_release_all() {
    let ctx = Context::new();
    ctx.install(ObjectTable::<Source>::with_capacity_limit(2));
    let sources = ctx.table::<Source>();
    sources.allocate(Arc::new("a".into())).unwrap();
    sources.allocate(Arc::new("b".into())).unwrap();
    assert!(sources.allocate(Arc::new("c".into())).is_err());

    let mut released = Vec::new();
    ctx.release_all::<Source>(|h, s| released.push((h.raw(), s.to_string())));
    assert_eq!(released, vec![(0, "a".into()), (1, "b".into())]);
    assert!(sources.is_empty());

    // Unknown kinds are a no-op.
    ctx.release_all::<Scene>(|_, _| panic!("no scenes"));
}

// ============================================================================
//  PENDING CALL REGISTRY
// ============================================================================

#[tokio::test]
async fn test_register_complete_wait() {
    let registry = PendingCallRegistry::new();
    let a = registry.register().unwrap();
    let b = registry.register().unwrap();
    assert!(b.id() > a.id());
    assert_eq!(registry.len(), 2);

    assert!(registry.complete(b.id(), Response::ok([Value::from(2u64)])));
    assert!(registry.complete(a.id(), Response::ok([Value::from(1u64)])));

    assert_eq!(a.wait(None).await.unwrap(), Response::ok([Value::from(1u64)]));
    assert_eq!(b.wait(None).await.unwrap(), Response::ok([Value::from(2u64)]));
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_second_complete_is_noop() {
    let registry = PendingCallRegistry::new();
    let call = registry.register().unwrap();
    let id = call.id();

    assert!(registry.complete(id, Response::ok([])));
    assert!(!registry.complete(id, Response::error(ErrorCode::Error, "late")));
    assert_eq!(call.wait(None).await.unwrap(), Response::ok([]));
}

#[tokio::test]
async fn test_complete_unknown_id_is_noop() {
    let registry = PendingCallRegistry::new();
    assert!(!registry.complete(999, Response::ok([])));
}

#[tokio::test]
async fn test_timeout_removes_entry() {
    let registry = PendingCallRegistry::new();
    let call = registry.register().unwrap();
    let id = call.id();

    let err = call.wait(Some(Duration::from_millis(20))).await.unwrap_err();
    assert_eq!(err, registry::Error::TimedOut(id));
    assert!(registry.is_empty());
    assert!(!registry.complete(id, Response::ok([])));
}

#[tokio::test]
async fn test_cancel_all_closes_until_reopened() {
    let registry = PendingCallRegistry::new();
    let a = registry.register().unwrap();
    let b = registry.register().unwrap();

    assert_eq!(registry.cancel_all("pipe broke"), 2);
    for call in [a, b] {
        let response = call.wait(None).await.unwrap();
        assert_eq!(
            response.classify().unwrap_err(),
            CallError::Transport("pipe broke".into())
        );
    }

    assert!(registry.is_closed());
    assert_eq!(registry.register().err(), Some(registry::Error::Closed));

    registry.reopen();
    assert!(registry.register().is_ok());
}

#[tokio::test]
async fn test_dropped_pending_call_leaves_no_entry() {
    let registry = PendingCallRegistry::new();
    let call = registry.register().unwrap();
    let id = call.id();
    drop(call);
    assert!(registry.is_empty());
    assert!(!registry.discard(id));
}

#[tokio::test]
async fn test_discard_abandons_waiter() {
    let registry = PendingCallRegistry::new();
    let call = registry.register().unwrap();
    let id = call.id();
    assert!(registry.discard(id));
    assert_eq!(call.wait(None).await.unwrap_err(), registry::Error::Abandoned(id));
}

// ============================================================================
//  CONFIG AND HOST
// ============================================================================

#[test]
fn test_bridge_config_defaults() {
    let config = BridgeConfig::default();
    assert_eq!(config.connect_attempts, 5);
    assert_eq!(config.retry_delay, Duration::from_millis(100));
    assert_eq!(config.call_timeout, None);
    assert!(config.server.is_none());

    let config = config
        .with_connect_attempts(0)
        .with_server(ServerCommand::new("/opt/server", "1.2").with_working_dir("/opt"));
    assert_eq!(config.connect_attempts, 1);
    assert_eq!(config.server.unwrap().version, "1.2");
}

#[test]
fn test_server_exit_descriptions() {
    use crate::host::ServerExit;
    assert_eq!(ServerExit { code: Some(252) }.describe(), "server version mismatch");
    assert_eq!(ServerExit { code: Some(253) }.describe(), "server failed to start");
    assert_eq!(ServerExit { code: Some(0) }.describe(), "server exited normally");
    assert_eq!(
        ServerExit { code: Some(7) }.to_string(),
        "server exited with an error (exit code 7)"
    );
}

#[test]
fn test_server_dispatch_unknown_targets() {
    let server = Server::new(ServerConfig::new("unit"));
    server.register(Class::new("Echo").function("Say", |args| Response::ok(args.to_vec())));

    let ok = server.dispatch("Echo", "Say", &[Value::from("hi")]);
    assert_eq!(server.name(), "unit");
    assert_eq!(ok.into_result().unwrap(), vec![Value::from("hi")]);

    assert!(server.dispatch("Nope", "Say", &[]).is_transport_error());
    assert!(server.dispatch("Echo", "Shout", &[]).is_transport_error());

    assert!(!server.shutdown_requested());
    assert_eq!(server.dispatch("System", "Shutdown", &[]), Response::ok([]));
    assert!(server.shutdown_requested());
}

#[test]
fn test_class_lists_registered_functions() {
    let class = Class::new("Source")
        .function("Create", |_| Response::ok([]))
        .function("Release", |_| Response::ok([]));

    assert!(class.has_function("Create"));
    assert!(class.has_function("Release"));
    assert!(!class.has_function("create"));
}

#[tokio::test]
async fn test_request_shutdown_stops_serving() {
    let (client, served) = mock_transport::DuplexChannelTransport::pair();
    let server = Arc::new(Server::new(ServerConfig::new("unit")));

    let serving = tokio::spawn(server.clone().serve(Arc::new(served)));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!serving.is_finished());

    // The client end stays open, so only the shutdown request can end the loop.
    server.request_shutdown();
    let result = tokio::time::timeout(Duration::from_secs(2), serving).await;
    assert!(matches!(result, Ok(Ok(Ok(())))));
    drop(client);
}
