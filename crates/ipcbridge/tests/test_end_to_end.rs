//! A bridge talking to a real dispatcher over in-memory transports.

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use ipcbridge::Bridge;
use ipcbridge::BridgeConfig;
use ipcbridge::CallError;
use ipcbridge::Class;
use ipcbridge::Context;
use ipcbridge::ErrorCode;
use ipcbridge::Handle;
use ipcbridge::ObjectTable;
use ipcbridge::Response;
use ipcbridge::Server;
use ipcbridge::ServerConfig;
use ipcbridge::Value;
use ipcbridge::mock_transport::ChannelConnector;

ipcbridge::resource_kind!(Source => Arc<String>);

const SOURCE_LIMIT: u64 = 3;

fn source_class(ctx: &Context) -> Class {
    let create = ctx.table::<Source>();
    let get = create.clone();
    let release = create.clone();

    Class::new("Source")
        .function("Create", move |args| {
            let Some(name) = args.first().and_then(Value::as_str) else {
                return Response::error(ErrorCode::Error, "expected a source name");
            };
            match create.allocate(Arc::new(name.to_string())) {
                Ok(handle) => Response::ok([Value::from(handle)]),
                Err(_) => Response::error(ErrorCode::OutOfIndexes, "no free source handles"),
            }
        })
        .function("GetName", move |args| {
            match args.first().and_then(Handle::<Source>::from_value).and_then(|h| get.find(h)) {
                Some(name) => Response::ok([Value::from(name.as_str())]),
                None => Response::error(ErrorCode::InvalidReference, "Source reference is not valid."),
            }
        })
        .function("Release", move |args| {
            match args.first().and_then(Handle::<Source>::from_value).and_then(|h| release.free(h)) {
                Some(_) => Response::ok([]),
                None => Response::error(ErrorCode::InvalidReference, "Source reference is not valid."),
            }
        })
}

struct Harness {
    bridge: Bridge,
    ctx: Arc<Context>,
    _server_runtime: tokio::runtime::Runtime,
}

/// Serves `source_class` on connections to `address`, on a runtime of its own.
fn serve_on(connector: &ChannelConnector, address: &str, ctx: &Context) -> tokio::runtime::Runtime {
    let mut incoming = connector.listen(address);
    let server = Arc::new(Server::new(ServerConfig::new("e2e")));
    server.register(source_class(ctx));

    let server_runtime = tokio::runtime::Runtime::new().expect("server runtime");
    server_runtime.spawn(async move {
        while let Some(transport) = incoming.recv().await {
            tokio::spawn(server.clone().serve(Arc::new(transport)));
        }
    });
    server_runtime
}

fn harness() -> Harness {
    ipcbridge::logging::init_for_tests();

    let connector = ChannelConnector::new();
    let ctx = Arc::new(Context::new());
    ctx.install(ObjectTable::<Source>::with_capacity_limit(SOURCE_LIMIT));
    let server_runtime = serve_on(&connector, "obs", &ctx);

    let config = BridgeConfig::standard().with_retry_delay(Duration::from_millis(1));
    let bridge = Bridge::new(connector, config).expect("bridge");
    bridge.connect("obs").expect("connect");

    Harness {
        bridge,
        ctx,
        _server_runtime: server_runtime,
    }
}

fn create(bridge: &Bridge, name: &str) -> u64 {
    let values = bridge
        .call_checked("Source", "Create", &[Value::from(name)])
        .expect("create failed");
    values[0].as_u64().expect("handle")
}

fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not met in time");
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn test_create_get_release() -> anyhow::Result<()> {
    let h = harness();

    let mic = create(&h.bridge, "mic");
    let cam = create(&h.bridge, "camera");
    assert_ne!(mic, cam);

    let name = h.bridge.call_checked("Source", "GetName", &[Value::UInt64(cam)])?;
    assert_eq!(name, vec![Value::from("camera")]);

    h.bridge.call_checked("Source", "Release", &[Value::UInt64(mic)])?;
    assert_eq!(h.ctx.table::<Source>().len(), 1);
    Ok(())
}

#[test]
fn test_released_handle_is_invalid_reference() {
    let h = harness();
    let mic = create(&h.bridge, "mic");
    h.bridge.call_checked("Source", "Release", &[Value::UInt64(mic)]).unwrap();

    let err = h.bridge.call_checked("Source", "GetName", &[Value::UInt64(mic)]).unwrap_err();
    assert_eq!(
        err,
        CallError::Remote {
            code: ErrorCode::InvalidReference,
            message: "Source reference is not valid.".into(),
        }
    );

    // Releasing twice is an application error, not a transport one.
    let err = h.bridge.call_checked("Source", "Release", &[Value::UInt64(mic)]).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::InvalidReference));
}

#[test]
fn test_released_ids_are_reused() {
    let h = harness();
    let first = create(&h.bridge, "a");
    create(&h.bridge, "b");
    h.bridge.call_checked("Source", "Release", &[Value::UInt64(first)]).unwrap();
    assert_eq!(create(&h.bridge, "c"), first);
}

#[test]
fn test_full_table_reports_out_of_indexes() {
    let h = harness();
    for i in 0..SOURCE_LIMIT {
        create(&h.bridge, &format!("s{}", i));
    }

    let err = h.bridge.call_checked("Source", "Create", &[Value::from("one too many")]).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::OutOfIndexes));
    assert_eq!(h.ctx.table::<Source>().len() as u64, SOURCE_LIMIT);
}

#[test]
fn test_unknown_function_is_transport_error() {
    let h = harness();
    let err = h.bridge.call_checked("Source", "Explode", &[]).unwrap_err();
    assert!(err.is_transport());
    assert_eq!(err.code(), None);
}

#[test]
fn test_many_threads_share_one_connection() {
    let h = Arc::new(harness());
    let workers: Vec<_> = (0..4)
        .map(|t| {
            let h = h.clone();
            std::thread::spawn(move || {
                for n in 0..20 {
                    let name = format!("t{}-{}", t, n);
                    let Ok(values) = h.bridge.call_checked("Source", "Create", &[Value::from(name.as_str())]) else {
                        // The table is small; a full table is a legitimate answer here.
                        continue;
                    };
                    let handle = values[0].clone();
                    let got = h.bridge.call_checked("Source", "GetName", &[handle.clone()]).unwrap();
                    assert_eq!(got, vec![Value::from(name.as_str())]);
                    h.bridge.call_checked("Source", "Release", &[handle]).unwrap();
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker panicked");
    }
    assert!(h.ctx.table::<Source>().is_empty());
}

#[test]
fn test_system_shutdown_ends_the_session() {
    let h = harness();
    let values = h.bridge.call_checked("System", "Shutdown", &[]).unwrap();
    assert!(values.is_empty());

    // The serve loop exits and drops its end, which the client sees as a lost peer.
    wait_until(|| !h.bridge.is_connected());
    assert!(h.bridge.call("Source", "Create", &[Value::from("x")]).is_transport_error());
}

#[cfg(unix)]
mod hosted {
    use super::*;
    use ipcbridge::ServerCommand;
    use ipcbridge::bridge::Error as BridgeError;
    use ipcbridge::host::HostedServer;
    use ipcbridge::host::ServerExit;

    #[test]
    fn test_server_that_exits_early_is_reported() {
        let config = BridgeConfig::standard()
            .with_retry_delay(Duration::from_millis(200))
            .with_server(ServerCommand::new("false", "1"));
        let bridge = Bridge::new(ChannelConnector::new(), config).expect("bridge");

        let err = bridge.host("obs-hosted").unwrap_err();
        assert_eq!(err, BridgeError::ServerExited(ServerExit { code: Some(1) }));
        assert!(!bridge.is_connected());
    }

    #[test]
    fn test_server_is_killed_when_connect_gives_up() {
        // `sleep <address> <version>` sleeps for address + version seconds.
        let config = BridgeConfig::standard()
            .with_retry_delay(Duration::from_millis(1))
            .with_server(ServerCommand::new("sleep", "0"));
        let bridge = Bridge::new(ChannelConnector::new(), config).expect("bridge");

        let started = Instant::now();
        let err = bridge.host("30").unwrap_err();
        assert!(matches!(err, BridgeError::ConnectFailed { attempts: 5, .. }), "{}", err);
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[test]
    fn test_disconnect_lets_hosted_server_finish() {
        ipcbridge::logging::init_for_tests();

        // Run as `sh <script> 1`; the script path doubles as the address.
        let dir = std::env::temp_dir();
        let script = dir.join(format!("ipcbridge-server-{}.sh", std::process::id()));
        let marker = dir.join(format!("ipcbridge-finished-{}", std::process::id()));
        let _ = std::fs::remove_file(&marker);
        std::fs::write(&script, format!("sleep 0.5\ntouch '{}'\n", marker.display())).unwrap();
        let address = script.to_str().unwrap().to_string();

        let connector = ChannelConnector::new();
        let ctx = Context::new();
        ctx.install(ObjectTable::<Source>::new());
        let _server_runtime = serve_on(&connector, &address, &ctx);

        let config = BridgeConfig::standard()
            .with_retry_delay(Duration::from_millis(1))
            .with_shutdown_timeout(Duration::from_secs(3))
            .with_server(ServerCommand::new("sh", "1"));
        let bridge = Bridge::new(connector, config).expect("bridge");
        bridge.host(&address).expect("host");
        assert!(bridge.is_hosted());

        let started = Instant::now();
        bridge.disconnect();
        assert!(started.elapsed() >= Duration::from_millis(400));
        assert!(marker.exists(), "server was killed before it finished");
        assert!(!bridge.is_connected());

        let _ = std::fs::remove_file(&marker);
        let _ = std::fs::remove_file(&script);
    }

    #[tokio::test]
    async fn test_hosted_server_kill_reaps_process() {
        // `sleep 30 0`
        let mut server = HostedServer::spawn(&ServerCommand::new("sleep", "0"), "30").unwrap();
        assert!(server.pid().is_some());
        assert_eq!(server.try_exit(), None);

        server.kill().await;
        assert_eq!(server.try_exit(), Some(ServerExit { code: None }));
    }
}
