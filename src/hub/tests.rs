use super::testing::{RecordingConnection, ScriptedConnector};
use super::*;
use crate::cluster::StaticMembership;
use crate::config::CodecConfig;
use crate::protocol::{CodecError, RpcOutcome};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const COMMANDS: [&str; 4] = ["connector.main.ping", "logic.main.move", "onMove", "onChat"];

fn membership() -> Arc<StaticMembership> {
    Arc::new(StaticMembership::from_servers([
        ServerDescriptor::new("connector-1", "connector", "127.0.0.1", 4001).frontend(3001),
        ServerDescriptor::new("connector-2", "connector", "127.0.0.1", 4002).frontend(3002),
        ServerDescriptor::new("logic-1", "logic", "127.0.0.1", 4101),
        ServerDescriptor::new("logic-2", "logic", "127.0.0.1", 4102),
    ]))
}

fn hub_for(server_id: &str, connector: &ScriptedConnector) -> Arc<Hub> {
    let membership = membership();
    let identity = membership.server_by_id(server_id).unwrap();
    Hub::builder(identity, CommandTable::new(COMMANDS).unwrap(), membership)
        .connector(Arc::new(connector.clone()))
        .build()
}

fn frontend() -> Arc<Hub> {
    hub_for("connector-1", &ScriptedConnector::new())
}

fn bind(hub: &Hub, uid: u64, conn: &Arc<RecordingConnection>) {
    hub.bind(uid, conn.clone(), Session::new(hub.server_id())).unwrap();
}

fn decode(data: &Bytes) -> (usize, Value) {
    DefaultCodec.proto_decode(data).unwrap()
}

#[test]
fn test_push_to_unbound_uids_is_noop() {
    let hub = frontend();
    let conn = RecordingConnection::new(1);
    bind(&hub, 1, &conn);

    assert_eq!(hub.push_by_uid("onMove", &json!({"x": 1}), &[7, 8]).unwrap(), 0);
    hub.close_client(7);
    assert!(conn.sent().is_empty());
    assert!(!conn.is_closed());
}

#[test]
fn test_push_by_uid_delivers_encoded_message() {
    let hub = frontend();
    let a = RecordingConnection::new(1);
    let b = RecordingConnection::new(2);
    bind(&hub, 1, &a);
    bind(&hub, 2, &b);

    assert_eq!(hub.push_by_uid("onMove", &json!({"x": 1}), &[1, 9]).unwrap(), 1);

    let sent = a.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(decode(&sent[0]), (2, json!({"x": 1})));
    assert!(b.sent().is_empty());
}

#[test]
fn test_unknown_command_pushes_nothing() {
    let hub = frontend();
    let conns: Vec<_> = (1..=3).map(RecordingConnection::new).collect();
    for (uid, conn) in (1..).zip(&conns) {
        bind(&hub, uid, conn);
    }

    let err = hub.push_by_uid("onTeleport", &Value::Null, &[1, 2, 3]).unwrap_err();
    assert!(matches!(err, HubError::UnknownCommand(c) if c == "onTeleport"));
    assert!(matches!(hub.push_to_all("onTeleport", &Value::Null), Err(HubError::UnknownCommand(_))));
    assert!(conns.iter().all(|c| c.sent().is_empty()));
}

#[test]
fn test_push_to_all_uses_snapshot() {
    let hub = frontend();
    let a = RecordingConnection::new(1);
    let b = RecordingConnection::new(2);
    let late = RecordingConnection::new(3);
    bind(&hub, 1, &a);
    bind(&hub, 2, &b);

    let binder = hub.clone();
    let late_conn = late.clone();
    a.on_next_send(move || {
        binder
            .bind(3, late_conn.clone(), Session::new("connector-1"))
            .unwrap();
    });

    assert_eq!(hub.push_to_all("onChat", &json!("hi")).unwrap(), 2);
    assert_eq!(a.sent().len(), 1);
    assert_eq!(b.sent().len(), 1);
    assert!(late.sent().is_empty());
    assert_eq!(hub.bound_count(), 3);
}

#[test]
fn test_frontend_paths_rejected_on_backend() {
    let hub = hub_for("logic-1", &ScriptedConnector::new());
    let conn = RecordingConnection::new(1);

    assert!(matches!(
        hub.push_by_uid("onMove", &Value::Null, &[1]),
        Err(HubError::WrongRole { role: ServerRole::Backend, .. })
    ));
    assert!(matches!(hub.push_to_all("onMove", &Value::Null), Err(HubError::WrongRole { .. })));
    assert!(matches!(
        hub.bind(1, conn, Session::new("logic-1")),
        Err(HubError::WrongRole { .. })
    ));
}

#[tokio::test]
async fn test_backend_path_rejected_on_frontend() {
    let hub = frontend();
    let err = hub
        .push_by_uid_and_sid("onMove", &Value::Null, &[UidSid::new(1, "connector-1")])
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::WrongRole { role: ServerRole::Frontend, .. }));
}

#[test]
fn test_activate_for_all_runs_once() {
    let hub = frontend();
    let runs = AtomicUsize::new(0);
    assert!(hub.activate_for_role("all", |_| {
        runs.fetch_add(1, Ordering::SeqCst);
    }));
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let backend = hub_for("logic-2", &ScriptedConnector::new());
    assert!(backend.activate_for_role("all", |_| {
        runs.fetch_add(1, Ordering::SeqCst);
    }));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[test]
fn test_activate_for_listed_roles() {
    let backend = hub_for("logic-1", &ScriptedConnector::new());
    let mut ran = Vec::new();

    backend.activate_for_role("connector| logic ", |hub| ran.push(hub.server_type().to_string()));
    backend.activate_for_role("connector|gate", |_| ran.push("never".to_string()));

    assert_eq!(ran, vec!["logic"]);
}

#[test]
fn test_activate_with_parsed_selector() {
    let selector = RoleSelector::parse("connector|gate");
    let frontend = frontend();
    let backend = hub_for("logic-1", &ScriptedConnector::new());
    let mut ran = Vec::new();

    assert!(frontend.activate_for_role(&selector, |hub| ran.push(hub.server_id().to_string())));
    assert!(!backend.activate_for_role(&selector, |hub| ran.push(hub.server_id().to_string())));
    assert!(frontend.activate_for_role(selector, |hub| ran.push(hub.server_type().to_string())));

    assert_eq!(ran, vec!["connector-1", "connector"]);
}

#[test]
fn test_route_resolution_failures() {
    let hub = frontend();
    let session = Session::new("connector-1");

    assert!(matches!(
        hub.resolve_route("logic", &session),
        Err(HubError::RouteNotConfigured(t)) if t == "logic"
    ));

    hub.route("logic", |_, _, _| "connector-2".to_string());
    assert!(matches!(
        hub.resolve_route("logic", &session),
        Err(HubError::RouteSelectionInvalid { .. })
    ));

    hub.route("chat", |_, _, c| c[0].id.clone());
    assert!(matches!(hub.resolve_route("chat", &session), Err(HubError::NoCandidates(_))));

    hub.route("logic", |_, _, c| c[1].id.clone());
    assert_eq!(hub.resolve_route("logic", &session).unwrap().id, "logic-2");
}

#[tokio::test]
async fn test_push_by_uid_and_sid_reports_partial_failure() {
    let connector = ScriptedConnector::new();
    connector.unreachable("connector-2");
    let hub = hub_for("logic-1", &connector);

    let report = hub
        .push_by_uid_and_sid(
            "onMove",
            &json!({"x": 3}),
            &[UidSid::new(10, "connector-1"), UidSid::new(20, "connector-2")],
        )
        .await
        .unwrap();

    assert_eq!(report.delivered, vec![UidSid::new(10, "connector-1")]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].target, UidSid::new(20, "connector-2"));
    assert!(matches!(report.failed[0].error, RpcError::Unavailable { .. }));
    assert!(report.not_bound.is_empty());
    assert!(!report.is_complete());

    let calls = connector.calls_to("connector-1");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].procedure, REMOTE_PUSH);
    let args: RemotePushArgs = bincode::deserialize(&calls[0].args).unwrap();
    assert_eq!(args.uids, vec![10]);
    assert_eq!(DefaultCodec.proto_decode(&args.data).unwrap(), (2, json!({"x": 3})));
}

#[tokio::test]
async fn test_push_by_uid_and_sid_undecodable_reply_fails_target() {
    let connector = ScriptedConnector::new();
    connector.respond("connector-1", |_, _| Ok(Vec::new()));
    let hub = hub_for("logic-1", &connector);

    let report = hub
        .push_by_uid_and_sid("onMove", &json!({}), &[UidSid::new(10, "connector-1")])
        .await
        .unwrap();

    assert!(report.delivered.is_empty());
    assert_eq!(report.failed.len(), 1);
    assert!(matches!(report.failed[0].error, RpcError::Codec(_)));
}

#[tokio::test]
async fn test_push_by_uid_and_sid_batches_per_frontend() {
    let connector = ScriptedConnector::new();
    connector.respond("connector-1", |_, _| {
        Ok(bincode::serialize(&RemotePushReply { not_bound: vec![12] }).unwrap())
    });
    let hub = hub_for("logic-1", &connector);

    let report = hub
        .push_by_uid_and_sid(
            "onChat",
            &json!("gg"),
            &[UidSid::new(11, "connector-1"), UidSid::new(12, "connector-1")],
        )
        .await
        .unwrap();

    assert_eq!(connector.calls_to("connector-1").len(), 1);
    assert_eq!(report.delivered, vec![UidSid::new(11, "connector-1")]);
    assert_eq!(report.not_bound, vec![UidSid::new(12, "connector-1")]);
    assert!(report.is_complete());
}

#[tokio::test]
async fn test_push_by_uid_and_sid_unknown_command_calls_nobody() {
    let connector = ScriptedConnector::new();
    let hub = hub_for("logic-1", &connector);

    let err = hub
        .push_by_uid_and_sid("nope", &Value::Null, &[UidSid::new(1, "connector-1")])
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::UnknownCommand(_)));
    assert!(connector.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_remote_push_procedure_writes_to_bound_clients() {
    let hub = frontend();
    let conn = RecordingConnection::new(1);
    bind(&hub, 5, &conn);

    let data = DefaultCodec.proto_encode(2, &json!(1)).unwrap().to_vec();
    let args = bincode::serialize(&RemotePushArgs {
        uids: vec![5, 6],
        data: data.clone(),
    })
    .unwrap();

    let outcome = hub.procedures().dispatch("logic-1", REMOTE_PUSH, args).await;
    let reply = match outcome {
        RpcOutcome::Ok(reply) => reply,
        other => panic!("unexpected outcome {other:?}"),
    };
    let reply: RemotePushReply = bincode::deserialize(&reply).unwrap();
    assert_eq!(reply.not_bound, vec![6]);
    assert_eq!(conn.sent(), vec![Bytes::from(data)]);
}

#[tokio::test]
async fn test_client_action_forwarded_to_routed_backend() {
    let connector = ScriptedConnector::new();
    let front = hub_for("connector-1", &connector);
    front.route("logic", |session, _, candidates| {
        let uid = session.uid.unwrap_or(0) as usize;
        candidates[uid % candidates.len()].id.clone()
    });

    let mut session = Session::new("connector-1");
    session.uid = Some(4);
    session.set("room", json!(2));
    front
        .route_client_message(&session, 1, json!({"dir": "up"}))
        .await
        .unwrap();

    let calls = connector.calls_to("logic-1");
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].procedure, FORWARD);

    let back = hub_for("logic-1", &ScriptedConnector::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    back.events().subscribe(EventKind::ClientMessage, move |event| {
        if let HubEvent::ClientMessage { session, command, body, .. } = event {
            sink.lock().unwrap().push((session.uid, session.get("room").cloned(), command.clone(), body.clone()));
        }
    });

    let outcome = back.procedures().dispatch("connector-1", FORWARD, calls[0].args.clone()).await;
    assert_eq!(outcome, RpcOutcome::Ok(Vec::new()));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![(Some(4), Some(json!(2)), "logic.main.move".to_string(), json!({"dir": "up"}))]
    );
}

#[tokio::test]
async fn test_local_action_published_not_forwarded() {
    let connector = ScriptedConnector::new();
    let hub = hub_for("connector-1", &connector);
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    hub.events()
        .subscribe(EventKind::ClientMessage, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

    hub.route_client_message(&Session::new("connector-1"), 0, Value::Null)
        .await
        .unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(connector.calls.lock().unwrap().is_empty());
    assert!(matches!(
        hub.route_client_message(&Session::new("connector-1"), 99, Value::Null).await,
        Err(HubError::UnknownCommandIndex(99))
    ));
}

#[tokio::test]
async fn test_forward_to_unreachable_backend_fails() {
    let connector = ScriptedConnector::new();
    connector.unreachable("logic-1");
    let hub = hub_for("connector-1", &connector);
    hub.route("logic", |_, _, _| "logic-1".to_string());

    let err = hub
        .route_client_message(&Session::new("connector-1"), 1, Value::Null)
        .await
        .unwrap_err();
    assert!(matches!(err, HubError::Rpc(RpcError::Unavailable { .. })));
}

#[test]
fn test_session_updates_and_lookup() {
    let hub = frontend();
    let conn = RecordingConnection::new(1);
    bind(&hub, 5, &conn);

    hub.apply_session(5, HashMap::from([("room".to_string(), json!(8))]));
    hub.apply_session(6, HashMap::from([("room".to_string(), json!(8))]));

    assert_eq!(hub.client_session(5).unwrap().get("room"), Some(&json!(8)));
    assert!(matches!(hub.client_session(6), Err(HubError::UidNotBound(6))));
}

#[test]
fn test_bind_events_and_stale_unbind() {
    let hub = frontend();
    let events = Arc::new(Mutex::new(Vec::new()));
    for kind in [EventKind::ClientBound, EventKind::ClientUnbound] {
        let events = events.clone();
        hub.events().subscribe(kind, move |e| events.lock().unwrap().push(e.kind()));
    }

    let old = RecordingConnection::new(1);
    let new = RecordingConnection::new(2);
    bind(&hub, 5, &old);
    let replaced = hub.bind(5, new.clone(), Session::new("connector-1")).unwrap();
    assert_eq!(replaced.map(|c| c.id()), Some(1));
    assert!(!old.is_closed());

    assert!(!hub.unbind_if_current(5, 1));
    assert!(hub.has_client(5));
    assert!(hub.unbind(5));
    assert!(!hub.unbind(5));

    assert_eq!(
        *events.lock().unwrap(),
        vec![EventKind::ClientBound, EventKind::ClientBound, EventKind::ClientUnbound]
    );
}

#[test]
fn test_start_twice_fails() {
    let hub = frontend();
    let started = Arc::new(AtomicUsize::new(0));
    let counter = started.clone();
    hub.events().subscribe(EventKind::Started, move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    assert!(!hub.is_started());
    hub.start().unwrap();
    assert!(matches!(hub.start(), Err(HubError::AlreadyStarted)));
    assert!(hub.is_started());
    assert!(hub.uptime().is_some());
    assert_eq!(started.load(Ordering::SeqCst), 1);
}

#[test]
fn test_log_sink_receives_diagnostics() {
    let hub = frontend();
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();
    hub.on_log(move |level, msg| sink.lock().unwrap().push((level, msg.to_string())));

    let _ = hub.push_by_uid("nope", &Value::Null, &[1]);

    let lines = lines.lock().unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].0, LogLevel::Error);
    assert!(lines[0].1.contains("nope"));
}

#[tokio::test]
async fn test_slow_rpc_is_logged() {
    let hub = hub_for("logic-1", &ScriptedConnector::new());
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();
    hub.on_log(move |level, msg| sink.lock().unwrap().push((level, msg.to_string())));

    hub.invoke("connector-1", "stats", Vec::new()).await.unwrap();
    assert!(lines.lock().unwrap().is_empty());

    hub.set_setting(SettingKey::SlowRpcMs, SettingValue::Integer(-1)).unwrap();
    hub.invoke("connector-1", "stats", Vec::new()).await.unwrap();
    assert!(lines.lock().unwrap().is_empty());

    hub.set_setting(SettingKey::SlowRpcMs, SettingValue::Integer(0)).unwrap();
    hub.invoke("connector-1", "stats", Vec::new()).await.unwrap();
    let lines = lines.lock().unwrap();
    assert_eq!(lines.len(), 1);
    assert_eq!(lines[0].0, LogLevel::Warn);
    assert!(lines[0].1.contains("slow rpc stats on connector-1"));
}

struct UpperCodec;

impl Codec for UpperCodec {
    fn proto_encode(&self, cmd_index: usize, _msg: &Value) -> Result<Bytes, CodecError> {
        Ok(Bytes::from(vec![cmd_index as u8]))
    }

    fn proto_decode(&self, data: &[u8]) -> Result<(usize, Value), CodecError> {
        Ok((data[0] as usize, Value::Null))
    }

    fn msg_encode(&self, envelope: &ForwardEnvelope) -> Result<Vec<u8>, CodecError> {
        DefaultCodec.msg_encode(envelope)
    }

    fn msg_decode(&self, data: &[u8]) -> Result<ForwardEnvelope, CodecError> {
        DefaultCodec.msg_decode(data)
    }
}

#[test]
fn test_set_config_variants() {
    let hub = frontend();
    let conn = RecordingConnection::new(1);
    bind(&hub, 1, &conn);

    hub.set_config(HubConfig::Codec(CodecConfig {
        codec: Arc::new(UpperCodec),
    }));
    hub.push_by_uid("onChat", &Value::Null, &[1]).unwrap();
    assert_eq!(conn.sent(), vec![Bytes::from(vec![3u8])]);

    hub.set_config(HubConfig::Rpc(RpcConfig {
        timeout_ms: 50,
        ..Default::default()
    }));
    hub.set_config(HubConfig::Token(TokenConfig {
        server_token: "secret".to_string(),
        client_token: String::new(),
    }));
    hub.set_config(HubConfig::Connector(ConnectorConfig {
        auto_bind: true,
        ..Default::default()
    }));
    hub.set_config(HubConfig::Ssh(SshConfig {
        args: vec!["-p 22".to_string()],
    }));

    let options = hub.options();
    assert_eq!(options.rpc.timeout_ms, 50);
    assert_eq!(options.token.server_token, "secret");
    assert!(options.connector.auto_bind);
    assert_eq!(options.ssh.args.len(), 1);
    assert_eq!(hub.rpc.options().token, "secret");
    assert_eq!(hub.rpc.options().rpc.timeout_ms, 50);
}

#[test]
fn test_typed_settings() {
    let hub = frontend();
    assert!(hub
        .set_setting(SettingKey::PushLogging, SettingValue::Integer(1))
        .is_err());
    hub.set_setting(SettingKey::AppName, SettingValue::Text("arena".to_string()))
        .unwrap();
    assert_eq!(hub.setting(SettingKey::AppName), Some(SettingValue::Text("arena".to_string())));
    assert!(hub.remove_setting(SettingKey::AppName).is_some());
    assert!(hub.setting(SettingKey::AppName).is_none());
}

#[test]
fn test_monitor_snapshot() {
    let hub = frontend();
    hub.set_setting(SettingKey::AppName, SettingValue::Text("arena".to_string()))
        .unwrap();
    hub.on_monitor(|| vec![("rooms".to_string(), "3".to_string())]);
    let conn = RecordingConnection::new(1);
    bind(&hub, 1, &conn);

    let rows: HashMap<String, String> = hub.monitor_snapshot().into_iter().collect();
    assert_eq!(rows["appName"], "arena");
    assert_eq!(rows["serverId"], "connector-1");
    assert_eq!(rows["boundClients"], "1");
    assert_eq!(rows["rooms"], "3");
}

#[test]
fn test_membership_changes_publish_events() {
    let hub = frontend();
    let seen = Arc::new(Mutex::new(Vec::new()));
    for kind in [EventKind::ServerAdded, EventKind::ServerRemoved] {
        let seen = seen.clone();
        hub.events().subscribe(kind, move |e| seen.lock().unwrap().push(e.kind()));
    }

    hub.add_server(ServerDescriptor::new("chat-1", "chat", "127.0.0.1", 4200));
    assert_eq!(hub.servers_of_type("chat").len(), 1);
    assert!(hub.remove_server("chat-1").is_some());
    assert!(hub.remove_server("chat-1").is_none());
    assert!(hub.server_by_id("chat-1").is_none());

    assert_eq!(*seen.lock().unwrap(), vec![EventKind::ServerAdded, EventKind::ServerRemoved]);
}
