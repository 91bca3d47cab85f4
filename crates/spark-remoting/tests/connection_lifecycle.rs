//! 连接生命周期与客户端协商契约测试
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：以可记录的传输能力与 Endpoint 桩驱动真实的 [`Connection`]，
//!   验证关闭幂等、上下文关闭级联到本地处理器、附件往返、翻译失败与等待中取消等组合语义；
//! - **设计手法 (How)**：所有桩以 `InlineExecutor` 运行回调，决议调用返回时观察者已执行完毕，
//!   断言无需等待或睡眠。

use std::{sync::Arc, time::Duration};

use spark_remoting::{
    AttachmentKey, Connection, ConnectionProviderContext, ErrorKind, OptionMap, Outcome,
    RemotingError, ResolutionContext, Status, TypeDescriptor, UnknownOptionPolicy,
    options::{OPEN_TIMEOUT, OptionValue},
    test_stubs::{EchoListener, MockConnectionHandler, MockEndpoint, MockRemoteHandler},
};

struct Fixture {
    transport: MockConnectionHandler,
    endpoint: MockEndpoint,
    connection: Connection,
}

fn fixture_with(provider: ConnectionProviderContext) -> Fixture {
    let transport = MockConnectionHandler::new();
    let endpoint = MockEndpoint::default();
    let connection = Connection::new(
        Arc::new(endpoint.clone()),
        &transport.factory(),
        provider,
        "peer-b",
    )
    .expect("factory never fails");
    Fixture {
        transport,
        endpoint,
        connection,
    }
}

fn fixture() -> Fixture {
    fixture_with(ConnectionProviderContext::default())
}

/// ## 测试一：重复关闭只关闭一次传输能力
///
/// - **意图**：`close` 幂等，传输层 `close` 恰好被调用一次；
/// - **契约**：关闭后 `is_closed` 为真，后续 `open_client` 直接失败且不触碰传输能力。
#[test]
fn closing_twice_closes_transport_once() {
    let f = fixture();
    f.connection.close().unwrap();
    f.connection.close().unwrap();
    assert_eq!(f.transport.close_count(), 1);
    assert_eq!(f.transport.instance_count(), 1);
    assert!(f.connection.is_closed());

    let handle = f.connection.open_service::<String, String>("echo", "default");
    assert_eq!(handle.outcome().unwrap().err().unwrap().kind(), ErrorKind::Closed);
    assert_eq!(f.transport.open_count(), 0);
}

/// ## 测试二：传输关闭失败仍视为已关闭
///
/// - **意图**：关闭错误返回给调用者，但连接不再接受操作，也不会重试；
/// - **契约**：关闭处理器照常运行。
#[test]
fn failed_transport_close_is_surfaced_once() {
    let f = fixture();
    let fired = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    f.connection.add_close_handler(move || {
        flag.store(true, std::sync::atomic::Ordering::SeqCst);
    });
    f.transport.fail_close_with(RemotingError::from(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "unclean shutdown",
    )));

    let err = f.connection.close().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    assert!(f.connection.is_closed());
    assert!(fired.load(std::sync::atomic::Ordering::SeqCst));
    assert!(f.connection.close().is_ok());
    assert_eq!(f.transport.close_count(), 1);
}

/// ## 测试三：上下文关闭即关闭本地处理器，即便连接器从未激活
///
/// - **意图**：发布动作的生命周期由客户端上下文界定；
/// - **契约**：关闭上下文后本地处理器恰好关闭一次，监听器收到关闭通知。
#[test]
fn context_close_closes_unactivated_local_handler() {
    let f = fixture();
    let listener = Arc::new(EchoListener::default());
    let connector = f
        .connection
        .create_client_connector::<String, String>(listener.clone(), OptionMap::empty())
        .unwrap();
    let local = f.endpoint.local_handlers().pop().unwrap();
    assert!(!local.is_closed());

    connector.client_context().close().unwrap();
    connector.client_context().close().unwrap();
    assert_eq!(local.close_count(), 1);
    assert!(listener.is_closed());

    let err = connector.client(&ResolutionContext::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Closed);
    assert_eq!(f.transport.activation_count(), 0);
}

/// ## 测试四：连接关闭不级联关闭上下文
///
/// - **意图**：上下文只弱引用连接，二者生命周期独立；
/// - **契约**：连接关闭后本地处理器仍开放，上下文仍能回指连接对象。
#[test]
fn connection_close_leaves_contexts_open() {
    let f = fixture();
    let connector = f
        .connection
        .create_client_connector_default::<String, String>(Arc::new(EchoListener::default()))
        .unwrap();
    f.connection.close().unwrap();

    let local = f.endpoint.local_handlers().pop().unwrap();
    assert!(!local.is_closed());
    assert!(!connector.client_context().is_closed());
    let back = connector.client_context().connection().unwrap();
    assert_eq!(back.to_string(), "Connection to peer-b");
}

/// ## 测试五：连接器分配失败时不遗留孤儿
///
/// - **意图**：传输能力拒绝分配连接器时，新建的上下文与本地处理器都必须被关闭；
/// - **契约**：错误同步返回，分类为 `ConnectorAllocation`。
#[test]
fn connector_refusal_closes_context_and_local_handler() {
    let f = fixture();
    f.transport.refuse_connectors(true);
    let err = f
        .connection
        .create_client_connector::<String, String>(
            Arc::new(EchoListener::default()),
            OptionMap::empty(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectorAllocation);
    let local = f.endpoint.local_handlers().pop().unwrap();
    assert_eq!(local.close_count(), 1);
    assert_eq!(f.transport.connector_count(), 0);
}

/// ## 测试六：激活连接器得到可回调本地监听器的客户端
///
/// - **意图**：连接器激活后经 Endpoint 构造类型化客户端；本地处理器按发布时的类型派发请求；
/// - **契约**：客户端描述符与类型参数一致，监听器收到请求。
#[test]
fn activated_connector_builds_typed_client() {
    let f = fixture();
    let listener = Arc::new(EchoListener::default());
    let options = OptionMap::builder()
        .set(&OPEN_TIMEOUT, Duration::from_secs(1))
        .build();
    let connector = f
        .connection
        .create_client_connector::<String, String>(listener.clone(), &options)
        .unwrap();
    assert_eq!(
        connector.client_context().options().get(&OPEN_TIMEOUT),
        Duration::from_secs(1)
    );

    assert_eq!(f.transport.activation_count(), 0);
    let client = connector.client(&ResolutionContext::default()).unwrap();
    assert!(client.request_type().is::<String>());
    assert_eq!(f.endpoint.create_client_calls(), 1);
    assert_eq!(f.transport.activation_count(), 1);

    let local = f.endpoint.local_handlers().pop().unwrap();
    let reply: String = local
        .invoke::<String, String>(connector.client_context(), "ping".to_owned())
        .unwrap();
    assert_eq!(reply, "ping");
    assert_eq!(listener.request_count(), 1);
    assert!(local.invoke::<u32, u32>(connector.client_context(), 1).is_err());
}

/// ## 测试七：附件往返
///
/// - **意图**：`attachments()` 在连接生命周期内始终是同一实例；
/// - **契约**：put/get、remove/get 往返符合预期。
#[test]
fn attachments_round_trip() {
    let f = fixture();
    let key = AttachmentKey::<String>::new("principal");
    assert!(f.connection.attachments().put(&key, "alice".to_owned()).is_none());
    assert_eq!(
        f.connection.attachments().get(&key).as_deref().map(String::as_str),
        Some("alice")
    );
    assert!(std::ptr::eq(
        f.connection.attachments(),
        f.connection.clone().attachments()
    ));
    assert_eq!(
        f.connection.attachments().remove(&key).as_deref().map(String::as_str),
        Some("alice")
    );
    assert!(f.connection.attachments().get(&key).is_none());
}

/// ## 测试八：翻译失败
///
/// - **意图**：内层成功但 Endpoint 构造失败时，外层以该错误失败；
/// - **契约**：翻译恰好调用一次，原始远端处理器由 Endpoint 释放。
#[test]
fn translation_error_fails_outer_handle() {
    let f = fixture();
    let error = RemotingError::translation("String", "String", "no such interface");
    f.endpoint.fail_clients_with(error.clone());
    let handle = f.connection.open_client::<String, String>(
        "echo",
        "default",
        &ResolutionContext::default(),
        OptionMap::empty(),
    );

    let raw = MockRemoteHandler::new("raw-1");
    assert!(f.transport.resolve_next(raw.clone()));
    assert_eq!(handle.outcome(), Some(Outcome::Failed(error)));
    assert_eq!(f.endpoint.create_client_calls(), 1);
    assert_eq!(f.endpoint.released_raw_handlers(), 1);
    assert_eq!(raw.close_count(), 1);
}

/// ## 测试九：描述符不符视为翻译失败
///
/// - **意图**：Endpoint 产出的客户端核心与请求的类型参数不一致时，调用方拿不到半成品；
/// - **契约**：外层失败分类为 `Translation`，原始远端处理器被关闭。
#[test]
fn mistyped_client_core_is_rejected() {
    let f = fixture();
    f.endpoint.misreport_reply_type(TypeDescriptor::of::<u64>());
    let handle = f.connection.open_service::<String, String>("echo", "default");
    let raw = MockRemoteHandler::new("raw-2");
    f.transport.resolve_next(raw.clone());

    let outcome = handle.outcome().unwrap();
    assert_eq!(outcome.err().unwrap().kind(), ErrorKind::Translation);
    assert_eq!(raw.close_count(), 1);
}

/// ## 测试十：打开失败原样传递
///
/// - **意图**：传输层失败不经翻译直接成为外层失败；
/// - **契约**：Endpoint 未被调用。
#[test]
fn open_failure_bypasses_endpoint() {
    let f = fixture();
    let handle = f.connection.open_service::<String, String>("missing", "default");
    let error = RemotingError::transport_open("missing", "default", "unknown service");
    f.transport.fail_next(error.clone());
    assert_eq!(handle.outcome(), Some(Outcome::Failed(error)));
    assert_eq!(f.endpoint.create_client_calls(), 0);
}

/// ## 测试十一：等待中取消
///
/// - **意图**：结果到达前取消外层句柄，传输层取消动作被调用，之后到达的结果被丢弃；
/// - **契约**：翻译从未运行；重复取消为无操作。
#[test]
fn cancel_before_resolution_never_translates() {
    let f = fixture();
    let handle = f.connection.open_service::<String, String>("echo", "default");
    assert_eq!(handle.status(), Status::Waiting);

    assert!(handle.cancel());
    assert!(!handle.cancel());
    assert_eq!(f.transport.cancel_count(), 1);
    assert!(!f.transport.resolve_next(MockRemoteHandler::new("late")));
    assert_eq!(handle.outcome(), Some(Outcome::Cancelled));
    assert_eq!(f.endpoint.create_client_calls(), 0);
}

/// ## 测试十二：便捷重载使用 Provider 上下文，拒绝策略由传输能力决定
///
/// - **意图**：未显式传入解析上下文时使用连接构造时的默认值；未知选项仅在策略为 `Reject` 时导致失败；
/// - **契约**：传输层记录到的解析上下文标签来自 Provider。
#[test]
fn convenience_overloads_use_provider_context_and_policy() {
    let provider = ConnectionProviderContext::new(ResolutionContext::new("provider-scope"))
        .with_option_policy(UnknownOptionPolicy::Reject);
    let f = fixture_with(provider);

    let _pending = f.connection.open_service::<String, String>("echo", "default");
    assert_eq!(f.transport.opens()[0].resolution, "provider-scope");

    let options = OptionMap::builder()
        .set_raw("vendor.unknown", OptionValue::Bool(true))
        .build();
    let rejected =
        f.connection
            .open_service_with_options::<String, String>("echo", "default", &options);
    assert_eq!(
        rejected.outcome().unwrap().err().unwrap().kind(),
        ErrorKind::InvalidOption
    );
}

/// ## 测试十三：转换期间到达的取消不留孤儿客户端
///
/// - **意图**：内层已成功、Endpoint 正在构造客户端时外层被取消，构造出的客户端无人接收；
/// - **逻辑**：Endpoint 在构造前取消外层句柄，随后照常返回客户端核心；
/// - **契约**：外层为 `Cancelled`，被拒收的客户端随即关闭，原始远端处理器恰好关闭一次。
#[test]
fn cancel_during_client_construction_closes_discarded_client() {
    let f = fixture();
    let handle = f.connection.open_service::<String, String>("echo", "default");
    let racing = handle.clone();
    f.endpoint.before_next_client(move || {
        racing.cancel();
    });

    let raw = MockRemoteHandler::new("raw-3");
    assert!(f.transport.resolve_next(raw.clone()));
    assert_eq!(handle.outcome(), Some(Outcome::Cancelled));
    assert_eq!(f.endpoint.create_client_calls(), 1);
    assert_eq!(raw.close_count(), 1);
}
