//! 端到端：延迟决议的传输能力上协商类型化客户端
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：模拟真实时序，传输层在一段延迟后才给出远端处理器，验证外层句柄先保持等待、
//!   随后以包装该处理器的客户端成功，且翻译只运行一次；
//! - **设计手法 (How)**：Tokio 单线程运行时中派生一个延迟任务驱动桩的 `resolve_next`，
//!   主任务直接 `await` 句柄。

use std::{sync::Arc, time::Duration};

use spark_remoting::{
    Connection, ConnectionProviderContext, OptionMap, Outcome, RawRemoteHandler,
    ResolutionContext, Status,
    test_stubs::{MockConnectionHandler, MockEndpoint, MockRemoteHandler},
};

fn connect(endpoint: &MockEndpoint, transport: &MockConnectionHandler) -> Connection {
    Connection::new(
        Arc::new(endpoint.clone()),
        &transport.factory(),
        ConnectionProviderContext::default(),
        "node-7",
    )
    .expect("mock factory succeeds")
}

/// ## 测试一：延迟成功
///
/// - **意图**：`open_client` 同步返回等待中的句柄，传输层稍后决议；
/// - **逻辑**：派生任务睡眠 20ms 后决议；主任务 `await` 句柄；
/// - **契约**：结果为成功，客户端包装的正是传输层给出的远端处理器，Endpoint 只被调用一次。
#[tokio::test]
async fn delayed_open_resolves_to_wrapping_client() {
    let endpoint = MockEndpoint::default();
    let transport = MockConnectionHandler::new();
    let connection = connect(&endpoint, &transport);

    let handle = connection.open_client::<String, String>(
        "echo",
        "default",
        &ResolutionContext::new("e2e"),
        OptionMap::empty(),
    );
    assert_eq!(handle.status(), Status::Waiting);
    assert_eq!(transport.opens()[0].service_type, "echo");

    let raw: RawRemoteHandler = MockRemoteHandler::new("echo@node-7");
    let driver = {
        let transport = transport.clone();
        let raw = Arc::clone(&raw);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            transport.resolve_next(raw)
        })
    };

    let outcome = handle.clone().await;
    assert!(driver.await.unwrap());
    let client = outcome.ok().expect("client negotiated");
    assert!(Arc::ptr_eq(client.remote_handler(), &raw));
    assert_eq!(endpoint.create_client_calls(), 1);
    assert_eq!(handle.status(), Status::Succeeded);
}

/// ## 测试二：等待中的句柄可由另一任务取消
///
/// - **意图**：取消是非阻塞的“发出即忘”信号，等待方随即观察到 `Cancelled`；
/// - **契约**：传输层取消动作恰好运行一次，Endpoint 从未被调用。
#[tokio::test]
async fn cancellation_from_another_task_wakes_the_waiter() {
    let endpoint = MockEndpoint::default();
    let transport = MockConnectionHandler::new();
    let connection = connect(&endpoint, &transport);

    let handle = connection.open_service::<String, String>("echo", "default");
    let canceller = {
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel()
        })
    };

    assert_eq!(handle.await, Outcome::Cancelled);
    assert!(canceller.await.unwrap());
    assert_eq!(transport.cancel_count(), 1);
    assert_eq!(endpoint.create_client_calls(), 0);
}

/// ## 测试三：Tokio 执行器投递观察者
///
/// - **意图**：观察者在 Tokio 的阻塞线程池上运行，而非决议线程；
/// - **契约**：观察者收到成功结果。
#[cfg(feature = "runtime-tokio")]
#[tokio::test]
async fn tokio_executor_dispatches_observers() {
    use spark_remoting::TokioExecutor;

    let executor = TokioExecutor::current().expect("inside runtime");
    let endpoint = MockEndpoint::new(Arc::new(executor));
    let transport = MockConnectionHandler::new();
    let connection = connect(&endpoint, &transport);

    let handle = connection.open_service::<String, String>("echo", "default");
    let (tx, rx) = tokio::sync::oneshot::channel();
    handle.on_complete(move |outcome| {
        let _ = tx.send(outcome.status());
    });
    transport.resolve_next(MockRemoteHandler::new("echo"));
    assert_eq!(rx.await.unwrap(), Status::Succeeded);
}
