mod common;

use common::{bowl, definition, model};
use simopt_core::config::{Config, Direction};
use simopt_core::error::EngineError;
use simopt_core::model::VariableContainer;
use simopt_core::message::{Message, Tag, COORDINATOR};
use simopt_core::optimizer::compass::CompassSearch;
use simopt_core::optimizer::TerminationCondition;
use simopt_core::overseer::Overseer;
use simopt_core::runner::distributed::CoordinatorParams;
use simopt_core::runner::Coordinator;
use simopt_core::transport::{Mailbox, RecvFilter, TcpTransport, Transport};
use simopt_core::worker::Worker;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

#[tokio::test]
async fn test_handshake_assigns_ranks() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let a = tokio::spawn(async move { TcpTransport::connect(addr).await });
    let coordinator = TcpTransport::accept_workers(&listener, 1).await.unwrap();
    let worker = a.await.unwrap().unwrap();

    assert_eq!(coordinator.rank(), COORDINATOR);
    assert_eq!(coordinator.size(), 2);
    assert_eq!(worker.rank(), 1);
    assert_eq!(worker.size(), 2);
}

#[tokio::test]
async fn test_messages_cross_the_wire() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let join = tokio::spawn(async move { TcpTransport::connect(addr).await });
    let mut coordinator = Mailbox::new(TcpTransport::accept_workers(&listener, 1).await.unwrap());
    let mut worker = Mailbox::new(join.await.unwrap().unwrap());

    let case = model().base_case();
    coordinator
        .send_message(Message::new(Tag::CaseUnevaluated, Some(case.clone()), COORDINATOR, 1))
        .await
        .unwrap();
    let env = worker.recv(RecvFilter::from(COORDINATOR)).await.unwrap();
    assert_eq!(env.tag().unwrap(), Tag::CaseUnevaluated);

    worker
        .send_message(Message::new(Tag::CaseEvalSuccess, Some(case.clone()), 1, COORDINATOR))
        .await
        .unwrap();
    let back = coordinator.recv(RecvFilter::from(1)).await.unwrap();
    assert_eq!(back.source, 1);
    assert_eq!(back.tag().unwrap(), Tag::CaseEvalSuccess);
}

#[tokio::test]
async fn test_dropped_worker_surfaces_as_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let join = tokio::spawn(async move { TcpTransport::connect(addr).await });
    let mut coordinator = TcpTransport::accept_workers(&listener, 1).await.unwrap();
    drop(join.await.unwrap().unwrap());

    assert!(matches!(
        coordinator.recv().await,
        Err(EngineError::Disconnected(1))
    ));
}

#[tokio::test]
async fn test_distributed_run_over_loopback() {
    let mut config = Config::default();
    config.search.direction = Direction::Maximize;
    config.search.max_evaluations = 400;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut nodes = Vec::new();
    for _ in 0..2 {
        nodes.push(tokio::spawn(async move {
            let transport = TcpTransport::connect(addr).await?;
            let local = VariableContainer::from_definition(&definition())?;
            let report = Worker::new(transport, local, Arc::new(bowl), 0.0).run().await?;
            Ok::<_, EngineError>(report)
        }));
    }

    let transport = TcpTransport::accept_workers(&listener, 2).await.unwrap();
    let model = model();
    let optimizer = CompassSearch::new(model.base_case(), &config.search);
    let coordinator: Coordinator<CompassSearch, TcpTransport> = CoordinatorParams::builder()
        .optimizer(optimizer)
        .overseer(Overseer::new(transport, Duration::ZERO))
        .model(model)
        .config(config)
        .build();

    let summary = coordinator.run().await.unwrap();
    assert_eq!(
        summary.termination,
        TerminationCondition::MinimumStepLengthReached
    );
    assert!(summary.best_objective().unwrap() > -1e-9);

    let mut served = 0;
    for node in nodes {
        let report = node.await.unwrap().unwrap();
        served += report.total();
    }
    assert_eq!(served, summary.stats.simulated);
}
