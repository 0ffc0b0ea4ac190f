//! Assignment RPC over real TCP connections

use shardmaster::common::{timestamp_now_millis, Host, ShardId};
use shardmaster::rpc::protocol::{decode, encode, read_frame, write_frame};
use shardmaster::rpc::{
    ErrorCode, MultiplexingRequestHandler, Request, RequestResponseServer, Response,
    RunningServer, ShardMasterClient,
};
use shardmaster::shardmaster::{AssignmentStore, MemoryAssignmentStore, StorePool, StoreShardMaster};
use shardmaster::Error;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

const HOUR: u64 = 3_600_000;

struct Fixture {
    server: RunningServer,
    store: Arc<MemoryAssignmentStore>,
    pool: StorePool,
}

async fn start(batch_size: usize, concurrency: usize) -> Fixture {
    let store = Arc::new(MemoryAssignmentStore::new(Duration::from_millis(HOUR)));
    let pool = StorePool::new(store.clone(), 4);
    let handler = Arc::new(MultiplexingRequestHandler::new(
        Arc::new(StoreShardMaster::new(pool.clone())),
        batch_size,
    ));
    let server = RequestResponseServer::bind("127.0.0.1:0".parse().unwrap(), handler, concurrency)
        .await
        .unwrap()
        .spawn()
        .unwrap();
    Fixture {
        server,
        store,
        pool,
    }
}

fn seed(store: &MemoryAssignmentStore, dataset: &str, shards: usize, timestamp: u64) {
    for i in 0..shards {
        store
            .upsert(
                &ShardId::new(dataset, format!("s{:03}", i)),
                &[Host::new("h1", 9000), Host::new("h2", 9000)],
                timestamp,
            )
            .unwrap();
    }
}

async fn exchange(stream: &mut TcpStream, payload: &[u8]) -> Response {
    write_frame(stream, payload).await.unwrap();
    let frame = read_frame(stream).await.unwrap().unwrap();
    decode(&frame).unwrap()
}

#[tokio::test]
async fn test_port_zero_binds_ephemeral_port() {
    let f = start(10, 4).await;
    assert_ne!(f.server.local_addr().port(), 0);
    f.server.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_dataset_listing_arrives_in_batches() {
    let f = start(10, 4).await;
    seed(&f.store, "orders", 25, timestamp_now_millis());

    let mut stream = TcpStream::connect(f.server.local_addr()).await.unwrap();
    let request = encode(&Request::GetDatasetAssignments {
        dataset: "orders".into(),
    })
    .unwrap();
    write_frame(&mut stream, &request).await.unwrap();

    let mut sizes = Vec::new();
    loop {
        let frame = read_frame(&mut stream).await.unwrap().unwrap();
        match decode::<Response>(&frame).unwrap() {
            Response::Batch { assignments, last } => {
                sizes.push(assignments.len());
                if last {
                    break;
                }
            }
            other => panic!("unexpected response {:?}", other),
        }
    }
    assert_eq!(sizes, vec![10, 10, 5]);

    let mut client = ShardMasterClient::connect(f.server.local_addr()).await.unwrap();
    let all = client.dataset_assignments("orders").await.unwrap();
    assert_eq!(all.len(), 25);
    assert_eq!(client.datasets().await.unwrap(), vec!["orders"]);

    f.server.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_malformed_and_unknown_requests_get_typed_errors() {
    let f = start(10, 4).await;
    let mut stream = TcpStream::connect(f.server.local_addr()).await.unwrap();

    let garbage = exchange(&mut stream, b"\xff\xff\xff\xff\xff").await;
    assert!(matches!(
        garbage,
        Response::Error {
            code: ErrorCode::InvalidRequest,
            ..
        }
    ));

    // Variant index past the last request kind
    let unknown = exchange(&mut stream, &99u32.to_le_bytes()).await;
    assert!(matches!(
        unknown,
        Response::Error {
            code: ErrorCode::InvalidRequest,
            ..
        }
    ));

    // Connection stays usable after an error
    let ok = exchange(&mut stream, &encode(&Request::ListDatasets).unwrap()).await;
    assert_eq!(ok, Response::Datasets { datasets: vec![] });

    f.server.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_invalid_dataset_name_is_rejected() {
    let f = start(10, 4).await;
    let mut client = ShardMasterClient::connect(f.server.local_addr()).await.unwrap();
    assert!(matches!(
        client.dataset_assignments("a/b").await,
        Err(Error::InvalidRequest(_))
    ));
    f.server.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_shard_lookup_not_found_and_stale() {
    let f = start(10, 4).await;
    let now = timestamp_now_millis();
    seed(&f.store, "fresh", 1, now);
    seed(&f.store, "old", 1, now - 2 * HOUR);

    let mut client = ShardMasterClient::connect(f.server.local_addr()).await.unwrap();
    let a = client.shard_assignment("fresh", "s000").await.unwrap();
    assert_eq!(a.replicas.len(), 2);
    assert!(matches!(
        client.shard_assignment("fresh", "s999").await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        client.shard_assignment("old", "s000").await,
        Err(Error::Stale(_))
    ));
    assert!(client.dataset_assignments("old").await.unwrap().is_empty());

    f.server.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_host_assignments() {
    let f = start(2, 4).await;
    let now = timestamp_now_millis();
    seed(&f.store, "orders", 3, now);
    f.store
        .upsert(
            &ShardId::new("clicks", "s000"),
            &[Host::new("h3", 9000)],
            now,
        )
        .unwrap();

    let mut client = ShardMasterClient::connect(f.server.local_addr()).await.unwrap();
    assert_eq!(
        client
            .host_assignments(&Host::new("h1", 9000))
            .await
            .unwrap()
            .len(),
        3
    );
    assert_eq!(
        client
            .host_assignments(&Host::new("h3", 9000))
            .await
            .unwrap()
            .len(),
        1
    );
    f.server.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_store_unavailable_is_an_error_response() {
    let f = start(10, 4).await;
    seed(&f.store, "orders", 1, timestamp_now_millis());
    f.pool.close();

    let mut client = ShardMasterClient::connect(f.server.local_addr()).await.unwrap();
    assert!(matches!(
        client.dataset_assignments("orders").await,
        Err(Error::Unavailable(_))
    ));
    // Still answering on the same connection
    assert!(matches!(
        client.datasets().await,
        Err(Error::Unavailable(_))
    ));
    f.server.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_concurrency_bound_queues_extra_connections() {
    let f = start(10, 1).await;
    let addr = f.server.local_addr();

    let mut first = ShardMasterClient::connect(addr).await.unwrap();
    first.datasets().await.unwrap();

    let mut second = ShardMasterClient::connect(addr).await.unwrap();
    let waiting = tokio::spawn(async move { second.datasets().await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!waiting.is_finished());

    drop(first);
    let answered = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .unwrap()
        .unwrap();
    assert!(answered.unwrap().is_empty());

    f.server.stop(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn test_stop_closes_idle_connections_and_listener() {
    let f = start(10, 4).await;
    let addr = f.server.local_addr();
    let mut idle = TcpStream::connect(addr).await.unwrap();
    let _ = exchange(&mut idle, &encode(&Request::ListDatasets).unwrap()).await;

    f.server.stop(Duration::from_secs(2)).await.unwrap();

    assert!(read_frame(&mut idle).await.unwrap().is_none());
    assert!(ShardMasterClient::connect(addr).await.is_err());
}
