use super::pubsub_client::Client;
use bytes::Bytes;

#[tokio::test]
async fn test_pair_wires_inbound_queue() {
    let (mut client, connection) = Client::pair(1);
    connection.submit(Bytes::from_static(b"up")).await.unwrap();
    assert_eq!(client.inbound.recv().await.unwrap(), "up");
}

#[tokio::test]
async fn test_pair_wires_outbound_queue() {
    let (client, mut connection) = Client::pair(1);
    client.outbound.send(Bytes::from_static(b"down")).await.unwrap();
    assert_eq!(connection.recv().await.unwrap(), "down");
}

#[test]
fn test_zero_capacity_is_bumped_to_one() {
    let (client, _connection) = Client::pair(0);
    assert_eq!(client.outbound.max_capacity(), 1);
}

#[tokio::test]
async fn test_dropping_client_closes_connection() {
    let (client, mut connection) = Client::pair(1);
    drop(client);
    assert!(connection.recv().await.is_none());
    let rejected = connection.submit(Bytes::from_static(b"late")).await;
    assert_eq!(rejected.unwrap_err(), "late");
}

#[tokio::test]
async fn test_dropping_connection_closes_client_queues() {
    let (mut client, connection) = Client::pair(1);
    drop(connection);
    assert!(client.inbound.recv().await.is_none());
    assert!(client.outbound.is_closed());
}
