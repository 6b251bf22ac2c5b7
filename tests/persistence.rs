use std::collections::HashMap;

use redis::aio::MultiplexedConnection;
use redis::Value;
use tempfile::TempDir;

mod common;

use common::TestServer;

async fn set(connection: &mut MultiplexedConnection, key: &str, value: &[u8]) {
    let _: () = redis::cmd("SET")
        .arg(key)
        .arg(value)
        .query_async(connection)
        .await
        .unwrap();
}

async fn get(connection: &mut MultiplexedConnection, key: &str) -> Option<Vec<u8>> {
    redis::cmd("GET")
        .arg(key)
        .query_async(connection)
        .await
        .unwrap()
}

async fn hset(connection: &mut MultiplexedConnection, key: &str, field: &str, value: &str) {
    let _: () = redis::cmd("HSET")
        .arg(key)
        .arg(field)
        .arg(value)
        .query_async(connection)
        .await
        .unwrap();
}

async fn hgetall(connection: &mut MultiplexedConnection, key: &str) -> HashMap<String, String> {
    redis::cmd("HGETALL")
        .arg(key)
        .query_async(connection)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_state_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("database.aof");

    let server = TestServer::start(Some(path.as_path())).await;
    let mut connection = server.connect().await;

    set(&mut connection, "name", b"first").await;
    set(&mut connection, "name", b"second").await;
    hset(&mut connection, "user:1", "name", "Ada").await;
    hset(&mut connection, "user:1", "lang", "en").await;

    // Reads are served but never logged.
    assert_eq!(get(&mut connection, "name").await, Some(b"second".to_vec()));
    let _: String = redis::cmd("PING").query_async(&mut connection).await.unwrap();

    server.stop().await;

    let server = TestServer::start(Some(path.as_path())).await;
    let mut connection = server.connect().await;

    assert_eq!(get(&mut connection, "name").await, Some(b"second".to_vec()));
    assert_eq!(
        hgetall(&mut connection, "user:1").await,
        HashMap::from([
            ("name".to_string(), "Ada".to_string()),
            ("lang".to_string(), "en".to_string()),
        ])
    );
    assert_eq!(get(&mut connection, "missing").await, None);

    server.stop().await;
}

#[tokio::test]
async fn test_binary_value_survives_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("database.aof");

    let mut payload: Vec<u8> = (0..4096).map(|_| rand::random::<u8>()).collect();
    payload.extend_from_slice(b"*1\r\n$4\r\nPING\r\n");

    let server = TestServer::start(Some(path.as_path())).await;
    let mut connection = server.connect().await;
    set(&mut connection, "blob", &payload).await;
    server.stop().await;

    let server = TestServer::start(Some(path.as_path())).await;
    let mut connection = server.connect().await;
    assert_eq!(get(&mut connection, "blob").await, Some(payload));
    server.stop().await;
}

#[tokio::test]
async fn test_restarts_are_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("database.aof");

    let server = TestServer::start(Some(path.as_path())).await;
    let mut connection = server.connect().await;
    set(&mut connection, "counter", b"1").await;
    hset(&mut connection, "h", "f", "v").await;
    server.stop().await;

    let len = std::fs::metadata(&path).unwrap().len();

    // Replaying doesn't append anything, however many times it happens.
    for _ in 0..3 {
        let server = TestServer::start(Some(path.as_path())).await;
        let mut connection = server.connect().await;
        assert_eq!(get(&mut connection, "counter").await, Some(b"1".to_vec()));
        assert_eq!(hgetall(&mut connection, "h").await.len(), 1);
        server.stop().await;

        assert_eq!(std::fs::metadata(&path).unwrap().len(), len);
    }
}

#[tokio::test]
async fn test_writes_after_restart_are_appended() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("database.aof");

    for value in ["1", "2", "3"] {
        let server = TestServer::start(Some(path.as_path())).await;
        let mut connection = server.connect().await;
        set(&mut connection, value, value.as_bytes()).await;
        server.stop().await;
    }

    let server = TestServer::start(Some(path.as_path())).await;
    let mut connection = server.connect().await;
    for value in ["1", "2", "3"] {
        assert_eq!(
            get(&mut connection, value).await,
            Some(value.as_bytes().to_vec())
        );
    }
    server.stop().await;
}

#[tokio::test]
async fn test_truncated_log_is_repaired() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("database.aof");

    // One complete record followed by a record cut short.
    let kept = b"*3\r\n$3\r\nSET\r\n$4\r\nkept\r\n$3\r\nyes\r\n";
    let mut contents = kept.to_vec();
    contents.extend_from_slice(b"*3\r\n$3\r\nSET\r\n$4\r\nlost");
    std::fs::write(&path, contents).unwrap();

    let server = TestServer::start(Some(path.as_path())).await;
    let mut connection = server.connect().await;

    assert_eq!(get(&mut connection, "kept").await, Some(b"yes".to_vec()));
    assert_eq!(get(&mut connection, "lost").await, None);

    set(&mut connection, "after", b"1").await;
    assert_eq!(get(&mut connection, "after").await, Some(b"1".to_vec()));

    server.stop().await;

    // The partial record is gone and the write acknowledged after it replays.
    let contents = std::fs::read(&path).unwrap();
    assert!(contents.starts_with(kept));
    assert!(!contents.windows(4).any(|window| window == b"lost"));

    let server = TestServer::start(Some(path.as_path())).await;
    let mut connection = server.connect().await;

    assert_eq!(get(&mut connection, "kept").await, Some(b"yes".to_vec()));
    assert_eq!(get(&mut connection, "after").await, Some(b"1".to_vec()));

    server.stop().await;
}

#[tokio::test]
async fn test_corrupted_log_is_left_alone() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("database.aof");

    // A record with a broken terminator between two good ones.
    let contents = b"*3\r\n$3\r\nSET\r\n$4\r\nkept\r\n$3\r\nyes\r\n\
        *3\r\n$3\r\nSET\r\n$1\r\nk\
        *3\r\n$3\r\nSET\r\n$5\r\nlater\r\n$2\r\nno\r\n";
    std::fs::write(&path, contents).unwrap();

    let server = TestServer::start(Some(path.as_path())).await;
    let mut connection = server.connect().await;

    // Serves what was replayed before the damage, without logging new writes after it.
    assert_eq!(get(&mut connection, "kept").await, Some(b"yes".to_vec()));
    assert_eq!(get(&mut connection, "later").await, None);

    set(&mut connection, "after", b"1").await;
    assert_eq!(get(&mut connection, "after").await, Some(b"1".to_vec()));

    server.stop().await;

    assert_eq!(std::fs::read(&path).unwrap(), contents);
}

#[tokio::test]
async fn test_without_aof_nothing_survives() {
    let server = TestServer::start(None).await;
    let mut connection = server.connect().await;
    set(&mut connection, "volatile", b"1").await;
    server.stop().await;

    let server = TestServer::start(None).await;
    let mut connection = server.connect().await;
    let res: Value = redis::cmd("GET")
        .arg("volatile")
        .query_async(&mut connection)
        .await
        .unwrap();
    assert_eq!(res, Value::Nil);
    server.stop().await;
}
