use std::net::SocketAddr;
use std::path::Path;

use redis::aio::MultiplexedConnection;
use redkiss::aof::FsyncPolicy;
use redkiss::config::Config;
use redkiss::server::serve;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A server running on an ephemeral port, stopped through `shutdown`.
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<redkiss::Result<()>>,
}

impl TestServer {
    pub async fn start(aof_path: Option<&Path>) -> TestServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = Config {
            bind: addr.ip().to_string(),
            port: addr.port(),
            aof_path: aof_path.map(Path::to_path_buf),
            appendfsync: FsyncPolicy::Always,
        };

        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(serve(listener, config, shutdown_rx));

        TestServer {
            addr,
            shutdown,
            handle,
        }
    }

    pub async fn connect(&self) -> MultiplexedConnection {
        let client = redis::Client::open(format!("redis://{}/", self.addr)).unwrap();
        client.get_multiplexed_async_connection().await.unwrap()
    }

    /// Stops accepting connections and waits until the append only file is closed.
    pub async fn stop(self) {
        let _ = self.shutdown.send(());
        self.handle.await.unwrap().unwrap();
    }
}
