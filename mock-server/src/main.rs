use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::RwLock;

use mock_server::CloudState;

#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await?;
    println!("device cloud mock listening on {addr}");
    mock_server::run(listener, Arc::new(RwLock::new(CloudState::default()))).await
}
