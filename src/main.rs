use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use basalt_rust::networking::network::Network;
use basalt_rust::networking::peer::{PeerServlet, PeerSocket};
use basalt_rust::settings::Settings;

/// Answers every peer request until the blockchain request dispatcher is
/// wired in.
struct UnsupportedRequestServlet;

#[async_trait]
impl PeerServlet for UnsupportedRequestServlet {
    async fn handle(&self, socket: PeerSocket, request_id: u64, request: String) {
        debug!("unsupported peer request: {}", request);
        let _ = socket
            .send_response(request_id, "{\"error\":\"Unsupported request type!\"}")
            .await;
    }
}

#[tokio::main]
async fn main() -> basalt_rust::Result<()> {
    tracing_subscriber::fmt::init();
    info!(
        "initializing basalt server version {}",
        env!("CARGO_PKG_VERSION")
    );

    let settings = Arc::new(Settings::new()?);
    let network = Network::new(settings, Arc::new(UnsupportedRequestServlet));
    network.run().await
}
