use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::networking::filters::ws_upgrade_route_filter;
use crate::networking::peer::{PeerServlet, PeerSocket};
use crate::networking::pool::DispatchPool;
use crate::settings::Settings;

/// One configured peer, an entry of `network.peers`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PeerSetting {
    pub host: [u8; 4],
    pub port: u16,
}

/// Runs the peer server and dials the configured peers.
pub struct Network {
    settings: Arc<Settings>,
    servlet: Arc<dyn PeerServlet>,
    pool: DispatchPool,
    peer_settings: Option<Vec<PeerSetting>>,
}

impl Network {
    pub fn new(settings: Arc<Settings>, servlet: Arc<dyn PeerServlet>) -> Network {
        let peer_settings = settings.get::<Vec<PeerSetting>>("network.peers").ok();
        Network {
            settings,
            servlet,
            pool: DispatchPool::new(),
            peer_settings,
        }
    }

    pub async fn run(&self) -> crate::Result<()> {
        let host = self.settings.host();
        let port = self.settings.port();

        let routes = ws_upgrade_route_filter(
            self.servlet.clone(),
            self.pool.clone(),
            self.settings.clone(),
        );

        if let Some(peer_settings) = &self.peer_settings {
            for peer in peer_settings {
                let uri = peer_uri(peer);
                let socket = PeerSocket::new_client(&self.settings);
                tokio::spawn(async move {
                    match socket.start_client(&uri).await {
                        Ok(true) => info!("connected to peer {}", uri),
                        Ok(false) => info!("peer {} declined the websocket upgrade", uri),
                        Err(err) => error!("websocket connection to {} failed: {}", uri, err),
                    }
                });
            }
        }

        info!("peer server listening on port {}", port);
        warp::serve(routes).run((host, port)).await;

        Ok(())
    }
}

fn peer_uri(peer: &PeerSetting) -> String {
    let host = peer
        .host
        .iter()
        .map(|octet| octet.to_string())
        .collect::<Vec<String>>()
        .join(".");
    format!("ws://{}:{}/peer", host, peer.port)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    use async_trait::async_trait;

    use super::*;
    use crate::error::PeerError;
    use crate::networking::frame::{Frame, VERSION};

    /// Echoes requests back; `"noreply"` is ignored and `"close"` drops the
    /// connection without answering.
    struct EchoServlet;

    #[async_trait]
    impl PeerServlet for EchoServlet {
        async fn handle(&self, socket: PeerSocket, request_id: u64, request: String) {
            match request.as_str() {
                "close" => socket.close().await,
                "noreply" => {}
                _ => {
                    let _ = socket.send_response(request_id, &request).await;
                }
            }
        }
    }

    /// Holds requests until `expected` have arrived, then answers them in
    /// reverse id order.
    struct ReverseReplyServlet {
        expected: usize,
        held: Mutex<Vec<(u64, String)>>,
        seen: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl PeerServlet for ReverseReplyServlet {
        async fn handle(&self, socket: PeerSocket, request_id: u64, request: String) {
            self.seen.lock().unwrap().push(request_id);
            let ready = {
                let mut held = self.held.lock().unwrap();
                held.push((request_id, request));
                if held.len() == self.expected {
                    Some(std::mem::take(&mut *held))
                } else {
                    None
                }
            };
            if let Some(mut held) = ready {
                held.sort_by_key(|(id, _)| std::cmp::Reverse(*id));
                for (id, request) in held {
                    let _ = socket.send_response(id, &request).await;
                }
            }
        }
    }

    fn serve(servlet: Arc<dyn PeerServlet>, settings: Arc<Settings>) -> SocketAddr {
        let routes = ws_upgrade_route_filter(servlet, DispatchPool::new(), settings);
        let (addr, server) = warp::serve(routes).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        addr
    }

    fn test_settings(read_timeout_ms: u64, gzip: bool) -> Arc<Settings> {
        Arc::new(
            Settings::from_toml(&format!(
                "[network]\nconnect_timeout = 2000\nread_timeout = {}\nenable_gzip = {}\n",
                read_timeout_ms, gzip
            ))
            .unwrap(),
        )
    }

    fn peer_uri_for(addr: SocketAddr) -> String {
        format!("ws://{}/peer", addr)
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_websocket_post_round_trip() {
        let settings = test_settings(5000, false);
        let addr = serve(Arc::new(EchoServlet), settings.clone());
        let socket = PeerSocket::new_client(&settings);
        let uri = peer_uri_for(addr);

        assert!(socket.start_client(&uri).await.unwrap());
        // already open, no new upgrade
        assert!(socket.start_client(&uri).await.unwrap());

        let response = socket.do_post("{\"request\":\"getInfo\"}").await.unwrap();
        assert_eq!(response, "{\"request\":\"getInfo\"}");
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_websocket_gzip_round_trip() {
        let settings = test_settings(5000, true);
        let addr = serve(Arc::new(EchoServlet), settings.clone());
        let socket = PeerSocket::new_client(&settings);

        assert!(socket.start_client(&peer_uri_for(addr)).await.unwrap());

        let request = serde_json::json!({ "data": "a".repeat(600) }).to_string();
        let response = socket.do_post(&request).await.unwrap();
        assert_eq!(response, request);
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_out_of_order_replies() {
        let servlet = Arc::new(ReverseReplyServlet {
            expected: 3,
            held: Mutex::new(vec![]),
            seen: Mutex::new(vec![]),
        });
        let settings = test_settings(5000, false);
        let addr = serve(servlet.clone(), settings.clone());
        let socket = PeerSocket::new_client(&settings);

        assert!(socket.start_client(&peer_uri_for(addr)).await.unwrap());

        let (first, second, third) = tokio::join!(
            socket.do_post("{\"n\":0}"),
            socket.do_post("{\"n\":1}"),
            socket.do_post("{\"n\":2}"),
        );
        assert_eq!(first.unwrap(), "{\"n\":0}");
        assert_eq!(second.unwrap(), "{\"n\":1}");
        assert_eq!(third.unwrap(), "{\"n\":2}");

        let mut seen = servlet.seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_read_timeout_leaves_session_usable() {
        let settings = test_settings(300, false);
        let addr = serve(Arc::new(EchoServlet), settings.clone());
        let socket = PeerSocket::new_client(&settings);

        assert!(socket.start_client(&peer_uri_for(addr)).await.unwrap());

        let err = socket.do_post("noreply").await.unwrap_err();
        assert!(matches!(err, PeerError::ReadTimeout));

        let response = socket.do_post("{\"n\":1}").await.unwrap();
        assert_eq!(response, "{\"n\":1}");
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_peer_close_releases_waiters() {
        let settings = test_settings(5000, false);
        let addr = serve(Arc::new(EchoServlet), settings.clone());
        let socket = PeerSocket::new_client(&settings);

        assert!(socket.start_client(&peer_uri_for(addr)).await.unwrap());

        let started = Instant::now();
        let err = socket.do_post("close").await.unwrap_err();
        assert!(matches!(err, PeerError::SessionClosed));
        // released by the close, well before the read timeout
        assert!(started.elapsed() < Duration::from_millis(4000));

        let err = socket.do_post("{}").await.unwrap_err();
        assert!(matches!(err, PeerError::SessionNotOpen));
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_connect_cooldown() {
        let settings = test_settings(5000, false);
        let socket = PeerSocket::new_client(&settings);
        // nothing listens here
        let uri = "ws://127.0.0.1:9/peer";

        match socket.start_client(uri).await {
            Ok(connected) => assert!(!connected),
            Err(_) => {}
        }

        let started = Instant::now();
        let second = socket.start_client(uri).await.unwrap();
        assert!(!second);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_acceptor_replies_through_test_client() {
        let settings = test_settings(5000, false);
        let filter =
            ws_upgrade_route_filter(Arc::new(EchoServlet), DispatchPool::new(), settings);
        let mut client = warp::test::ws()
            .path("/peer")
            .handshake(filter)
            .await
            .expect("handshake");

        let encoded = Frame::encode(b"{\"request\":\"getInfo\"}", 42, VERSION, false).unwrap();
        client.send(warp::ws::Message::binary(encoded)).await;

        let reply = client.recv().await.unwrap();
        let frame = Frame::decode(reply.as_bytes()).unwrap();
        assert_eq!(frame.version, VERSION);
        assert_eq!(frame.request_id, 42);
        assert_eq!(frame.payload, "{\"request\":\"getInfo\"}");
    }

    #[tokio::test]
    async fn test_acceptor_negotiates_version_down() {
        let settings = test_settings(5000, false);
        let filter =
            ws_upgrade_route_filter(Arc::new(EchoServlet), DispatchPool::new(), settings);
        let mut client = warp::test::ws()
            .path("/peer")
            .handshake(filter)
            .await
            .expect("handshake");

        // a peer claiming a newer version is answered at ours
        let encoded = Frame::encode(b"{}", 0, 7, false).unwrap();
        client.send(warp::ws::Message::binary(encoded)).await;
        let frame = Frame::decode(client.recv().await.unwrap().as_bytes()).unwrap();
        assert_eq!(frame.version, VERSION);

        // a peer claiming an older version pins the connection there
        let encoded = Frame::encode(b"{}", 1, 0, false).unwrap();
        client.send(warp::ws::Message::binary(encoded)).await;
        let frame = Frame::decode(client.recv().await.unwrap().as_bytes()).unwrap();
        assert_eq!(frame.version, 0);
    }
}
