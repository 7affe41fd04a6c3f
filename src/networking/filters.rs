use std::convert::Infallible;
use std::sync::Arc;

use warp::{Filter, Reply};

use super::handlers::ws_handler;
use crate::networking::peer::PeerServlet;
use crate::networking::pool::DispatchPool;
use crate::settings::Settings;

/// Upgrade route for the peer server.
///
/// Peers open `ws://host:port/peer`; the upgraded connection is handed to a
/// [`crate::networking::peer::PeerSocket`] in the acceptor role.
pub fn ws_upgrade_route_filter(
    servlet: Arc<dyn PeerServlet>,
    pool: DispatchPool,
    settings: Arc<Settings>,
) -> impl Filter<Extract = (impl Reply,), Error = warp::Rejection> + Clone {
    warp::path("peer")
        .and(warp::ws())
        .and(with_servlet(servlet))
        .and(with_pool(pool))
        .and(with_settings(settings))
        .and_then(ws_handler)
}

fn with_servlet(
    servlet: Arc<dyn PeerServlet>,
) -> impl Filter<Extract = (Arc<dyn PeerServlet>,), Error = Infallible> + Clone {
    warp::any().map(move || servlet.clone())
}

fn with_pool(
    pool: DispatchPool,
) -> impl Filter<Extract = (DispatchPool,), Error = Infallible> + Clone {
    warp::any().map(move || pool.clone())
}

fn with_settings(
    settings: Arc<Settings>,
) -> impl Filter<Extract = (Arc<Settings>,), Error = Infallible> + Clone {
    warp::any().map(move || settings.clone())
}
