use std::sync::Arc;

use warp::{Rejection, Reply};

use crate::networking::frame::MAX_MESSAGE_SIZE;
use crate::networking::peer::{PeerServlet, PeerSocket};
use crate::networking::pool::DispatchPool;
use crate::settings::Settings;

pub async fn ws_handler(
    ws: warp::ws::Ws,
    servlet: Arc<dyn PeerServlet>,
    pool: DispatchPool,
    settings: Arc<Settings>,
) -> std::result::Result<impl Reply, Rejection> {
    Ok(ws
        .max_message_size(MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| async move {
            PeerSocket::accept(socket, servlet, pool, &settings).await;
        }))
}
