/*!

# Peer Networking

Basalt nodes exchange JSON POST requests and responses over a single
upgraded HTTP connection. Every logical message is one binary websocket
frame: a fixed 20-byte prefix followed by the payload.

## Message prefix

All prefix fields are big-endian:

```bytes
0-3     version             protocol version the sender supports
4-11    request_id          per-connection identifier, echoed in the response
12-15   flags               bit 0 set when the payload is gzip-compressed
16-19   uncompressed_len    payload length before compression
20..    payload             UTF-8 JSON bytes, possibly gzip-compressed
```

The request id is allocated by the sender of a request and echoed verbatim
by the responder; that is how concurrent outstanding requests on one
connection find their answers. Responses may come back in any order.

## Version negotiation

Both sides start at version 1. Every inbound frame carries the peer's
version, and the connection's effective version becomes the minimum of the
local version and the last one received. Version 1 is the only version
defined.

## Compression

When compression is enabled, payloads of 256 bytes or more are gzipped and
the compressed flag is set; smaller payloads always travel raw. A frame may
never exceed 192 MiB in total, on either side of the connection.

## Roles

The node that originated the upgrade (the initiator) sends requests with
[`peer::PeerSocket::do_post`] and waits for correlated responses. The node
that accepted the upgrade dispatches each inbound request to its
[`peer::PeerServlet`] on a shared worker pool and answers with
[`peer::PeerSocket::send_response`].

*/

pub mod filters;
pub mod frame;
pub mod handlers;
pub mod network;
pub mod peer;
pub mod pool;
