//! WebSocket endpoint
//!
//! Connects axum's WebSocket support to the [`Broker`](crate::broker::Broker).
//!
//! ## Usage
//!
//! Clients connect to `/ws` with their identity in the query string:
//!
//! ```javascript
//! // Browser
//! const ws = new WebSocket('ws://localhost:8090/ws?appId=chat&userId=alice&room=lobby');
//!
//! ws.onmessage = (event) => console.log('Received:', event.data);
//! ws.send('hello');
//! ```
//!
//! Every query parameter is kept on the session and can be read back with
//! [`Session::get_param`](crate::broker::Session::get_param).

mod handler;
mod transport;

pub use handler::websocket_handler;
