//! Route definition for the realtime event stream.

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

pub fn router() -> Router<AppState> {
    Router::new().route("/events", get(ws::ws_handler))
}
