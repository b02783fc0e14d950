mod handler;
mod model;

pub use handler::{heartbeat, nearby, register, update_location};
pub use model::{HeartbeatRequest, NearbyQuery, RegisterRequest, UpdateLocationRequest};
