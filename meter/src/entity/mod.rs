pub mod node;
pub mod traffic_stat;
pub mod user;
