pub mod graph;
pub mod network;
pub mod route;
