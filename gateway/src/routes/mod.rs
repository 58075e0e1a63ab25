pub mod api;
pub mod sonic;
