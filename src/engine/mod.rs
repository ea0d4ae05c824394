pub mod assignment;
pub mod delivery;
pub mod location;
pub mod queue;
pub mod ranking;
pub mod route;
pub mod watcher;
