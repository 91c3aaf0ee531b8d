pub mod poller;
pub mod reaper;
pub mod renderer;
pub mod resolver;
pub mod session;
