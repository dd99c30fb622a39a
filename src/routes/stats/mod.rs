mod handler;

pub use handler::window_stats;
