mod handler;
mod model;

pub use handler::{record_content_view, record_random_view};
pub use model::ViewRecorded;
