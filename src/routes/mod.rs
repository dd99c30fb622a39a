pub mod stats;
pub mod view;

pub async fn welcome() -> &'static str {
    "Welcome to EQ Works 😎"
}
