#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Configuration error: {key}: {message}")]
    Config { key: &'static str, message: String },
}
