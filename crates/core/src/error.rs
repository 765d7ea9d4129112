use thiserror::Error;

#[derive(Error, Debug)]
pub enum TabloadError {
    #[error("Store error: {0}")]
    Store(String),
}
