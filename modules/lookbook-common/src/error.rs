use thiserror::Error;

#[derive(Error, Debug)]
pub enum LookbookError {
    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}
