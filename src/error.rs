use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate step id: {0}")]
    DuplicateStep(String),

    #[error("Step {step} depends on unknown step: {dependency}")]
    UnknownDependency { step: String, dependency: String },

    #[error("Dependency cycle detected at step: {0}")]
    CycleDetected(String),

    #[error("Task runner not found: {0}")]
    RunnerNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
