use thiserror::Error;

/// Problems building the extractor registry. Always fatal.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no extractors configured")]
    Empty,

    #[error("unknown extractor identifier '{0}'")]
    UnknownExtractor(String),

    #[error("extractor '{0}' is listed more than once")]
    DuplicateExtractor(String),

    #[error("invalid rule '{rule}' for extractor '{extractor}': {source}")]
    BadRule {
        extractor: String,
        rule: String,
        #[source]
        source: RuleError,
    },

    #[error("rule table given for '{0}', which is not a registered extractor")]
    RulesForUnknown(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("rule is empty")]
    Empty,

    #[error("expected tag, .class, #id or [attr=value]")]
    Syntax,
}

/// Per-document failures. The document is skipped, the batch goes on.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("cannot derive a host from url '{0}'")]
    MissingHost(String),
}

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("backend rejected entity: {0}")]
    Backend(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Run-level failures of the ingestion pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("persisting {entity} {id} failed: {source}")]
    Persist {
        entity: &'static str,
        id: String,
        #[source]
        source: PersistError,
    },

    #[error("cannot build extraction pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),

    #[error("extraction stage panicked: {0}")]
    Join(#[from] tokio::task::JoinError),
}
