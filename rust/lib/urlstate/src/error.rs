use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UrlStateError {
    /// Two leaves of one config resolve to the same query parameter name.
    /// This is a setup-time defect and must be fixed in code.
    #[error("config invalid: multiple definitions found for {0}")]
    DuplicateParameter(String),

    /// A query handle outlived the `UrlStore` it was attached to.
    #[error(
        "cannot find `UrlStore` for namespace '{0}': create one with `UrlStore::new` and keep it alive while handles are in use"
    )]
    MissingStore(String),

    /// The history adapter rejected a push or replace.
    #[error("navigation failed: {0}")]
    Navigation(String),

    /// A typed value could not be converted to or from the value tree.
    #[error("value conversion failed: {0}")]
    Value(String),
}

impl From<serde_json::Error> for UrlStateError {
    fn from(err: serde_json::Error) -> Self {
        UrlStateError::Value(err.to_string())
    }
}
