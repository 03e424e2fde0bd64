use thiserror::Error;

/// Errors returned by graph loading, property manipulation, and server
/// operations.
#[derive(Error, Debug)]
pub enum ComfyError {
    /// The event channel has failed permanently after exhausting its
    /// reconnect attempts, or closed mid-submission.
    #[error("ComfyUI unavailable: {0}")]
    Unavailable(String),

    /// An HTTP request to the server failed at the transport level.
    #[error("{context}: {source}")]
    Network {
        context: String,
        #[source]
        source: reqwest::Error,
    },

    /// The server rejected a submitted prompt with an error envelope.
    #[error("prompt rejected ({kind}): {message}")]
    BadRequest { kind: String, message: String },

    /// The server returned a non-success HTTP status.
    #[error("ComfyUI returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The workflow references node kinds the server does not advertise.
    #[error("workflow references unknown node types: {0:?}")]
    MissingSchema(Vec<String>),

    /// A property was set to a value outside its declared domain or of the
    /// wrong lexical form.
    #[error("invalid value {value:?} for property {property:?}")]
    InvalidValue { property: String, value: String },

    /// The property cannot be set at all (image uploaders, unrecognised
    /// input kinds).
    #[error("property {0:?} is not settable")]
    NotSettable(String),

    /// The property has no bound target to write to.
    #[error("property {0:?} has no bound target")]
    Unbound(String),

    /// The node exists but carries no property with the given name or alias.
    #[error("node {node} has no property named {name:?}")]
    PropertyNotFound { node: i64, name: String },

    /// No node with the given identifier exists in the graph.
    #[error("no node with id {0}")]
    NodeNotFound(i64),

    /// JSON shape does not match any accepted form for a polymorphic field.
    #[error("malformed workflow data: {0}")]
    Malformed(String),

    /// A submission stopped with a server-side exception.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// The response from the server was missing expected fields.
    #[error("{0}")]
    InvalidResponse(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Local file I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, ComfyError>;
