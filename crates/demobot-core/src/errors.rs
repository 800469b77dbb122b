/// Core error type for the bot.
///
/// Adapter crates map their failures into this type so the dispatch core can
/// tell transport problems, update-shape misses and registration mistakes apart.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Rejected at registration/startup time (bad timeout, missing token, ...).
    #[error("config error: {0}")]
    Config(String),

    /// The Bot API answered with `ok: false`.
    #[error("telegram api error {code}: {description}")]
    Api {
        code: i64,
        description: String,
        retry_after: Option<u64>,
    },

    /// Network failure, non-JSON body, or an envelope we could not read.
    #[error("transport error: {0}")]
    Transport(String),

    /// An update (or result payload) did not have the keys we looked for.
    #[error("unexpected shape: {0}")]
    Shape(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The update loop is gone; nobody will fulfil the call.
    #[error("dispatcher closed")]
    Closed,
}

impl Error {
    pub fn shape(what: impl Into<String>) -> Self {
        Error::Shape(what.into())
    }

    pub fn is_shape(&self) -> bool {
        matches!(self, Error::Shape(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
