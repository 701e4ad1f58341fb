use chroma_error::{ChromaError, ErrorCodes};
use thiserror::Error;

/// Implements `ChromaError` for an operation error that wraps an `Internal`
/// boxed error, forwarding its code, with match arms for the remaining variants.
macro_rules! impl_operation_error {
    ($err:ty, { $($variant:pat => $action:expr),* $(,)? }) => {
        impl ChromaError for $err {
            fn code(&self) -> ErrorCodes {
                match self {
                    Self::Internal(inner) => inner.code(),
                    $( $variant => $action, )*
                }
            }
        }
    };
}

/// Raised when an identifier read from a request or from storage is not a valid UUID.
#[derive(Error, Debug)]
#[error("Invalid identifier [{id}]: {source}")]
pub struct IdFormatError {
    pub id: String,
    #[source]
    pub source: uuid::Error,
}

impl ChromaError for IdFormatError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

/// Declares a `Uuid` newtype with parsing, display and random construction.
macro_rules! define_uuid_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Copy,
            Clone,
            Debug,
            Default,
            serde::Deserialize,
            Eq,
            PartialEq,
            Ord,
            PartialOrd,
            Hash,
            serde::Serialize,
        )]
        pub struct $name(pub uuid::Uuid);

        impl $name {
            pub fn new() -> Self {
                $name(uuid::Uuid::new_v4())
            }
        }

        impl std::str::FromStr for $name {
            type Err = IdFormatError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                uuid::Uuid::parse_str(s)
                    .map($name)
                    .map_err(|source| IdFormatError {
                        id: s.to_string(),
                        source,
                    })
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}
