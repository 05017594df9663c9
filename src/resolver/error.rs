//! Resolution and fetch errors

use crate::wasm::WasmError;
use std::fmt;

/// Result type for fetches
pub type FetchResult<T> = Result<T, FetchError>;

/// Result type for module resolution
pub type ResolveResult<T> = Result<T, ResolveError>;

/// A failed fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Nothing at this location (404 or missing file)
    NotFound { url: String },
    /// The server answered with an error status
    Status { url: String, status: u16 },
    /// The request never completed
    Network { url: String, reason: String },
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { url } => write!(f, "not found: {}", url),
            Self::Status { url, status } => write!(f, "{} answered with status {}", url, status),
            Self::Network { url, reason } => write!(f, "fetching {} failed: {}", url, reason),
        }
    }
}

impl std::error::Error for FetchError {}

/// Why a program name could not be turned into a module
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// Neither a local module nor a registry package exists
    NotFound { name: String },
    /// The bytes are not a usable module
    Invalid { name: String, reason: String },
    /// A link file names something that is not a program name
    BadLink { name: String, target: String },
    /// Link files loop or nest too deeply
    LinkCycle { name: String },
    /// The registry package targets another ABI
    UnsupportedAbi { name: String, abi: String },
    /// The registry package carries no module
    NoArtifact { name: String },
    /// The registry package carries more than one module
    MultipleArtifacts { name: String, count: usize },
    /// The registry answered with something unexpected
    Registry { name: String, reason: String },
    Fetch(FetchError),
    /// The engine rejected the module
    Compile { name: String, error: WasmError },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { name } => write!(f, "{}: command not found", name),
            Self::Invalid { name, reason } => write!(f, "{}: invalid module: {}", name, reason),
            Self::BadLink { name, target } => {
                write!(f, "{}: link points to invalid name '{}'", name, target)
            }
            Self::LinkCycle { name } => write!(f, "{}: too many levels of links", name),
            Self::UnsupportedAbi { name, abi } => write!(
                f,
                "{}: only WASI modules are supported, this command uses the '{}' ABI",
                name, abi
            ),
            Self::NoArtifact { name } => write!(f, "{}: package contains no module", name),
            Self::MultipleArtifacts { name, count } => write!(
                f,
                "{}: package contains {} modules, expected exactly one",
                name, count
            ),
            Self::Registry { name, reason } => write!(f, "{}: registry error: {}", name, reason),
            Self::Fetch(e) => write!(f, "{}", e),
            Self::Compile { name, error } => write!(f, "{}: {}", name, error),
        }
    }
}

impl std::error::Error for ResolveError {}

impl From<FetchError> for ResolveError {
    fn from(err: FetchError) -> Self {
        Self::Fetch(err)
    }
}
