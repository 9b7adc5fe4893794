use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GeofenceError {
    InvalidVertex { line: usize, text: String },
}

impl fmt::Display for GeofenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidVertex { line, text } => {
                write!(f, "invalid geofence vertex on line {line}: {text:?}")
            }
        }
    }
}

impl std::error::Error for GeofenceError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RouteFileError {
    InvalidPoint { line: usize, text: String },
}

impl fmt::Display for RouteFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPoint { line, text } => {
                write!(f, "invalid route point on line {line}: {text:?}")
            }
        }
    }
}

impl std::error::Error for RouteFileError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModeParseError {
    UnknownMode { value: String },
    UnknownFeedback { value: String },
    InvalidPattern { value: String },
}

impl fmt::Display for ModeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownMode { value } => write!(f, "unknown client mode: {value:?}"),
            Self::UnknownFeedback { value } => write!(f, "unknown feedback category: {value:?}"),
            Self::InvalidPattern { value } => write!(f, "invalid spawn pattern: {value:?}"),
        }
    }
}

impl std::error::Error for ModeParseError {}

/// Failure reported by a persistence collaborator. Always retryable from the
/// core's point of view: nothing in memory is lost by a failed call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceError {
    Unavailable { operation: &'static str, detail: String },
}

impl SourceError {
    pub fn unavailable(operation: &'static str, detail: impl Into<String>) -> Self {
        Self::Unavailable {
            operation,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable { operation, detail } => {
                write!(f, "persistence unavailable during {operation}: {detail}")
            }
        }
    }
}

impl std::error::Error for SourceError {}
