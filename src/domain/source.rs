use std::fmt;
use std::str::FromStr;

/// One of the upstream services being mirrored. `T` (task management), `M`
/// (shared inbox), `C` (documents, optional).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(type_name = "text")]
#[sqlx(rename_all = "UPPERCASE")]
pub enum Source {
    T,
    M,
    C,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::T => write!(f, "T"),
            Source::M => write!(f, "M"),
            Source::C => write!(f, "C"),
        }
    }
}

impl FromStr for Source {
    type Err = UnknownSource;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "T" => Ok(Source::T),
            "M" => Ok(Source::M),
            "C" => Ok(Source::C),
            other => Err(UnknownSource(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown source {0:?}")]
pub struct UnknownSource(pub String);
