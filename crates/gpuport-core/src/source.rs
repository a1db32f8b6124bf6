use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Canonical provider identifiers used in records and outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    Runpod,
}

impl ProviderId {
    pub const ALL: [Self; 1] = [Self::Runpod];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Runpod => "runpod",
        }
    }

    /// Display label matching the provider's own branding.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Runpod => "RunPod",
        }
    }
}

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "runpod" => Ok(Self::Runpod),
            other => Err(ValidationError::InvalidProvider {
                value: other.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("RunPod".parse::<ProviderId>().unwrap(), ProviderId::Runpod);
        assert_eq!(" runpod ".parse::<ProviderId>().unwrap(), ProviderId::Runpod);
    }

    #[test]
    fn rejects_unknown_provider() {
        let err = "lambda".parse::<ProviderId>().unwrap_err();
        assert!(matches!(err, ValidationError::InvalidProvider { .. }));
    }
}
