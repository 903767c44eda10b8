use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Behaviour switches of a batch manager, fixed at construction time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchConfig {
    /// Run a group-wide length agreement check before every vector sum.
    ///
    /// Costs one extra small collective per call. When off, matching lengths
    /// across workers are the caller's obligation.
    pub verify_agreement: bool,
}

impl BatchConfig {
    /// Parses a `BatchConfig` from its JSON representation.
    ///
    /// # Arguments
    /// * `json` - A JSON object, missing fields take their default value.
    ///
    /// # Returns
    /// An `InvalidConfig` error if the document isn't a valid configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BatchErr;

    #[test]
    fn test_default_skips_agreement_check() {
        assert!(!BatchConfig::default().verify_agreement);
        assert_eq!(BatchConfig::from_json("{}").unwrap(), BatchConfig::default());
    }

    #[test]
    fn test_parse_verify_agreement() {
        let config = BatchConfig::from_json(r#"{ "verify_agreement": true }"#).unwrap();
        assert!(config.verify_agreement);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let err = BatchConfig::from_json(r#"{ "verify": true }"#).unwrap_err();
        assert!(matches!(err, BatchErr::InvalidConfig(_)));
    }
}
