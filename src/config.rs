use crate::error::{Error, Result};
use serde::Deserialize;

pub const DEFAULT_MAX_LISTENERS: usize = 10;

/// Construction options for an [`Emitter`](crate::Emitter).
///
/// Deserializes from `{"maxListeners": n}`; missing fields take their
/// defaults. `max_listeners` is signed so that a negative value coming from
/// an external source is reported rather than wrapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EmitterConfig {
    /// Advisory per-topic listener cap. `0` disables the warning.
    pub max_listeners: i64,
}

impl Default for EmitterConfig {
    fn default() -> Self {
        Self {
            max_listeners: DEFAULT_MAX_LISTENERS as i64,
        }
    }
}

impl EmitterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_listeners(mut self, max_listeners: i64) -> Self {
        self.max_listeners = max_listeners;
        self
    }

    /// Checks the configuration and returns the effective listener cap.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidMaxListeners`] if `max_listeners` is negative.
    pub fn validate(&self) -> Result<usize> {
        validate_max_listeners(self.max_listeners)
    }
}

pub(crate) fn validate_max_listeners(max_listeners: i64) -> Result<usize> {
    usize::try_from(max_listeners).map_err(|_| Error::InvalidMaxListeners(max_listeners))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_ten_listeners() {
        assert_eq!(EmitterConfig::default().validate(), Ok(10));
    }

    #[test]
    fn zero_is_accepted() {
        assert_eq!(EmitterConfig::new().max_listeners(0).validate(), Ok(0));
    }

    #[test]
    fn negative_cap_is_rejected() {
        assert_eq!(
            EmitterConfig::new().max_listeners(-1).validate(),
            Err(Error::InvalidMaxListeners(-1))
        );
    }

    #[test]
    fn deserializes_camel_case() {
        let config: EmitterConfig = serde_json::from_str(r#"{"maxListeners": 3}"#).unwrap();
        assert_eq!(config.max_listeners, 3);

        let config: EmitterConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EmitterConfig::default());
    }

    #[test]
    fn deserialized_negative_cap_fails_validation() {
        let config: EmitterConfig = serde_json::from_str(r#"{"maxListeners": -5}"#).unwrap();
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidMaxListeners(-5))
        ));
    }
}
