use crate::error::{BackendError, Result};

/// Settings for one backend instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Worker threads the matmul kernel splits output columns across.
    pub n_threads: usize,
    /// When true, a refused capability request makes every op ineligible.
    /// When false the refusal is only logged.
    pub strict_capability: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            n_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            strict_capability: true,
        }
    }
}

impl BackendConfig {
    /// Parse the registry's parameter string: comma-separated `key=value`
    /// pairs, e.g. `"n_threads=8,strict=false"`.
    ///
    /// An absent or blank string yields the defaults.
    ///
    /// # Errors
    /// Returns `InvalidArgument` for unknown keys or malformed values.
    pub fn parse(params: Option<&str>) -> Result<Self> {
        let mut config = Self::default();
        let Some(params) = params else {
            return Ok(config);
        };

        for pair in params.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                BackendError::InvalidArgument(format!("expected key=value, got '{}'", pair))
            })?;
            let value = value.trim();
            match key.trim() {
                "n_threads" => {
                    config.n_threads = match value.parse::<usize>() {
                        Ok(n) if n > 0 => n,
                        _ => {
                            return Err(BackendError::InvalidArgument(format!(
                                "n_threads must be a positive integer, got '{}'",
                                value
                            )))
                        }
                    }
                }
                "strict" => {
                    config.strict_capability = value.parse::<bool>().map_err(|_| {
                        BackendError::InvalidArgument(format!(
                            "strict must be true or false, got '{}'",
                            value
                        ))
                    })?
                }
                other => {
                    return Err(BackendError::InvalidArgument(format!(
                        "unknown backend parameter '{}'",
                        other
                    )))
                }
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = BackendConfig::default();
        assert!(c.n_threads >= 1);
        assert!(c.strict_capability);
        assert_eq!(BackendConfig::parse(None).unwrap(), c);
        assert_eq!(BackendConfig::parse(Some("  ")).unwrap(), c);
    }

    #[test]
    fn test_parse_pairs() {
        let c = BackendConfig::parse(Some("n_threads=3, strict=false")).unwrap();
        assert_eq!(c.n_threads, 3);
        assert!(!c.strict_capability);
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["n_threads=0", "n_threads=x", "strict=maybe", "color=red", "n_threads"] {
            assert!(
                matches!(
                    BackendConfig::parse(Some(bad)),
                    Err(BackendError::InvalidArgument(_))
                ),
                "{bad}"
            );
        }
    }
}
