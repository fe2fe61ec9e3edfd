use modsim_core::{LibrarySource, PipelineError, SessionConfig, SolverStrategy, TimeSpan};
use serde::{Deserialize, Serialize};
use wasm_bindgen::JsValue;

/// Per-call options accepted from JavaScript. Every field is optional; unset
/// fields fall back to the session configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulationOptions {
    pub start_time: Option<f64>,
    pub stop_time: Option<f64>,
    pub solver: Option<String>,
    /// Id of a library previously passed to `load_library`.
    pub library: Option<String>,
    pub use_standard_library: bool,
    /// Standard library version; the configured one when unset.
    pub standard_library: Option<String>,
}

impl SimulationOptions {
    pub fn span(&self, config: &SessionConfig) -> TimeSpan {
        TimeSpan::new(
            self.start_time.unwrap_or(config.start_time),
            self.stop_time.unwrap_or(config.stop_time),
        )
    }

    pub fn solver(&self, config: &SessionConfig) -> SolverStrategy {
        self.solver
            .as_deref()
            .map(SolverStrategy::from)
            .unwrap_or_else(|| config.solver.clone())
    }

    /// The standard library flag wins over a cached library id.
    pub fn library_source(&self, config: &SessionConfig) -> LibrarySource {
        if self.use_standard_library {
            match &self.standard_library {
                Some(version) => LibrarySource::Standard(version.clone()),
                None => config.standard_library_source(),
            }
        } else if let Some(id) = &self.library {
            LibrarySource::Cached(id.clone())
        } else {
            LibrarySource::None
        }
    }
}

/// Renders the error and its whole source chain on one line.
pub(crate) fn describe(err: PipelineError) -> String {
    format!("{:#}", anyhow::Error::from(err))
}

pub(crate) fn to_js_error(err: PipelineError) -> JsValue {
    JsValue::from_str(&describe(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn unset_options_fall_back_to_config() {
        let config = SessionConfig {
            start_time: 1.0,
            stop_time: 5.0,
            ..SessionConfig::default()
        };
        let options = SimulationOptions {
            stop_time: Some(2.0),
            ..SimulationOptions::default()
        };
        assert_eq!(options.span(&config), TimeSpan::new(1.0, 2.0));
        assert_eq!(options.solver(&config).as_str(), "ros2");
        assert_eq!(options.library_source(&config), LibrarySource::None);
    }

    #[test]
    fn standard_library_flag_selects_the_configured_version() {
        let config = SessionConfig::default();
        let options = SimulationOptions {
            library: Some("Plant".to_string()),
            use_standard_library: true,
            ..SimulationOptions::default()
        };
        assert_eq!(
            options.library_source(&config),
            LibrarySource::Standard("MSL:3.2.3".to_string())
        );

        let cached = SimulationOptions {
            library: Some("Plant".to_string()),
            ..SimulationOptions::default()
        };
        assert_eq!(cached.library_source(&config), LibrarySource::Cached("Plant".to_string()));
    }

    #[test]
    fn described_errors_include_their_sources() {
        let err = PipelineError::Parse {
            path: PathBuf::from("m.mo"),
            source: anyhow::anyhow!("line 3, column 1: expected `;`"),
        };
        assert_eq!(describe(err), "failed to parse m.mo: line 3, column 1: expected `;`");
    }
}
