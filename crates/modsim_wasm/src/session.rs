//! The session handle held by the JavaScript host.

use crate::options::{to_js_error, SimulationOptions};
use modsim_core::{
    FlattenRequest, Flattened, PipelineResult, Resimulation, Session, SessionConfig, SimulationRequest,
    SimulationResult,
};
use serde_wasm_bindgen::{from_value, to_value};
use std::path::Path;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct WasmSession {
    session: Session,
}

fn read_options(options: JsValue) -> Result<SimulationOptions, JsValue> {
    if options.is_undefined() || options.is_null() {
        return Ok(SimulationOptions::default());
    }
    from_value(options).map_err(|e| JsValue::from_str(&format!("Invalid options: {}", e)))
}

fn serialize<T: serde::Serialize>(value: &T) -> Result<JsValue, JsValue> {
    to_value(value).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

#[wasm_bindgen]
impl WasmSession {
    /// Creates a session, optionally configured from TOML text.
    #[wasm_bindgen(constructor)]
    pub fn new(config: Option<String>) -> Result<WasmSession, JsValue> {
        console_error_panic_hook::set_once();

        let config = match config {
            Some(text) => SessionConfig::from_toml_str(&text).map_err(to_js_error)?,
            None => SessionConfig::default(),
        };
        Ok(WasmSession {
            session: Session::from_config(config),
        })
    }

    /// Registers model source text under a virtual path.
    pub fn add_source(&mut self, path: &str, text: &str) {
        self.session.frontend_mut().add_source(path, text);
    }

    /// Makes the source at `path` loadable as library `id`.
    pub fn register_library(&mut self, id: &str, path: &str) {
        self.session.frontend_mut().register_library(id, path);
    }

    pub fn load_library(&mut self, id: &str) -> Result<(), JsValue> {
        self.session.load_library(id).map_err(to_js_error)
    }

    pub fn translate(&mut self, model: &str, path: &str, options: JsValue) -> Result<(), JsValue> {
        let options = read_options(options)?;
        self.translate_with(model, path, &options).map_err(to_js_error)
    }

    /// Retranslates `model` from `path`, then simulates it.
    pub fn simulate_file(&mut self, model: &str, path: &str, options: JsValue) -> Result<JsValue, JsValue> {
        let options = read_options(options)?;
        let result = self.simulate_file_with(model, path, &options).map_err(to_js_error)?;
        serialize(&result)
    }

    /// Simulates an already translated model.
    pub fn simulate(&mut self, model: &str, options: JsValue) -> Result<JsValue, JsValue> {
        let options = read_options(options)?;
        let config = self.session.config();
        let request = SimulationRequest::registered(model)
            .with_span(options.span(config))
            .with_solver(options.solver(config));
        let result = self.session.simulate(&request).map_err(to_js_error)?;
        serialize(&result)
    }

    /// Returns `{ outcome: "simulated", ... }` or
    /// `{ outcome: "recovered", model, available }`.
    pub fn resimulate(&self, model: &str, options: JsValue) -> Result<JsValue, JsValue> {
        let options = read_options(options)?;
        let outcome = self.resimulate_with(model, &options).map_err(to_js_error)?;
        serialize(&outcome)
    }

    pub fn compiled_models(&self) -> js_sys::Array {
        self.session
            .compiled_models()
            .into_iter()
            .map(JsValue::from)
            .collect()
    }

    /// Flat text of `model`, for display.
    pub fn flat_text(&self, model: &str, path: &str, options: JsValue) -> Result<String, JsValue> {
        let options = read_options(options)?;
        self.flat_text_with(model, path, &options).map_err(to_js_error)
    }

    pub fn enable_frontend_diagnostics(&mut self) {
        self.session.enable_frontend_diagnostics();
    }

    pub fn enable_backend_diagnostics(&mut self) {
        self.session.enable_backend_diagnostics();
    }

    pub fn diagnostics(&self) -> Result<JsValue, JsValue> {
        serialize(&self.session.diagnostics())
    }
}

impl WasmSession {
    pub fn inner(&self) -> &Session {
        &self.session
    }

    fn translate_with(&mut self, model: &str, path: &str, options: &SimulationOptions) -> PipelineResult<()> {
        let library = options.library_source(self.session.config());
        self.session.translate(model, Path::new(path), library)
    }

    fn simulate_file_with(
        &mut self,
        model: &str,
        path: &str,
        options: &SimulationOptions,
    ) -> PipelineResult<SimulationResult> {
        let config = self.session.config();
        let request = SimulationRequest::from_file(model, path)
            .with_library(options.library_source(config))
            .with_span(options.span(config))
            .with_solver(options.solver(config));
        self.session.simulate(&request)
    }

    fn resimulate_with(&self, model: &str, options: &SimulationOptions) -> PipelineResult<Resimulation> {
        let config = self.session.config();
        self.session
            .resimulate(model, options.span(config), &options.solver(config))
    }

    fn flat_text_with(&self, model: &str, path: &str, options: &SimulationOptions) -> PipelineResult<String> {
        let config = self.session.config();
        let request = FlattenRequest::new(model, path)
            .with_library(options.library_source(config))
            .with_scalarize(config.scalarize);
        let Flattened { model, .. } = self.session.flatten(&request)?;
        Ok(self.session.to_text(&model))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DECAY: &str = "model Decay Real x(start = 1); equation der(x) = -x; end Decay;";

    fn session() -> WasmSession {
        let mut session = WasmSession::new(Some("stop_time = 2.0".to_string())).expect("session");
        session.add_source("decay.mo", DECAY);
        session
    }

    #[test]
    fn simulate_file_translates_and_uses_configured_span() {
        let mut session = session();
        let result = session
            .simulate_file_with("Decay", "decay.mo", &SimulationOptions::default())
            .expect("simulate");
        assert_eq!(result.end_time(), Some(2.0));
        assert_eq!(session.inner().compiled_models(), vec!["Decay"]);
    }

    #[test]
    fn resimulate_recovers_unknown_models() {
        let mut session = session();
        session
            .translate_with("Decay", "decay.mo", &SimulationOptions::default())
            .expect("translate");
        let outcome = session
            .resimulate_with("Unknown", &SimulationOptions::default())
            .expect("recovered");
        assert_eq!(
            outcome,
            Resimulation::Recovered {
                model: "Unknown".to_string(),
                available: vec!["Decay".to_string()],
            }
        );
    }

    #[test]
    fn flat_text_names_the_model() {
        let session = session();
        let text = session
            .flat_text_with("Decay", "decay.mo", &SimulationOptions::default())
            .expect("flat text");
        assert!(text.starts_with("class Decay"));
    }

    #[test]
    fn diagnostics_toggles_reach_the_session() {
        let mut session = session();
        session.enable_frontend_diagnostics();
        assert!(session.inner().diagnostics().frontend);
        assert!(!session.inner().diagnostics().backend);
    }

    #[cfg(target_arch = "wasm32")]
    mod wasm {
        use super::*;
        use wasm_bindgen_test::wasm_bindgen_test;

        #[wasm_bindgen_test]
        fn simulate_file_returns_a_trajectory_object() {
            let mut session = session();
            let value = session
                .simulate_file("Decay", "decay.mo", JsValue::UNDEFINED)
                .expect("simulate");
            let result: SimulationResult = from_value(value).expect("result");
            assert_eq!(result.end_time(), Some(2.0));
            assert_eq!(session.compiled_models().length(), 1);
        }

        #[wasm_bindgen_test]
        fn resimulate_reports_recovery() {
            let session = session();
            let value = session.resimulate("Unknown", JsValue::UNDEFINED).expect("recovered");
            let outcome = js_sys::Reflect::get(&value, &JsValue::from_str("outcome")).expect("outcome");
            assert_eq!(outcome.as_string().as_deref(), Some("recovered"));
        }

        #[wasm_bindgen_test]
        fn errors_surface_as_strings() {
            let mut session = session();
            let err = session.load_library("Nope").expect_err("unknown library");
            let message = err.as_string().unwrap_or_default();
            assert!(message.contains("failed to load library `Nope`"));
        }
    }
}
