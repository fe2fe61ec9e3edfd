//! `wasm-bindgen` bridge exposing a modsim session to a JavaScript host.

mod options;
mod session;

pub use options::SimulationOptions;
pub use session::WasmSession;
