use serde::{Deserialize, Serialize};

/// Which collaborators emit verbose diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsState {
    pub frontend: bool,
    pub backend: bool,
}

impl DiagnosticsState {
    pub fn any(&self) -> bool {
        self.frontend || self.backend
    }
}
