//! Reference frontend for a Modelica subset: parsing, program assembly,
//! instantiation into flat models, and the embedded standard library.

pub mod ast;
pub mod flat;
pub mod instantiate;
pub mod parser;
pub mod stdlib;

pub use ast::{ParsedProgram, Program};
pub use flat::{FlatModel, FunctionCache};

use crate::collaborators::{Frontend, SourceUnavailable};
use anyhow::{anyhow, bail, Result};
use log::debug;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[derive(Debug, Default)]
pub struct ReferenceFrontend {
    /// In-memory sources, consulted before the filesystem.
    sources: HashMap<PathBuf, String>,
    /// Library id to source file.
    libraries: HashMap<String, PathBuf>,
    /// Parsed standard library versions.
    standard: RwLock<HashMap<String, Program>>,
    verbose: bool,
}

impl ReferenceFrontend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        self.add_source(path, text);
        self
    }

    pub fn add_source(&mut self, path: impl Into<PathBuf>, text: impl Into<String>) {
        self.sources.insert(path.into(), text.into());
    }

    /// Makes `id` loadable through [`Frontend::load_library`].
    pub fn register_library(&mut self, id: impl Into<String>, path: impl Into<PathBuf>) {
        self.libraries.insert(id.into(), path.into());
    }

    fn read(&self, path: &Path) -> Result<String> {
        if let Some(text) = self.sources.get(path) {
            return Ok(text.clone());
        }
        std::fs::read_to_string(path).map_err(|source| {
            anyhow::Error::new(SourceUnavailable {
                path: path.to_path_buf(),
                source,
            })
        })
    }

    fn standard_program(&self, version: &str) -> Result<Program> {
        let tag = stdlib::normalize(version);
        {
            let cache = self
                .standard
                .read()
                .map_err(|_| anyhow!("standard library cache is poisoned"))?;
            if let Some(program) = cache.get(&tag) {
                return Ok(program.clone());
            }
        }

        let (file, text) = stdlib::source(&tag)?;
        let parsed = parser::parse_source(Path::new(file), text)?;
        let program = Program::from_parsed(parsed);
        if self.verbose {
            debug!("parsed standard library {} ({} classes)", tag, program.classes.len());
        }

        self.standard
            .write()
            .map_err(|_| anyhow!("standard library cache is poisoned"))?
            .insert(tag, program.clone());
        Ok(program)
    }
}

impl Frontend for ReferenceFrontend {
    type Parsed = ParsedProgram;
    type Program = Program;
    type Flat = FlatModel;
    type Functions = FunctionCache;

    fn parse(&self, path: &Path) -> Result<ParsedProgram> {
        let text = self.read(path)?;
        Ok(parser::parse_source(path, &text)?)
    }

    fn to_program(&self, parsed: ParsedProgram) -> Program {
        Program::from_parsed(parsed)
    }

    fn prepend(&self, library: &Program, model: Program) -> Program {
        Program::prepend(library, model)
    }

    fn instantiate(&self, model: &str, program: &Program, scalarize: bool) -> Result<(FlatModel, FunctionCache)> {
        let (flat, functions) = instantiate::instantiate(model, program, scalarize)?;
        if self.verbose {
            debug!(
                "instantiated {}: {} parameters, {} variables, {} equations\n{}",
                model,
                flat.parameters.len(),
                flat.variables.len(),
                flat.equations.len(),
                flat
            );
        }
        Ok((flat, functions))
    }

    fn load_library(&self, id: &str) -> Result<Program> {
        if let Some(path) = self.libraries.get(id) {
            let parsed = self.parse(path)?;
            return Ok(Program::from_parsed(parsed));
        }
        if id.starts_with("MSL:") {
            return self.standard_program(id);
        }
        bail!("no library registered under `{}`", id)
    }

    fn load_standard_library(&self, version: &str) -> Result<()> {
        self.standard_program(version).map(|_| ())
    }

    fn flatten_with_standard_library(
        &self,
        model: &str,
        path: &Path,
        version: &str,
        scalarize: bool,
    ) -> Result<(FlatModel, FunctionCache)> {
        let library = self.standard_program(version)?;
        let parsed = self.parse(path)?;
        let program = Program::prepend(&library, Program::from_parsed(parsed));
        self.instantiate(model, &program, scalarize)
    }

    fn to_text(&self, flat: &FlatModel) -> String {
        flat.to_string()
    }

    fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }
}
