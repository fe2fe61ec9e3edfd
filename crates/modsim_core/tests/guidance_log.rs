//! Session log output: resimulation guidance and diagnostics-gated debug
//! records. Kept in its own test binary because the logger is process-wide.

use log::{Level, LevelFilter, Log, Metadata, Record};
use modsim_core::{FlattenRequest, LibrarySource, Resimulation, Session, SolverStrategy, TimeSpan};
use std::path::Path;
use std::sync::Mutex;

struct Capture {
    records: Mutex<Vec<(Level, String)>>,
}

impl Log for Capture {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if let Ok(mut records) = self.records.lock() {
            records.push((record.level(), record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

static CAPTURE: Capture = Capture {
    records: Mutex::new(Vec::new()),
};

#[test]
fn session_logging() {
    log::set_logger(&CAPTURE).expect("logger");
    log::set_max_level(LevelFilter::Debug);

    recovered_resimulation_logs_guidance_then_the_listing();
    standard_library_parse_is_logged_only_with_frontend_diagnostics();
}

fn take_records() -> Vec<(Level, String)> {
    std::mem::take(&mut *CAPTURE.records.lock().expect("records"))
}

fn recovered_resimulation_logs_guidance_then_the_listing() {
    let mut session = Session::new();
    session
        .frontend_mut()
        .add_source("decay.mo", "model Decay Real x(start = 1); equation der(x) = -x; end Decay;");
    session
        .translate("Decay", Path::new("decay.mo"), LibrarySource::None)
        .expect("translate");
    take_records();

    let outcome = session
        .resimulate("Unknown", TimeSpan::default(), &SolverStrategy::default())
        .expect("recovered");
    assert!(matches!(outcome, Resimulation::Recovered { .. }));

    let records = take_records();
    let guidance = records
        .iter()
        .position(|(level, message)| {
            *level == Level::Error && message.contains("Unknown") && message.contains("Translate")
        })
        .expect("guidance logged at error level");
    let listing = records
        .iter()
        .position(|(level, message)| *level == Level::Info && message == "compiled models: [Decay]")
        .expect("listing logged at info level");
    assert!(guidance < listing);
}

fn standard_library_parse_is_logged_only_with_frontend_diagnostics() {
    const SOURCE: &str = "model Decay Real x(start = 1); equation der(x) = -x; end Decay;";
    let request = FlattenRequest::new("Decay", "decay.mo").with_library(LibrarySource::Standard("MSL:3.2.3".into()));
    let parsed_library = |records: &[(Level, String)]| {
        records
            .iter()
            .any(|(level, message)| *level == Level::Debug && message.starts_with("parsed standard library"))
    };

    let mut quiet = Session::new();
    quiet.frontend_mut().add_source("decay.mo", SOURCE);
    take_records();
    quiet.flatten(&request).expect("flatten");
    assert!(!parsed_library(&take_records()));

    let mut verbose = Session::new();
    verbose.frontend_mut().add_source("decay.mo", SOURCE);
    verbose.enable_frontend_diagnostics();
    take_records();
    verbose.flatten(&request).expect("flatten");
    assert!(parsed_library(&take_records()));
}
