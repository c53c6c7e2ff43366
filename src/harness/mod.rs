// src/harness/mod.rs
//
// =============================================================================
// SANDRUNNER: HARNESS GENERATOR (C2)
// =============================================================================
//
// Builds the two Python text artefacts staged into every session: the
// subject harness (`main.py`, one audited invocation of the submitted
// function) and the driver harness (`test_script.py`, a `unittest` suite
// that shells out to `main.py` once per test case). Both are assembled from
// typed fragments and pushed into a `String` rather than interpolated
// through a single `format!` template, so a brace or quote inside the
// submitted source can never perturb the template around it.

mod driver;
mod subject;

pub use driver::generate_driver_harness;
pub use subject::generate_subject_harness;
