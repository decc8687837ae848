/// severity-predict library crate.
///
/// Exposes the collect → align → predict → present pipeline as a public
/// API so that integration tests in tests/ can import them via
/// `severity_predict::`.
///
/// The binary entry point (src/main.rs) uses these same modules.
pub mod align;
pub mod form;
pub mod input;
pub mod mlflow;
pub mod model;
pub mod predictor;
pub mod utils;
