//! Ticket match - order receipt recognition and cascading entity matching
//!
//! Turns a pasted cinema order receipt into structured fields, ranks live
//! candidate lists (cinemas, films, showtimes, seats) against them, and drives
//! the cinema → film → showtime → seats selection cascade.

pub mod types;
pub mod error;
pub mod config;
pub mod similarity;
pub mod brands;
pub mod matcher;
pub mod entities;
pub mod ports;
pub mod cascade;

pub use types::*;
pub use error::*;
pub use config::*;
pub use similarity::*;
pub use brands::*;
pub use matcher::*;
pub use entities::*;
pub use ports::*;
pub use cascade::*;

// Python bindings
#[cfg(feature = "python")]
pub mod py;

#[cfg(feature = "python")]
use pyo3::prelude::*;

#[cfg(feature = "python")]
#[pymodule]
fn ticket_match(m: &Bound<'_, PyModule>) -> PyResult<()> {
    use py::*;
    m.add_class::<PyFieldExtractor>()?;
    m.add_class::<PyMatchingEngine>()?;
    m.add_function(wrap_pyfunction!(py_text_similarity, m)?)?;
    Ok(())
}
