//! Python bindings for the extractor and matching engine using PyO3

use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::config::MatcherConfig;
use crate::entities::FieldExtractor;
use crate::matcher::MatchingEngine;
use crate::similarity::text_similarity;
use crate::types::MatchCandidate;

/// Similarity between two names (Python function)
#[pyfunction]
pub fn py_text_similarity(a: &str, b: &str) -> f64 {
    text_similarity(a, b)
}

/// Python wrapper for the receipt field extractor
#[pyclass]
pub struct PyFieldExtractor {
    extractor: FieldExtractor,
}

#[pymethods]
impl PyFieldExtractor {
    #[new]
    fn new() -> Self {
        Self {
            extractor: FieldExtractor::new(),
        }
    }

    /// Parse receipt text into a dict of fields
    fn parse<'py>(&self, text: &str, py: Python<'py>) -> PyResult<Bound<'py, PyDict>> {
        let intent = self.extractor.parse(text);

        let dict = PyDict::new_bound(py);
        dict.set_item("order_id", intent.order_id)?;
        dict.set_item("city", intent.city)?;
        dict.set_item("cinema_name", intent.cinema_name)?;
        dict.set_item("cinema_address", intent.cinema_address)?;
        dict.set_item("film_name", intent.film_name)?;
        dict.set_item("session_time", intent.session_time)?;
        dict.set_item("hall_name", intent.hall_name)?;
        dict.set_item("seats", intent.seats)?;
        dict.set_item("price", intent.price)?;
        dict.set_item("raw_text", intent.raw_text)?;
        Ok(dict)
    }
}

/// Python wrapper for the matching engine over plain name lists
#[pyclass]
pub struct PyMatchingEngine {
    engine: MatchingEngine,
}

#[pymethods]
impl PyMatchingEngine {
    /// Optional JSON matcher configuration; defaults when omitted
    #[new]
    #[pyo3(signature = (config_json=None))]
    fn new(config_json: Option<&str>) -> PyResult<Self> {
        let config = match config_json {
            Some(json) => MatcherConfig::from_json_str(json)
                .map_err(|e| PyErr::new::<pyo3::exceptions::PyValueError, _>(e.to_string()))?,
            None => MatcherConfig::default(),
        };
        Ok(Self {
            engine: MatchingEngine::new(config),
        })
    }

    /// Ranked candidates above the cutoff
    fn find<'py>(
        &mut self,
        target: &str,
        names: Vec<String>,
        py: Python<'py>,
    ) -> PyResult<Vec<Bound<'py, PyDict>>> {
        self.engine
            .find_candidates(target, &names)
            .iter()
            .map(|m| candidate_dict(py, m))
            .collect()
    }

    /// Best candidate, or None below the match threshold
    fn best<'py>(
        &mut self,
        target: &str,
        names: Vec<String>,
        py: Python<'py>,
    ) -> PyResult<Option<Bound<'py, PyDict>>> {
        self.engine
            .best_match(target, &names)
            .map(|m| candidate_dict(py, &m))
            .transpose()
    }

    /// Clear the result cache
    fn clear(&mut self) {
        self.engine.clear();
    }

    /// Diagnostic counters as a JSON string
    fn stats(&self) -> PyResult<String> {
        serde_json::to_string(self.engine.stats()).map_err(|e| {
            PyErr::new::<pyo3::exceptions::PyValueError, _>(format!(
                "Failed to serialize stats: {}",
                e
            ))
        })
    }
}

fn candidate_dict<'py>(py: Python<'py>, m: &MatchCandidate<String>) -> PyResult<Bound<'py, PyDict>> {
    let dict = PyDict::new_bound(py);
    dict.set_item("name", &m.record)?;
    dict.set_item("score", m.score)?;
    dict.set_item("match_type", m.match_type.as_str())?;
    dict.set_item("confidence", m.confidence)?;
    dict.set_item("reasons", m.reasons.clone())?;
    Ok(dict)
}
