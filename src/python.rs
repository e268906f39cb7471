use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::Range;

#[pyclass]
#[derive(Clone)]
struct EditResultPy {
    #[pyo3(get)]
    text: String,
    #[pyo3(get)]
    dot: (usize, usize),
    #[pyo3(get)]
    output: String,
    #[pyo3(get)]
    warnings: Vec<String>,
    #[pyo3(get)]
    changed: bool,
}

impl From<crate::EditResult> for EditResultPy {
    fn from(r: crate::EditResult) -> Self {
        Self {
            text: r.text,
            dot: (r.dot.q0, r.dot.q1),
            output: r.output,
            warnings: r.warnings,
            changed: r.changed,
        }
    }
}

/// Each positional command is one line of the script.
#[pyfunction]
#[pyo3(name = "edit", signature = (text, *cmds))]
fn py_edit(text: &str, cmds: Vec<String>) -> PyResult<EditResultPy> {
    let script = cmds.join("\n");
    let res = crate::edit_text(text, &script).map_err(|e| PyValueError::new_err(e.to_string()))?;
    Ok(res.into())
}

#[pyfunction]
#[pyo3(signature = (text, addr, dot = (0, 0)))]
fn address(text: &str, addr: &str, dot: (usize, usize)) -> PyResult<(usize, usize)> {
    let r = crate::resolve_address(text, addr, Range::new(dot.0, dot.1))
        .map_err(|e| PyValueError::new_err(e.to_string()))?;
    Ok((r.q0, r.q1))
}

#[pymodule]
fn samex(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<EditResultPy>()?;
    m.add_function(wrap_pyfunction!(py_edit, m)?)?;
    m.add_function(wrap_pyfunction!(address, m)?)?;
    Ok(())
}
