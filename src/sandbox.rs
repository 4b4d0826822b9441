//! Transform evaluation: user scripts run against the fetched table.
//!
//! Scripts are Rhai. The input table is bound as `data` (an array of
//! object maps, one per row) and the script must leave its output in
//! `result`. The engine exposes no filesystem, network, or process
//! APIs; a progress hook aborts evaluation once the wall-clock
//! deadline elapses.

use std::time::{Duration, Instant};

use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use thiserror::Error;
use tracing::{debug, warn};

use crate::table::{Cell, Table};

/// Extra slack for the outer timeout so the in-engine interrupt is
/// normally the one that fires.
const WORKER_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Script execution exceeded timeout of {0} seconds")]
    Timeout(u64),
    #[error("Script execution failed: {0}")]
    Script(String),
    #[error("Script must assign a table (an array of objects) to 'result'; got {0}")]
    BadResult(String),
    #[error("script worker failed: {0}")]
    Worker(String),
}

/// Evaluate `script` against `input` under a hard deadline.
///
/// Evaluation runs on a blocking worker. The engine interrupts the
/// script at the deadline; an outer timeout additionally frees the
/// caller even if the worker lingers, in which case the worker thread
/// is left to finish on its own.
pub async fn run(script: &str, input: Table, deadline: Duration) -> Result<Table, SandboxError> {
    let script = script.to_string();
    let worker = tokio::task::spawn_blocking(move || evaluate(&script, input, deadline));

    match tokio::time::timeout(deadline + WORKER_GRACE, worker).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(SandboxError::Worker(join_error.to_string())),
        Err(_) => {
            warn!("script worker missed its deadline and was abandoned");
            Err(SandboxError::Timeout(deadline.as_secs()))
        }
    }
}

fn evaluate(script: &str, input: Table, deadline: Duration) -> Result<Table, SandboxError> {
    let mut engine = Engine::new();
    register_datetime_functions(&mut engine);

    let started = Instant::now();
    engine.on_progress(move |_| {
        (started.elapsed() >= deadline).then(|| Dynamic::from("deadline exceeded"))
    });

    let input_columns: Vec<String> = input.columns().to_vec();

    let mut scope = Scope::new();
    scope.push_dynamic("data", table_to_dynamic(&input));
    scope.push_dynamic("result", Dynamic::UNIT);

    if let Err(e) = engine.run_with_scope(&mut scope, script) {
        return Err(match *e {
            EvalAltResult::ErrorTerminated(..) => SandboxError::Timeout(deadline.as_secs()),
            other => SandboxError::Script(other.to_string()),
        });
    }

    let mut output = scope
        .get_value::<Dynamic>("result")
        .unwrap_or(Dynamic::UNIT);

    // Scripts that only mutated `data` in place count too.
    if output.is_unit() {
        debug!("no 'result' binding produced, using 'data' as output");
        output = scope
            .get_value::<Dynamic>("data")
            .unwrap_or(Dynamic::UNIT);
    }

    dynamic_to_table(output, &input_columns)
}

fn register_datetime_functions(engine: &mut Engine) {
    engine.register_fn("now", || chrono::Utc::now().timestamp());
    engine.register_fn("today", || {
        chrono::Utc::now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp()
    });
}

fn table_to_dynamic(table: &Table) -> Dynamic {
    let rows: rhai::Array = table
        .rows()
        .iter()
        .map(|row| {
            let mut map = rhai::Map::new();
            for (column, cell) in table.columns().iter().zip(row) {
                map.insert(column.as_str().into(), cell_to_dynamic(cell));
            }
            Dynamic::from(map)
        })
        .collect();
    rows.into()
}

fn cell_to_dynamic(cell: &Cell) -> Dynamic {
    match cell {
        Cell::Null => Dynamic::UNIT,
        Cell::Bool(b) => (*b).into(),
        Cell::Int(i) => (*i).into(),
        Cell::Float(f) => (*f).into(),
        Cell::Str(s) => s.clone().into(),
    }
}

fn dynamic_to_cell(value: &Dynamic) -> Cell {
    if value.is_unit() {
        Cell::Null
    } else if let Ok(b) = value.as_bool() {
        Cell::Bool(b)
    } else if let Ok(i) = value.as_int() {
        Cell::Int(i)
    } else if let Ok(f) = value.as_float() {
        Cell::Float(f)
    } else if value.is_string() {
        Cell::Str(value.clone().into_string().unwrap_or_default())
    } else {
        // Anything structured keeps its display form.
        Cell::Str(value.to_string())
    }
}

fn dynamic_to_table(value: Dynamic, input_columns: &[String]) -> Result<Table, SandboxError> {
    let rows: Vec<rhai::Map> = if value.is_array() {
        value
            .into_array()
            .map_err(|t| SandboxError::BadResult(t.to_string()))?
            .into_iter()
            .map(|element| {
                element
                    .try_cast::<rhai::Map>()
                    .ok_or_else(|| SandboxError::BadResult("an array of non-objects".to_string()))
            })
            .collect::<Result<_, _>>()?
    } else if value.is_map() {
        vec![value
            .try_cast::<rhai::Map>()
            .expect("checked with is_map")]
    } else {
        return Err(SandboxError::BadResult(value.type_name().to_string()));
    };

    // Preserve the input column order where names carry over; new
    // columns follow in their encounter order.
    let mut columns: Vec<String> = input_columns
        .iter()
        .filter(|column| rows.iter().any(|row| row.contains_key(column.as_str())))
        .cloned()
        .collect();
    for row in &rows {
        for key in row.keys() {
            if !columns.iter().any(|c| c == key.as_str()) {
                columns.push(key.to_string());
            }
        }
    }

    let mut table = Table::new(columns);
    for row in &rows {
        let cells = table
            .columns()
            .iter()
            .map(|column| {
                row.get(column.as_str())
                    .map_or(Cell::Null, dynamic_to_cell)
            })
            .collect();
        table
            .push_row(cells)
            .map_err(|e| SandboxError::BadResult(e.to_string()))?;
    }
    Ok(table)
}
