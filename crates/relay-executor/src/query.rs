//! Statement execution paths.
//!
//! [`Fetchable`] ties each result mode to its execution strategy:
//! typed rows run over prepared statements with output binding and
//! truncation regrowth, raw rows run over the text protocol with formatted
//! placeholders, exec-only statements fetch nothing. Every failure path
//! records the error in the result container and closes the statement
//! before returning.

use bytes::Bytes;

use relay_core::bind::{OutputBinding, RowOut};
use relay_core::codes;
use relay_core::param::SqlParam;
use relay_core::results::{Exec, RawRows, ResultMode, SqlResults};

use crate::driver::{DriverError, FetchOutcome};
use crate::executor::Executor;
use crate::formatter::format_query;
use crate::statement::Statement;

/// A result mode that knows how to execute itself on a session.
pub trait Fetchable: ResultMode {
    fn run(
        executor: &mut Executor,
        results: &mut SqlResults<Self>,
        sql: &str,
        params: &[SqlParam],
    ) -> bool;
}

impl Fetchable for Exec {
    fn run(
        executor: &mut Executor,
        results: &mut SqlResults<Self>,
        sql: &str,
        params: &[SqlParam],
    ) -> bool {
        execute_only(executor, results, sql, params)
    }
}

impl Fetchable for RawRows {
    fn run(
        executor: &mut Executor,
        results: &mut SqlResults<Self>,
        sql: &str,
        params: &[SqlParam],
    ) -> bool {
        query_raw(executor, results, sql, params)
    }
}

macro_rules! impl_fetchable_for_rows {
    ($($name:ident),+) => {
        impl<$($name: relay_core::bind::ColumnOut),+> Fetchable for ($($name,)+) {
            fn run(
                executor: &mut Executor,
                results: &mut SqlResults<Self>,
                sql: &str,
                params: &[SqlParam],
            ) -> bool {
                query_typed(executor, results, sql, params)
            }
        }
    };
}

impl_fetchable_for_rows!(A);
impl_fetchable_for_rows!(A, B);
impl_fetchable_for_rows!(A, B, C);
impl_fetchable_for_rows!(A, B, C, D);
impl_fetchable_for_rows!(A, B, C, D, E);
impl_fetchable_for_rows!(A, B, C, D, E, F);
impl_fetchable_for_rows!(A, B, C, D, E, F, G);
impl_fetchable_for_rows!(A, B, C, D, E, F, G, H);
impl_fetchable_for_rows!(A, B, C, D, E, F, G, H, I);
impl_fetchable_for_rows!(A, B, C, D, E, F, G, H, I, J);
impl_fetchable_for_rows!(A, B, C, D, E, F, G, H, I, J, K);
impl_fetchable_for_rows!(A, B, C, D, E, F, G, H, I, J, K, L);
impl_fetchable_for_rows!(A, B, C, D, E, F, G, H, I, J, K, L, M);
impl_fetchable_for_rows!(A, B, C, D, E, F, G, H, I, J, K, L, M, N);
impl_fetchable_for_rows!(A, B, C, D, E, F, G, H, I, J, K, L, M, N, O);
impl_fetchable_for_rows!(A, B, C, D, E, F, G, H, I, J, K, L, M, N, O, P);

/// Make sure the session is usable, reconnecting with backoff when it is
/// not. Records a connection error in the results on failure.
fn ensure_alive<T: ResultMode>(executor: &mut Executor, results: &mut SqlResults<T>) -> bool {
    if executor.check_alive() {
        return true;
    }
    if executor.start_reconnect() {
        return true;
    }

    let code = match executor.error_code() {
        0 => codes::DB_CONNECTION_ERROR,
        code => code,
    };
    let message = match executor.error_message() {
        m if m.is_empty() => "MySQL server is unavailable".to_string(),
        m => m,
    };
    results.set_error(code, message);
    false
}

fn fail_stmt<T: ResultMode>(
    results: &mut SqlResults<T>,
    stmt: &mut Statement<'_>,
    error: DriverError,
) -> bool {
    results.set_error(error.code, error.message);
    let _ = stmt.close();
    false
}

/// Typed prepared-statement query: validate shape, bind, execute, fetch
/// with truncation handling, decode each row.
pub fn query_typed<R>(
    executor: &mut Executor,
    results: &mut SqlResults<R>,
    sql: &str,
    params: &[SqlParam],
) -> bool
where
    R: RowOut + ResultMode<RowSet = Vec<R>>,
{
    results.clear();
    if !ensure_alive(executor, results) {
        return false;
    }

    let dynamic_init = results.option().dynamic_buffer_init_size;
    let mut stmt = Statement::new(executor.driver_mut());
    if let Err(error) = stmt.init(sql) {
        return fail_stmt(results, &mut stmt, error);
    }

    let meta = stmt.result_meta();
    if let Some(message) = R::check_fields(&meta) {
        results.set_error(codes::STMT_PARAMS_ERROR, message);
        let _ = stmt.close();
        return false;
    }

    if params.len() != stmt.params_count() {
        results.set_error(
            codes::STMT_PARAMS_ERROR,
            format!(
                "the statement has {} placeholders but {} inputs were supplied",
                stmt.params_count(),
                params.len()
            ),
        );
        let _ = stmt.close();
        return false;
    }

    if let Err(error) = stmt.bind_params(params) {
        return fail_stmt(results, &mut stmt, error);
    }

    let mut binding = R::bind_outputs(&meta, dynamic_init);

    if let Err(error) = stmt.execute() {
        return fail_stmt(results, &mut stmt, error);
    }
    if let Err(error) = stmt.store_result() {
        return fail_stmt(results, &mut stmt, error);
    }

    loop {
        match stmt.fetch(&mut binding.slots) {
            FetchOutcome::NoData => break,
            FetchOutcome::Err(error) => return fail_stmt(results, &mut stmt, error),
            FetchOutcome::Truncated => {
                if let Err(error) = refetch_truncated(&mut stmt, &mut binding) {
                    return fail_stmt(results, &mut stmt, error);
                }
                push_row(results, &binding);
            }
            FetchOutcome::Row => push_row(results, &binding),
        }
    }

    results.set_field_names(meta.into_iter().map(|c| c.name).collect());
    results.set_has_value(true);
    let _ = stmt.close();
    true
}

fn push_row<R>(results: &mut SqlResults<R>, binding: &OutputBinding)
where
    R: RowOut + ResultMode<RowSet = Vec<R>>,
{
    let row = R::decode_row(&binding.slots);
    let flags = binding.slots.iter().map(|s| s.is_null).collect();
    results.rows_mut().push(row);
    results.null_flags_mut().push(flags);
}

/// Grow every truncation-candidate column whose real length exceeds its
/// buffer and re-fetch only the tail into the new region.
fn refetch_truncated(
    stmt: &mut Statement<'_>,
    binding: &mut OutputBinding,
) -> Result<(), DriverError> {
    for &column in &binding.dynamic_columns {
        let slot = &mut binding.slots[column];
        let real_len = slot.length;
        let old_len = slot.buffer.len();
        if real_len <= old_len {
            continue;
        }
        slot.buffer.resize(real_len, 0);
        stmt.fetch_column(column, slot, old_len)?;
    }
    Ok(())
}

/// Raw-row query over the text protocol: placeholders are formatted into
/// the statement and each cell is exposed as a byte view. NULL cells are
/// empty views with the null flag set.
pub fn query_raw(
    executor: &mut Executor,
    results: &mut SqlResults<RawRows>,
    sql: &str,
    params: &[SqlParam],
) -> bool {
    results.clear();
    if !ensure_alive(executor, results) {
        return false;
    }

    let formatted = format_query(sql, params);
    let rowset = match executor.driver_mut().query_text(&formatted) {
        Ok(rowset) => rowset,
        Err(error) => {
            results.set_error(error.code, error.message);
            return false;
        }
    };

    for row in rowset.rows {
        let mut cells = Vec::with_capacity(row.len());
        let mut flags = Vec::with_capacity(row.len());
        for cell in row {
            match cell {
                Some(data) => {
                    cells.push(data);
                    flags.push(false);
                }
                None => {
                    cells.push(Bytes::new());
                    flags.push(true);
                }
            }
        }
        results.rows_mut().push(cells);
        results.null_flags_mut().push(flags);
    }

    results.set_field_names(rowset.columns);
    results.set_has_value(true);
    true
}

/// Exec-only statement: prepared when inputs are bound, direct text query
/// when there are none. Only the affected-row count is produced.
pub fn execute_only(
    executor: &mut Executor,
    results: &mut SqlResults<Exec>,
    sql: &str,
    params: &[SqlParam],
) -> bool {
    results.clear();
    if !ensure_alive(executor, results) {
        return false;
    }

    if params.is_empty() {
        match executor.driver_mut().execute_text(sql) {
            Ok(affected) => {
                results.set_affected_rows(affected);
                true
            }
            Err(error) => {
                results.set_error(error.code, error.message);
                false
            }
        }
    } else {
        let mut stmt = Statement::new(executor.driver_mut());
        if let Err(error) = stmt.init(sql) {
            return fail_stmt(results, &mut stmt, error);
        }
        if params.len() != stmt.params_count() {
            results.set_error(
                codes::STMT_PARAMS_ERROR,
                format!(
                    "the statement has {} placeholders but {} inputs were supplied",
                    stmt.params_count(),
                    params.len()
                ),
            );
            let _ = stmt.close();
            return false;
        }
        if let Err(error) = stmt.bind_params(params) {
            return fail_stmt(results, &mut stmt, error);
        }
        if let Err(error) = stmt.execute() {
            return fail_stmt(results, &mut stmt, error);
        }
        results.set_affected_rows(stmt.affected_rows());
        let _ = stmt.close();
        true
    }
}
