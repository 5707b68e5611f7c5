//! Builtin metric providers over the bookings database.
//!
//! Each provider is a read-only, idempotent query: given a filter set it
//! returns one JSON-serializable result and never touches the cache.

use crate::analytics::key::MetricFilters;
use crate::analytics::provider::ProviderRegistry;
use crate::analytics::queries;
use crate::error::AppError;
use chrono::NaiveDate;
use deadpool_sqlite::Pool;
use rusqlite::{params_from_iter, Connection};
use serde_json::{json, Value};
use std::collections::BTreeMap;

pub fn register_builtin(registry: &mut ProviderRegistry) {
    registry.register("total_reservations", total_reservations);
    registry.register("bookings", bookings);
    registry.register("arpu_daily", arpu_daily);
    registry.register("daily_revenue", daily_revenue);
    registry.register("net_revenue_by_event", net_revenue_by_event);
    registry.register("top_products", top_products);
    registry.register("cohort_retention", cohort_retention);
    registry.register("filters_metadata", filters_metadata);
}

/// Run a blocking query closure on a pooled connection.
async fn with_conn<T, F>(pool: &Pool, f: F) -> Result<T, AppError>
where
    F: FnOnce(&mut Connection) -> Result<T, rusqlite::Error> + Send + 'static,
    T: Send + 'static,
{
    let conn = pool
        .get()
        .await
        .map_err(|e| AppError::Metric(format!("connection pool: {e}")))?;
    let out = conn.interact(f).await??;
    Ok(out)
}

/// Dynamic WHERE clause over the bookings table (alias `b`). Every clause is
/// anchored on `b` via subselects, so the same builder serves joined and
/// unjoined queries alike.
struct FilterSql {
    clauses: Vec<String>,
    params: Vec<String>,
}

impl FilterSql {
    fn new(filters: &MetricFilters, range: Option<&(String, String)>) -> Self {
        let mut sql = Self {
            clauses: vec!["b.deleted_at IS NULL".to_string()],
            params: Vec::new(),
        };
        if let Some((start, end)) = range {
            sql.clauses.push("b.date_of_booking BETWEEN ? AND ?".to_string());
            sql.params.push(start.clone());
            sql.params.push(end.clone());
        }
        sql.in_list(
            "b.product_id IN (SELECT id FROM products WHERE event_id IN ({in}))",
            &filters.events,
        );
        sql.in_list("b.company_id IN ({in})", &filters.companies);
        sql.in_list("b.product_id IN ({in})", &filters.products);
        sql.in_list(
            "b.id IN (SELECT booking_id FROM payments WHERE payment_method IN ({in}))",
            &filters.payment_methods,
        );
        sql.in_list(
            "b.product_id IN (SELECT id FROM products WHERE event_id IN \
             (SELECT id FROM events WHERE location IN ({in})))",
            &filters.locations,
        );
        sql
    }

    fn in_list(&mut self, template: &str, values: &Option<Vec<String>>) {
        if let Some(values) = values {
            let marks = vec!["?"; values.len()].join(",");
            self.clauses.push(template.replace("{in}", &marks));
            self.params.extend(values.iter().cloned());
        }
    }

    /// Substitute `{where}` in a query template.
    fn apply(&self, template: &str) -> String {
        let clause = format!("WHERE {}", self.clauses.join(" AND "));
        template.replace("{where}", &clause)
    }
}

/// Resolve the effective date range: explicit bounds win, missing bounds fall
/// back to the MIN/MAX booking date. `None` when the table is empty and no
/// bounds were supplied.
fn resolve_range(
    conn: &Connection,
    filters: &MetricFilters,
) -> Result<Option<(String, String)>, rusqlite::Error> {
    if let (Some(start), Some(end)) = (filters.date_start, filters.date_end) {
        return Ok(Some((start.to_string(), end.to_string())));
    }
    let (min, max): (Option<String>, Option<String>) =
        conn.query_row(queries::DATE_RANGE_SQL, [], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
    let start = filters.date_start.map(|d| d.to_string()).or(min);
    let end = filters.date_end.map(|d| d.to_string()).or(max);
    Ok(start.zip(end))
}

/// Total live bookings matching the filters.
pub async fn total_reservations(pool: Pool, filters: MetricFilters) -> Result<Value, AppError> {
    with_conn(&pool, move |conn| {
        let Some(range) = resolve_range(conn, &filters)? else {
            return Ok(json!({ "total_reservations": 0 }));
        };
        let sql = FilterSql::new(&filters, Some(&range));
        let total: i64 = conn.query_row(
            &sql.apply(queries::TOTAL_RESERVATIONS_SQL),
            params_from_iter(&sql.params),
            |row| row.get(0),
        )?;
        Ok(json!({ "total_reservations": total }))
    })
    .await
}

/// Most recent bookings with their payment context, for the dashboard table.
pub async fn bookings(pool: Pool, filters: MetricFilters) -> Result<Value, AppError> {
    with_conn(&pool, move |conn| {
        let Some(range) = resolve_range(conn, &filters)? else {
            return Ok(json!([]));
        };
        let sql = FilterSql::new(&filters, Some(&range));
        let mut stmt = conn.prepare(&sql.apply(queries::BOOKINGS_SQL))?;
        let rows = stmt.query_map(params_from_iter(&sql.params), |row| {
            Ok(json!({
                "booking_id": row.get::<_, String>(0)?,
                "date_of_booking": row.get::<_, String>(1)?,
                "client_id": row.get::<_, Option<String>>(2)?,
                "client_name": row.get::<_, Option<String>>(3)?,
                "product": row.get::<_, Option<String>>(4)?,
                "event": row.get::<_, Option<String>>(5)?,
                "company": row.get::<_, Option<String>>(6)?,
                "location": row.get::<_, Option<String>>(7)?,
                "amount_paid": row.get::<_, f64>(8)?,
                "payment_method": row.get::<_, Option<String>>(9)?,
                "payment_status": row.get::<_, Option<String>>(10)?,
            }))
        })?;
        let list = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Array(list))
    })
    .await
}

/// Average revenue per user per day over the date range, zero-filled so every
/// day in the range is present.
pub async fn arpu_daily(pool: Pool, filters: MetricFilters) -> Result<Value, AppError> {
    with_conn(&pool, move |conn| {
        let Some(range) = resolve_range(conn, &filters)? else {
            return Ok(json!([]));
        };
        let sql = FilterSql::new(&filters, Some(&range));
        let mut stmt = conn.prepare(&sql.apply(queries::ARPU_DAILY_SQL))?;
        let rows = stmt.query_map(params_from_iter(&sql.params), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, f64>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut by_day: BTreeMap<String, f64> = BTreeMap::new();
        for row in rows {
            let (day, revenue, users) = row?;
            let arpu = if users > 0 { revenue / users as f64 } else { 0.0 };
            by_day.insert(day, arpu);
        }

        let list: Vec<Value> = iter_days(&range)
            .map(|day| {
                let arpu = by_day.get(&day).copied().unwrap_or(0.0);
                json!({ "date": day, "arpu": arpu })
            })
            .collect();
        Ok(Value::Array(list))
    })
    .await
}

/// Successful revenue per day over the date range, zero-filled.
pub async fn daily_revenue(pool: Pool, filters: MetricFilters) -> Result<Value, AppError> {
    with_conn(&pool, move |conn| {
        let Some(range) = resolve_range(conn, &filters)? else {
            return Ok(json!([]));
        };
        let sql = FilterSql::new(&filters, Some(&range));
        let mut stmt = conn.prepare(&sql.apply(queries::DAILY_REVENUE_SQL))?;
        let rows = stmt.query_map(params_from_iter(&sql.params), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
        })?;
        let by_day: BTreeMap<String, f64> = rows.collect::<Result<_, _>>()?;

        let list: Vec<Value> = iter_days(&range)
            .map(|day| {
                let revenue = by_day.get(&day).copied().unwrap_or(0.0);
                json!({ "date": day, "revenue": revenue })
            })
            .collect();
        Ok(Value::Array(list))
    })
    .await
}

/// Successful revenue grouped by event, highest first.
pub async fn net_revenue_by_event(pool: Pool, filters: MetricFilters) -> Result<Value, AppError> {
    with_conn(&pool, move |conn| {
        let Some(range) = resolve_range(conn, &filters)? else {
            return Ok(json!([]));
        };
        let sql = FilterSql::new(&filters, Some(&range));
        let mut stmt = conn.prepare(&sql.apply(queries::NET_REVENUE_BY_EVENT_SQL))?;
        let rows = stmt.query_map(params_from_iter(&sql.params), |row| {
            Ok(json!({
                "event_id": row.get::<_, String>(0)?,
                "event": row.get::<_, String>(1)?,
                "net_revenue": row.get::<_, f64>(2)?,
            }))
        })?;
        let list = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Array(list))
    })
    .await
}

/// Top ten products by successful revenue.
pub async fn top_products(pool: Pool, filters: MetricFilters) -> Result<Value, AppError> {
    with_conn(&pool, move |conn| {
        let Some(range) = resolve_range(conn, &filters)? else {
            return Ok(json!([]));
        };
        let sql = FilterSql::new(&filters, Some(&range));
        let mut stmt = conn.prepare(&sql.apply(queries::TOP_PRODUCTS_SQL))?;
        let rows = stmt.query_map(params_from_iter(&sql.params), |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "revenue": row.get::<_, f64>(2)?,
            }))
        })?;
        let list = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(Value::Array(list))
    })
    .await
}

/// Monthly cohort retention: clients grouped by first-booking month, then
/// counted per month offset in which they booked again.
pub async fn cohort_retention(pool: Pool, filters: MetricFilters) -> Result<Value, AppError> {
    with_conn(&pool, move |conn| {
        let Some(range) = resolve_range(conn, &filters)? else {
            return Ok(json!([]));
        };
        let sql = FilterSql::new(&filters, Some(&range));
        let mut stmt = conn.prepare(&sql.apply(queries::COHORT_ACTIVITY_SQL))?;
        let rows = stmt.query_map(params_from_iter(&sql.params), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut months_by_client: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in rows {
            let (client, month) = row?;
            months_by_client.entry(client).or_default().push(month);
        }

        // cohort month -> (size, month offset -> active clients)
        let mut cohorts: BTreeMap<String, (i64, BTreeMap<i64, i64>)> = BTreeMap::new();
        for months in months_by_client.values() {
            // Rows are ordered, so the first month is the cohort month.
            let cohort = &months[0];
            let Some(base) = month_index(cohort) else { continue };
            let entry = cohorts.entry(cohort.clone()).or_default();
            entry.0 += 1;
            for month in months {
                if let Some(idx) = month_index(month) {
                    *entry.1.entry(idx - base).or_insert(0) += 1;
                }
            }
        }

        let list: Vec<Value> = cohorts
            .into_iter()
            .map(|(cohort, (size, offsets))| {
                let retention: serde_json::Map<String, Value> = offsets
                    .into_iter()
                    .map(|(offset, count)| (offset.to_string(), json!(count)))
                    .collect();
                json!({ "cohort": cohort, "size": size, "retention": retention })
            })
            .collect();
        Ok(Value::Array(list))
    })
    .await
}

/// Available filter values for the dashboard filter sections. Ignores the
/// incoming filters.
pub async fn filters_metadata(pool: Pool, _filters: MetricFilters) -> Result<Value, AppError> {
    with_conn(&pool, move |conn| {
        let events = id_name_list(conn, queries::FILTER_EVENTS_SQL)?;
        let companies = id_name_list(conn, queries::FILTER_COMPANIES_SQL)?;
        let products = id_name_list(conn, queries::FILTER_PRODUCTS_SQL)?;
        let payment_methods = string_list(conn, queries::FILTER_PAYMENT_METHODS_SQL)?;
        let locations = string_list(conn, queries::FILTER_LOCATIONS_SQL)?;
        Ok(json!({
            "events": events,
            "companies": companies,
            "products": products,
            "payment_methods": payment_methods,
            "locations": locations,
        }))
    })
    .await
}

fn id_name_list(conn: &Connection, sql: &str) -> Result<Vec<Value>, rusqlite::Error> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| {
        Ok(json!({ "id": row.get::<_, String>(0)?, "name": row.get::<_, String>(1)? }))
    })?;
    rows.collect()
}

fn string_list(conn: &Connection, sql: &str) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect()
}

/// Inclusive day iterator over a `(start, end)` range of `YYYY-MM-DD` strings.
/// Unparseable bounds yield an empty iterator.
fn iter_days(range: &(String, String)) -> impl Iterator<Item = String> {
    let start: Option<NaiveDate> = range.0.parse().ok();
    let end: Option<NaiveDate> = range.1.parse().ok();
    let mut current = start;
    std::iter::from_fn(move || {
        let (day, last) = (current?, end?);
        if day > last {
            return None;
        }
        current = day.succ_opt();
        Some(day.to_string())
    })
}

/// `YYYY-MM` -> months since year zero, for cohort offset arithmetic.
fn month_index(month: &str) -> Option<i64> {
    let (year, month) = month.split_once('-')?;
    let year: i64 = year.parse().ok()?;
    let month: i64 = month.parse().ok()?;
    Some(year * 12 + (month - 1))
}
