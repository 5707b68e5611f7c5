use chrono::NaiveDate;
use serde::Deserialize;

/// Query-string shape of a metric request. List filters arrive comma-separated
/// (`?events=ev1,ev2`); an absent parameter means the filter is not applied.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetricQuery {
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub events: Option<String>,
    pub companies: Option<String>,
    pub products: Option<String>,
    pub payment_methods: Option<String>,
    pub locations: Option<String>,
}

/// Parsed filter set, field order matching the declared parameter order of
/// every metric. This order is what `key_parts` emits, so identical requests
/// always produce identical cache keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricFilters {
    pub date_start: Option<NaiveDate>,
    pub date_end: Option<NaiveDate>,
    pub events: Option<Vec<String>>,
    pub companies: Option<Vec<String>>,
    pub products: Option<Vec<String>>,
    pub payment_methods: Option<Vec<String>>,
    pub locations: Option<Vec<String>>,
}

impl MetricQuery {
    pub fn into_filters(self) -> MetricFilters {
        MetricFilters {
            date_start: self.date_start,
            date_end: self.date_end,
            events: split_list(self.events),
            companies: split_list(self.companies),
            products: split_list(self.products),
            payment_methods: split_list(self.payment_methods),
            locations: split_list(self.locations),
        }
    }
}

fn split_list(raw: Option<String>) -> Option<Vec<String>> {
    let raw = raw?;
    let items: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if items.is_empty() {
        None
    } else {
        Some(items)
    }
}

impl MetricFilters {
    pub fn is_empty(&self) -> bool {
        self.date_start.is_none()
            && self.date_end.is_none()
            && self.events.is_none()
            && self.companies.is_none()
            && self.products.is_none()
            && self.payment_methods.is_none()
            && self.locations.is_none()
    }

    /// Stringified `(name, value)` pairs for every present filter, in declared
    /// parameter order. List values keep the caller's element order; callers
    /// passing the same list in a different order get a different key.
    pub fn key_parts(&self) -> Vec<(&'static str, String)> {
        let mut parts = Vec::new();
        if let Some(d) = self.date_start {
            parts.push(("date_start", d.to_string()));
        }
        if let Some(d) = self.date_end {
            parts.push(("date_end", d.to_string()));
        }
        push_list(&mut parts, "events", &self.events);
        push_list(&mut parts, "companies", &self.companies);
        push_list(&mut parts, "products", &self.products);
        push_list(&mut parts, "payment_methods", &self.payment_methods);
        push_list(&mut parts, "locations", &self.locations);
        parts
    }
}

fn push_list(
    parts: &mut Vec<(&'static str, String)>,
    name: &'static str,
    values: &Option<Vec<String>>,
) {
    if let Some(values) = values {
        parts.push((name, values.join(",")));
    }
}

/// Build the cache key for a metric: the prefix alone when no filters apply,
/// else `prefix:name=value:...` with one fragment per present parameter.
/// Pure and total; the same inputs always yield the same key.
pub fn build_key(prefix: &str, parts: &[(&'static str, String)]) -> String {
    let mut key = String::from(prefix);
    for (name, value) in parts {
        key.push(':');
        key.push_str(name);
        key.push('=');
        key.push_str(value);
    }
    key
}
