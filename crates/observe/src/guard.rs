//! Label cardinality guard.
//!
//! Resource and sub-resource labels come from request attributes and are
//! therefore unbounded. Each metric admits at most `series_limit` distinct
//! values per label; later values collapse into [`OVERFLOW_LABEL`].

use crate::policy::current_policy;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

pub const OVERFLOW_LABEL: &str = "other";
const MAX_LABEL_LEN: usize = 128;

type SeriesKey = (&'static str, &'static str);

static SEEN: OnceCell<Mutex<HashMap<SeriesKey, HashSet<String>>>> = OnceCell::new();

fn seen() -> &'static Mutex<HashMap<SeriesKey, HashSet<String>>> {
    SEEN.get_or_init(|| Mutex::new(HashMap::new()))
}

pub fn guard_label(metric: &'static str, label: &'static str, value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let value = truncate(value);
    let limit = current_policy().series_limit;
    let mut map = seen().lock();
    let values = map.entry((metric, label)).or_default();
    if values.contains(&value) {
        return value;
    }
    if values.len() >= limit {
        return OVERFLOW_LABEL.to_string();
    }
    values.insert(value.clone());
    value
}

pub fn reset_series() {
    seen().lock().clear();
}

fn truncate(value: &str) -> String {
    if value.len() <= MAX_LABEL_LEN {
        return value.to_string();
    }
    let mut end = MAX_LABEL_LEN;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}
