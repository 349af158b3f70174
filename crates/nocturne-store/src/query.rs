use serde_json::Value;

/// A structured read against one collection: field filters, optional order,
/// optional limit. Deliberately small — it covers the shapes the sync core
/// actually issues (equality scans, newest-N windows, newer-than probes).
#[derive(Debug, Clone)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub op: Op,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    /// Strictly greater — the watermark comparison.
    Gt,
}

#[derive(Debug, Clone)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Query {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter_eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filters.push(Filter { field: field.into(), op: Op::Eq, value });
        self
    }

    pub fn filter_gt(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filters.push(Filter { field: field.into(), op: Op::Gt, value });
        self
    }

    pub fn order_asc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy { field: field.into(), descending: false });
        self
    }

    pub fn order_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy { field: field.into(), descending: true });
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Does `doc` satisfy every filter?
    pub fn matches(&self, doc: &Value) -> bool {
        self.filters.iter().all(|f| {
            let field = lookup(doc, &f.field);
            match f.op {
                Op::Eq => field == Some(&f.value),
                Op::Gt => match field {
                    Some(v) => compare(v, &f.value) == std::cmp::Ordering::Greater,
                    None => false,
                },
            }
        })
    }

    /// Sort + truncate a matched result set in place.
    pub fn order_and_limit(&self, docs: &mut Vec<(String, Value)>) {
        if let Some(order) = &self.order_by {
            docs.sort_by(|(_, a), (_, b)| {
                let ord = match (lookup(a, &order.field), lookup(b, &order.field)) {
                    (Some(x), Some(y)) => compare(x, y),
                    (Some(_), None) => std::cmp::Ordering::Greater,
                    (None, Some(_)) => std::cmp::Ordering::Less,
                    (None, None) => std::cmp::Ordering::Equal,
                };
                if order.descending { ord.reverse() } else { ord }
            });
        }
        if let Some(limit) = self.limit {
            docs.truncate(limit);
        }
    }
}

/// Resolve a dotted field path ("statusEffects.glow") inside a document.
fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = doc;
    for part in path.split('.') {
        current = current.get(part)?;
    }
    Some(current)
}

/// Total order over the value shapes we store: numbers, strings, bools.
fn compare(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NEG_INFINITY);
            let y = y.as_f64().unwrap_or(f64::NEG_INFINITY);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => Ordering::Equal,
    }
}
