//! In-memory evaluation of aggregation pipelines.
//!
//! Implements the stage and expression subset the pipeline builder emits
//! (`$match`, `$sort`, `$facet`, `$lookup`, `$group`, ...) with the same
//! observable semantics as the document store, so the composed view and
//! rule pipelines can run unchanged against seeded data. `$regex`
//! conditions are evaluated as case-insensitive substring containment.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde_json::{Map, Value};

use super::memory::{sort_documents, MemoryStore};
use super::{path_get, path_get_all, path_set, Document, StoreError};

type Vars = HashMap<String, Value>;

pub(crate) fn run_pipeline(
    store: &MemoryStore,
    mut docs: Vec<Document>,
    pipeline: &[Value],
) -> Result<Vec<Document>, StoreError> {
    for stage in pipeline {
        docs = apply_stage(store, docs, stage)?;
    }
    Ok(docs)
}

fn apply_stage(
    store: &MemoryStore,
    docs: Vec<Document>,
    stage: &Value,
) -> Result<Vec<Document>, StoreError> {
    let obj = stage
        .as_object()
        .filter(|o| o.len() == 1)
        .ok_or_else(|| StoreError::InvalidPipeline(format!("malformed stage: {stage}")))?;
    let (name, spec) = obj.iter().next().expect("single-key stage");
    match name.as_str() {
        "$match" => Ok(docs.into_iter().filter(|d| matches(d, spec)).collect()),
        "$sort" => {
            let mut docs = docs;
            sort_documents(&mut docs, spec);
            Ok(docs)
        }
        "$skip" => {
            let n = spec.as_u64().unwrap_or(0) as usize;
            Ok(docs.into_iter().skip(n).collect())
        }
        "$limit" => {
            let n = spec.as_u64().unwrap_or(0) as usize;
            Ok(docs.into_iter().take(n).collect())
        }
        "$count" => {
            let field = spec
                .as_str()
                .ok_or_else(|| StoreError::InvalidPipeline("$count needs a field name".into()))?;
            Ok(vec![Value::Object(Map::from_iter([(
                field.to_string(),
                Value::from(docs.len() as u64),
            )]))])
        }
        "$project" => Ok(docs.iter().map(|d| project(d, spec)).collect()),
        "$addFields" | "$set" => {
            let fields = spec.as_object().ok_or_else(|| {
                StoreError::InvalidPipeline("$addFields needs an object".into())
            })?;
            Ok(docs
                .into_iter()
                .map(|mut doc| {
                    let vars = Vars::new();
                    for (path, expr) in fields {
                        let value = eval_or_null(expr, &doc, &vars);
                        path_set(&mut doc, path, value);
                    }
                    doc
                })
                .collect())
        }
        "$unwind" => apply_unwind(docs, spec),
        "$replaceRoot" => {
            let expr = spec
                .get("newRoot")
                .ok_or_else(|| StoreError::InvalidPipeline("$replaceRoot needs newRoot".into()))?;
            replace_root(docs, expr)
        }
        "$replaceWith" => replace_root(docs, spec),
        "$group" => apply_group(docs, spec),
        "$facet" => {
            let facets = spec
                .as_object()
                .ok_or_else(|| StoreError::InvalidPipeline("$facet needs an object".into()))?;
            let mut out = Map::new();
            for (facet, stages) in facets {
                let stages = stages.as_array().ok_or_else(|| {
                    StoreError::InvalidPipeline("facet pipeline must be an array".into())
                })?;
                let result = run_pipeline(store, docs.clone(), stages)?;
                out.insert(facet.clone(), Value::Array(result));
            }
            Ok(vec![Value::Object(out)])
        }
        "$lookup" => apply_lookup(store, docs, spec),
        "$unionWith" => {
            let (coll, sub) = match spec {
                Value::String(name) => (name.as_str(), None),
                Value::Object(o) => (
                    o.get("coll").and_then(Value::as_str).ok_or_else(|| {
                        StoreError::InvalidPipeline("$unionWith needs coll".into())
                    })?,
                    o.get("pipeline").and_then(Value::as_array),
                ),
                _ => return Err(StoreError::InvalidPipeline("malformed $unionWith".into())),
            };
            let mut union = store.docs(coll).unwrap_or(&[]).to_vec();
            if let Some(sub) = sub {
                union = run_pipeline(store, union, sub)?;
            }
            let mut docs = docs;
            docs.extend(union);
            Ok(docs)
        }
        other => Err(StoreError::InvalidPipeline(format!(
            "unsupported stage: {other}"
        ))),
    }
}

fn replace_root(docs: Vec<Document>, expr: &Value) -> Result<Vec<Document>, StoreError> {
    let vars = Vars::new();
    docs.into_iter()
        .map(|doc| match eval_or_null(expr, &doc, &vars) {
            root @ Value::Object(_) => Ok(root),
            other => Err(StoreError::InvalidPipeline(format!(
                "replacement root must be a document, got {other}"
            ))),
        })
        .collect()
}

fn apply_unwind(docs: Vec<Document>, spec: &Value) -> Result<Vec<Document>, StoreError> {
    let (path, preserve) = match spec {
        Value::String(p) => (p.as_str(), false),
        Value::Object(o) => (
            o.get("path")
                .and_then(Value::as_str)
                .ok_or_else(|| StoreError::InvalidPipeline("$unwind needs a path".into()))?,
            o.get("preserveNullAndEmptyArrays")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        ),
        _ => return Err(StoreError::InvalidPipeline("malformed $unwind".into())),
    };
    let field = path
        .strip_prefix('$')
        .ok_or_else(|| StoreError::InvalidPipeline("$unwind path must start with $".into()))?;
    let mut out = Vec::new();
    for doc in docs {
        match path_get(&doc, field).cloned() {
            Some(Value::Array(items)) if !items.is_empty() => {
                for item in items {
                    let mut unwound = doc.clone();
                    path_set(&mut unwound, field, item);
                    out.push(unwound);
                }
            }
            Some(Value::Null) | Some(Value::Array(_)) | None => {
                if preserve {
                    let mut kept = doc.clone();
                    remove_path(&mut kept, field);
                    out.push(kept);
                }
            }
            Some(_) => out.push(doc),
        }
    }
    Ok(out)
}

fn remove_path(doc: &mut Value, path: &str) {
    let segments: Vec<&str> = path.split('.').collect();
    let mut current = doc;
    for (i, segment) in segments.iter().enumerate() {
        let Some(map) = current.as_object_mut() else {
            return;
        };
        if i == segments.len() - 1 {
            map.remove(*segment);
            return;
        }
        match map.get_mut(*segment) {
            Some(next) => current = next,
            None => return,
        }
    }
}

fn apply_lookup(
    store: &MemoryStore,
    docs: Vec<Document>,
    spec: &Value,
) -> Result<Vec<Document>, StoreError> {
    let obj = spec
        .as_object()
        .ok_or_else(|| StoreError::InvalidPipeline("$lookup needs an object".into()))?;
    let from = obj
        .get("from")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::InvalidPipeline("$lookup needs from".into()))?;
    let local = obj
        .get("localField")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::InvalidPipeline("$lookup needs localField".into()))?;
    let foreign = obj
        .get("foreignField")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::InvalidPipeline("$lookup needs foreignField".into()))?;
    let as_field = obj
        .get("as")
        .and_then(Value::as_str)
        .ok_or_else(|| StoreError::InvalidPipeline("$lookup needs as".into()))?;
    let sub = obj.get("pipeline").and_then(Value::as_array);

    let foreign_docs = store.docs(from).unwrap_or(&[]).to_vec();
    let mut out = Vec::with_capacity(docs.len());
    for mut doc in docs {
        let local_value = path_get(&doc, local).cloned().unwrap_or(Value::Null);
        let matched: Vec<Document> = foreign_docs
            .iter()
            .filter(|fd| {
                let fv = path_get(fd, foreign).unwrap_or(&Value::Null);
                join_eq(&local_value, fv)
            })
            .cloned()
            .collect();
        let matched = match sub {
            Some(sub) => run_pipeline(store, matched, sub)?,
            None => matched,
        };
        path_set(&mut doc, as_field, Value::Array(matched));
        out.push(doc);
    }
    Ok(out)
}

fn join_eq(local: &Value, foreign: &Value) -> bool {
    if loose_eq(local, foreign) {
        return true;
    }
    match (local, foreign) {
        (Value::Array(items), _) => items.iter().any(|i| loose_eq(i, foreign)),
        (_, Value::Array(items)) => items.iter().any(|i| loose_eq(local, i)),
        _ => false,
    }
}

fn apply_group(docs: Vec<Document>, spec: &Value) -> Result<Vec<Document>, StoreError> {
    let obj = spec
        .as_object()
        .ok_or_else(|| StoreError::InvalidPipeline("$group needs an object".into()))?;
    let id_expr = obj.get("_id").cloned().unwrap_or(Value::Null);
    let vars = Vars::new();

    // Insertion-ordered buckets keyed by the serialized group id.
    let mut order: Vec<String> = Vec::new();
    let mut buckets: HashMap<String, (Value, Vec<Document>)> = HashMap::new();
    for doc in docs {
        let id = eval_or_null(&id_expr, &doc, &vars);
        let key = id.to_string();
        if !buckets.contains_key(&key) {
            order.push(key.clone());
            buckets.insert(key.clone(), (id, Vec::new()));
        }
        buckets.get_mut(&key).expect("just inserted").1.push(doc);
    }

    let mut out = Vec::with_capacity(order.len());
    for key in order {
        let (id, members) = buckets.remove(&key).expect("bucket exists");
        let mut grouped = Map::new();
        grouped.insert("_id".to_string(), id);
        for (field, accum) in obj {
            if field == "_id" {
                continue;
            }
            let accum_obj = accum.as_object().filter(|o| o.len() == 1).ok_or_else(|| {
                StoreError::InvalidPipeline(format!("malformed accumulator for {field}"))
            })?;
            let (op, arg) = accum_obj.iter().next().expect("single-key accumulator");
            let value = match op.as_str() {
                "$push" => Value::Array(
                    members.iter().map(|m| eval_or_null(arg, m, &vars)).collect(),
                ),
                "$addToSet" => {
                    let mut set: Vec<Value> = Vec::new();
                    for member in &members {
                        let v = eval_or_null(arg, member, &vars);
                        if !set.iter().any(|existing| loose_eq(existing, &v)) {
                            set.push(v);
                        }
                    }
                    Value::Array(set)
                }
                "$sum" => {
                    let total: f64 = members
                        .iter()
                        .map(|m| numeric(&eval_or_null(arg, m, &vars)))
                        .sum();
                    number(total)
                }
                "$count" => Value::from(members.len() as u64),
                "$first" => members
                    .first()
                    .map(|m| eval_or_null(arg, m, &vars))
                    .unwrap_or(Value::Null),
                "$max" => members
                    .iter()
                    .map(|m| eval_or_null(arg, m, &vars))
                    .max_by(|a, b| compare_values(Some(a), Some(b)))
                    .unwrap_or(Value::Null),
                "$min" => members
                    .iter()
                    .map(|m| eval_or_null(arg, m, &vars))
                    .min_by(|a, b| compare_values(Some(a), Some(b)))
                    .unwrap_or(Value::Null),
                other => {
                    return Err(StoreError::InvalidPipeline(format!(
                        "unsupported accumulator: {other}"
                    )))
                }
            };
            grouped.insert(field.clone(), value);
        }
        out.push(Value::Object(grouped));
    }
    Ok(out)
}

/// Applies a `{field: 1 | 0 | <expression>}` projection document.
pub(crate) fn project(doc: &Document, projection: &Value) -> Document {
    let Some(spec) = projection.as_object() else {
        return doc.clone();
    };
    let vars = Vars::new();
    let mut out = Value::Object(Map::new());
    if !spec.contains_key("_id") {
        if let Some(id) = doc.get("_id") {
            path_set(&mut out, "_id", id.clone());
        }
    }
    for (path, rule) in spec {
        let included = matches!(rule, Value::Bool(true))
            || matches!(rule, Value::Number(n) if n.as_i64() == Some(1));
        let excluded = matches!(rule, Value::Bool(false))
            || matches!(rule, Value::Number(n) if n.as_i64() == Some(0));
        if included {
            if let Some(value) = path_get(doc, path) {
                path_set(&mut out, path, value.clone());
            }
        } else if !excluded {
            if let Some(value) = eval_expr(rule, doc, &vars) {
                path_set(&mut out, path, value);
            }
        }
    }
    out
}

/// Evaluates a query-filter document against one document.
pub(crate) fn matches(doc: &Document, cond: &Value) -> bool {
    let Some(obj) = cond.as_object() else {
        return true;
    };
    obj.iter().all(|(key, value)| match key.as_str() {
        "$and" => value
            .as_array()
            .is_some_and(|cs| cs.iter().all(|c| matches(doc, c))),
        "$or" => value
            .as_array()
            .is_some_and(|cs| cs.iter().any(|c| matches(doc, c))),
        "$expr" => truthy(eval_expr(value, doc, &Vars::new()).as_ref()),
        path => field_matches(doc, path, value),
    })
}

fn field_matches(doc: &Document, path: &str, cond: &Value) -> bool {
    let candidates = path_get_all(doc, path);
    if let Some(ops) = cond.as_object() {
        if ops.keys().any(|k| k.starts_with('$')) {
            return ops.iter().all(|(op, arg)| match op.as_str() {
                "$eq" => candidates.iter().any(|v| contains_eq(v, arg)),
                "$ne" => !candidates.iter().any(|v| contains_eq(v, arg)),
                "$in" => arg.as_array().is_some_and(|allowed| {
                    candidates.iter().any(|v| {
                        allowed.iter().any(|a| contains_eq(v, a))
                    })
                }),
                "$exists" => {
                    let wanted = arg.as_bool().unwrap_or(true);
                    candidates.is_empty() != wanted
                }
                "$regex" => {
                    let pattern = arg.as_str().unwrap_or_default().to_lowercase();
                    candidates.iter().any(|v| {
                        v.as_str()
                            .is_some_and(|s| s.to_lowercase().contains(&pattern))
                    })
                }
                // Modifier for $regex, handled above.
                "$options" => true,
                "$gt" => candidates
                    .iter()
                    .any(|v| compare_values(Some(v), Some(arg)) == Ordering::Greater),
                "$gte" => candidates
                    .iter()
                    .any(|v| compare_values(Some(v), Some(arg)) != Ordering::Less),
                "$lt" => candidates
                    .iter()
                    .any(|v| compare_values(Some(v), Some(arg)) == Ordering::Less),
                "$lte" => candidates
                    .iter()
                    .any(|v| compare_values(Some(v), Some(arg)) != Ordering::Greater),
                _ => false,
            });
        }
    }
    candidates.iter().any(|v| contains_eq(v, cond))
}

/// Document-store equality: direct match, or membership when the stored
/// value is an array (`{groups: "team-a"}` matches `groups: ["team-a"]`).
fn contains_eq(stored: &Value, expected: &Value) -> bool {
    if loose_eq(stored, expected) {
        return true;
    }
    stored
        .as_array()
        .is_some_and(|items| items.iter().any(|i| loose_eq(i, expected)))
}

pub(crate) fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            x.as_f64().unwrap_or(f64::NAN) == y.as_f64().unwrap_or(f64::NAN)
        }
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| loose_eq(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| loose_eq(x, y)))
        }
        _ => a == b,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Number(_)) => 2,
        Some(Value::String(_)) => 3,
        Some(Value::Object(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Bool(_)) => 6,
    }
}

/// Total order over document values, used for sorts and range conditions.
/// Missing sorts before null, null before numbers, then strings.
pub(crate) fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let (ra, rb) = (type_rank(a), type_rank(b));
    if ra != rb {
        return ra.cmp(&rb);
    }
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .unwrap_or(f64::NAN)
            .partial_cmp(&y.as_f64().unwrap_or(f64::NAN))
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0) != 0.0,
        _ => true,
    }
}

fn numeric(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::Array(items) => items.iter().map(numeric).sum(),
        _ => 0.0,
    }
}

fn number(total: f64) -> Value {
    if total.fract() == 0.0 && total.abs() < 9.0e15 {
        Value::from(total as i64)
    } else {
        Value::from(total)
    }
}

fn eval_or_null(expr: &Value, doc: &Document, vars: &Vars) -> Value {
    eval_expr(expr, doc, vars).unwrap_or(Value::Null)
}

/// Field-path resolution for expressions. A path segment that lands on an
/// array maps over its elements, so `$latest.year` against a facet output
/// yields the array of years rather than nothing.
fn field_path(base: &Value, path: &str) -> Option<Value> {
    fn walk(value: &Value, segments: &[&str]) -> Option<Value> {
        match segments.split_first() {
            None => Some(value.clone()),
            Some((head, rest)) => match value {
                Value::Object(map) => walk(map.get(*head)?, rest),
                Value::Array(items) => Some(Value::Array(
                    items
                        .iter()
                        .filter_map(|item| walk(item, segments))
                        .collect(),
                )),
                _ => None,
            },
        }
    }
    let segments: Vec<&str> = path.split('.').collect();
    walk(base, &segments)
}

/// Evaluates an aggregation expression. `None` means "missing", which is
/// distinct from `null` for `$type` and `$ifNull`.
fn eval_expr(expr: &Value, doc: &Document, vars: &Vars) -> Option<Value> {
    match expr {
        Value::String(s) if s.starts_with("$$") => {
            let rest = &s[2..];
            let (name, path) = match rest.split_once('.') {
                Some((name, path)) => (name, Some(path)),
                None => (rest, None),
            };
            let base: &Value = if name == "ROOT" { doc } else { vars.get(name)? };
            match path {
                Some(path) => field_path(base, path),
                None => Some(base.clone()),
            }
        }
        Value::String(s) if s.starts_with('$') => field_path(doc, &s[1..]),
        Value::Array(items) => Some(Value::Array(
            items.iter().map(|e| eval_or_null(e, doc, vars)).collect(),
        )),
        Value::Object(map) => {
            if map.len() == 1 {
                let (op, arg) = map.iter().next().expect("non-empty map");
                if op.starts_with('$') {
                    return eval_operator(op, arg, doc, vars);
                }
            }
            let mut out = Map::new();
            for (key, value) in map {
                if let Some(evaluated) = eval_expr(value, doc, vars) {
                    out.insert(key.clone(), evaluated);
                }
            }
            Some(Value::Object(out))
        }
        literal => Some(literal.clone()),
    }
}

fn eval_operator(op: &str, arg: &Value, doc: &Document, vars: &Vars) -> Option<Value> {
    match op {
        "$literal" => Some(arg.clone()),
        "$eq" | "$ne" | "$gt" | "$gte" | "$lt" | "$lte" => {
            let args = arg.as_array()?;
            let a = eval_expr(args.first()?, doc, vars);
            let b = eval_expr(args.get(1)?, doc, vars);
            let result = match op {
                "$eq" => loose_eq(a.as_ref().unwrap_or(&Value::Null), b.as_ref().unwrap_or(&Value::Null)),
                "$ne" => !loose_eq(a.as_ref().unwrap_or(&Value::Null), b.as_ref().unwrap_or(&Value::Null)),
                "$gt" => compare_values(a.as_ref(), b.as_ref()) == Ordering::Greater,
                "$gte" => compare_values(a.as_ref(), b.as_ref()) != Ordering::Less,
                "$lt" => compare_values(a.as_ref(), b.as_ref()) == Ordering::Less,
                _ => compare_values(a.as_ref(), b.as_ref()) != Ordering::Greater,
            };
            Some(Value::Bool(result))
        }
        "$and" => {
            let args = arg.as_array()?;
            Some(Value::Bool(
                args.iter().all(|e| truthy(eval_expr(e, doc, vars).as_ref())),
            ))
        }
        "$or" => {
            let args = arg.as_array()?;
            Some(Value::Bool(
                args.iter().any(|e| truthy(eval_expr(e, doc, vars).as_ref())),
            ))
        }
        "$not" => {
            let inner = match arg {
                Value::Array(items) => items.first()?,
                other => other,
            };
            Some(Value::Bool(!truthy(eval_expr(inner, doc, vars).as_ref())))
        }
        "$in" => {
            let args = arg.as_array()?;
            let needle = eval_or_null(args.first()?, doc, vars);
            let haystack = eval_or_null(args.get(1)?, doc, vars);
            let found = haystack
                .as_array()
                .is_some_and(|items| items.iter().any(|i| loose_eq(i, &needle)));
            Some(Value::Bool(found))
        }
        "$ifNull" => {
            let args = arg.as_array()?;
            for candidate in &args[..args.len().saturating_sub(1)] {
                match eval_expr(candidate, doc, vars) {
                    Some(Value::Null) | None => continue,
                    Some(value) => return Some(value),
                }
            }
            args.last().map(|e| eval_or_null(e, doc, vars))
        }
        "$arrayElemAt" => {
            let args = arg.as_array()?;
            let array = eval_expr(args.first()?, doc, vars)?;
            let items = array.as_array()?;
            let idx = eval_expr(args.get(1)?, doc, vars)?.as_i64()?;
            let idx = if idx < 0 {
                items.len().checked_sub(idx.unsigned_abs() as usize)?
            } else {
                idx as usize
            };
            items.get(idx).cloned()
        }
        "$type" => {
            let name = match eval_expr(arg, doc, vars) {
                None => "missing",
                Some(Value::Null) => "null",
                Some(Value::Bool(_)) => "bool",
                Some(Value::Number(_)) => "double",
                Some(Value::String(_)) => "string",
                Some(Value::Array(_)) => "array",
                Some(Value::Object(_)) => "object",
            };
            Some(Value::from(name))
        }
        "$cond" => {
            let (cond, then, otherwise) = match arg {
                Value::Object(o) => (o.get("if")?, o.get("then")?, o.get("else")?),
                Value::Array(items) => (items.first()?, items.get(1)?, items.get(2)?),
                _ => return None,
            };
            if truthy(eval_expr(cond, doc, vars).as_ref()) {
                eval_expr(then, doc, vars)
            } else {
                eval_expr(otherwise, doc, vars)
            }
        }
        "$concat" => {
            let args = arg.as_array()?;
            let mut out = String::new();
            for e in args {
                match eval_expr(e, doc, vars) {
                    Some(Value::String(s)) => out.push_str(&s),
                    _ => return Some(Value::Null),
                }
            }
            Some(Value::from(out))
        }
        "$concatArrays" => {
            let args = arg.as_array()?;
            let mut out = Vec::new();
            for e in args {
                match eval_expr(e, doc, vars) {
                    Some(Value::Array(items)) => out.extend(items),
                    _ => return Some(Value::Null),
                }
            }
            Some(Value::Array(out))
        }
        "$map" => {
            let spec = arg.as_object()?;
            let input = eval_expr(spec.get("input")?, doc, vars)?;
            let items = input.as_array()?.clone();
            let var = spec.get("as").and_then(Value::as_str).unwrap_or("this");
            let body = spec.get("in")?;
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                let mut scoped = vars.clone();
                scoped.insert(var.to_string(), item);
                out.push(eval_or_null(body, doc, &scoped));
            }
            Some(Value::Array(out))
        }
        "$filter" => {
            let spec = arg.as_object()?;
            let input = eval_expr(spec.get("input")?, doc, vars)?;
            let items = input.as_array()?.clone();
            let var = spec.get("as").and_then(Value::as_str).unwrap_or("this");
            let cond = spec.get("cond")?;
            let mut out = Vec::new();
            for item in items {
                let mut scoped = vars.clone();
                scoped.insert(var.to_string(), item.clone());
                if truthy(eval_expr(cond, doc, &scoped).as_ref()) {
                    out.push(item);
                }
            }
            Some(Value::Array(out))
        }
        "$reduce" => {
            let spec = arg.as_object()?;
            let input = eval_expr(spec.get("input")?, doc, vars)?;
            let items = input.as_array()?.clone();
            let mut acc = eval_or_null(spec.get("initialValue")?, doc, vars);
            let body = spec.get("in")?;
            for item in items {
                let mut scoped = vars.clone();
                scoped.insert("value".to_string(), acc);
                scoped.insert("this".to_string(), item);
                acc = eval_or_null(body, doc, &scoped);
            }
            Some(acc)
        }
        "$sum" => match arg {
            Value::Array(items) => Some(number(
                items.iter().map(|e| numeric(&eval_or_null(e, doc, vars))).sum(),
            )),
            single => Some(number(numeric(&eval_or_null(single, doc, vars)))),
        },
        _ => None,
    }
}
