//! Semantic derivative equality and a coarse diff summary for logs.

use rekon_core::Spec;
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as Json};

fn numbers_eq(a: &Number, b: &Number) -> bool {
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x == y;
    }
    if let (Some(x), Some(y)) = (a.as_u64(), b.as_u64()) {
        return x == y;
    }
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}

/// True when every field set in `desired` is present and equal in `observed`.
/// Unset desired values (null, "", {}) match anything of the same shape; fields
/// only present in `observed` are ignored. Arrays must match element-wise.
pub fn derivative_eq(desired: &Json, observed: &Json) -> bool {
    match (desired, observed) {
        (Json::Null, _) => true,
        (Json::String(a), Json::String(b)) => a.is_empty() || a == b,
        (Json::Number(a), Json::Number(b)) => numbers_eq(a, b),
        (Json::Bool(a), Json::Bool(b)) => a == b,
        (Json::Array(a), Json::Array(b)) => a.len() == b.len() && a.iter().zip(b).all(|(x, y)| derivative_eq(x, y)),
        (Json::Object(a), Json::Object(b)) => spec_derivative_eq(a, b),
        _ => false,
    }
}

/// [`derivative_eq`] over two spec maps. A key missing from `observed` never matches.
pub fn spec_derivative_eq(desired: &Spec, observed: &Spec) -> bool {
    desired.iter().all(|(k, v)| observed.get(k).is_some_and(|o| derivative_eq(v, o)))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary { pub adds: usize, pub updates: usize, pub removes: usize }

/// Count leaf adds/updates/removes going from `base` to `target`.
pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    fn walk(a: &Json, b: &Json, out: &mut DiffSummary) {
        match (a, b) {
            (Json::Object(ao), Json::Object(bo)) => {
                for (k, av) in ao.iter() {
                    match bo.get(k) {
                        Some(bv) if av == bv => {}
                        Some(bv) => walk(av, bv, out),
                        None => out.adds += 1,
                    }
                }
                out.removes += bo.keys().filter(|k| !ao.contains_key(*k)).count();
            }
            (Json::Array(aa), Json::Array(bb)) => {
                out.updates += aa.iter().zip(bb).filter(|(x, y)| x != y).count();
                out.adds += aa.len().saturating_sub(bb.len());
                out.removes += bb.len().saturating_sub(aa.len());
            }
            (av, bv) => {
                if av != bv {
                    out.updates += 1;
                }
            }
        }
    }
    let mut out = DiffSummary::default();
    walk(target, base, &mut out);
    out
}
