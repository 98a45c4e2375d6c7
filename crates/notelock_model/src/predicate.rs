//! Item predicates.
//!
//! A predicate is a `(keypath, operator, value)` triple evaluated against
//! an item. Keypaths address item fields (`uuid`, `content_type`,
//! `created_at`, …) and dot into the content JSON (`content.title`).
//! String values of the form `"<n>.days.ago"` or `"<n>.hours.ago"`
//! resolve to a past instant at evaluation time.

use crate::item::Item;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde_json::Value;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateOperator {
    /// Deep equality.
    Eq,
    /// Less than.
    Lt,
    /// Greater than.
    Gt,
    /// Less than or equal.
    Lte,
    /// Greater than or equal.
    Gte,
    /// String prefix match.
    StartsWith,
    /// Membership of the item value in the predicate's array.
    In,
    /// The item's sequence contains a matching element.
    Includes,
    /// Regular-expression match.
    Matches,
}

/// The right-hand side of a predicate.
#[derive(Debug, Clone)]
pub enum PredicateValue {
    /// A literal JSON value.
    Json(Value),
    /// A nested predicate, evaluated over each element of the matched
    /// sequence (only meaningful with [`PredicateOperator::Includes`]).
    Nested(Box<Predicate>),
}

/// A single queryable condition over items.
#[derive(Debug, Clone)]
pub struct Predicate {
    /// Dotted path into the item.
    pub keypath: String,
    /// Comparison operator.
    pub operator: PredicateOperator,
    /// Comparison value.
    pub value: PredicateValue,
}

impl Predicate {
    /// Creates a predicate with a literal value.
    pub fn new(keypath: impl Into<String>, operator: PredicateOperator, value: Value) -> Self {
        Self {
            keypath: keypath.into(),
            operator,
            value: PredicateValue::Json(value),
        }
    }

    /// Creates an `Includes` predicate with a nested predicate that each
    /// sequence element is tested against.
    pub fn including(keypath: impl Into<String>, nested: Predicate) -> Self {
        Self {
            keypath: keypath.into(),
            operator: PredicateOperator::Includes,
            value: PredicateValue::Nested(Box::new(nested)),
        }
    }

    /// Evaluates against an item.
    #[must_use]
    pub fn evaluate(&self, item: &Item, now: DateTime<Utc>) -> bool {
        let target = keypath_value_on_item(item, &self.keypath);
        self.compare(target.as_ref(), now)
    }

    /// Evaluates against a bare JSON value (used for nested predicates
    /// over sequence elements).
    #[must_use]
    pub fn evaluate_value(&self, root: &Value, now: DateTime<Utc>) -> bool {
        let target = traverse(root, &self.keypath);
        self.compare(target.as_ref(), now)
    }

    fn compare(&self, target: Option<&Value>, now: DateTime<Utc>) -> bool {
        match (&self.value, self.operator) {
            (PredicateValue::Nested(nested), PredicateOperator::Includes) => {
                let Some(Value::Array(elements)) = target else {
                    return false;
                };
                elements.iter().any(|el| nested.evaluate_value(el, now))
            }
            (PredicateValue::Nested(_), _) => false,
            (PredicateValue::Json(value), operator) => {
                compare_json(target, operator, value, now)
            }
        }
    }
}

fn compare_json(
    target: Option<&Value>,
    operator: PredicateOperator,
    value: &Value,
    now: DateTime<Utc>,
) -> bool {
    // Date shorthand turns ordering comparisons into time comparisons.
    if let Some(reference) = resolve_date_shorthand(value, now) {
        let Some(target_time) = target.and_then(value_as_datetime) else {
            return false;
        };
        return match operator {
            PredicateOperator::Eq => target_time == reference,
            PredicateOperator::Lt => target_time < reference,
            PredicateOperator::Gt => target_time > reference,
            PredicateOperator::Lte => target_time <= reference,
            PredicateOperator::Gte => target_time >= reference,
            _ => false,
        };
    }

    match operator {
        PredicateOperator::Eq => target == Some(value),
        PredicateOperator::Lt | PredicateOperator::Gt | PredicateOperator::Lte
        | PredicateOperator::Gte => {
            let Some(target) = target else { return false };
            ordered_compare(target, value, operator)
        }
        PredicateOperator::StartsWith => match (target.and_then(Value::as_str), value.as_str()) {
            (Some(t), Some(prefix)) => t.starts_with(prefix),
            _ => false,
        },
        PredicateOperator::In => match value {
            Value::Array(options) => target.is_some_and(|t| options.contains(t)),
            _ => false,
        },
        PredicateOperator::Includes => match target {
            Some(Value::Array(elements)) => elements.contains(value),
            _ => false,
        },
        PredicateOperator::Matches => {
            let (Some(t), Some(pattern)) = (target.and_then(Value::as_str), value.as_str()) else {
                return false;
            };
            Regex::new(pattern).map(|re| re.is_match(t)).unwrap_or(false)
        }
    }
}

fn ordered_compare(target: &Value, value: &Value, operator: PredicateOperator) -> bool {
    if let (Some(a), Some(b)) = (target.as_f64(), value.as_f64()) {
        return match operator {
            PredicateOperator::Lt => a < b,
            PredicateOperator::Gt => a > b,
            PredicateOperator::Lte => a <= b,
            PredicateOperator::Gte => a >= b,
            _ => false,
        };
    }
    if let (Some(a), Some(b)) = (value_as_datetime(target), value_as_datetime(value)) {
        return match operator {
            PredicateOperator::Lt => a < b,
            PredicateOperator::Gt => a > b,
            PredicateOperator::Lte => a <= b,
            PredicateOperator::Gte => a >= b,
            _ => false,
        };
    }
    if let (Some(a), Some(b)) = (target.as_str(), value.as_str()) {
        return match operator {
            PredicateOperator::Lt => a < b,
            PredicateOperator::Gt => a > b,
            PredicateOperator::Lte => a <= b,
            PredicateOperator::Gte => a >= b,
            _ => false,
        };
    }
    false
}

fn resolve_date_shorthand(value: &Value, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let text = value.as_str()?;
    let mut parts = text.split('.');
    let amount: i64 = parts.next()?.parse().ok()?;
    let unit = parts.next()?;
    let suffix = parts.next()?;
    if parts.next().is_some() || suffix != "ago" {
        return None;
    }
    match unit {
        "days" => Some(now - Duration::days(amount)),
        "hours" => Some(now - Duration::hours(amount)),
        _ => None,
    }
}

fn value_as_datetime(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?;
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn keypath_value_on_item(item: &Item, keypath: &str) -> Option<Value> {
    let (head, rest) = match keypath.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (keypath, None),
    };
    let top = match head {
        "uuid" => Some(Value::String(item.uuid.to_string())),
        "content_type" => Some(Value::String(item.content_type.clone())),
        "deleted" => Some(Value::Bool(item.deleted)),
        "dirty" => Some(Value::Bool(item.is_dirty())),
        "conflict_of" => item.conflict_of.map(|u| Value::String(u.to_string())),
        "created_at" => item.created_at.map(|t| Value::String(t.to_rfc3339())),
        "updated_at" => item.updated_at.map(|t| Value::String(t.to_rfc3339())),
        "client_updated_at" => item.client_updated_at().map(|t| Value::String(t.to_rfc3339())),
        "content" => {
            let content = item.content.as_value()?.clone();
            return match rest {
                Some(rest) => traverse(&content, rest),
                None => Some(content),
            };
        }
        _ => None,
    };
    match (top, rest) {
        (Some(value), None) => Some(value),
        (Some(_), Some(_)) => None,
        // Unknown head: treat the whole path as a content path.
        (None, _) => traverse(item.content.as_value()?, keypath),
    }
}

fn traverse(root: &Value, keypath: &str) -> Option<Value> {
    let mut current = root;
    for segment in keypath.split('.') {
        current = current.get(segment)?;
    }
    Some(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemContent;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 3, 10, 9, 0, 0).unwrap()
    }

    fn note(content: Value) -> Item {
        let mut item = Item::new(Uuid::new_v4(), "Note");
        item.content = ItemContent::Decrypted(content);
        item
    }

    #[test]
    fn equality_on_content_type() {
        let item = note(serde_json::json!({}));
        let matching = Predicate::new("content_type", PredicateOperator::Eq, "Note".into());
        let other = Predicate::new("content_type", PredicateOperator::Eq, "Tag".into());
        assert!(matching.evaluate(&item, now()));
        assert!(!other.evaluate(&item, now()));
    }

    #[test]
    fn content_keypath() {
        let item = note(serde_json::json!({"meta": {"pinned": true}}));
        let pred = Predicate::new("content.meta.pinned", PredicateOperator::Eq, true.into());
        assert!(pred.evaluate(&item, now()));

        // A bare path falls through to content.
        let bare = Predicate::new("meta.pinned", PredicateOperator::Eq, true.into());
        assert!(bare.evaluate(&item, now()));
    }

    #[test]
    fn numeric_ordering() {
        let item = note(serde_json::json!({"count": 5}));
        assert!(Predicate::new("content.count", PredicateOperator::Gt, 3.into()).evaluate(&item, now()));
        assert!(Predicate::new("content.count", PredicateOperator::Lte, 5.into()).evaluate(&item, now()));
        assert!(!Predicate::new("content.count", PredicateOperator::Lt, 5.into()).evaluate(&item, now()));
    }

    #[test]
    fn starts_with_and_matches() {
        let item = note(serde_json::json!({"title": "meeting notes"}));
        assert!(
            Predicate::new("content.title", PredicateOperator::StartsWith, "meet".into())
                .evaluate(&item, now())
        );
        assert!(
            Predicate::new("content.title", PredicateOperator::Matches, "^m.*notes$".into())
                .evaluate(&item, now())
        );
        assert!(
            !Predicate::new("content.title", PredicateOperator::Matches, "^x".into())
                .evaluate(&item, now())
        );
    }

    #[test]
    fn in_and_includes() {
        let item = note(serde_json::json!({"tags": ["work", "urgent"]}));
        assert!(Predicate::new(
            "content_type",
            PredicateOperator::In,
            serde_json::json!(["Note", "Tag"])
        )
        .evaluate(&item, now()));
        assert!(
            Predicate::new("content.tags", PredicateOperator::Includes, "work".into())
                .evaluate(&item, now())
        );
        assert!(
            !Predicate::new("content.tags", PredicateOperator::Includes, "home".into())
                .evaluate(&item, now())
        );
    }

    #[test]
    fn nested_includes() {
        let item = note(serde_json::json!({
            "references": [
                {"uuid": "a", "content_type": "Tag"},
                {"uuid": "b", "content_type": "Note"}
            ]
        }));
        let nested = Predicate::new("content_type", PredicateOperator::Eq, "Tag".into());
        let pred = Predicate::including("content.references", nested);
        assert!(pred.evaluate(&item, now()));

        let nested_miss = Predicate::new("content_type", PredicateOperator::Eq, "Component".into());
        assert!(!Predicate::including("content.references", nested_miss).evaluate(&item, now()));
    }

    #[test]
    fn date_shorthand() {
        let mut item = note(serde_json::json!({}));
        item.updated_at = Some(now() - Duration::days(10));

        // Older than 3 days ago.
        let stale = Predicate::new("updated_at", PredicateOperator::Lt, "3.days.ago".into());
        assert!(stale.evaluate(&item, now()));

        let recent = Predicate::new("updated_at", PredicateOperator::Gt, "3.days.ago".into());
        assert!(!recent.evaluate(&item, now()));

        item.updated_at = Some(now() - Duration::hours(1));
        let within = Predicate::new("updated_at", PredicateOperator::Gte, "2.hours.ago".into());
        assert!(within.evaluate(&item, now()));
    }

    #[test]
    fn missing_keypath_never_matches() {
        let item = note(serde_json::json!({}));
        assert!(!Predicate::new("content.absent", PredicateOperator::Eq, 1.into())
            .evaluate(&item, now()));
        assert!(
            !Predicate::new("updated_at", PredicateOperator::Lt, "1.days.ago".into())
                .evaluate(&item, now())
        );
    }
}
