//! Security label expressions.
//!
//! A [`SecurityLabelBuilder`] accumulates rendered label clauses and raw OR
//! expressions, then renders the final boolean expression consumed by the
//! downstream policy engine. The output grammar is byte-exact:
//!
//! ```text
//! (clause&clause&...)|(or-expr)|(or-expr)
//! ```

use std::collections::HashSet;

use tracing::warn;

use crate::error::LabelError;

pub mod edh;

pub use edh::{EdhModel, EdhV1, EdhV2};

/// Header carrying a record's security label.
pub const SECURITY_LABEL_HEADER: &str = "Security-Label";

/// Header carrying the JSON policy a security label was derived from.
pub const POLICY_INFORMATION_HEADER: &str = "policyInformation";

/// How a label renders its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    /// Exactly one value, rendered `name=value`.
    Single,
    /// Any number of values, rendered `(name=v1|name=v2)`.
    Multi,
    /// Group membership that must all hold, rendered `v1:and&v2:and`.
    AndGroup,
    /// Group membership where any may hold, rendered `(v1:or|v2:or)`.
    OrGroup,
}

/// A label definition within a security label vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label {
    name: &'static str,
    label_type: &'static str,
    kind: LabelKind,
}

impl Label {
    /// Defines a label.
    #[must_use]
    pub const fn new(name: &'static str, label_type: &'static str, kind: LabelKind) -> Self {
        Self {
            name,
            label_type,
            kind,
        }
    }

    /// Defines a single-value label.
    #[must_use]
    pub const fn single(name: &'static str) -> Self {
        Self::new(name, "str", LabelKind::Single)
    }

    /// Defines a multi-value label.
    #[must_use]
    pub const fn multi(name: &'static str) -> Self {
        Self::new(name, "array", LabelKind::Multi)
    }

    /// Returns the label name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the declared value type, e.g. `str` or `array`.
    #[must_use]
    pub fn label_type(&self) -> &'static str {
        self.label_type
    }

    /// Returns how this label renders.
    #[must_use]
    pub fn kind(&self) -> LabelKind {
        self.kind
    }

    /// Renders the label with the given values.
    ///
    /// # Errors
    ///
    /// Returns `LabelError::SingleValueExpected` if a single-value label is
    /// given anything other than one value.
    pub fn render<S: AsRef<str>>(&self, values: &[S]) -> Result<String, LabelError> {
        let rendered = match self.kind {
            LabelKind::Single => {
                let [value] = values else {
                    return Err(LabelError::SingleValueExpected {
                        label: self.name.to_string(),
                        count: values.len(),
                    });
                };
                format!("{}={}", self.name, value.as_ref())
            }
            LabelKind::Multi => format!(
                "({})",
                join(values, "|", |v| format!("{}={v}", self.name))
            ),
            LabelKind::AndGroup => join(values, "&", |v| format!("{v}:and")),
            LabelKind::OrGroup => format!("({})", join(values, "|", |v| format!("{v}:or"))),
        };
        Ok(rendered)
    }
}

fn join<S: AsRef<str>>(values: &[S], sep: &str, f: impl Fn(&str) -> String) -> String {
    values
        .iter()
        .map(|v| f(v.as_ref()))
        .collect::<Vec<_>>()
        .join(sep)
}

/// Builds a security label expression.
#[derive(Debug, Default, Clone)]
pub struct SecurityLabelBuilder {
    labels: Vec<String>,
    or_expressions: Vec<String>,
    used_labels: HashSet<&'static str>,
}

impl SecurityLabelBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a single-valued clause.
    ///
    /// # Errors
    ///
    /// Returns `LabelError` if the label cannot render one value.
    pub fn add(&mut self, label: &Label, value: &str) -> Result<&mut Self, LabelError> {
        self.add_multiple(label, &[value])
    }

    /// Adds a clause with several values.
    ///
    /// Reusing a label name is allowed but logged, since stacking clauses on
    /// the same label can make data inaccessible.
    ///
    /// # Errors
    ///
    /// Returns `LabelError` if the label rejects the values.
    pub fn add_multiple<S: AsRef<str>>(
        &mut self,
        label: &Label,
        values: &[S],
    ) -> Result<&mut Self, LabelError> {
        let rendered = label.render(values)?;
        if !self.used_labels.insert(label.name) {
            warn!(
                label = label.name,
                "multiple expressions with the same label may make data inaccessible"
            );
        }
        self.labels.push(rendered);
        Ok(self)
    }

    /// Adds a raw expression that is ORed with the base expression.
    ///
    /// # Errors
    ///
    /// Returns `LabelError` if the trimmed expression is shorter than two
    /// characters or is not wrapped in brackets.
    pub fn add_or_expression(&mut self, expression: &str) -> Result<&mut Self, LabelError> {
        let trimmed = expression.trim();
        if trimmed.chars().count() < 2 {
            return Err(LabelError::EmptyExpression);
        }
        if !(trimmed.starts_with('(') && trimmed.ends_with(')')) {
            return Err(LabelError::Unbracketed(trimmed.to_string()));
        }
        self.or_expressions.push(trimmed.to_string());
        Ok(self)
    }

    /// Renders the expression.
    #[must_use]
    pub fn build(&self) -> String {
        let base = self.labels.join("&");
        let ors = self.or_expressions.join("|");
        if base.trim().is_empty() {
            return ors;
        }
        if self.or_expressions.is_empty() {
            format!("({base})")
        } else {
            format!("({base})|{ors}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLASSIFICATION: Label = Label::single("classification");
    const ORGS: Label = Label::multi("orgs");

    #[test]
    fn test_single_and_multi() {
        let mut b = SecurityLabelBuilder::new();
        b.add(&CLASSIFICATION, "S").unwrap();
        b.add_multiple(&ORGS, &["A", "B"]).unwrap();
        assert_eq!(b.build(), "(classification=S&(orgs=A|orgs=B))");
    }

    #[test]
    fn test_or_expressions_appended() {
        let mut b = SecurityLabelBuilder::new();
        b.add(&CLASSIFICATION, "O").unwrap();
        b.add_or_expression(" (clearance=TS) ").unwrap();
        b.add_or_expression("(admin:or)").unwrap();
        assert_eq!(b.build(), "(classification=O)|(clearance=TS)|(admin:or)");
    }

    #[test]
    fn test_only_or_expressions() {
        let mut b = SecurityLabelBuilder::new();
        b.add_or_expression("(a=1)").unwrap();
        b.add_or_expression("(b=2)").unwrap();
        assert_eq!(b.build(), "(a=1)|(b=2)");
    }

    #[test]
    fn test_empty_builder() {
        assert_eq!(SecurityLabelBuilder::new().build(), "");
    }

    #[test]
    fn test_single_rejects_many_values() {
        let err = CLASSIFICATION.render(&["S", "TS"]).unwrap_err();
        assert_eq!(
            err,
            LabelError::SingleValueExpected {
                label: "classification".into(),
                count: 2
            }
        );
        assert!(CLASSIFICATION.render::<&str>(&[]).is_err());
    }

    #[test]
    fn test_group_rendering() {
        let and = Label::new("and_groups", "groups", LabelKind::AndGroup);
        let or = Label::new("or_groups", "groups", LabelKind::OrGroup);
        assert_eq!(and.render(&["doctor", "admin"]).unwrap(), "doctor:and&admin:and");
        assert_eq!(or.render(&["a", "b"]).unwrap(), "(a:or|b:or)");
    }

    #[test]
    fn test_or_expression_validation() {
        let mut b = SecurityLabelBuilder::new();
        assert_eq!(b.add_or_expression(" ( ").unwrap_err(), LabelError::EmptyExpression);
        assert!(matches!(
            b.add_or_expression("a=1"),
            Err(LabelError::Unbracketed(_))
        ));
    }

    #[test]
    fn test_reused_label_still_added() {
        let mut b = SecurityLabelBuilder::new();
        b.add(&CLASSIFICATION, "S").unwrap();
        b.add(&CLASSIFICATION, "O").unwrap();
        assert_eq!(b.build(), "(classification=S&classification=O)");
    }
}
