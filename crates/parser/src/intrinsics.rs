//! CloudFormation intrinsic functions
//!
//! Templates written in YAML use the short tag form (`!Ref Name`), JSON
//! templates the long form (`{"Ref": "Name"}`). Both survive a round trip
//! through `serde_yaml::Value`: short forms as tagged values, long forms as
//! single-key mappings.

use serde_yaml::value::{Tag, TaggedValue};
use serde_yaml::{Mapping, Value};

/// Which spelling of an intrinsic function to emit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntrinsicForm {
    /// `!Ref Name`
    Short,
    /// `{"Ref": "Name"}`
    Long,
}

impl IntrinsicForm {
    /// `Ref` to a parameter or resource
    pub fn reference(self, name: &str) -> Value {
        self.build("Ref", "Ref", Value::from(name))
    }

    /// `GetAtt` of a resource attribute
    pub fn get_att(self, resource: &str, attribute: &str) -> Value {
        match self {
            IntrinsicForm::Short => tagged("GetAtt", Value::from(format!("{resource}.{attribute}"))),
            IntrinsicForm::Long => long(
                "Fn::GetAtt",
                Value::Sequence(vec![Value::from(resource), Value::from(attribute)]),
            ),
        }
    }

    /// `If` on a condition
    pub fn condition_if(self, condition: &str, then: Value, otherwise: Value) -> Value {
        self.build(
            "If",
            "Fn::If",
            Value::Sequence(vec![Value::from(condition), then, otherwise]),
        )
    }

    /// `Equals` of two values
    pub fn equals(self, left: Value, right: Value) -> Value {
        self.build("Equals", "Fn::Equals", Value::Sequence(vec![left, right]))
    }

    fn build(self, short: &str, long_name: &str, argument: Value) -> Value {
        match self {
            IntrinsicForm::Short => tagged(short, argument),
            IntrinsicForm::Long => long(long_name, argument),
        }
    }
}

fn tagged(tag: &str, value: Value) -> Value {
    Value::Tagged(Box::new(TaggedValue {
        tag: Tag::new(tag),
        value,
    }))
}

fn long(function: &str, argument: Value) -> Value {
    let mut m = Mapping::new();
    m.insert(Value::from(function), argument);
    Value::Mapping(m)
}

/// If `value` is a `Ref` to `name`, the form it is written in
pub fn reference_form(value: &Value, name: &str) -> Option<IntrinsicForm> {
    match value {
        Value::Tagged(t) if t.tag == "Ref" && t.value.as_str() == Some(name) => {
            Some(IntrinsicForm::Short)
        }
        Value::Mapping(m) if m.len() == 1 && m.get("Ref").and_then(Value::as_str) == Some(name) => {
            Some(IntrinsicForm::Long)
        }
        _ => None,
    }
}

/// Replace every `Ref` to `target` below (and including) `value`
///
/// `replace` receives the form the reference was written in and returns the
/// node to put in its place. Replacement nodes are not visited again, so a
/// replacement may itself contain a `Ref` to `target`. Mapping keys are never
/// rewritten. Returns the number of references replaced.
pub fn rewrite_references<F>(value: &mut Value, target: &str, replace: &mut F) -> usize
where
    F: FnMut(IntrinsicForm) -> Value,
{
    if let Some(form) = reference_form(value, target) {
        *value = replace(form);
        return 1;
    }

    let mut count = 0;
    match value {
        Value::Sequence(items) => {
            for item in items {
                count += rewrite_references(item, target, replace);
            }
        }
        Value::Mapping(m) => {
            for item in m.values_mut() {
                count += rewrite_references(item, target, replace);
            }
        }
        Value::Tagged(t) => {
            count += rewrite_references(&mut t.value, target, replace);
        }
        _ => {}
    }
    count
}

/// Count the `Ref`s to `target` below (and including) `value`
pub fn count_references(value: &Value, target: &str) -> usize {
    if reference_form(value, target).is_some() {
        return 1;
    }
    match value {
        Value::Sequence(items) => items.iter().map(|v| count_references(v, target)).sum(),
        Value::Mapping(m) => m.values().map(|v| count_references(v, target)).sum(),
        Value::Tagged(t) => count_references(&t.value, target),
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_forms() {
        let short: Value = serde_yaml::from_str("!Ref Subnets").unwrap();
        let long: Value = serde_yaml::from_str("{Ref: Subnets}").unwrap();
        assert_eq!(reference_form(&short, "Subnets"), Some(IntrinsicForm::Short));
        assert_eq!(reference_form(&long, "Subnets"), Some(IntrinsicForm::Long));
        assert_eq!(reference_form(&short, "Other"), None);
    }

    #[test]
    fn test_short_form_serializes_with_tags() {
        let value = IntrinsicForm::Short.condition_if(
            "AutoAzs",
            IntrinsicForm::Short.get_att("AWSSBInjectedGetAzs", "AvailabilityZones"),
            IntrinsicForm::Short.reference("AvailabilityZones"),
        );
        let yaml = serde_yaml::to_string(&value).unwrap();
        assert!(yaml.contains("!If"));
        assert!(yaml.contains("!GetAtt AWSSBInjectedGetAzs.AvailabilityZones"));
        assert!(yaml.contains("!Ref AvailabilityZones"));
    }

    #[test]
    fn test_long_form_shapes() {
        let value = IntrinsicForm::Long.get_att("Bucket", "Arn");
        let expected: Value = serde_yaml::from_str("{Fn::GetAtt: [Bucket, Arn]}").unwrap();
        assert_eq!(value, expected);
    }

    #[test]
    fn test_rewrite_nested_references() {
        let mut doc: Value = serde_yaml::from_str(
            r#"
Resources:
  Subnet:
    Properties:
      AvailabilityZone: !Select [0, !Ref AvailabilityZones]
      Tags:
        - Key: azs
          Value: !Join [",", {Ref: AvailabilityZones}]
  Other:
    Properties:
      Name: !Ref SomethingElse
"#,
        )
        .unwrap();

        let replaced = rewrite_references(&mut doc, "AvailabilityZones", &mut |form| {
            form.condition_if(
                "AutoAzs",
                form.get_att("AWSSBInjectedGetAzs", "AvailabilityZones"),
                form.reference("AvailabilityZones"),
            )
        });

        assert_eq!(replaced, 2);
        // each replacement still holds the original reference in its else branch
        assert_eq!(count_references(&doc, "AvailabilityZones"), 2);
        assert_eq!(count_references(&doc, "SomethingElse"), 1);
        let yaml = serde_yaml::to_string(&doc).unwrap();
        assert!(yaml.contains("Fn::If"));
        assert!(yaml.contains("!If"));
    }

    #[test]
    fn test_mapping_keys_untouched() {
        let mut doc: Value = serde_yaml::from_str("Ref: AvailabilityZones\nOther: 1\n").unwrap();
        let replaced =
            rewrite_references(&mut doc, "AvailabilityZones", &mut |f| f.reference("X"));
        assert_eq!(replaced, 0);
    }
}
