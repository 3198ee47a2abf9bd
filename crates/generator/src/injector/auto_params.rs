//! Auto-parameter injection
//!
//! Some parameters can be left on `Auto` and are then computed at stack
//! creation by a helper Lambda: availability zones for the stack's region
//! and free CIDR blocks inside the target VPC. Every `Ref` to such a
//! parameter is rewritten to pick the helper's result when the toggle is
//! on and the parameter value otherwise.

use super::{ResourceInjector, Snippet, INJECTED_PREFIX};
use apb_packager_common::Result;
use apb_packager_parser::{CloudFormationTemplate, IntrinsicForm};
use serde_yaml::Value;

/// Default value that switches a parameter to computed mode
const AUTO: &str = "Auto";

/// A helper that computes a parameter value at stack creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoUtility {
    /// Helper directory name
    pub helper: &'static str,
    /// Suffix of the injected resource names
    pub name: &'static str,
    /// Parameter that must exist for the helper to apply
    pub trigger: &'static str,
    /// Parameter whose references are rewritten
    pub target: &'static str,
    pub condition: &'static str,
    /// Custom resource attribute holding the computed value
    pub attribute: &'static str,
    snippet: &'static str,
}

impl AutoUtility {
    /// Name of the injected custom resource
    pub fn resource(&self) -> String {
        format!("{}{}", INJECTED_PREFIX, self.name)
    }

    fn lambda(&self) -> String {
        format!("{}{}Lambda", INJECTED_PREFIX, self.name)
    }

    /// Parameter switching the helper on, if any is set to `Auto`
    ///
    /// The target parameter itself wins over one named after the condition.
    pub fn toggle(&self, template: &CloudFormationTemplate) -> Option<&'static str> {
        [self.target, self.condition]
            .into_iter()
            .find(|name| is_auto(template.parameter_default(name)))
    }
}

fn is_auto(default: Option<&Value>) -> bool {
    default.and_then(Value::as_str) == Some(AUTO)
}

/// Helpers in the order they are applied
pub const AUTO_UTILITIES: [AutoUtility; 2] = [
    AutoUtility {
        helper: "get_cidrs",
        name: "GetCidrs",
        trigger: "CidrBlocks",
        target: "CidrBlocks",
        condition: "AutoCidrs",
        attribute: "CidrBlocks",
        snippet: include_str!("../../snippets/get_cidrs.yaml"),
    },
    AutoUtility {
        helper: "get_azs",
        name: "GetAzs",
        trigger: "NumberOfAvailabilityZones",
        target: "AvailabilityZones",
        condition: "AutoAzs",
        attribute: "AvailabilityZones",
        snippet: include_str!("../../snippets/get_azs.yaml"),
    },
];

impl ResourceInjector<'_> {
    /// Apply every auto-parameter helper the template qualifies for
    ///
    /// Returns the names of the helpers injected by this call.
    pub fn inject_auto_parameters(
        &mut self,
        template: &mut CloudFormationTemplate,
    ) -> Result<Vec<&'static str>> {
        let mut injected = Vec::new();
        for utility in &AUTO_UTILITIES {
            if self.inject_auto_parameter(template, utility)? {
                injected.push(utility.name);
            }
        }
        Ok(injected)
    }

    fn inject_auto_parameter(
        &mut self,
        template: &mut CloudFormationTemplate,
        utility: &AutoUtility,
    ) -> Result<bool> {
        let resource = utility.resource();
        if template.has_resource(&resource) {
            tracing::debug!(resource = %resource, "auto-parameter helper already injected");
            return Ok(false);
        }
        if template.parameter(utility.trigger).is_none()
            || template.parameter(utility.target).is_none()
        {
            return Ok(false);
        }
        let Some(toggle) = utility.toggle(template) else {
            tracing::debug!(
                parameter = utility.target,
                "parameter is not set to Auto, leaving references alone"
            );
            return Ok(false);
        };

        let mut snippet = Snippet::parse(utility.helper, utility.snippet)?;
        self.install_helper_code(template, &mut snippet, &utility.lambda())?;

        let rewritten = template.rewrite_references(utility.target, |form| {
            form.condition_if(
                utility.condition,
                form.get_att(&resource, utility.attribute),
                form.reference(utility.target),
            )
        });
        snippet.merge_into(template);

        let form = IntrinsicForm::Short;
        template
            .conditions_mut()
            .entry(Value::from(utility.condition))
            .or_insert_with(|| form.equals(form.reference(toggle), Value::from(AUTO)));

        tracing::info!(
            helper = utility.helper,
            toggle,
            references = rewritten,
            "injected auto-parameter helper"
        );
        Ok(true)
    }
}
