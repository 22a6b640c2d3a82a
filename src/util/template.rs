use crate::core::error::{Error, Result};
use regex::Regex;
use std::collections::HashMap;

/// Template processor for `{{VAR}}` placeholders in command templates and
/// manifest templates.
pub struct TemplateProcessor;

impl TemplateProcessor {
    /// Process template variables in content.
    ///
    /// Supports both {{VAR}} and $VAR syntax. Unknown placeholders are left
    /// untouched.
    pub fn process(content: &str, vars: &HashMap<String, String>) -> String {
        let mut result = content.to_string();

        for (key, value) in vars {
            let placeholder = format!("{{{{{}}}}}", key);
            result = result.replace(&placeholder, value);
        }

        // Longest names first so $VAR does not clobber $VAR_NAME.
        let mut keys: Vec<&String> = vars.keys().collect();
        keys.sort_by_key(|k| std::cmp::Reverse(k.len()));
        for key in keys {
            let placeholder = format!("${}", key);
            result = result.replace(&placeholder, &vars[key]);
        }

        result
    }

    /// Like [`process`](Self::process), but a `{{VAR}}` left unresolved is a
    /// configuration error naming the variable.
    pub fn process_strict(content: &str, vars: &HashMap<String, String>) -> Result<String> {
        let result = Self::process(content, vars);
        let unresolved = Regex::new(r"\{\{([A-Za-z0-9_]+)\}\}")?;
        if let Some(caps) = unresolved.captures(&result) {
            return Err(Error::MissingConfig(format!("template variable {}", &caps[1])));
        }
        Ok(result)
    }

    /// Expand a command-line template, one argument per element.
    pub fn expand_args(templates: &[String], vars: &HashMap<String, String>) -> Result<Vec<String>> {
        templates
            .iter()
            .map(|arg| Self::process_strict(arg, vars))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_template_double_brace() {
        let vars = vars(&[("AVD_NAME", "ci"), ("TARGET", "android-19")]);
        let result = TemplateProcessor::process("-n {{AVD_NAME}} -t {{TARGET}}", &vars);
        assert_eq!(result, "-n ci -t android-19");
    }

    #[test]
    fn test_template_dollar_prefers_longest_name() {
        let vars = vars(&[("SDCARD", "card.img"), ("SDCARD_SIZE", "128M")]);
        let result = TemplateProcessor::process("$SDCARD_SIZE $SDCARD", &vars);
        assert_eq!(result, "128M card.img");
    }

    #[test]
    fn test_template_unknown_var_preserved() {
        let vars = vars(&[("KNOWN", "value")]);
        let result = TemplateProcessor::process("{{KNOWN}} and {{UNKNOWN}}", &vars);
        assert_eq!(result, "value and {{UNKNOWN}}");
    }

    #[test]
    fn test_strict_rejects_unresolved() {
        let err = TemplateProcessor::process_strict("-port {{CONSOLE_PORT}}", &HashMap::new()).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("CONSOLE_PORT"));
    }

    #[test]
    fn test_expand_args_keeps_argument_boundaries() {
        let vars = vars(&[("AVD_NAME", "my avd")]);
        let args = TemplateProcessor::expand_args(
            &["-avd".to_string(), "{{AVD_NAME}}".to_string()],
            &vars,
        )
        .unwrap();
        assert_eq!(args, vec!["-avd", "my avd"]);
    }

    #[test]
    fn test_template_multiline() {
        let vars = vars(&[("PACKAGE", "io.droidrunner.agent_1"), ("VERSION", "0.1.0")]);
        let content = "<manifest package=\"{{PACKAGE}}\"\n    android:versionName=\"{{VERSION}}\">";
        assert_eq!(
            TemplateProcessor::process(content, &vars),
            "<manifest package=\"io.droidrunner.agent_1\"\n    android:versionName=\"0.1.0\">"
        );
    }
}
