use jsonschema::Validator;
use serde_json::Value;

/// Compiled parameter schema for one action.
pub struct ParameterValidator {
    validator: Validator,
}

impl ParameterValidator {
    /// Compile `schema`; the error string describes why it is unusable.
    pub fn compile(schema: &Value) -> Result<Self, String> {
        if !schema.is_object() {
            return Err("parameter schema must be a JSON object".to_string());
        }
        let validator = jsonschema::validator_for(schema).map_err(|e| e.to_string())?;
        Ok(Self { validator })
    }

    /// Every violation, each prefixed with the offending JSON pointer when it
    /// is not the document root.
    pub fn violations(&self, params: &Value) -> Vec<String> {
        self.validator
            .iter_errors(params)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect()
    }

    pub fn is_valid(&self, params: &Value) -> bool {
        self.validator.is_valid(params)
    }
}

/// One-shot validation without caching the compiled schema.
pub fn validate_against(schema: &Value, params: &Value) -> Result<(), Vec<String>> {
    let validator = ParameterValidator::compile(schema).map_err(|e| vec![e])?;
    let violations = validator.violations(params);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["ip"],
            "properties": {
                "ip": { "type": "string" },
                "duration_minutes": { "type": "integer", "minimum": 1 }
            }
        })
    }

    #[test]
    fn test_valid_parameters() {
        let validator = ParameterValidator::compile(&schema()).unwrap();
        assert!(validator.is_valid(&json!({"ip": "203.0.113.7"})));
        assert!(validator.violations(&json!({"ip": "203.0.113.7"})).is_empty());
    }

    #[test]
    fn test_violations_name_the_field() {
        let validator = ParameterValidator::compile(&schema()).unwrap();
        let violations = validator.violations(&json!({"ip": 7, "duration_minutes": 0}));

        assert_eq!(violations.len(), 2);
        assert!(violations.iter().any(|v| v.starts_with("/ip")));
        assert!(violations.iter().any(|v| v.starts_with("/duration_minutes")));
    }

    #[test]
    fn test_missing_required_is_reported_at_root() {
        let errors = validate_against(&schema(), &json!({})).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("ip"));
    }

    #[test]
    fn test_rejects_uncompilable_schema() {
        assert!(ParameterValidator::compile(&json!("string")).is_err());
        assert!(ParameterValidator::compile(&json!({"type": 12})).is_err());
    }
}
