//! Intent validation.
//!
//! Works on the engine's raw JSON, not on a decoded `Intent`: every field is
//! checked explicitly so a missing or mistyped field becomes a
//! `ValidationError` instead of a silent serde default. Errors accumulate;
//! nothing short-circuits after the discriminator has been read.

use netsleuth_common::{
    AnalysisResult, CapabilityCatalog, Intent, OperationRequest, RiskClass, TargetScope,
    ValidationError, ValidationErrorKind,
};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// An intent that passed validation. Only the validator can build one.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedIntent(Intent);

impl ValidatedIntent {
    pub fn intent(&self) -> &Intent {
        &self.0
    }

    pub fn into_intent(self) -> Intent {
        self.0
    }
}

/// Validator bound to one session's catalog and scope.
pub struct IntentValidator<'a> {
    catalog: &'a CapabilityCatalog,
    scope: &'a TargetScope,
    max_operations: usize,
}

impl<'a> IntentValidator<'a> {
    pub fn new(catalog: &'a CapabilityCatalog, scope: &'a TargetScope, max_operations: usize) -> Self {
        Self {
            catalog,
            scope,
            max_operations,
        }
    }

    pub fn validate(&self, raw: &Value) -> Result<ValidatedIntent, Vec<ValidationError>> {
        let mut errors = Vec::new();

        let Some(obj) = raw.as_object() else {
            return Err(vec![ValidationError::malformed(
                "$",
                "engine reply is not a JSON object",
            )]);
        };

        let intent = match obj.get("kind").and_then(Value::as_str) {
            Some("data_request") => self.data_request(obj, &mut errors),
            Some("analysis") => analysis(obj, &mut errors),
            Some("clarification") => clarification(obj, &mut errors),
            Some(other) => {
                errors.push(ValidationError::malformed(
                    "kind",
                    format!(
                        "unknown intent kind '{}', expected data_request, analysis or clarification",
                        other
                    ),
                ));
                None
            }
            None => {
                errors.push(ValidationError::malformed("kind", "missing string field 'kind'"));
                None
            }
        };

        match intent {
            Some(intent) if errors.is_empty() => Ok(ValidatedIntent(intent)),
            _ => Err(errors),
        }
    }

    fn data_request(&self, obj: &Map<String, Value>, errors: &mut Vec<ValidationError>) -> Option<Intent> {
        let rationale = optional_string(obj, "rationale", "rationale", errors);

        let Some(items) = obj.get("operations").and_then(Value::as_array) else {
            errors.push(ValidationError::malformed(
                "operations",
                "data_request requires an 'operations' array",
            ));
            return None;
        };
        if items.is_empty() {
            errors.push(ValidationError::malformed(
                "operations",
                "data_request requires at least one operation",
            ));
            return None;
        }
        if items.len() > self.max_operations {
            errors.push(ValidationError::new(
                ValidationErrorKind::TooManyOperations,
                "operations",
                format!(
                    "{} operations requested, at most {} allowed per request",
                    items.len(),
                    self.max_operations
                ),
            ));
        }

        let mut operations = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            if let Some(op) = self.operation(index, item, errors) {
                operations.push(op);
            }
        }

        Some(Intent::DataRequest {
            rationale,
            operations,
        })
    }

    fn operation(&self, index: usize, item: &Value, errors: &mut Vec<ValidationError>) -> Option<OperationRequest> {
        let base = format!("operations[{}]", index);
        let Some(obj) = item.as_object() else {
            errors.push(ValidationError::malformed(&base, "operation must be an object"));
            return None;
        };

        let operation_id = required_string(obj, "operation_id", &format!("{}.operation_id", base), errors);
        let target = required_string(obj, "target", &format!("{}.target", base), errors);
        let params = self.params(obj, &base, errors);

        if let Some(target) = &target {
            if !self.scope.contains(target) {
                errors.push(ValidationError::out_of_scope(index, target));
            }
        }

        let operation_id = operation_id?;
        match self.catalog.get(&operation_id) {
            None => {
                errors.push(ValidationError::unknown_operation(index, &operation_id));
            }
            Some(entry) => {
                if entry.risk != RiskClass::ReadOnly {
                    errors.push(ValidationError::new(
                        ValidationErrorKind::UnsafeOperation,
                        format!("{}.operation_id", base),
                        format!(
                            "operation '{}' is classed {} and cannot be dispatched",
                            operation_id, entry.risk
                        ),
                    ));
                }
                if let Some(params) = &params {
                    self.check_params(&operation_id, params, &base, errors);
                }
            }
        }

        Some(OperationRequest {
            operation_id,
            target: target?,
            params: params?,
        })
    }

    fn params(
        &self,
        obj: &Map<String, Value>,
        base: &str,
        errors: &mut Vec<ValidationError>,
    ) -> Option<BTreeMap<String, String>> {
        let mut params = BTreeMap::new();
        match obj.get("params") {
            None | Some(Value::Null) => Some(params),
            Some(Value::Object(map)) => {
                let mut ok = true;
                for (name, value) in map {
                    match value.as_str() {
                        Some(v) => {
                            params.insert(name.clone(), v.to_string());
                        }
                        None => {
                            ok = false;
                            errors.push(ValidationError::malformed(
                                format!("{}.params.{}", base, name),
                                "parameter values must be strings",
                            ));
                        }
                    }
                }
                ok.then_some(params)
            }
            Some(_) => {
                errors.push(ValidationError::malformed(
                    format!("{}.params", base),
                    "params must be an object of strings",
                ));
                None
            }
        }
    }

    fn check_params(
        &self,
        operation_id: &str,
        params: &BTreeMap<String, String>,
        base: &str,
        errors: &mut Vec<ValidationError>,
    ) {
        let Some(entry) = self.catalog.get(operation_id) else {
            return;
        };

        for placeholder in entry.placeholders() {
            if !params.contains_key(placeholder) {
                errors.push(ValidationError::new(
                    ValidationErrorKind::InvalidParameter,
                    format!("{}.params.{}", base, placeholder),
                    format!("operation '{}' requires parameter '{}'", operation_id, placeholder),
                ));
            }
        }

        for (name, value) in params {
            let location = format!("{}.params.{}", base, name);
            if !entry.params.iter().any(|p| &p.name == name) {
                errors.push(ValidationError::new(
                    ValidationErrorKind::InvalidParameter,
                    location,
                    format!("operation '{}' takes no parameter '{}'", operation_id, name),
                ));
            } else if !self.catalog.param_matches(operation_id, name, value) {
                errors.push(ValidationError::new(
                    ValidationErrorKind::InvalidParameter,
                    location,
                    format!("value '{}' is not a valid {}", value, name),
                ));
            }
        }
    }
}

/// Validate a raw engine reply for a session.
pub fn validate(
    raw: &Value,
    catalog: &CapabilityCatalog,
    scope: &TargetScope,
    max_operations: usize,
) -> Result<ValidatedIntent, Vec<ValidationError>> {
    IntentValidator::new(catalog, scope, max_operations).validate(raw)
}

fn analysis(obj: &Map<String, Value>, errors: &mut Vec<ValidationError>) -> Option<Intent> {
    let summary = required_string(obj, "summary", "summary", errors);
    let findings = string_list(obj, "findings", errors);
    let root_causes = string_list(obj, "root_causes", errors);
    let next_steps = string_list(obj, "next_steps", errors);

    let confidence = match obj.get("confidence") {
        None | Some(Value::Null) => Some(None),
        Some(value) => match value.as_f64() {
            Some(c) if (0.0..=1.0).contains(&c) => Some(Some(c)),
            _ => {
                errors.push(ValidationError::malformed(
                    "confidence",
                    "confidence must be a number between 0 and 1",
                ));
                None
            }
        },
    };

    Some(Intent::Analysis(AnalysisResult {
        summary: summary?,
        findings: findings?,
        root_causes: root_causes?,
        next_steps: next_steps?,
        confidence: confidence?,
    }))
}

fn clarification(obj: &Map<String, Value>, errors: &mut Vec<ValidationError>) -> Option<Intent> {
    let question = required_string(obj, "question", "question", errors)?;
    Some(Intent::Clarification { question })
}

/// Non-empty string field
fn required_string(
    obj: &Map<String, Value>,
    field: &str,
    location: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<String> {
    match obj.get(field).and_then(Value::as_str).map(str::trim) {
        Some(s) if !s.is_empty() => Some(s.to_string()),
        Some(_) => {
            errors.push(ValidationError::malformed(location, format!("'{}' must not be empty", field)));
            None
        }
        None => {
            errors.push(ValidationError::malformed(
                location,
                format!("missing string field '{}'", field),
            ));
            None
        }
    }
}

fn optional_string(
    obj: &Map<String, Value>,
    field: &str,
    location: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<String> {
    match obj.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.trim().is_empty() => None,
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(_) => {
            errors.push(ValidationError::malformed(location, format!("'{}' must be a string", field)));
            None
        }
    }
}

/// Optional array of strings; absent means empty. `None` means an error
/// was recorded.
fn string_list(
    obj: &Map<String, Value>,
    field: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<Vec<String>> {
    match obj.get(field) {
        None | Some(Value::Null) => Some(Vec::new()),
        Some(Value::Array(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for (i, item) in items.iter().enumerate() {
                match item.as_str() {
                    Some(s) => out.push(s.to_string()),
                    None => {
                        errors.push(ValidationError::malformed(
                            format!("{}[{}]", field, i),
                            "expected a string",
                        ));
                        return None;
                    }
                }
            }
            Some(out)
        }
        _ => {
            errors.push(ValidationError::malformed(
                field,
                format!("'{}' must be an array of strings", field),
            ));
            None
        }
    }
}
