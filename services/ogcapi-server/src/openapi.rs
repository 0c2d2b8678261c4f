//! OpenAPI request and response validation.
//!
//! A merged document (the embedded canonical spec plus an optional
//! operator-supplied overlay) is compiled once at startup: `$ref`s are
//! inlined, query parameter schemas and response schemas become compiled
//! JSON Schema validators. The same validator runs in startup mode
//! (failures are fatal, used against the pre-rendered pages) and in runtime
//! mode (failures become HTTP 400/500).

use std::path::Path;

use anyhow::{Context as _, Result};
use jsonschema::JSONSchema;
use serde_json::Value;

/// Embedded canonical OpenAPI document covering the served routes.
const BASE_SPEC: &str = include_str!("../assets/openapi.yaml");

pub struct OpenApiValidator {
    document: Value,
    operations: Vec<Operation>,
}

struct Operation {
    segments: Vec<Segment>,
    params: Vec<ParamSpec>,
    /// Response schema per media type for the 200 response.
    responses: Vec<(String, JSONSchema)>,
}

enum Segment {
    Literal(String),
    Param,
}

struct ParamSpec {
    name: String,
    required: bool,
    schema: Option<(Value, JSONSchema)>,
}

impl OpenApiValidator {
    /// Build the validator from the embedded spec, optionally overlaid with
    /// an operator-customized spec file (paths and components are merged,
    /// the overlay wins).
    pub fn from_files(overlay: Option<&Path>) -> Result<Self> {
        let mut document: Value =
            serde_yaml::from_str(BASE_SPEC).context("failed to parse embedded OpenAPI spec")?;

        if let Some(path) = overlay {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read OpenAPI file {}", path.display()))?;
            let overlay: Value = serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to parse OpenAPI file {}", path.display()))?;
            deep_merge(&mut document, overlay);
        }

        let resolved = inline_refs(&document, &document, 0)?;
        let operations = compile_operations(&resolved)?;

        Ok(Self {
            document,
            operations,
        })
    }

    /// The merged document, served at the API description endpoint.
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Validate the query parameters of a GET request against the spec.
    ///
    /// Paths not described in the spec pass validation; the router decides
    /// what exists.
    pub fn validate_request(
        &self,
        path: &str,
        query: &[(String, String)],
    ) -> Result<(), String> {
        let Some(operation) = self.match_operation(path) else {
            return Ok(());
        };

        for param in &operation.params {
            let value = query.iter().find(|(key, _)| *key == param.name);
            match value {
                None if param.required => {
                    return Err(format!("missing required query parameter '{}'", param.name));
                }
                Some((_, raw)) => {
                    if let Some((schema_value, schema)) = &param.schema {
                        let coerced = coerce(raw, schema_value);
                        let coerced = coerced.ok_or_else(|| {
                            format!("query parameter '{}' has an invalid value '{}'", param.name, raw)
                        })?;
                        let validation = schema.validate(&coerced);
                        if let Err(errors) = validation {
                            let detail: Vec<String> =
                                errors.map(|e| e.to_string()).collect();
                            return Err(format!(
                                "query parameter '{}' is invalid: {}",
                                param.name,
                                detail.join("; ")
                            ));
                        }
                    }
                }
                None => {}
            }
        }
        Ok(())
    }

    /// Validate a response body against the schema declared for its
    /// media type. Only JSON payloads are checked.
    pub fn validate_response(
        &self,
        content_type: &str,
        body: &[u8],
        path: &str,
    ) -> Result<(), String> {
        let Some(operation) = self.match_operation(path) else {
            return Ok(());
        };
        let media_type = content_type.split(';').next().unwrap_or(content_type).trim();
        let Some((_, schema)) = operation
            .responses
            .iter()
            .find(|(declared, _)| declared == media_type)
        else {
            return Ok(());
        };
        if !media_type.contains("json") {
            return Ok(());
        }

        let instance: Value = serde_json::from_slice(body)
            .map_err(|err| format!("response for {path} is not valid JSON: {err}"))?;
        if let Err(errors) = schema.validate(&instance) {
            let detail: Vec<String> = errors.map(|e| e.to_string()).collect();
            return Err(format!(
                "response for {path} failed schema validation: {}",
                detail.join("; ")
            ));
        }
        Ok(())
    }

    fn match_operation(&self, path: &str) -> Option<&Operation> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        self.operations.iter().find(|op| {
            op.segments.len() == segments.len()
                && op
                    .segments
                    .iter()
                    .zip(&segments)
                    .all(|(expected, actual)| match expected {
                        Segment::Literal(literal) => literal == actual,
                        Segment::Param => true,
                    })
        })
    }
}

fn compile_operations(document: &Value) -> Result<Vec<Operation>> {
    let mut operations = Vec::new();
    let Some(paths) = document.get("paths").and_then(Value::as_object) else {
        return Ok(operations);
    };

    for (path, item) in paths {
        let Some(get) = item.get("get") else { continue };

        let segments = path
            .trim_matches('/')
            .split('/')
            .map(|segment| {
                if segment.starts_with('{') {
                    Segment::Param
                } else {
                    Segment::Literal(segment.to_string())
                }
            })
            .collect();

        let mut params = Vec::new();
        if let Some(declared) = get.get("parameters").and_then(Value::as_array) {
            for param in declared {
                if param.get("in").and_then(Value::as_str) != Some("query") {
                    continue;
                }
                let Some(name) = param.get("name").and_then(Value::as_str) else {
                    continue;
                };
                let schema = match param.get("schema") {
                    Some(schema_value) => {
                        let compiled = JSONSchema::compile(schema_value).map_err(|err| {
                            anyhow::anyhow!("invalid schema for parameter '{name}': {err}")
                        })?;
                        Some((schema_value.clone(), compiled))
                    }
                    None => None,
                };
                params.push(ParamSpec {
                    name: name.to_string(),
                    required: param
                        .get("required")
                        .and_then(Value::as_bool)
                        .unwrap_or(false),
                    schema,
                });
            }
        }

        let mut responses = Vec::new();
        if let Some(content) = get
            .pointer("/responses/200/content")
            .and_then(Value::as_object)
        {
            for (media_type, media) in content {
                if let Some(schema_value) = media.get("schema") {
                    let compiled = JSONSchema::compile(schema_value).map_err(|err| {
                        anyhow::anyhow!("invalid response schema for '{path}': {err}")
                    })?;
                    responses.push((media_type.clone(), compiled));
                }
            }
        }

        operations.push(Operation {
            segments,
            params,
            responses,
        });
    }

    Ok(operations)
}

/// Coerce a raw query string value into the JSON type its schema declares.
fn coerce(raw: &str, schema: &Value) -> Option<Value> {
    match schema.get("type").and_then(Value::as_str) {
        Some("integer") => raw.parse::<i64>().ok().map(Value::from),
        Some("number") => raw.parse::<f64>().ok().map(Value::from),
        Some("boolean") => raw.parse::<bool>().ok().map(Value::from),
        _ => Some(Value::String(raw.to_string())),
    }
}

/// Recursively merge `overlay` into `base`; overlay values win.
fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Replace internal `$ref`s with the referenced value so schemas can be
/// compiled standalone. Depth-capped against reference cycles.
fn inline_refs(value: &Value, root: &Value, depth: usize) -> Result<Value> {
    if depth > 16 {
        anyhow::bail!("OpenAPI document has too deeply nested $refs (cycle?)");
    }

    match value {
        Value::Object(map) => {
            if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
                let pointer = reference
                    .strip_prefix("#")
                    .with_context(|| format!("unsupported external $ref '{reference}'"))?;
                let target = root
                    .pointer(pointer)
                    .with_context(|| format!("dangling $ref '{reference}'"))?;
                return inline_refs(target, root, depth + 1);
            }
            let mut result = serde_json::Map::with_capacity(map.len());
            for (key, entry) in map {
                result.insert(key.clone(), inline_refs(entry, root, depth)?);
            }
            Ok(Value::Object(result))
        }
        Value::Array(entries) => Ok(Value::Array(
            entries
                .iter()
                .map(|entry| inline_refs(entry, root, depth))
                .collect::<Result<_>>()?,
        )),
        other => Ok(other.clone()),
    }
}
