use jsonschema::Validator;
use once_cell::sync::Lazy;
use serde_json::{json, Value};

/// A single schema violation, reported with the path of the offending field.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaViolation {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{} (at {})", self.message, self.path)
        }
    }
}

fn string_list(description: &str) -> Value {
    json!({
        "description": description,
        "type": "array",
        "items": {"type": "string", "minLength": 1},
        "minItems": 1
    })
}

fn shape(description: &str) -> Value {
    json!({
        "description": description,
        "type": "array",
        "items": {"type": "integer"},
        "minItems": 2
    })
}

fn input_kind() -> Value {
    json!({
        "description": "The type of the input",
        "type": "string",
        "enum": ["image", "number", "text"]
    })
}

/// Schema of the `<name>.json` model descriptor
pub static DESCRIPTOR_SCHEMA: Lazy<Value> = Lazy::new(|| {
    let labeled_parameters = json!({
        "type": "object",
        "properties": {
            "input": {
                "type": "object",
                "properties": {
                    "type": input_kind(),
                    "labels": string_list("The name of the input tensors")
                },
                "required": ["type", "labels"],
                "additionalProperties": false
            },
            "output": {
                "type": "object",
                "properties": {
                    "labels": string_list("The name of the output tensors")
                },
                "required": ["labels"],
                "additionalProperties": false
            }
        },
        "required": ["input", "output"],
        "additionalProperties": false
    });

    let shaped_parameters = json!({
        "type": "object",
        "properties": {
            "input": {
                "type": "object",
                "properties": {
                    "type": input_kind(),
                    "dtype": {"description": "The data type of the input", "type": "string"},
                    "shape": shape("The size of the input")
                },
                "required": ["type", "dtype", "shape"],
                "additionalProperties": false
            },
            "output": {
                "type": "object",
                "properties": {
                    "shape": shape("The shape of the output")
                },
                "required": ["shape"],
                "additionalProperties": false
            }
        },
        "required": ["input", "output"],
        "additionalProperties": false
    });

    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "Model descriptor",
        "type": "object",
        "properties": {
            "model": {
                "type": "object",
                "properties": {
                    "name": {"type": "string", "minLength": 1},
                    "version": {"type": "integer", "minimum": 1},
                    "backend": {
                        "type": "object",
                        "properties": {
                            "type": {
                                "type": "string",
                                "enum": ["tensorflow", "spark", "sklearn", "pytorch", "onnx"]
                            },
                            "parameters": {}
                        },
                        "if": {"properties": {"type": {"const": "tensorflow"}}},
                        "then": {"properties": {"parameters": labeled_parameters}},
                        "else": {"properties": {"parameters": shaped_parameters}},
                        "required": ["type", "parameters"],
                        "additionalProperties": false
                    },
                    "script": {
                        "type": "object",
                        "properties": {
                            "folder": {"type": "string", "minLength": 1}
                        },
                        "required": ["folder"],
                        "additionalProperties": false
                    }
                },
                "required": ["name", "version", "backend", "script"],
                "additionalProperties": false
            }
        },
        "required": ["model"],
        "additionalProperties": false
    })
});

/// Schema of the create/update request body
pub static CREATE_REQUEST_SCHEMA: Lazy<Value> = Lazy::new(|| {
    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": "Model create request",
        "type": "object",
        "properties": {
            "name": {"type": "string", "minLength": 1},
            "version": {"type": "integer", "minimum": 1},
            "id": {"type": "string", "minLength": 1},
            "async_request": {"type": "boolean"}
        },
        "required": ["name", "version", "id"],
        "additionalProperties": false
    })
});

static DESCRIPTOR_VALIDATOR: Lazy<Validator> = Lazy::new(|| {
    jsonschema::validator_for(&DESCRIPTOR_SCHEMA).expect("descriptor schema is valid")
});

static CREATE_REQUEST_VALIDATOR: Lazy<Validator> = Lazy::new(|| {
    jsonschema::validator_for(&CREATE_REQUEST_SCHEMA).expect("create request schema is valid")
});

fn first_violation(validator: &Validator, instance: &Value) -> Result<(), SchemaViolation> {
    match validator.iter_errors(instance).next() {
        None => Ok(()),
        Some(error) => Err(SchemaViolation {
            path: error.instance_path.to_string(),
            message: error.to_string(),
        }),
    }
}

/// Checks a descriptor document against [`DESCRIPTOR_SCHEMA`].
pub fn validate_descriptor(document: &Value) -> Result<(), SchemaViolation> {
    first_violation(&DESCRIPTOR_VALIDATOR, document)
}

/// Checks a create/update body against [`CREATE_REQUEST_SCHEMA`].
pub fn validate_create_request(body: &Value) -> Result<(), SchemaViolation> {
    first_violation(&CREATE_REQUEST_VALIDATOR, body)
}
