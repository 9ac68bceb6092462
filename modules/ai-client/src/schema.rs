use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Trait for types usable as OpenAI structured output.
///
/// Automatically implemented for any `JsonSchema + DeserializeOwned` type.
pub trait StructuredOutput: JsonSchema + DeserializeOwned {
    /// Generate an OpenAI-compatible JSON schema for this type.
    ///
    /// The strict decoder rejects what schemars emits by default: it wants
    /// `additionalProperties: false` on every object, every property listed
    /// in `required` (nullable ones included), and no `$ref` indirection.
    fn openai_schema() -> Value {
        let mut root = serde_json::to_value(schema_for!(Self)).unwrap_or_default();

        // Pull the definitions table out of the document before walking it,
        // so refs resolve against it and the table itself never ships.
        let definitions = match &mut root {
            Value::Object(map) => {
                map.remove("$schema");
                match map.remove("definitions") {
                    Some(Value::Object(defs)) => defs,
                    _ => Map::new(),
                }
            }
            _ => Map::new(),
        };

        conform(&mut root, &definitions);
        root
    }

    fn type_name() -> String {
        <Self as JsonSchema>::schema_name()
    }
}

impl<T: JsonSchema + DeserializeOwned> StructuredOutput for T {}

/// One depth-first pass: substitute `$ref`s and single-branch `allOf`
/// wrappers in place, then pin down whatever concrete schema remains.
fn conform(schema: &mut Value, definitions: &Map<String, Value>) {
    // A ref can point at another ref (or an allOf wrapping one), so chase
    // the indirection until the node is concrete.
    while let Some(resolved) = resolve_indirection(schema, definitions) {
        *schema = resolved;
    }

    match schema {
        Value::Object(map) => {
            if map.get("type").and_then(Value::as_str) == Some("object") {
                map.insert("additionalProperties".to_string(), Value::Bool(false));

                let property_names: Vec<Value> = map
                    .get("properties")
                    .and_then(Value::as_object)
                    .map(|props| props.keys().cloned().map(Value::String).collect())
                    .unwrap_or_default();
                if !property_names.is_empty() {
                    map.insert("required".to_string(), Value::Array(property_names));
                }
            }

            for child in map.values_mut() {
                conform(child, definitions);
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                conform(item, definitions);
            }
        }
        _ => {}
    }
}

/// If this node is a `$ref` into the definitions table, or an `allOf` with
/// exactly one branch, return what it should be replaced with.
fn resolve_indirection(schema: &Value, definitions: &Map<String, Value>) -> Option<Value> {
    let map = schema.as_object()?;

    if let Some(target) = map.get("$ref").and_then(Value::as_str) {
        let name = target.strip_prefix("#/definitions/")?;
        return definitions.get(name).cloned();
    }

    if let Some(Value::Array(branches)) = map.get("allOf") {
        if branches.len() == 1 {
            return Some(branches[0].clone());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Deserialize, JsonSchema)]
    struct Verdict {
        is_spam: bool,
        notes: Option<String>,
    }

    #[derive(Deserialize, JsonSchema)]
    struct Wrapper {
        verdicts: Vec<Verdict>,
    }

    #[derive(Deserialize, JsonSchema)]
    struct Nested {
        primary: Verdict,
        label: String,
    }

    #[test]
    fn objects_get_additional_properties_false() {
        let schema = Verdict::openai_schema();
        assert_eq!(
            schema.get("additionalProperties"),
            Some(&Value::Bool(false))
        );
    }

    #[test]
    fn nullable_fields_are_still_required() {
        let schema = Verdict::openai_schema();
        let required: Vec<&str> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"is_spam"));
        assert!(required.contains(&"notes"));
    }

    #[test]
    fn definitions_are_resolved_and_stripped() {
        let schema = Wrapper::openai_schema();
        let text = serde_json::to_string(&schema).unwrap();
        assert!(!text.contains("$ref"));
        assert!(!schema.as_object().unwrap().contains_key("definitions"));
        assert!(!schema.as_object().unwrap().contains_key("$schema"));
    }

    #[test]
    fn nested_struct_fields_are_pinned_after_resolution() {
        let schema = Nested::openai_schema();
        let primary = &schema["properties"]["primary"];
        assert_eq!(primary["type"], Value::String("object".to_string()));
        assert_eq!(primary["additionalProperties"], Value::Bool(false));
        let required = primary["required"].as_array().unwrap();
        assert_eq!(required.len(), 2);
    }

    #[test]
    fn single_branch_all_of_collapses() {
        let definitions = Map::new();
        let mut schema = serde_json::json!({
            "allOf": [{ "type": "string" }]
        });
        conform(&mut schema, &definitions);
        assert_eq!(schema, serde_json::json!({ "type": "string" }));
    }

    #[test]
    fn ref_chains_resolve_to_the_concrete_schema() {
        let mut definitions = Map::new();
        definitions.insert(
            "Inner".to_string(),
            serde_json::json!({ "type": "integer" }),
        );
        definitions.insert(
            "Outer".to_string(),
            serde_json::json!({ "$ref": "#/definitions/Inner" }),
        );

        let mut schema = serde_json::json!({ "$ref": "#/definitions/Outer" });
        conform(&mut schema, &definitions);
        assert_eq!(schema, serde_json::json!({ "type": "integer" }));
    }
}
