//! Fragment selection: builds the selection document for a set of JSON
//! Pointers, preserving the path skeleton (`@context`, `id`, `type`, array
//! positions) so the selection canonicalizes to a subset of the source
//! document's statements.

use crate::disclosure::pointer::{JsonPointer, PointerToken};
use crate::disclosure::SelectionError;
use serde_json::{Map, Value};

/// Builds the selection for `pointers` over `doc`. Every pointer must
/// resolve; the merged result contains the full sub-tree at each pointer's
/// leaf plus the connective skeleton.
pub fn select_fragments(doc: &Value, pointers: &[JsonPointer]) -> Result<Value, SelectionError> {
    let source = match doc {
        Value::Object(map) => map,
        _ => return Err(SelectionError::PointerNotEvaluable(String::new())),
    };

    let mut root = Map::new();
    // The root context travels verbatim with every selection, and the
    // root type is part of the connective skeleton.
    if let Some(context) = source.get("@context") {
        root.insert("@context".to_string(), context.clone());
    }
    if let Some(doc_type) = source.get("type") {
        root.insert("type".to_string(), doc_type.clone());
    }
    let mut selection = Value::Object(root);

    for pointer in pointers {
        if pointer.is_root() {
            select_root(source, &mut selection);
            continue;
        }
        select_path(doc, pointer, &mut selection)?;
    }
    Ok(selection)
}

/// The empty pointer selects the document skeleton: `@context`, `id` when
/// it is a non-blank identifier, and `type`.
fn select_root(source: &Map<String, Value>, selection: &mut Value) {
    let Value::Object(out) = selection else {
        return;
    };
    if let Some(Value::String(id)) = source.get("id") {
        if !id.is_empty() && !id.starts_with("_:") {
            out.insert("id".to_string(), Value::String(id.clone()));
        }
    }
}

fn select_path(
    doc: &Value,
    pointer: &JsonPointer,
    selection: &mut Value,
) -> Result<(), SelectionError> {
    let not_evaluable = || SelectionError::PointerNotEvaluable(pointer.as_str().to_string());

    let mut source = doc;
    let mut cursor = selection;
    let tokens = pointer.tokens();
    for (i, token) in tokens.iter().enumerate() {
        let last = i == tokens.len() - 1;
        match token {
            PointerToken::Member(name) => {
                let next_source = source
                    .as_object()
                    .and_then(|map| map.get(name))
                    .ok_or_else(not_evaluable)?;
                let map = match cursor {
                    Value::Object(map) => map,
                    _ => return Err(not_evaluable()),
                };
                if last {
                    map.insert(name.clone(), next_source.clone());
                    return Ok(());
                }
                let entry = map
                    .entry(name.clone())
                    .or_insert_with(|| skeleton_of(next_source));
                if entry.is_null() {
                    *entry = skeleton_of(next_source);
                }
                source = next_source;
                cursor = entry;
            }
            PointerToken::Index(index) => {
                let next_source = source
                    .as_array()
                    .and_then(|items| items.get(*index))
                    .ok_or_else(not_evaluable)?;
                let items = match cursor {
                    Value::Array(items) => items,
                    _ => return Err(not_evaluable()),
                };
                // Positions carry meaning; unselected slots pad as null.
                if items.len() <= *index {
                    items.resize(*index + 1, Value::Null);
                }
                if last {
                    items[*index] = next_source.clone();
                    return Ok(());
                }
                if items[*index].is_null() {
                    items[*index] = skeleton_of(next_source);
                }
                source = next_source;
                cursor = &mut items[*index];
            }
        }
    }
    Ok(())
}

/// The skeletal stand-in for an object on the way to a leaf: its `id` and
/// `type` if present. Arrays skeletonize empty; scalars never sit on a
/// non-leaf position of a resolvable pointer.
fn skeleton_of(source: &Value) -> Value {
    match source {
        Value::Object(map) => {
            let mut skeleton = Map::new();
            for key in ["id", "type"] {
                if let Some(value) = map.get(key) {
                    skeleton.insert(key.to_string(), value.clone());
                }
            }
            Value::Object(skeleton)
        }
        Value::Array(_) => Value::Array(Vec::new()),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn credential() -> Value {
        json!({
            "@context": [
                "https://www.w3.org/ns/credentials/v2",
                "https://www.w3.org/ns/credentials/examples/v2"
            ],
            "id": "urn:uuid:test-credential-123",
            "type": ["VerifiableCredential", "TestCredential"],
            "issuer": {"id": "did:example:issuer", "name": "Test Issuer Organization"},
            "validFrom": "2024-01-01T00:00:00Z",
            "credentialSubject": {
                "id": "did:example:subject",
                "type": "Person",
                "givenName": "Alice",
                "familyName": "Smith",
                "birthDate": "1990-05-15"
            }
        })
    }

    fn keys(value: &Value) -> Vec<&str> {
        value
            .as_object()
            .map(|m| m.keys().map(|k| k.as_str()).collect())
            .unwrap_or_default()
    }

    #[test]
    fn root_pointer_selects_the_skeleton() {
        let doc = credential();
        let selection = select_fragments(&doc, &[JsonPointer::root()]).unwrap();
        let mut root_keys = keys(&selection);
        root_keys.sort_unstable();
        assert_eq!(root_keys, vec!["@context", "id", "type"]);
        assert_eq!(selection["@context"], doc["@context"]);
        assert_eq!(selection["id"], doc["id"]);
        assert_eq!(selection["type"], doc["type"]);
    }

    #[test]
    fn merged_pointers_share_the_skeleton() {
        let doc = credential();
        let pointers = [
            JsonPointer::parse("/issuer").unwrap(),
            JsonPointer::parse("/validFrom").unwrap(),
            JsonPointer::parse("/credentialSubject/givenName").unwrap(),
        ];
        let selection = select_fragments(&doc, &pointers).unwrap();

        let mut root_keys = keys(&selection);
        root_keys.sort_unstable();
        assert_eq!(
            root_keys,
            vec!["@context", "credentialSubject", "issuer", "type", "validFrom"]
        );

        let subject = &selection["credentialSubject"];
        let mut subject_keys = keys(subject);
        subject_keys.sort_unstable();
        assert_eq!(subject_keys, vec!["givenName", "id", "type"]);
        assert_eq!(subject["givenName"], json!("Alice"));

        // The issuer leaf is the whole sub-tree.
        assert_eq!(selection["issuer"], doc["issuer"]);
        assert_eq!(selection["validFrom"], json!("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn array_positions_are_preserved() {
        let doc = json!({
            "type": "List",
            "entries": [
                {"id": "e0", "value": 0},
                {"id": "e1", "value": 1},
                {"id": "e2", "value": 2}
            ]
        });
        let pointers = [JsonPointer::parse("/entries/2/value").unwrap()];
        let selection = select_fragments(&doc, &pointers).unwrap();
        let entries = selection["entries"].as_array().unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].is_null());
        assert!(entries[1].is_null());
        assert_eq!(entries[2], json!({"id": "e2", "value": 2}));
    }

    #[test]
    fn unresolvable_pointer_is_an_error() {
        let doc = credential();
        let pointers = [JsonPointer::parse("/credentialSubject/missing").unwrap()];
        let err = select_fragments(&doc, &pointers).unwrap_err();
        assert!(matches!(
            err,
            SelectionError::PointerNotEvaluable(p) if p == "/credentialSubject/missing"
        ));
    }

    #[test]
    fn leaf_then_deeper_pointer_keeps_the_full_subtree() {
        let doc = credential();
        let pointers = [
            JsonPointer::parse("/credentialSubject").unwrap(),
            JsonPointer::parse("/credentialSubject/givenName").unwrap(),
        ];
        let selection = select_fragments(&doc, &pointers).unwrap();
        assert_eq!(selection["credentialSubject"], doc["credentialSubject"]);
    }
}
