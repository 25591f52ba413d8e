//! Layer 5: Document text form
//!
//! `as_string` emits a deterministic JSON object: `_id` first, the
//! remaining keys in ascending order, and revision-keyed maps as objects
//! whose keys appear in descending stable order. `from_string` is the exact
//! inverse and seals the parsed document.

use serde_json::Value;

use super::document::{DocValue, NodeDocument, RevisionMap};
use super::error::MalformedDocument;
use super::path::DocId;
use super::revision::Revision;

impl NodeDocument {
    pub fn as_string(&self) -> String {
        let mut out = String::with_capacity(256);
        out.push('{');
        write_json_str(&mut out, "_id");
        out.push(':');
        write_json_str(&mut out, self.id().as_str());
        for (key, value) in self.data() {
            out.push(',');
            write_json_str(&mut out, key);
            out.push(':');
            write_value(&mut out, value);
        }
        out.push('}');
        out
    }

    pub fn from_string(s: &str) -> Result<NodeDocument, MalformedDocument> {
        let parsed: Value = serde_json::from_str(s)
            .map_err(|e| MalformedDocument::new(format!("invalid json: {e}")))?;
        let Value::Object(entries) = parsed else {
            return Err(MalformedDocument::new("document is not an object"));
        };
        let mut id = None;
        let mut data = Vec::new();
        for (key, value) in entries {
            if key == "_id" {
                let Value::String(raw) = value else {
                    return Err(MalformedDocument::new("_id is not a string"));
                };
                id = Some(DocId::parse(raw)?);
            } else {
                let parsed_value = parse_value(&key, value)?;
                data.push((key, parsed_value));
            }
        }
        let id = id.ok_or_else(|| MalformedDocument::new("missing _id"))?;
        let mut doc = NodeDocument::new(id);
        for (key, value) in data {
            doc.put(key, value);
        }
        doc.seal();
        Ok(doc)
    }

    /// The serialized size in bytes; the quantity the split thresholds are
    /// defined over.
    pub fn serialized_size(&self) -> usize {
        self.as_string().len()
    }
}

fn write_value(out: &mut String, value: &DocValue) {
    match value {
        DocValue::Bool(v) => out.push_str(if *v { "true" } else { "false" }),
        DocValue::Long(v) => out.push_str(&v.to_string()),
        DocValue::String(v) => write_json_str(out, v),
        DocValue::Map(map) => write_map(out, map),
    }
}

fn write_map(out: &mut String, map: &RevisionMap) {
    out.push('{');
    for (i, (rev, value)) in map.iter().rev().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_json_str(out, &rev.to_string());
        out.push(':');
        write_json_str(out, value);
    }
    out.push('}');
}

fn write_json_str(out: &mut String, s: &str) {
    let escaped = serde_json::to_string(s).expect("string serialization cannot fail");
    out.push_str(&escaped);
}

fn parse_value(key: &str, value: Value) -> Result<DocValue, MalformedDocument> {
    match value {
        Value::Bool(v) => Ok(DocValue::Bool(v)),
        Value::String(v) => Ok(DocValue::String(v)),
        Value::Number(n) => n
            .as_i64()
            .map(DocValue::Long)
            .ok_or_else(|| MalformedDocument::new(format!("key `{key}` holds a non-integer"))),
        Value::Object(entries) => {
            let mut map = RevisionMap::new();
            for (raw, v) in entries {
                let rev: Revision = raw.parse().map_err(|e| {
                    MalformedDocument::new(format!("key `{key}` has a bad revision: {e}"))
                })?;
                let value = match v {
                    Value::String(s) => s,
                    // a removed property is stored as the empty string
                    Value::Null => String::new(),
                    other => {
                        return Err(MalformedDocument::new(format!(
                            "key `{key}` entry {rev} holds {other}"
                        )))
                    }
                };
                map.insert(rev, value);
            }
            Ok(DocValue::Map(map))
        }
        other => Err(MalformedDocument::new(format!(
            "key `{key}` holds unsupported value {other}"
        ))),
    }
}
