use serde::{Deserialize, Serialize};
use serde_json::ser::Formatter;
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::path::Path;
use tracing::{debug, info};

use crate::error::DatasetError;

/// One labelled example. Entries without a dialogue still count for
/// positional lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetEntry {
    #[serde(default, alias = "dialog", skip_serializing_if = "Option::is_none")]
    pub dialogue: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_command: Option<bool>,
}

const DIALOGUE_FIELDS: [&str; 2] = ["dialogue", "dialog"];

/// Key a dialogue the way prompts built from it are serialized:
/// compact JSON of `{"dialogue": [...]}`, field order as in the dataset.
pub fn canonical_dialogue_key(dialogue: &Value) -> String {
    wrap(DIALOGUE_FIELDS[0], dialogue).to_string()
}

/// Every serialization of a dialogue that counts as an exact match: both
/// field spellings, compact or with `", "` / `": "` separators.
pub fn dialogue_keys(dialogue: &Value) -> Vec<String> {
    let mut keys = vec![canonical_dialogue_key(dialogue)];
    for field in DIALOGUE_FIELDS {
        let wrapped = wrap(field, dialogue);
        if field != DIALOGUE_FIELDS[0] {
            keys.push(wrapped.to_string());
        }
        keys.extend(to_spaced_string(&wrapped));
    }
    keys
}

fn wrap(field: &str, dialogue: &Value) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(field.to_string(), dialogue.clone());
    Value::Object(map)
}

/// Single-line JSON with a space after every `,` and `:`.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

fn to_spaced_string(value: &Value) -> Option<String> {
    let mut out = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut out, SpacedFormatter);
    value.serialize(&mut ser).ok()?;
    String::from_utf8(out).ok()
}

/// Pull the dialogue out of prompt content, accepting either field spelling.
pub fn dialogue_of(content: &str) -> Option<Value> {
    let value: Value = serde_json::from_str(content.trim()).ok()?;
    let obj = value.as_object()?;
    DIALOGUE_FIELDS
        .iter()
        .find_map(|field| obj.get(*field))
        .cloned()
}

/// Reference labels, indexed three ways for the resolver's fallbacks.
#[derive(Debug, Default)]
pub struct ReferenceDataset {
    entries: Vec<DatasetEntry>,
    by_key: HashMap<String, bool>,
    by_structure: Vec<(Value, bool)>,
}

impl ReferenceDataset {
    pub fn from_entries(entries: Vec<DatasetEntry>) -> Self {
        let mut by_key = HashMap::new();
        let mut by_structure = Vec::new();

        for entry in &entries {
            let (Some(dialogue), Some(flag)) = (&entry.dialogue, entry.has_command) else {
                continue;
            };
            // Later duplicates overwrite earlier ones.
            for key in dialogue_keys(dialogue) {
                by_key.insert(key, flag);
            }
            by_structure.retain(|(d, _)| d != dialogue);
            by_structure.push((dialogue.clone(), flag));
        }

        debug!(
            entries = entries.len(),
            indexed = by_structure.len(),
            "Indexed reference dataset"
        );

        Self {
            entries,
            by_key,
            by_structure,
        }
    }

    pub fn load(path: &Path) -> Result<Self, DatasetError> {
        let data = std::fs::read_to_string(path).map_err(|source| DatasetError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let entries: Vec<DatasetEntry> =
            serde_json::from_str(&data).map_err(|source| DatasetError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let dataset = Self::from_entries(entries);
        info!(
            "Loaded reference dataset {} ({} entries, {} label keys)",
            path.display(),
            dataset.len(),
            dataset.indexed_len()
        );
        Ok(dataset)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct labelled dialogues.
    pub fn indexed_len(&self) -> usize {
        self.by_structure.len()
    }

    /// Look up prompt content verbatim against the canonical keys.
    pub fn lookup_exact(&self, content: &str) -> Option<bool> {
        self.by_key.get(content).copied()
    }

    /// Compare the parsed dialogue of `content` with every indexed dialogue,
    /// ignoring whitespace and key order.
    pub fn lookup_structural(&self, content: &str) -> Option<bool> {
        let dialogue = dialogue_of(content)?;
        self.by_structure
            .iter()
            .find(|(d, _)| *d == dialogue)
            .map(|(_, flag)| *flag)
    }

    /// Label of the entry at 1-based `prompt_id`.
    pub fn lookup_position(&self, prompt_id: usize) -> Option<bool> {
        let index = prompt_id.checked_sub(1)?;
        self.entries.get(index)?.has_command
    }
}
