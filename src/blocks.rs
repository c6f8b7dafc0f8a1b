use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::fmt;

use crate::error::BlockError;

// --- Block Type ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockType {
    Header,
    Paragraph,
    List,
    Checklist,
    Code,
}

impl BlockType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockType::Header => "header",
            BlockType::Paragraph => "paragraph",
            BlockType::List => "list",
            BlockType::Checklist => "checklist",
            BlockType::Code => "code",
        }
    }

    pub fn from_str(s: &str) -> Result<Self, BlockError> {
        match s.trim() {
            "header" => Ok(BlockType::Header),
            "paragraph" => Ok(BlockType::Paragraph),
            "list" => Ok(BlockType::List),
            // The editor widget registered its checklist tool under this name
            "checklist" | "checklistTool" => Ok(BlockType::Checklist),
            "code" => Ok(BlockType::Code),
            other => Err(BlockError::UnknownType(other.to_string())),
        }
    }

    pub fn all() -> [BlockType; 5] {
        [
            BlockType::Header,
            BlockType::Paragraph,
            BlockType::List,
            BlockType::Checklist,
            BlockType::Code,
        ]
    }

    /// Empty payload that passes validation for this type.
    pub fn empty_data(&self) -> Value {
        match self {
            BlockType::Header => json!({ "text": "", "level": 2 }),
            BlockType::Paragraph => json!({ "text": "" }),
            BlockType::List => json!({ "style": "unordered", "items": [] }),
            BlockType::Checklist => json!({ "items": [] }),
            BlockType::Code => json!({ "code": "" }),
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for BlockType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BlockType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        BlockType::from_str(&s).map_err(serde::de::Error::custom)
    }
}

// --- Data Types ---

/// One typed unit of document content.
///
/// `data` is kept as raw JSON so fields this core does not know about
/// survive a load/save round trip untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub id: String,
    #[serde(rename = "type")]
    pub block_type: BlockType,
    #[serde(default = "empty_object")]
    pub data: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl Block {
    pub fn new(id: impl Into<String>, block_type: BlockType, data: Value) -> Self {
        Self {
            id: id.into(),
            block_type,
            data,
        }
    }

    pub fn header(id: impl Into<String>, text: impl Into<String>, level: u8) -> Self {
        Self::new(
            id,
            BlockType::Header,
            json!({ "text": text.into(), "level": level }),
        )
    }

    pub fn paragraph(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, BlockType::Paragraph, json!({ "text": text.into() }))
    }

    pub fn code(id: impl Into<String>, code: impl Into<String>) -> Self {
        Self::new(id, BlockType::Code, json!({ "code": code.into() }))
    }

    pub fn checklist(id: impl Into<String>, items: &[(&str, bool)]) -> Self {
        let items: Vec<Value> = items
            .iter()
            .map(|(text, checked)| json!({ "text": text, "checked": checked }))
            .collect();
        Self::new(id, BlockType::Checklist, json!({ "items": items }))
    }

    pub fn list(id: impl Into<String>, ordered: bool, items: &[&str]) -> Self {
        let style = if ordered { "ordered" } else { "unordered" };
        Self::new(
            id,
            BlockType::List,
            json!({ "style": style, "items": items }),
        )
    }

    /// Plain text of the block, used for previews.
    pub fn plain_text(&self) -> String {
        match self.block_type {
            BlockType::Header | BlockType::Paragraph => str_field(&self.data, "text")
                .unwrap_or_default()
                .to_string(),
            BlockType::Code => str_field(&self.data, "code").unwrap_or_default().to_string(),
            BlockType::List => item_texts(&self.data, "content").join(" "),
            BlockType::Checklist => item_texts(&self.data, "text").join(" "),
        }
    }
}

/// A stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

/// Entry of the page list. The server may omit blocks here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSummary {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<Block>>,
}

impl From<Page> for PageSummary {
    fn from(page: Page) -> Self {
        Self {
            id: page.id,
            title: page.title,
            blocks: Some(page.blocks),
        }
    }
}

// --- Validation ---

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<BlockError>,
    pub warnings: Vec<String>,
}

fn str_field<'a>(data: &'a Value, key: &str) -> Option<&'a str> {
    data.get(key).and_then(|v| v.as_str())
}

fn item_texts(data: &Value, key: &str) -> Vec<String> {
    data.get("items")
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(_) => str_field(item, key).map(|s| s.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn invalid(block: &Block, reason: impl Into<String>) -> BlockError {
    BlockError::InvalidData {
        id: block.id.clone(),
        block_type: block.block_type,
        reason: reason.into(),
    }
}

fn require_str(block: &Block, key: &str) -> Result<(), BlockError> {
    match block.data.get(key) {
        Some(Value::String(_)) => Ok(()),
        Some(_) => Err(invalid(block, format!("'{}' must be a string", key))),
        None => Err(invalid(block, format!("missing '{}'", key))),
    }
}

fn optional_str(block: &Block, key: &str) -> Result<(), BlockError> {
    match block.data.get(key) {
        None | Some(Value::Null) | Some(Value::String(_)) => Ok(()),
        Some(_) => Err(invalid(block, format!("'{}' must be a string", key))),
    }
}

fn require_items(block: &Block) -> Result<&Vec<Value>, BlockError> {
    match block.data.get("items") {
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(invalid(block, "'items' must be an array")),
        None => Err(invalid(block, "missing 'items'")),
    }
}

/// Check a single block's payload against the shape of its type.
pub fn validate_block(block: &Block) -> Result<(), BlockError> {
    if block.id.trim().is_empty() {
        return Err(BlockError::EmptyId);
    }
    if !block.data.is_object() {
        return Err(invalid(block, "data must be an object"));
    }

    match block.block_type {
        BlockType::Header => {
            require_str(block, "text")?;
            if let Some(level) = block.data.get("level") {
                match level.as_u64() {
                    Some(1..=6) => {}
                    _ => return Err(invalid(block, "'level' must be an integer from 1 to 6")),
                }
            }
        }
        BlockType::Paragraph => require_str(block, "text")?,
        BlockType::List => {
            match str_field(&block.data, "style") {
                None | Some("ordered") | Some("unordered") => {}
                Some(other) => {
                    return Err(invalid(
                        block,
                        format!("unknown list style '{}'", other),
                    ))
                }
            }
            for (i, item) in require_items(block)?.iter().enumerate() {
                let ok = match item {
                    Value::String(_) => true,
                    Value::Object(_) => item.get("content").map_or(false, |c| c.is_string()),
                    _ => false,
                };
                if !ok {
                    return Err(invalid(
                        block,
                        format!("list item {} must be a string or have 'content'", i),
                    ));
                }
            }
        }
        BlockType::Checklist => {
            for (i, item) in require_items(block)?.iter().enumerate() {
                if !item.get("text").map_or(false, |t| t.is_string()) {
                    return Err(invalid(
                        block,
                        format!("checklist item {} requires a 'text' string", i),
                    ));
                }
                if let Some(checked) = item.get("checked") {
                    if !checked.is_boolean() {
                        return Err(invalid(
                            block,
                            format!("checklist item {} 'checked' must be a boolean", i),
                        ));
                    }
                }
            }
        }
        BlockType::Code => {
            require_str(block, "code")?;
            optional_str(block, "language")?;
        }
    }

    Ok(())
}

/// Validate a whole document: every block's shape plus id uniqueness.
pub fn validate_blocks(blocks: &[Block]) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    let mut seen = HashSet::new();

    for block in blocks {
        if let Err(e) = validate_block(block) {
            errors.push(e);
        }
        if !block.id.is_empty() && !seen.insert(block.id.as_str()) {
            errors.push(BlockError::DuplicateId(block.id.clone()));
        }
        if matches!(block.block_type, BlockType::Header | BlockType::Paragraph)
            && str_field(&block.data, "text").map_or(false, |t| t.trim().is_empty())
        {
            warnings.push(format!("Block '{}' has no text", block.id));
        }
    }

    ValidationReport {
        valid: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Structural equality of two block sequences: same ids, types and data in
/// the same order.
pub fn blocks_equal(a: &[Block], b: &[Block]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.id == y.id && x.block_type == y.block_type && x.data == y.data
        })
}

/// First line of body text, for list cards.
pub fn page_preview(blocks: &[Block]) -> String {
    blocks
        .iter()
        .filter(|b| b.block_type != BlockType::Header)
        .map(|b| b.plain_text())
        .find(|t| !t.trim().is_empty())
        .map(|t| t.trim().chars().take(100).collect())
        .unwrap_or_default()
}
