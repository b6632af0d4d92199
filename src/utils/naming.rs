// pixie-batch/src/utils/naming.rs
use crate::core::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OcrRecord {
    #[serde(rename = "X", default)]
    pub positions: Vec<f64>,
    /// Everything else the OCR pass recorded; carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl OcrRecord {
    pub fn with_positions(positions: Vec<f64>) -> Self {
        Self {
            positions,
            extra: BTreeMap::new(),
        }
    }
}

pub type SideChannel = HashMap<String, OcrRecord>;

pub fn load_side_channel(path: &Path) -> Result<SideChannel> {
    let content = std::fs::read_to_string(path)?;
    parse_side_channel(&content)
}

pub fn parse_side_channel(json: &str) -> Result<SideChannel> {
    Ok(serde_json::from_str(json)?)
}

pub fn ocr_prefix(side_channel: Option<&SideChannel>, stem: &str) -> String {
    let Some(record) = side_channel.and_then(|side| side.get(stem)) else {
        return String::new();
    };

    match record.positions.as_slice() {
        [first, second, ..] => format!("{}_{}_", first, second),
        _ => String::new(),
    }
}

/// `<prefix?><stem>.<extension>`, keeping the extension exactly as found.
pub fn output_file_name(stem: &str, extension: &str, side_channel: Option<&SideChannel>) -> String {
    let prefix = ocr_prefix(side_channel, stem);
    if extension.is_empty() {
        format!("{}{}", prefix, stem)
    } else {
        format!("{}{}.{}", prefix, stem, extension)
    }
}
