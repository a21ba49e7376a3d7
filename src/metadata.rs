// Model metadata and its delimited string form:
//
//   name: yolo; io_wrapper: darknet; input_width: 416; input_height: 416;
//   class_ids: 0=person,1=car; model_id: m-17; description: any text
//
// Fields are separated by `;` or new lines. `description` goes last and
// takes the rest of the text, separators included.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ClassinetError;

const DESCRIPTION: &str = "description:";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelMetadata {
    pub name: String,
    #[serde(default)]
    pub io_wrapper: String,
    pub input_width: u32,
    pub input_height: u32,
    #[serde(default)]
    pub class_ids: BTreeMap<u32, String>,
    /// Assigned by the service on registration; ignored when sent.
    #[serde(default)]
    pub model_id: String,
    #[serde(default)]
    pub description: String,
}

impl fmt::Display for ModelMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let class_ids: Vec<String> = self
            .class_ids
            .iter()
            .map(|(id, class)| format!("{}={}", id, class))
            .collect();
        write!(
            f,
            "name: {}; io_wrapper: {}; input_width: {}; input_height: {}; class_ids: {}; model_id: {}; {} {}",
            self.name,
            self.io_wrapper,
            self.input_width,
            self.input_height,
            class_ids.join(","),
            self.model_id,
            DESCRIPTION,
            self.description
        )
    }
}

fn invalid(message: String) -> ClassinetError {
    ClassinetError::InvalidArgument(message)
}

fn parse_number(field: &str, value: &str) -> Result<u32, ClassinetError> {
    value
        .parse()
        .map_err(|_| invalid(format!("{} must be a number, got '{}'", field, value)))
}

fn parse_class_ids(value: &str) -> Result<BTreeMap<u32, String>, ClassinetError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (id, class) = pair
                .split_once('=')
                .ok_or_else(|| invalid(format!("class_ids entry '{}' is not id=name", pair)))?;
            Ok((parse_number("class id", id.trim())?, class.trim().to_string()))
        })
        .collect()
}

impl FromStr for ModelMetadata {
    type Err = ClassinetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (fields, description) = match s.find(DESCRIPTION) {
            Some(at) => (&s[..at], s[at + DESCRIPTION.len()..].trim()),
            None => (s, ""),
        };

        let mut metadata = ModelMetadata {
            description: description.to_string(),
            ..Default::default()
        };
        let (mut width, mut height) = (None, None);

        for field in fields.split(|c: char| c == ';' || c == '\n').map(str::trim) {
            if field.is_empty() {
                continue;
            }
            let (key, value) = field
                .split_once(':')
                .ok_or_else(|| invalid(format!("metadata field '{}' has no value", field)))?;
            let value = value.trim();
            match key.trim() {
                "name" => metadata.name = value.to_string(),
                "io_wrapper" => metadata.io_wrapper = value.to_string(),
                "input_width" => width = Some(parse_number("input_width", value)?),
                "input_height" => height = Some(parse_number("input_height", value)?),
                "class_ids" => metadata.class_ids = parse_class_ids(value)?,
                "model_id" => metadata.model_id = value.to_string(),
                other => log::debug!("Ignoring unknown metadata field {}", other),
            }
        }

        if metadata.name.is_empty() {
            return Err(invalid("metadata is missing name".into()));
        }
        metadata.input_width = width.ok_or_else(|| invalid("metadata is missing input_width".into()))?;
        metadata.input_height =
            height.ok_or_else(|| invalid("metadata is missing input_height".into()))?;
        Ok(metadata)
    }
}
