use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, GraphResult};
use crate::model::{Parameters, Scalar, StreamType, Typing};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FilterOption {
    pub name: String,
    #[serde(rename = "type", default = "default_option_type")]
    pub option_type: String, // string, int, float, boolean, ...
    #[serde(default)]
    pub default: Option<Scalar>,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_option_type() -> String {
    "string".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct FilterDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub stream_typings_input: Vec<Typing>,
    #[serde(default)]
    pub stream_typings_output: Vec<Typing>,
    #[serde(default)]
    pub formula_typings_input: Option<String>,
    #[serde(default)]
    pub formula_typings_output: Option<String>,
    #[serde(default)]
    pub options: Vec<FilterOption>,
}

impl FilterDefinition {
    /// Arity depends on parameters when either direction has a formula.
    pub fn is_dynamic(&self) -> bool {
        self.formula_typings_input.is_some() || self.formula_typings_output.is_some()
    }

    pub fn static_inputs(&self) -> Vec<StreamType> {
        self.stream_typings_input.iter().map(|t| t.stream_type).collect()
    }

    pub fn static_outputs(&self) -> Vec<StreamType> {
        self.stream_typings_output.iter().map(|t| t.stream_type).collect()
    }

    pub fn default_parameters(&self) -> Parameters {
        self.options
            .iter()
            .filter_map(|opt| opt.default.clone().map(|d| (opt.name.clone(), d)))
            .collect()
    }

    /// Catalog defaults overlaid with `supplied`.
    pub fn merged_parameters(&self, supplied: &Parameters) -> Parameters {
        let mut merged = self.default_parameters();
        merged.extend(supplied.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct FilterCatalog {
    pub filters: Vec<FilterDefinition>,
}

impl FilterCatalog {
    pub fn new(filters: Vec<FilterDefinition>) -> Self {
        Self { filters }
    }

    pub fn get(&self, name: &str) -> Option<&FilterDefinition> {
        self.filters.iter().find(|f| f.name == name)
    }

    pub fn require(&self, name: &str) -> GraphResult<&FilterDefinition> {
        self.get(name)
            .ok_or_else(|| GraphError::FilterNotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FilterDefinition> {
        self.filters.iter()
    }

    /// Parses a catalog document: either a bare list of definitions or an
    /// object with a `filters` list. YAML is a superset of JSON, so both work.
    pub fn load(content: &str) -> GraphResult<Self> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Document {
            List(Vec<FilterDefinition>),
            Wrapped(FilterCatalog),
        }

        let doc: Document = serde_yaml::from_str(content)
            .map_err(|e| GraphError::Other(anyhow::anyhow!("invalid filter catalog: {}", e)))?;
        Ok(match doc {
            Document::List(filters) => Self::new(filters),
            Document::Wrapped(catalog) => catalog,
        })
    }

    pub fn from_file(path: &Path) -> GraphResult<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading filter catalog {}", path.display()))?;
        Self::load(&content)
    }

    pub fn builtin() -> Self {
        let video = || Typing::from(StreamType::Video);
        let audio = || Typing::from(StreamType::Audio);

        Self::new(vec![
            // --- Video ---
            FilterDefinition {
                name: "scale".to_string(),
                description: "Scale the input video size".to_string(),
                stream_typings_input: vec![video()],
                stream_typings_output: vec![video()],
                formula_typings_input: None,
                formula_typings_output: None,
                options: vec![
                    option("w", "string", Some("iw".into()), "Output video width"),
                    option("h", "string", Some("ih".into()), "Output video height"),
                ],
            },
            FilterDefinition {
                name: "crop".to_string(),
                description: "Crop the input video".to_string(),
                stream_typings_input: vec![video()],
                stream_typings_output: vec![video()],
                formula_typings_input: None,
                formula_typings_output: None,
                options: vec![
                    option("w", "string", Some("iw".into()), "Width of the output rectangle"),
                    option("h", "string", Some("ih".into()), "Height of the output rectangle"),
                    option("x", "string", None, "Horizontal offset"),
                    option("y", "string", None, "Vertical offset"),
                ],
            },
            FilterDefinition {
                name: "overlay".to_string(),
                description: "Overlay a video source on top of the input".to_string(),
                stream_typings_input: vec![video(), video()],
                stream_typings_output: vec![video()],
                formula_typings_input: None,
                formula_typings_output: None,
                options: vec![
                    option("x", "string", Some("0".into()), "Overlay x position"),
                    option("y", "string", Some("0".into()), "Overlay y position"),
                ],
            },
            FilterDefinition {
                name: "hstack".to_string(),
                description: "Stack video inputs horizontally".to_string(),
                stream_typings_input: vec![video(), video()],
                stream_typings_output: vec![video()],
                formula_typings_input: Some(
                    "Array.from({length: Number(inputs)}, () => ({type: 'video'}))".to_string(),
                ),
                formula_typings_output: Some("[{type: 'video'}]".to_string()),
                options: vec![option("inputs", "int", Some(2.into()), "Number of inputs")],
            },
            FilterDefinition {
                name: "split".to_string(),
                description: "Pass on the input video to N outputs".to_string(),
                stream_typings_input: vec![video()],
                stream_typings_output: vec![video(), video()],
                formula_typings_input: Some("[{type: 'video'}]".to_string()),
                formula_typings_output: Some(
                    "Array.from({length: Number(outputs)}, () => ({type: 'video'}))".to_string(),
                ),
                options: vec![option("outputs", "int", Some(2.into()), "Number of outputs")],
            },
            FilterDefinition {
                name: "concat".to_string(),
                description: "Concatenate audio and video streams".to_string(),
                stream_typings_input: vec![video(), video()],
                stream_typings_output: vec![video()],
                formula_typings_input: Some(
                    "Array.from({length: Number(n) * (Number(v) + Number(a))}, (_, i) => \
                     ({type: i % (Number(v) + Number(a)) < Number(v) ? 'video' : 'audio'}))"
                        .to_string(),
                ),
                formula_typings_output: Some(
                    "Array.from({length: Number(v) + Number(a)}, (_, i) => \
                     ({type: i < Number(v) ? 'video' : 'audio'}))"
                        .to_string(),
                ),
                options: vec![
                    option("n", "int", Some(2.into()), "Number of segments"),
                    option("v", "int", Some(1.into()), "Video streams per segment"),
                    option("a", "int", Some(0.into()), "Audio streams per segment"),
                ],
            },
            // --- Audio ---
            FilterDefinition {
                name: "volume".to_string(),
                description: "Change input volume".to_string(),
                stream_typings_input: vec![audio()],
                stream_typings_output: vec![audio()],
                formula_typings_input: None,
                formula_typings_output: None,
                options: vec![option("volume", "string", Some("1.0".into()), "Volume expression")],
            },
            FilterDefinition {
                name: "amix".to_string(),
                description: "Audio mixing".to_string(),
                stream_typings_input: vec![audio(), audio()],
                stream_typings_output: vec![audio()],
                formula_typings_input: Some(
                    "Array.from({length: Number(inputs)}, () => ({type: 'audio'}))".to_string(),
                ),
                formula_typings_output: Some("[{type: 'audio'}]".to_string()),
                options: vec![option("inputs", "int", Some(2.into()), "Number of inputs")],
            },
            FilterDefinition {
                name: "showwaves".to_string(),
                description: "Convert input audio to a video output".to_string(),
                stream_typings_input: vec![audio()],
                stream_typings_output: vec![video()],
                formula_typings_input: None,
                formula_typings_output: None,
                options: vec![option("s", "string", Some("600x240".into()), "Video size")],
            },
        ])
    }
}

fn option(name: &str, option_type: &str, default: Option<Scalar>, description: &str) -> FilterOption {
    FilterOption {
        name: name.to_string(),
        option_type: option_type.to_string(),
        default,
        description: Some(description.to_string()),
    }
}
