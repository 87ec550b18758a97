//! Annotation templates and the parser registry
//!
//! A template lists landmark groups (label, point count, connectivity). It can
//! be written as YAML (`label: {points, connectivity}` or `label: N`), as the
//! JSON equivalent, or taken from an already annotated landmark file.

use lmio_common::paths::{basename, extname};
use lmio_common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Parses template file content
pub type TemplateParser = fn(&str) -> Result<Template>;

/// Extensions with a registered parser
pub const TEMPLATE_EXTENSIONS: &[&str] = &["yaml", "yml", "json", "ljson"];

/// Look up the parser registered for an extension
pub fn parser_for(ext: &str) -> Option<TemplateParser> {
    match ext {
        "yaml" | "yml" => Some(parse_yaml),
        "json" | "ljson" => Some(parse_json),
        _ => None,
    }
}

/// Template name as derived from its file: last `_`-separated segment of the stem
///
/// `/templates/ibug_face_68.yml` → `68`, `/t/face.yml` → `face`.
pub fn template_name(path: &str) -> String {
    basename(path, true)
        .rsplit('_')
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Fail with a validation error unless the path has a registered parser
pub fn ensure_supported(path: &str) -> Result<TemplateParser> {
    let ext = extname(path);
    parser_for(&ext)
        .ok_or_else(|| Error::Validation(format!("Incorrect extension {} for template", ext)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateGroup {
    pub label: String,
    pub points: usize,
    #[serde(default)]
    pub connectivity: Vec<[usize; 2]>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub groups: Vec<TemplateGroup>,
}

impl Template {
    pub fn point_count(&self) -> usize {
        self.groups.iter().map(|g| g.points).sum()
    }

    /// Serialized form stored in preferences; accepted back by [`Template::from_json`]
    pub fn to_json(&self) -> Value {
        json!(self)
    }

    /// Landmark payload with every point unset, in `dim` dimensions
    pub fn empty_ljson(&self, dim: usize) -> Value {
        let groups: Vec<Value> = self
            .groups
            .iter()
            .map(|g| {
                let landmarks: Vec<Value> = (0..g.points)
                    .map(|_| json!({ "point": vec![Value::Null; dim] }))
                    .collect();
                json!({
                    "label": g.label,
                    "landmarks": landmarks,
                    "connectivity": g.connectivity,
                })
            })
            .collect();

        json!({ "version": 2, "groups": groups })
    }

    /// Build from a JSON value: either the stored form (`groups[].points`) or an
    /// annotated landmark file (`groups[].landmarks`)
    pub fn from_json(value: &Value) -> Result<Self> {
        let groups = value
            .get("groups")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::Parse("Template JSON has no 'groups' array".to_string()))?;

        let groups = groups
            .iter()
            .map(|g| {
                let label = g
                    .get("label")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::Parse("Template group without label".to_string()))?
                    .to_string();

                let points = match (g.get("landmarks"), g.get("points")) {
                    (Some(Value::Array(lms)), _) => lms.len(),
                    (_, Some(n)) => n
                        .as_u64()
                        .map(|n| n as usize)
                        .ok_or_else(|| Error::Parse(format!("Group '{}' has invalid points", label)))?,
                    _ => return Err(Error::Parse(format!("Group '{}' has no points", label))),
                };

                let connectivity = match g.get("connectivity") {
                    Some(Value::Array(edges)) => edges
                        .iter()
                        .map(|e| edge_from_json(e, &label))
                        .collect::<Result<Vec<_>>>()?,
                    _ => Vec::new(),
                };

                Ok(TemplateGroup {
                    label,
                    points,
                    connectivity,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Template { groups })
    }

    fn from_yaml_mapping(mapping: &serde_yaml::Mapping) -> Result<Self> {
        let mut groups = Vec::with_capacity(mapping.len());

        for (key, spec) in mapping {
            let label = key
                .as_str()
                .ok_or_else(|| Error::Parse("Template group labels must be strings".to_string()))?
                .to_string();

            let (points, connectivity) = match spec {
                serde_yaml::Value::Number(n) => (yaml_count(n, &label)?, Vec::new()),
                serde_yaml::Value::Mapping(m) => {
                    let points = m
                        .get("points")
                        .and_then(serde_yaml::Value::as_u64)
                        .ok_or_else(|| Error::Parse(format!("Group '{}' has no points", label)))?
                        as usize;
                    let connectivity = match m.get("connectivity") {
                        Some(serde_yaml::Value::Sequence(items)) => items
                            .iter()
                            .map(|item| parse_connectivity_item(item, points, &label))
                            .collect::<Result<Vec<_>>>()?
                            .into_iter()
                            .flatten()
                            .collect(),
                        _ => Vec::new(),
                    };
                    (points, connectivity)
                }
                _ => return Err(Error::Parse(format!("Group '{}' is malformed", label))),
            };

            groups.push(TemplateGroup {
                label,
                points,
                connectivity,
            });
        }

        Ok(Template { groups })
    }
}

fn yaml_count(n: &serde_yaml::Number, label: &str) -> Result<usize> {
    n.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| Error::Parse(format!("Group '{}' has invalid points", label)))
}

fn edge_from_json(edge: &Value, label: &str) -> Result<[usize; 2]> {
    match edge.as_array().map(Vec::as_slice) {
        Some([a, b]) => match (a.as_u64(), b.as_u64()) {
            (Some(a), Some(b)) => Ok([a as usize, b as usize]),
            _ => Err(Error::Parse(format!("Group '{}' has a non-numeric edge", label))),
        },
        _ => Err(Error::Parse(format!("Group '{}' has a malformed edge", label))),
    }
}

/// One connectivity entry: `"a b"` is an edge, `"a:b"` a chain a→a+1→…→b,
/// `[a, b]` an explicit edge
fn parse_connectivity_item(
    item: &serde_yaml::Value,
    points: usize,
    label: &str,
) -> Result<Vec<[usize; 2]>> {
    let bad = || Error::Parse(format!("Group '{}' has invalid connectivity {:?}", label, item));

    let edges = match item {
        serde_yaml::Value::String(s) if s.contains(':') => {
            let (a, b) = s.split_once(':').ok_or_else(bad)?;
            let a: usize = a.trim().parse().map_err(|_| bad())?;
            let b: usize = b.trim().parse().map_err(|_| bad())?;
            if a > b {
                return Err(bad());
            }
            (a..b).map(|i| [i, i + 1]).collect()
        }
        serde_yaml::Value::String(s) => {
            let ids: Vec<usize> = s
                .split_whitespace()
                .map(|p| p.parse().map_err(|_| bad()))
                .collect::<Result<_>>()?;
            match ids.as_slice() {
                [a, b] => vec![[*a, *b]],
                _ => return Err(bad()),
            }
        }
        serde_yaml::Value::Sequence(pair) => match pair.as_slice() {
            [a, b] => match (a.as_u64(), b.as_u64()) {
                (Some(a), Some(b)) => vec![[a as usize, b as usize]],
                _ => return Err(bad()),
            },
            _ => return Err(bad()),
        },
        _ => return Err(bad()),
    };

    if edges.iter().flatten().any(|&i| i >= points) {
        return Err(Error::Parse(format!(
            "Group '{}' connectivity refers past its {} points",
            label, points
        )));
    }
    Ok(edges)
}

fn parse_yaml(content: &str) -> Result<Template> {
    let value: serde_yaml::Value =
        serde_yaml::from_str(content).map_err(|e| Error::Parse(e.to_string()))?;
    match value {
        serde_yaml::Value::Mapping(m) => Template::from_yaml_mapping(&m),
        _ => Err(Error::Parse("Template YAML must be a mapping of groups".to_string())),
    }
}

fn parse_json(content: &str) -> Result<Template> {
    let value: Value = serde_json::from_str(content)?;
    if value.get("groups").is_some() {
        return Template::from_json(&value);
    }
    // Label-keyed JSON: YAML's parser keeps key order, serde_json's map does not
    parse_yaml(content)
}
