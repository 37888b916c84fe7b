use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Runtime configuration recorded in an image, using OCI field names
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ImageConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entrypoint: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl ImageConfig {
    /// The process a container runs when started without overrides
    pub fn default_command(&self) -> Vec<String> {
        self.entrypoint
            .iter()
            .chain(self.cmd.iter())
            .cloned()
            .collect()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_command_joins_entrypoint_and_cmd() {
        let config = ImageConfig {
            entrypoint: vec!["python".into()],
            cmd: vec!["-m".into(), "app.main".into()],
            ..Default::default()
        };
        assert_eq!(config.default_command(), vec!["python", "-m", "app.main"]);
    }

    #[test]
    fn test_oci_field_names() {
        let config = ImageConfig {
            cmd: vec!["python".into(), "-m".into(), "app.main".into()],
            working_dir: Some("/app".into()),
            ..Default::default()
        };

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["Cmd"][2], "app.main");
        assert_eq!(json["WorkingDir"], "/app");
        assert!(json.get("Entrypoint").is_none());
        assert!(json.get("Labels").is_none());
    }
}
