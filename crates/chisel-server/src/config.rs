use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_world_dir")]
    pub world_dir: String,
    #[serde(default = "default_world_name")]
    pub default_world: String,
    #[serde(default)]
    pub worlds: HashMap<String, WorldConfig>,
}

/// Per-world section: the ordered hook name lists, the MOTD, and the
/// storage backend.
#[derive(Debug, Clone, Deserialize)]
pub struct WorldConfig {
    #[serde(default = "default_pre_build_hooks")]
    pub pre_build_hooks: Vec<String>,
    #[serde(default)]
    pub post_build_hooks: Vec<String>,
    #[serde(default = "default_dig_hooks")]
    pub dig_hooks: Vec<String>,
    #[serde(default = "default_sign_hooks")]
    pub sign_hooks: Vec<String>,
    #[serde(default)]
    pub use_hooks: Vec<String>,
    #[serde(default = "default_motd")]
    pub motd: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_serializer")]
    pub serializer: String,
}

fn default_bind() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    25565
}

fn default_world_dir() -> String {
    "world".into()
}

fn default_world_name() -> String {
    "default".into()
}

fn default_pre_build_hooks() -> Vec<String> {
    vec!["overwrite".into()]
}

fn default_dig_hooks() -> Vec<String> {
    vec!["drops".into()]
}

fn default_sign_hooks() -> Vec<String> {
    vec!["notify".into()]
}

fn default_motd() -> Option<String> {
    Some("Welcome to chisel! <tagline>".into())
}

fn default_serializer() -> String {
    "flatfile".into()
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            pre_build_hooks: default_pre_build_hooks(),
            post_build_hooks: Vec::new(),
            dig_hooks: default_dig_hooks(),
            sign_hooks: default_sign_hooks(),
            use_hooks: Vec::new(),
            motd: default_motd(),
            url: None,
            serializer: default_serializer(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            world_dir: default_world_dir(),
            default_world: default_world_name(),
            worlds: HashMap::new(),
        }
    }
}

impl ServerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: ServerConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::info!("No config file found at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// The configuration of the named world, falling back to defaults
    /// for worlds with no section.
    pub fn world(&self, name: &str) -> WorldConfig {
        self.worlds.get(name).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_section_parses() {
        let config: ServerConfig = toml::from_str(
            r#"
            port = 25566

            [worlds.default]
            pre_build_hooks = ["overwrite", "tracks"]
            dig_hooks = []
            motd = "hi <tagline>"
            serializer = "flatfile"
            "#,
        )
        .unwrap();
        assert_eq!(config.port, 25566);
        let world = config.world("default");
        assert_eq!(world.pre_build_hooks, vec!["overwrite", "tracks"]);
        assert!(world.dig_hooks.is_empty());
        assert_eq!(world.motd.as_deref(), Some("hi <tagline>"));
    }

    #[test]
    fn test_unknown_world_gets_defaults() {
        let config = ServerConfig::default();
        let world = config.world("nether");
        assert_eq!(world.pre_build_hooks, vec!["overwrite"]);
        assert_eq!(world.serializer, "flatfile");
    }
}
