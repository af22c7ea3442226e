use crate::hooks::{
    Automaton, ChatCommand, DigHook, PostBuildHook, PreBuildHook, SignHook, UseHook,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// All hooks known to the server, registered once at startup. Sessions
/// resolve the ordered name lists from their world's config against this
/// registry at construction time.
#[derive(Default)]
pub struct HookRegistry {
    pre_build: HashMap<&'static str, Arc<dyn PreBuildHook>>,
    post_build: HashMap<&'static str, Arc<dyn PostBuildHook>>,
    dig: HashMap<&'static str, Arc<dyn DigHook>>,
    sign: HashMap<&'static str, Arc<dyn SignHook>>,
    use_hooks: HashMap<&'static str, Arc<dyn UseHook>>,
    commands: HashMap<String, Arc<dyn ChatCommand>>,
    automatons: Vec<Arc<dyn Automaton>>,
}

/// Resolve an ordered name list against a hook map, preserving order and
/// warning about names nothing registered.
fn resolve<T: ?Sized>(
    kind: &str,
    map: &HashMap<&'static str, Arc<T>>,
    names: &[String],
) -> Vec<Arc<T>> {
    names
        .iter()
        .filter_map(|name| match map.get(name.as_str()) {
            Some(hook) => Some(hook.clone()),
            None => {
                warn!("no {} hook named {:?} is registered", kind, name);
                None
            }
        })
        .collect()
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_pre_build(&mut self, name: &'static str, hook: Arc<dyn PreBuildHook>) {
        self.pre_build.insert(name, hook);
    }

    pub fn register_post_build(&mut self, name: &'static str, hook: Arc<dyn PostBuildHook>) {
        self.post_build.insert(name, hook);
    }

    pub fn register_dig(&mut self, name: &'static str, hook: Arc<dyn DigHook>) {
        self.dig.insert(name, hook);
    }

    pub fn register_sign(&mut self, name: &'static str, hook: Arc<dyn SignHook>) {
        self.sign.insert(name, hook);
    }

    pub fn register_use(&mut self, name: &'static str, hook: Arc<dyn UseHook>) {
        self.use_hooks.insert(name, hook);
    }

    pub fn register_command(&mut self, command: Arc<dyn ChatCommand>) {
        self.commands.insert(command.name().to_string(), command);
    }

    pub fn register_automaton(&mut self, automaton: Arc<dyn Automaton>) {
        self.automatons.push(automaton);
    }

    pub fn resolve_pre_build(&self, names: &[String]) -> Vec<Arc<dyn PreBuildHook>> {
        resolve("pre-build", &self.pre_build, names)
    }

    pub fn resolve_post_build(&self, names: &[String]) -> Vec<Arc<dyn PostBuildHook>> {
        resolve("post-build", &self.post_build, names)
    }

    pub fn resolve_dig(&self, names: &[String]) -> Vec<Arc<dyn DigHook>> {
        resolve("dig", &self.dig, names)
    }

    pub fn resolve_sign(&self, names: &[String]) -> Vec<Arc<dyn SignHook>> {
        resolve("sign", &self.sign, names)
    }

    /// Resolve use hooks into a per-target-name table.
    pub fn resolve_use(&self, names: &[String]) -> HashMap<String, Vec<Arc<dyn UseHook>>> {
        let mut table: HashMap<String, Vec<Arc<dyn UseHook>>> = HashMap::new();
        for hook in resolve("use", &self.use_hooks, names) {
            for target in hook.targets() {
                table.entry(target.to_string()).or_default().push(hook.clone());
            }
        }
        table
    }

    /// Look up a chat command by name or alias, lowercased.
    pub fn chat_command(&self, name: &str) -> Option<Arc<dyn ChatCommand>> {
        let name = name.to_lowercase();
        if let Some(command) = self.commands.get(&name) {
            return Some(command.clone());
        }
        self.commands
            .values()
            .find(|c| c.aliases().contains(&name.as_str()))
            .cloned()
    }

    pub fn commands(&self) -> impl Iterator<Item = &Arc<dyn ChatCommand>> {
        self.commands.values()
    }

    pub fn automatons(&self) -> &[Arc<dyn Automaton>] {
        &self.automatons
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{BuildData, Factory, HookError};
    use chisel_world::Player;

    struct Named(&'static str);

    impl PreBuildHook for Named {
        fn pre_build(
            &self,
            _factory: &dyn Factory,
            _player: &mut Player,
            data: BuildData,
        ) -> Result<(bool, BuildData), HookError> {
            Ok((true, data))
        }
    }

    struct Echo;

    impl ChatCommand for Echo {
        fn name(&self) -> &'static str {
            "echo"
        }
        fn aliases(&self) -> &'static [&'static str] {
            &["say-again"]
        }
        fn run(
            &self,
            _factory: &dyn Factory,
            _username: &str,
            params: &[&str],
        ) -> Result<Vec<String>, HookError> {
            Ok(vec![params.join(" ")])
        }
    }

    #[test]
    fn test_resolution_preserves_config_order() {
        let mut registry = HookRegistry::new();
        registry.register_pre_build("first", Arc::new(Named("first")));
        registry.register_pre_build("second", Arc::new(Named("second")));

        let names = vec!["second".to_string(), "first".to_string()];
        let resolved = registry.resolve_pre_build(&names);
        assert_eq!(resolved.len(), 2);

        // Unknown names are skipped, not errors.
        let names = vec!["second".to_string(), "missing".to_string()];
        assert_eq!(registry.resolve_pre_build(&names).len(), 1);
    }

    #[test]
    fn test_command_alias_lookup() {
        let mut registry = HookRegistry::new();
        registry.register_command(Arc::new(Echo));
        assert!(registry.chat_command("echo").is_some());
        assert!(registry.chat_command("ECHO").is_some());
        assert!(registry.chat_command("say-again").is_some());
        assert!(registry.chat_command("nope").is_none());
    }
}
