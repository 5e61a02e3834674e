//! # Plugin and Component Metadata
//!
//! Plugins are the blueprints of components: their config parameters, their
//! observable state and the actions they accept. Each instance publishes its
//! plugins and components as retained JSON under `{instance}/metadata/`:
//!
//! ```text
//! plugins/{module.name}  -> {module, name, description?, usage, version,
//!                            config: {name: {description?, valueType}},
//!                            members: {name: {description?, memberType, valueType}}}
//! components/{id}        -> {id, plugin}
//! instance-info          -> {type, hostname, versions, capabilities}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::MetadataError;
use crate::value_type::Type;

/// Metadata path prefix for plugin entries.
pub const PLUGINS_PATH: &str = "plugins";
/// Metadata path prefix for component entries.
pub const COMPONENTS_PATH: &str = "components";
/// Metadata path of the instance description.
pub const INSTANCE_INFO_PATH: &str = "instance-info";

/// Rejects empty identifiers and topic-reserved characters.
pub fn validate_identifier(value: &str) -> Result<(), MetadataError> {
    if value.is_empty() || value.contains(['/', '+', '#']) {
        return Err(MetadataError::InvalidIdentifier(value.to_string()));
    }
    Ok(())
}

/// What a plugin is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginUsage {
    Sensor,
    Actuator,
    Logic,
    Ui,
}

/// Kind of a plugin member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberType {
    /// Observable value published by the component.
    State,
    /// Command that can be triggered from outside.
    Action,
}

/// Logical type of a config parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigType {
    String,
    Bool,
    Integer,
    Float,
}

impl ConfigType {
    #[must_use]
    pub fn validate(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Bool => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::String => "a string",
            Self::Bool => "a boolean",
            Self::Integer => "an integer",
            Self::Float => "a number",
        }
    }
}

/// A constructor parameter of a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigItem {
    pub name: String,
    pub description: Option<String>,
    pub value_type: ConfigType,
}

/// A state or action of a plugin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: String,
    pub description: Option<String>,
    pub member_type: MemberType,
    pub value_type: Type,
}

/// Immutable component blueprint, identified by `module.name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "NetPlugin", try_from = "NetPlugin")]
pub struct Plugin {
    id: String,
    module: String,
    name: String,
    description: Option<String>,
    usage: PluginUsage,
    version: String,
    config: BTreeMap<String, ConfigItem>,
    members: BTreeMap<String, Member>,
}

impl Plugin {
    /// Composite id `module.name`.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn module(&self) -> &str {
        &self.module
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    #[must_use]
    pub fn usage(&self) -> PluginUsage {
        self.usage
    }

    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    #[must_use]
    pub fn config(&self) -> &BTreeMap<String, ConfigItem> {
        &self.config
    }

    #[must_use]
    pub fn members(&self) -> &BTreeMap<String, Member> {
        &self.members
    }

    #[must_use]
    pub fn member(&self, name: &str) -> Option<&Member> {
        self.members.get(name)
    }

    /// State members, in name order.
    pub fn state_members(&self) -> impl Iterator<Item = &Member> {
        self.members
            .values()
            .filter(|m| m.member_type == MemberType::State)
    }

    /// Action members, in name order.
    pub fn action_members(&self) -> impl Iterator<Item = &Member> {
        self.members
            .values()
            .filter(|m| m.member_type == MemberType::Action)
    }

    /// Check a component configuration against the declared items.
    ///
    /// Every declared item is required and no undeclared key is accepted.
    pub fn validate_config(&self, config: &Map<String, Value>) -> Result<(), MetadataError> {
        if let Some(unknown) = config.keys().find(|key| !self.config.contains_key(*key)) {
            return Err(MetadataError::UnknownConfig(unknown.clone()));
        }

        for item in self.config.values() {
            let value = config
                .get(&item.name)
                .ok_or_else(|| MetadataError::MissingConfig(item.name.clone()))?;
            if !item.value_type.validate(value) {
                return Err(MetadataError::InvalidConfig {
                    name: item.name.clone(),
                    expected: item.value_type.label(),
                });
            }
        }

        Ok(())
    }

    /// Metadata path this plugin is published under.
    #[must_use]
    pub fn metadata_path(&self) -> String {
        format!("{}/{}", PLUGINS_PATH, self.id)
    }

    pub fn to_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(NetPlugin::from(self.clone()))
    }

    pub fn from_json(value: &Value) -> Result<Self, MetadataError> {
        let net: NetPlugin = serde_json::from_value(value.clone())
            .map_err(|e| MetadataError::Malformed(e.to_string()))?;
        Self::try_from(net)
    }
}

// =============================================================================
// WIRE SHAPE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetConfigItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    value_type: ConfigType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetMember {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    member_type: MemberType,
    value_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NetPlugin {
    module: String,
    name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    usage: PluginUsage,
    version: String,
    #[serde(default)]
    config: BTreeMap<String, NetConfigItem>,
    #[serde(default)]
    members: BTreeMap<String, NetMember>,
}

impl From<Plugin> for NetPlugin {
    fn from(plugin: Plugin) -> Self {
        Self {
            module: plugin.module,
            name: plugin.name,
            description: plugin.description,
            usage: plugin.usage,
            version: plugin.version,
            config: plugin
                .config
                .into_iter()
                .map(|(name, item)| {
                    (
                        name,
                        NetConfigItem {
                            description: item.description,
                            value_type: item.value_type,
                        },
                    )
                })
                .collect(),
            members: plugin
                .members
                .into_iter()
                .map(|(name, member)| {
                    (
                        name,
                        NetMember {
                            description: member.description,
                            member_type: member.member_type,
                            value_type: member.value_type.to_string(),
                        },
                    )
                })
                .collect(),
        }
    }
}

impl TryFrom<NetPlugin> for Plugin {
    type Error = MetadataError;

    fn try_from(net: NetPlugin) -> Result<Self, Self::Error> {
        let mut builder = PluginBuilder::new(net.module, net.name)
            .usage(net.usage)
            .version(net.version);
        if let Some(description) = net.description {
            builder = builder.description(description);
        }

        for (name, item) in net.config {
            builder = builder.config_item(ConfigItem {
                name,
                description: item.description,
                value_type: item.value_type,
            });
        }

        for (name, member) in net.members {
            let value_type =
                Type::parse(&member.value_type).map_err(|source| {
                    MetadataError::InvalidMemberType {
                        member: name.clone(),
                        source,
                    }
                })?;
            builder = builder.member(Member {
                name,
                description: member.description,
                member_type: member.member_type,
                value_type,
            });
        }

        builder.build()
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Builds an immutable `Plugin`, checking identifiers and duplicate names.
///
/// ```rust
/// use bus_types::{PluginBuilder, PluginUsage, Type};
///
/// let plugin = PluginBuilder::new("logic", "ValueBinary")
///     .usage(PluginUsage::Logic)
///     .version("1.0.0")
///     .state("value", Type::Bool)
///     .action("setValue", Type::Bool)
///     .build()
///     .unwrap();
/// assert_eq!(plugin.id(), "logic.ValueBinary");
/// ```
#[derive(Debug, Clone)]
pub struct PluginBuilder {
    module: String,
    name: String,
    description: Option<String>,
    usage: PluginUsage,
    version: String,
    config: Vec<ConfigItem>,
    members: Vec<Member>,
}

impl PluginBuilder {
    pub fn new(module: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            name: name.into(),
            description: None,
            usage: PluginUsage::Logic,
            version: "0.0.0".to_string(),
            config: Vec::new(),
            members: Vec::new(),
        }
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    #[must_use]
    pub fn usage(mut self, usage: PluginUsage) -> Self {
        self.usage = usage;
        self
    }

    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    #[must_use]
    pub fn config(self, name: impl Into<String>, value_type: ConfigType) -> Self {
        self.config_item(ConfigItem {
            name: name.into(),
            description: None,
            value_type,
        })
    }

    #[must_use]
    pub fn config_item(mut self, item: ConfigItem) -> Self {
        self.config.push(item);
        self
    }

    #[must_use]
    pub fn state(self, name: impl Into<String>, value_type: Type) -> Self {
        self.member(Member {
            name: name.into(),
            description: None,
            member_type: MemberType::State,
            value_type,
        })
    }

    #[must_use]
    pub fn action(self, name: impl Into<String>, value_type: Type) -> Self {
        self.member(Member {
            name: name.into(),
            description: None,
            member_type: MemberType::Action,
            value_type,
        })
    }

    #[must_use]
    pub fn member(mut self, member: Member) -> Self {
        self.members.push(member);
        self
    }

    pub fn build(self) -> Result<Plugin, MetadataError> {
        for part in [&self.module, &self.name] {
            validate_identifier(part)?;
            if part.contains('.') {
                return Err(MetadataError::InvalidIdentifier(part.clone()));
            }
        }
        let id = format!("{}.{}", self.module, self.name);

        let mut config = BTreeMap::new();
        for item in self.config {
            validate_identifier(&item.name)?;
            if config.contains_key(&item.name) {
                return Err(MetadataError::Duplicate {
                    kind: "config",
                    name: item.name,
                    plugin: id,
                });
            }
            config.insert(item.name.clone(), item);
        }

        let mut members = BTreeMap::new();
        for member in self.members {
            validate_identifier(&member.name)?;
            if members.contains_key(&member.name) {
                return Err(MetadataError::Duplicate {
                    kind: "member",
                    name: member.name,
                    plugin: id,
                });
            }
            members.insert(member.name.clone(), member);
        }

        Ok(Plugin {
            id,
            module: self.module,
            name: self.name,
            description: self.description,
            usage: self.usage,
            version: self.version,
            config,
            members,
        })
    }
}

// =============================================================================
// COMPONENT + INSTANCE ENTRIES
// =============================================================================

/// Announcement of a component: `{id, plugin}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentMetadata {
    pub id: String,
    pub plugin: String,
}

impl ComponentMetadata {
    #[must_use]
    pub fn metadata_path(&self) -> String {
        format!("{}/{}", COMPONENTS_PATH, self.id)
    }
}

/// Free-form description of a running instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceInfo {
    #[serde(rename = "type")]
    pub instance_type: String,
    pub hostname: String,
    pub versions: BTreeMap<String, String>,
    pub capabilities: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn value_binary() -> Plugin {
        PluginBuilder::new("logic", "ValueBinary")
            .description("binary value holder")
            .usage(PluginUsage::Logic)
            .version("1.2.0")
            .config("initial", ConfigType::Bool)
            .state("value", Type::Bool)
            .action("setValue", Type::Bool)
            .build()
            .unwrap()
    }

    #[test]
    fn test_plugin_json_shape() {
        let json = value_binary().to_json().unwrap();
        assert_eq!(
            json,
            json!({
                "module": "logic",
                "name": "ValueBinary",
                "description": "binary value holder",
                "usage": "logic",
                "version": "1.2.0",
                "config": { "initial": { "valueType": "bool" } },
                "members": {
                    "setValue": { "memberType": "action", "valueType": "bool" },
                    "value": { "memberType": "state", "valueType": "bool" }
                }
            })
        );
    }

    #[test]
    fn test_plugin_json_reparses_to_same_members() {
        let plugin = value_binary();
        let parsed = Plugin::from_json(&plugin.to_json().unwrap()).unwrap();
        assert_eq!(parsed.id(), plugin.id());
        assert_eq!(parsed.to_json().unwrap(), plugin.to_json().unwrap());
    }

    #[test]
    fn test_plugin_from_remote_json() {
        let plugin = Plugin::from_json(&json!({
            "module": "ui",
            "name": "Dimmer",
            "usage": "actuator",
            "version": "0.1.0",
            "members": {
                "level": { "memberType": "state", "valueType": "range[0;100]", "description": "percent" }
            }
        }))
        .unwrap();

        assert_eq!(plugin.id(), "ui.Dimmer");
        assert_eq!(plugin.usage(), PluginUsage::Actuator);
        assert!(plugin.config().is_empty());
        let level = plugin.member("level").unwrap();
        assert_eq!(level.value_type, Type::Range { min: 0, max: 100 });
        assert_eq!(level.description.as_deref(), Some("percent"));
        assert_eq!(plugin.state_members().count(), 1);
        assert_eq!(plugin.action_members().count(), 0);
    }

    #[test]
    fn test_plugin_rejects_bad_member_type() {
        let result = Plugin::from_json(&json!({
            "module": "m", "name": "n", "usage": "logic", "version": "1",
            "members": { "x": { "memberType": "state", "valueType": "range[3;1]" } }
        }));
        assert!(matches!(result, Err(MetadataError::InvalidMemberType { .. })));

        let result = Plugin::from_json(&json!({ "module": "m" }));
        assert!(matches!(result, Err(MetadataError::Malformed(_))));
    }

    #[test]
    fn test_builder_rejects_duplicates_and_bad_ids() {
        let dup = PluginBuilder::new("m", "n")
            .state("value", Type::Bool)
            .action("value", Type::Bool)
            .build();
        assert!(matches!(dup, Err(MetadataError::Duplicate { kind: "member", .. })));

        assert!(PluginBuilder::new("", "n").build().is_err());
        assert!(PluginBuilder::new("a.b", "n").build().is_err());
        assert!(PluginBuilder::new("m", "n/x").build().is_err());
    }

    #[test]
    fn test_validate_config() {
        let plugin = value_binary();
        let mut config = Map::new();
        assert_eq!(
            plugin.validate_config(&config),
            Err(MetadataError::MissingConfig("initial".into()))
        );

        config.insert("initial".into(), json!("yes"));
        assert!(matches!(
            plugin.validate_config(&config),
            Err(MetadataError::InvalidConfig { .. })
        ));

        config.insert("initial".into(), json!(true));
        assert!(plugin.validate_config(&config).is_ok());

        config.insert("extra".into(), json!(1));
        assert_eq!(
            plugin.validate_config(&config),
            Err(MetadataError::UnknownConfig("extra".into()))
        );
    }

    #[test]
    fn test_component_and_instance_entries() {
        let meta: ComponentMetadata =
            serde_json::from_value(json!({"id": "kitchen-light", "plugin": "logic.ValueBinary"}))
                .unwrap();
        assert_eq!(meta.metadata_path(), "components/kitchen-light");

        let info: InstanceInfo = serde_json::from_value(json!({"type": "core"})).unwrap();
        assert_eq!(info.instance_type, "core");
        assert!(info.capabilities.is_empty());
    }
}
