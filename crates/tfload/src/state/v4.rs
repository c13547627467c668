//! `version` 4 state documents
//!
//! Resources live in one flat list tagged with their module address, attribute values are nested JSON. Both are
//! converted to the legacy layout: one [ModuleState] per module (root first) and flattened attributes.
use super::{Instance, ModuleState, Resource, StateModel};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub(super) struct StateV4 {
    #[serde(default)]
    terraform_version: Option<String>,
    #[serde(default)]
    serial: Option<u64>,
    #[serde(default)]
    lineage: Option<String>,
    #[serde(default)]
    outputs: IndexMap<String, Value>,
    #[serde(default)]
    resources: Vec<ResourceV4>,
}

#[derive(Debug, Deserialize)]
struct ResourceV4 {
    /// `module.a.module.b`, `module.a[0]` or `module.a["key"]`; absent for the root module
    #[serde(default)]
    module: Option<String>,
    #[serde(default)]
    mode: Mode,
    #[serde(rename = "type")]
    kind: String,
    name: String,
    #[serde(default)]
    provider: String,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    instances: Vec<InstanceV4>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Mode {
    #[default]
    Managed,
    Data,
}

#[derive(Debug, Deserialize)]
struct InstanceV4 {
    #[serde(default)]
    index_key: Option<Value>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    deposed: Option<String>,
    #[serde(default)]
    attributes: Option<IndexMap<String, Value>>,
    #[serde(default)]
    attributes_flat: Option<IndexMap<String, String>>,
    #[serde(default)]
    dependencies: Vec<String>,
}

impl StateV4 {
    pub(super) fn normalize(self) -> StateModel {
        let mut modules: IndexMap<Vec<String>, ModuleState> = IndexMap::new();
        let root = module_path(None);
        modules.insert(
            root.clone(),
            ModuleState {
                path: root,
                outputs: self.outputs,
                resources: IndexMap::new(),
            },
        );

        for resource in self.resources {
            let path = module_path(resource.module.as_deref());
            let module = modules
                .entry(path.clone())
                .or_insert_with(|| ModuleState {
                    path,
                    ..Default::default()
                });

            for (address, normalized) in resource.into_legacy() {
                module.resources.insert(address, normalized);
            }
        }

        StateModel {
            version: Some(3),
            terraform_version: self.terraform_version,
            serial: self.serial,
            lineage: self.lineage,
            modules: modules.into_values().collect(),
        }
    }
}

impl ResourceV4 {
    fn address(&self) -> String {
        match self.mode {
            Mode::Managed => format!("{}.{}", self.kind, self.name),
            Mode::Data => format!("data.{}.{}", self.kind, self.name),
        }
    }

    /// One entry per current instance, deposed instances are dropped
    fn into_legacy(self) -> Vec<(String, Resource)> {
        let base = self.address();
        let current: Vec<_> = self
            .instances
            .into_iter()
            .filter(|instance| instance.deposed.is_none())
            .collect();

        if current.is_empty() {
            tracing::trace!(address = %base, "resource without current instance");
            return vec![(
                base,
                Resource {
                    kind: self.kind,
                    dependencies: self.depends_on,
                    primary: None,
                    provider: self.provider,
                },
            )];
        }

        current
            .into_iter()
            .map(|instance| {
                let address = match &instance.index_key {
                    Some(Value::Number(index)) => format!("{base}.{index}"),
                    Some(Value::String(key)) => format!("{base}[{}]", quoted(key)),
                    _ => base.clone(),
                };

                let mut dependencies = instance.dependencies;
                for dependency in &self.depends_on {
                    if !dependencies.contains(dependency) {
                        dependencies.push(dependency.clone());
                    }
                }

                let attributes = match (instance.attributes_flat, instance.attributes) {
                    (Some(flat), _) => flat,
                    (None, Some(nested)) => flatten(&nested),
                    (None, None) => IndexMap::new(),
                };

                let primary = Instance {
                    id: attributes.get("id").cloned().unwrap_or_default(),
                    attributes,
                    tainted: instance.status.as_deref() == Some("tainted"),
                };

                (
                    address,
                    Resource {
                        kind: self.kind.clone(),
                        dependencies,
                        primary: Some(primary),
                        provider: self.provider.clone(),
                    },
                )
            })
            .collect()
    }
}

/// `module.a.module.b["key"]` → `["root", "a", "b[\"key\"]"]`, instance keys stay with their module name
fn module_path(address: Option<&str>) -> Vec<String> {
    let mut path = vec!["root".to_string()];
    let mut rest = address.unwrap_or_default();
    while let Some(step) = rest.strip_prefix("module.") {
        let (name, remainder) = split_module_step(step);
        path.push(name.to_string());
        rest = remainder.strip_prefix('.').unwrap_or(remainder);
    }
    if !rest.is_empty() {
        tracing::debug!(address = address.unwrap_or_default(), %rest, "ignoring unexpected module address suffix");
    }
    path
}

/// Splits `name[index].rest` after the index; quoted keys may contain `.`, `[` and `]`
fn split_module_step(address: &str) -> (&str, &str) {
    let mut in_quotes = false;
    let mut escaped = false;
    let mut brackets = 0usize;
    for (at, c) in address.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            _ if in_quotes => {}
            '[' => brackets += 1,
            ']' => brackets = brackets.saturating_sub(1),
            '.' if brackets == 0 => return address.split_at(at),
            _ => {}
        }
    }
    (address, "")
}

/// Quotes an instance key for use in an address
fn quoted(key: &str) -> String {
    let mut quoted = String::with_capacity(key.len() + 2);
    quoted.push('"');
    for c in key.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\r' => quoted.push_str("\\r"),
            '\t' => quoted.push_str("\\t"),
            c => quoted.push(c),
        }
    }
    quoted.push('"');
    quoted
}

/// Flattens nested attribute values, lists get a `.#` and maps a `.%` length entry
fn flatten(attributes: &IndexMap<String, Value>) -> IndexMap<String, String> {
    let mut flat = IndexMap::new();
    for (key, value) in attributes {
        flatten_value(key, value, &mut flat);
    }
    flat
}

fn flatten_value(prefix: &str, value: &Value, flat: &mut IndexMap<String, String>) {
    match value {
        Value::Null => {}
        Value::Bool(value) => {
            flat.insert(prefix.to_string(), value.to_string());
        }
        Value::Number(value) => {
            flat.insert(prefix.to_string(), value.to_string());
        }
        Value::String(value) => {
            flat.insert(prefix.to_string(), value.clone());
        }
        Value::Array(items) => {
            let items: Vec<_> = items.iter().filter(|item| !item.is_null()).collect();
            flat.insert(format!("{prefix}.#"), items.len().to_string());
            for (index, item) in items.into_iter().enumerate() {
                flatten_value(&format!("{prefix}.{index}"), item, flat);
            }
        }
        Value::Object(entries) => {
            let entries: Vec<_> = entries.iter().filter(|(_, item)| !item.is_null()).collect();
            flat.insert(format!("{prefix}.%"), entries.len().to_string());
            for (key, item) in entries {
                flatten_value(&format!("{prefix}.{key}"), item, flat);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn module_paths() {
        assert_eq!(module_path(None), vec!["root"]);
        assert_eq!(
            module_path(Some("module.network.module.subnets")),
            vec!["root", "network", "subnets"]
        );
        assert_eq!(
            module_path(Some("module.a[0].module.b")),
            vec!["root", "a[0]", "b"]
        );
        assert_eq!(
            module_path(Some(r#"module.a["x.y"].module.b["k]."]"#)),
            vec!["root", r#"a["x.y"]"#, r#"b["k]."]"#]
        );
        assert_eq!(
            module_path(Some(r#"module.a["say \"hi.\""].module.b"#)),
            vec!["root", r#"a["say \"hi.\""]"#, "b"]
        );
    }

    #[test]
    fn module_instances_stay_apart() {
        let state: StateV4 = serde_json::from_str(
            r#"{
                "version": 4,
                "resources": [
                    {
                        "module": "module.site[\"example.com\"]",
                        "mode": "managed",
                        "type": "aws_s3_bucket",
                        "name": "content",
                        "instances": [{"attributes": {"id": "example-com"}}]
                    },
                    {
                        "module": "module.site[\"example.org\"]",
                        "mode": "managed",
                        "type": "aws_s3_bucket",
                        "name": "content",
                        "instances": [{"attributes": {"id": "example-org"}}]
                    },
                    {
                        "module": "module.worker[1].module.queue",
                        "mode": "managed",
                        "type": "aws_sqs_queue",
                        "name": "jobs",
                        "instances": [{"attributes": {"id": "jobs-1"}}]
                    }
                ]
            }"#,
        )
        .unwrap();

        let state = state.normalize();
        let paths: Vec<_> = state.modules.iter().map(|module| module.path.clone()).collect();
        assert_eq!(
            paths,
            vec![
                vec!["root"],
                vec!["root", r#"site["example.com"]"#],
                vec!["root", r#"site["example.org"]"#],
                vec!["root", "worker[1]", "queue"],
            ]
        );
        assert_eq!(
            state.modules[2].resources["aws_s3_bucket.content"]
                .primary
                .as_ref()
                .unwrap()
                .id,
            "example-org"
        );
    }

    #[test]
    fn quoted_instance_keys() {
        assert_eq!(quoted("blue"), r#""blue""#);
        assert_eq!(quoted("a\"b\\c\nd"), r#""a\"b\\c\nd""#);
        assert_eq!(quoted("grün"), "\"grün\"");
    }

    #[test]
    fn flatten_nested_values() {
        let attributes: IndexMap<String, Value> = serde_json::from_str(
            r#"{
                "enabled": true,
                "id": "sg-1",
                "ingress": [{"cidr_blocks": ["0.0.0.0/0"], "from_port": 443}],
                "owner": null,
                "tags": {"Name": "web"}
            }"#,
        )
        .unwrap();

        insta::assert_json_snapshot!(flatten(&attributes), @r###"
        {
          "enabled": "true",
          "id": "sg-1",
          "ingress.#": "1",
          "ingress.0.%": "2",
          "ingress.0.cidr_blocks.#": "1",
          "ingress.0.cidr_blocks.0": "0.0.0.0/0",
          "ingress.0.from_port": "443",
          "tags.%": "1",
          "tags.Name": "web"
        }
        "###);
    }

    #[test]
    fn normalize_document() {
        let state: StateV4 = serde_json::from_str(
            r#"{
                "version": 4,
                "terraform_version": "1.5.7",
                "serial": 7,
                "lineage": "c0ffee",
                "outputs": {"vpc_id": {"value": "vpc-1", "type": "string"}},
                "resources": [
                    {
                        "module": "module.network",
                        "mode": "managed",
                        "type": "aws_subnet",
                        "name": "private",
                        "provider": "provider[\"registry.terraform.io/hashicorp/aws\"]",
                        "instances": [
                            {"index_key": 0, "attributes": {"id": "subnet-0"}},
                            {"index_key": 1, "attributes": {"id": "subnet-1"}, "status": "tainted"}
                        ]
                    },
                    {
                        "mode": "data",
                        "type": "aws_ami",
                        "name": "ubuntu",
                        "instances": [{"attributes": {"id": "ami-1"}}]
                    },
                    {
                        "mode": "managed",
                        "type": "aws_instance",
                        "name": "web",
                        "depends_on": ["aws_security_group.web"],
                        "instances": [
                            {
                                "index_key": "blue",
                                "attributes_flat": {"id": "i-1", "tags.%": "0"},
                                "dependencies": ["data.aws_ami.ubuntu", "aws_security_group.web"]
                            },
                            {"index_key": "blue", "deposed": "00000001", "attributes": {"id": "i-0"}}
                        ]
                    }
                ]
            }"#,
        )
        .unwrap();

        let state = state.normalize();
        assert_eq!(state.version, Some(3));
        assert_eq!(state.serial, Some(7));
        assert_eq!(state.lineage.as_deref(), Some("c0ffee"));

        let paths: Vec<_> = state.modules.iter().map(|module| module.path.clone()).collect();
        assert_eq!(paths, vec![vec!["root"], vec!["root", "network"]]);

        let root = &state.modules[0];
        assert!(root.outputs.contains_key("vpc_id"));
        let addresses: Vec<_> = root.resources.keys().cloned().collect();
        assert_eq!(addresses, vec!["data.aws_ami.ubuntu", "aws_instance.web[\"blue\"]"]);

        let web = &root.resources["aws_instance.web[\"blue\"]"];
        assert_eq!(
            web.dependencies,
            vec!["data.aws_ami.ubuntu", "aws_security_group.web"]
        );
        let primary = web.primary.as_ref().unwrap();
        assert_eq!(primary.id, "i-1");
        assert_eq!(primary.attributes["tags.%"], "0");

        let network = &state.modules[1];
        let subnet = network.resources["aws_subnet.private.1"]
            .primary
            .as_ref()
            .unwrap();
        assert_eq!(subnet.id, "subnet-1");
        assert!(subnet.tainted);
        assert!(!network.resources["aws_subnet.private.0"]
            .primary
            .as_ref()
            .unwrap()
            .tainted);
    }

    #[test]
    fn resource_without_instances() {
        let resource: ResourceV4 = serde_json::from_str(
            r#"{"mode": "managed", "type": "aws_eip", "name": "nat", "instances": []}"#,
        )
        .unwrap();

        let legacy = resource.into_legacy();
        assert_eq!(legacy.len(), 1);
        assert_eq!(legacy[0].0, "aws_eip.nat");
        assert!(legacy[0].1.primary.is_none());
    }
}
