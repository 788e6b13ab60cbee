//! Gate scripts: what to transfer, from where, to where.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::context::ServiceResolver;
use crate::error::{GateError, Result};
use crate::parameter::{referenced_names, ParameterList};
use crate::profile::Properties;

/// Separator between the segments of a script property key.
pub const QUALIFIER: char = '.';

pub const KEY_DATA_CLASS: &str = "dataClass";
pub const KEY_PROCESS_TYPE: &str = "processType";
pub const PREFIX_SOURCE: &str = "source";
pub const PREFIX_DRAIN: &str = "drain";

/// Which end of a process a driver sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    Source,
    Drain,
}

impl DriverKind {
    pub fn opposite(self) -> Self {
        match self {
            DriverKind::Source => DriverKind::Drain,
            DriverKind::Drain => DriverKind::Source,
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            DriverKind::Source => PREFIX_SOURCE,
            DriverKind::Drain => PREFIX_DRAIN,
        }
    }
}

/// Configuration of one source or drain driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverScript {
    resource_name: String,
    configuration: BTreeMap<String, String>,
    required_parameter_names: BTreeSet<String>,
}

impl DriverScript {
    /// The required parameter names are the `${name}` tokens found in the
    /// configuration values.
    pub fn new(resource_name: impl Into<String>, configuration: BTreeMap<String, String>) -> Self {
        let required_parameter_names = configuration
            .values()
            .flat_map(|v| referenced_names(v))
            .collect();
        Self {
            resource_name: resource_name.into(),
            configuration,
            required_parameter_names,
        }
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn configuration(&self) -> &BTreeMap<String, String> {
        &self.configuration
    }

    pub fn required_parameter_names(&self) -> &BTreeSet<String> {
        &self.required_parameter_names
    }

    /// Expands every configuration value against `arguments` (strict).
    pub fn resolve_configuration(
        &self,
        arguments: &ParameterList,
    ) -> Result<BTreeMap<String, String>> {
        self.configuration
            .iter()
            .map(|(k, v)| Ok((k.clone(), arguments.replace(v, true)?)))
            .collect()
    }
}

/// One named transfer from a source driver to a drain driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessScript {
    name: String,
    process_type: String,
    data_class: String,
    source_script: DriverScript,
    drain_script: DriverScript,
}

impl ProcessScript {
    pub fn new(
        name: impl Into<String>,
        process_type: impl Into<String>,
        data_class: impl Into<String>,
        source_script: DriverScript,
        drain_script: DriverScript,
    ) -> Self {
        Self {
            name: name.into(),
            process_type: process_type.into(),
            data_class: data_class.into(),
            source_script,
            drain_script,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn process_type(&self) -> &str {
        &self.process_type
    }

    pub fn data_class(&self) -> &str {
        &self.data_class
    }

    pub fn source_script(&self) -> &DriverScript {
        &self.source_script
    }

    pub fn drain_script(&self) -> &DriverScript {
        &self.drain_script
    }

    pub fn driver_script(&self, kind: DriverKind) -> &DriverScript {
        match kind {
            DriverKind::Source => &self.source_script,
            DriverKind::Drain => &self.drain_script,
        }
    }
}

/// Ordered set of processes executed by one gate run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GateScript {
    name: String,
    processes: Vec<ProcessScript>,
}

impl GateScript {
    pub fn new(name: impl Into<String>, processes: Vec<ProcessScript>) -> Self {
        Self {
            name: name.into(),
            processes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn processes(&self) -> &[ProcessScript] {
        &self.processes
    }

    /// Every parameter referenced by any driver of this script.
    pub fn required_parameter_names(&self) -> BTreeSet<String> {
        self.processes
            .iter()
            .flat_map(|p| {
                p.source_script
                    .required_parameter_names
                    .iter()
                    .chain(p.drain_script.required_parameter_names.iter())
                    .cloned()
            })
            .collect()
    }

    /// Loads a script from `<process>.<attribute>` properties.
    pub fn load_from(
        name: impl Into<String>,
        properties: &Properties,
        resolver: &ServiceResolver,
    ) -> Result<Self> {
        let name = name.into();
        let mut groups: BTreeMap<&str, BTreeMap<&str, &str>> = BTreeMap::new();
        for (key, value) in properties {
            let (process, rest) = key.split_once(QUALIFIER).ok_or_else(|| {
                GateError::config(format!("Invalid process key \"{}\" in script {}", key, name))
            })?;
            groups
                .entry(process)
                .or_default()
                .insert(rest, value.as_str());
        }

        let mut processes = Vec::with_capacity(groups.len());
        for (process, attributes) in groups {
            processes.push(load_process(&name, process, &attributes, resolver)?);
        }
        Ok(Self::new(name, processes))
    }

    /// Writes this script back as properties. Fails without modifying
    /// `properties` if any key is already present.
    pub fn store_to(&self, properties: &mut Properties) -> Result<()> {
        let mut entries = Vec::new();
        for process in &self.processes {
            let key = |rest: &str| format!("{}{}{}", process.name, QUALIFIER, rest);
            entries.push((key(KEY_DATA_CLASS), process.data_class.clone()));
            entries.push((key(KEY_PROCESS_TYPE), process.process_type.clone()));
            for kind in [DriverKind::Source, DriverKind::Drain] {
                let driver = process.driver_script(kind);
                entries.push((key(kind.prefix()), driver.resource_name.clone()));
                for (k, v) in &driver.configuration {
                    entries.push((
                        format!("{}{}{}", key(kind.prefix()), QUALIFIER, k),
                        v.clone(),
                    ));
                }
            }
        }
        if let Some((conflict, _)) = entries.iter().find(|(k, _)| properties.contains_key(k)) {
            return Err(GateError::config(format!(
                "Script property \"{}\" is already defined",
                conflict
            )));
        }
        properties.extend(entries);
        Ok(())
    }
}

fn load_process(
    script: &str,
    process: &str,
    attributes: &BTreeMap<&str, &str>,
    resolver: &ServiceResolver,
) -> Result<ProcessScript> {
    let required = |key: &str| {
        attributes.get(key).copied().ok_or_else(|| {
            GateError::config(format!(
                "Process \"{}\" in script {} must define \"{}\"",
                process, script, key
            ))
        })
    };
    let data_class = required(KEY_DATA_CLASS)?;
    let process_type = required(KEY_PROCESS_TYPE)?;
    let source = required(PREFIX_SOURCE)?;
    let drain = required(PREFIX_DRAIN)?;

    if !resolver.has_data_class(data_class) {
        return Err(GateError::config(format!(
            "Unknown data class \"{}\" in process \"{}\"",
            data_class, process
        )));
    }

    let mut source_conf = BTreeMap::new();
    let mut drain_conf = BTreeMap::new();
    for (&key, &value) in attributes {
        match key {
            KEY_DATA_CLASS | KEY_PROCESS_TYPE | PREFIX_SOURCE | PREFIX_DRAIN => {}
            _ => {
                let (prefix, conf) = key.split_once(QUALIFIER).ok_or_else(|| {
                    GateError::config(format!(
                        "Unknown attribute \"{}\" in process \"{}\"",
                        key, process
                    ))
                })?;
                let target = match prefix {
                    PREFIX_SOURCE => &mut source_conf,
                    PREFIX_DRAIN => &mut drain_conf,
                    _ => {
                        return Err(GateError::config(format!(
                            "Unknown attribute \"{}\" in process \"{}\"",
                            key, process
                        )))
                    }
                };
                target.insert(conf.to_string(), value.to_string());
            }
        }
    }

    Ok(ProcessScript::new(
        process,
        process_type,
        data_class,
        DriverScript::new(source, source_conf),
        DriverScript::new(drain, drain_conf),
    ))
}
