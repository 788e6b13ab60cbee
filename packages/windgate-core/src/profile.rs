//! Gate profiles: which providers serve a gate and how they are configured.
//!
//! Profiles are read from flat property maps:
//!
//! ```text
//! core.maxProcesses = 4
//! session = file
//! session.directory = ${HOME}/.windgate/sessions
//! resource.local = file
//! resource.local.basePath = /var/data
//! process.plain = plain
//! ```
//!
//! Configuration values are kept verbatim; providers expand `${...}` against
//! the profile context parameters when they are built.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::ProfileContext;
use crate::error::{GateError, Result};
use crate::process::ProcessProvider;
use crate::resource::ResourceProvider;
use crate::session::SessionProvider;

pub type Properties = BTreeMap<String, String>;

pub const QUALIFIER: char = '.';
pub const KEY_CORE_PREFIX: &str = "core.";
pub const KEY_MAX_PROCESSES: &str = "maxProcesses";
pub const KEY_SESSION: &str = "session";
pub const KEY_RESOURCE_PREFIX: &str = "resource.";
pub const KEY_PROCESS_PREFIX: &str = "process.";

pub const DEFAULT_MAX_PROCESSES: usize = 1;

/// Core settings shared by every part of a gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoreProfile {
    max_processes: usize,
}

impl Default for CoreProfile {
    fn default() -> Self {
        Self {
            max_processes: DEFAULT_MAX_PROCESSES,
        }
    }
}

impl CoreProfile {
    pub fn new(max_processes: usize) -> Result<Self> {
        if max_processes == 0 {
            return Err(GateError::config(
                "core.maxProcesses must be a positive integer",
            ));
        }
        Ok(Self { max_processes })
    }

    pub fn max_processes(&self) -> usize {
        self.max_processes
    }

    fn load_from(properties: &Properties) -> Result<Self> {
        let mut profile = Self::default();
        for (key, value) in prefixed(properties, KEY_CORE_PREFIX) {
            match key {
                KEY_MAX_PROCESSES => {
                    let count = value.trim().parse::<usize>().map_err(|_| {
                        GateError::config(format!(
                            "core.maxProcesses must be a positive integer: {}",
                            value
                        ))
                    })?;
                    profile = Self::new(count)?;
                }
                _ => warn!("Unknown core property: {}{}", KEY_CORE_PREFIX, key),
            }
        }
        Ok(profile)
    }

    fn store_to(&self, entries: &mut Vec<(String, String)>) {
        entries.push((
            format!("{}{}", KEY_CORE_PREFIX, KEY_MAX_PROCESSES),
            self.max_processes.to_string(),
        ));
    }
}

/// Profile of the session provider.
#[derive(Debug, Clone)]
pub struct SessionProfile {
    provider: String,
    configuration: BTreeMap<String, String>,
    context: ProfileContext,
}

impl SessionProfile {
    pub fn new(
        provider: impl Into<String>,
        configuration: BTreeMap<String, String>,
        context: ProfileContext,
    ) -> Self {
        Self {
            provider: provider.into(),
            configuration,
            context,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn configuration(&self) -> &BTreeMap<String, String> {
        &self.configuration
    }

    pub fn context(&self) -> &ProfileContext {
        &self.context
    }

    /// Configuration value with `${...}` expanded against the context parameters.
    pub fn expanded(&self, key: &str) -> Result<Option<String>> {
        expand(&self.context, &self.configuration, key)
    }

    pub fn create_provider(&self) -> Result<Arc<dyn SessionProvider>> {
        debug!("Loading session provider: {}", self.provider);
        let factory = self
            .context
            .resolver()
            .session_factory(&self.provider)
            .ok_or_else(|| unknown_provider("session", &self.provider))?;
        factory(self)
    }

    fn load_from(properties: &Properties, context: &ProfileContext) -> Result<Self> {
        let provider = properties
            .get(KEY_SESSION)
            .ok_or_else(|| GateError::config("Session provider (\"session\") is not defined"))?;
        let prefix = format!("{}{}", KEY_SESSION, QUALIFIER);
        let configuration = prefixed(properties, &prefix)
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let profile = Self::new(provider.trim(), configuration, context.clone());
        if context.resolver().session_factory(&profile.provider).is_none() {
            return Err(unknown_provider("session", &profile.provider));
        }
        Ok(profile)
    }

    fn store_to(&self, entries: &mut Vec<(String, String)>) {
        entries.push((KEY_SESSION.to_string(), self.provider.clone()));
        for (k, v) in &self.configuration {
            entries.push((format!("{}{}{}", KEY_SESSION, QUALIFIER, k), v.clone()));
        }
    }
}

/// Profile of one named resource.
#[derive(Debug, Clone)]
pub struct ResourceProfile {
    name: String,
    provider: String,
    configuration: BTreeMap<String, String>,
    context: ProfileContext,
}

impl ResourceProfile {
    pub fn new(
        name: impl Into<String>,
        provider: impl Into<String>,
        configuration: BTreeMap<String, String>,
        context: ProfileContext,
    ) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            configuration,
            context,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn configuration(&self) -> &BTreeMap<String, String> {
        &self.configuration
    }

    pub fn context(&self) -> &ProfileContext {
        &self.context
    }

    pub fn expanded(&self, key: &str) -> Result<Option<String>> {
        expand(&self.context, &self.configuration, key)
    }

    pub fn create_provider(&self) -> Result<Arc<dyn ResourceProvider>> {
        debug!(
            "Loading resource provider \"{}\": {}",
            self.name, self.provider
        );
        let factory = self
            .context
            .resolver()
            .resource_factory(&self.provider)
            .ok_or_else(|| unknown_provider("resource", &self.provider))?;
        factory(self)
    }

    fn load_all(properties: &Properties, context: &ProfileContext) -> Result<Vec<Self>> {
        load_named(properties, KEY_RESOURCE_PREFIX)?
            .into_iter()
            .map(|(name, (provider, configuration))| {
                if context.resolver().resource_factory(&provider).is_none() {
                    return Err(unknown_provider("resource", &provider));
                }
                Ok(Self::new(name, provider, configuration, context.clone()))
            })
            .collect()
    }

    fn store_to(&self, entries: &mut Vec<(String, String)>) {
        store_named(
            KEY_RESOURCE_PREFIX,
            &self.name,
            &self.provider,
            &self.configuration,
            entries,
        );
    }
}

/// Profile of one process type.
#[derive(Debug, Clone)]
pub struct ProcessProfile {
    name: String,
    provider: String,
    configuration: BTreeMap<String, String>,
    context: ProfileContext,
}

impl ProcessProfile {
    pub fn new(
        name: impl Into<String>,
        provider: impl Into<String>,
        configuration: BTreeMap<String, String>,
        context: ProfileContext,
    ) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            configuration,
            context,
        }
    }

    /// Process type served by this profile.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn configuration(&self) -> &BTreeMap<String, String> {
        &self.configuration
    }

    pub fn context(&self) -> &ProfileContext {
        &self.context
    }

    pub fn create_provider(&self) -> Result<Arc<dyn ProcessProvider>> {
        debug!(
            "Loading process provider \"{}\": {}",
            self.name, self.provider
        );
        let factory = self
            .context
            .resolver()
            .process_factory(&self.provider)
            .ok_or_else(|| unknown_provider("process", &self.provider))?;
        factory(self)
    }

    fn load_all(properties: &Properties, context: &ProfileContext) -> Result<Vec<Self>> {
        load_named(properties, KEY_PROCESS_PREFIX)?
            .into_iter()
            .map(|(name, (provider, configuration))| {
                if context.resolver().process_factory(&provider).is_none() {
                    return Err(unknown_provider("process", &provider));
                }
                Ok(Self::new(name, provider, configuration, context.clone()))
            })
            .collect()
    }

    fn store_to(&self, entries: &mut Vec<(String, String)>) {
        store_named(
            KEY_PROCESS_PREFIX,
            &self.name,
            &self.provider,
            &self.configuration,
            entries,
        );
    }
}

/// Complete profile of a gate.
#[derive(Debug, Clone)]
pub struct GateProfile {
    name: String,
    core: CoreProfile,
    session: SessionProfile,
    resources: Vec<ResourceProfile>,
    processes: Vec<ProcessProfile>,
}

impl GateProfile {
    /// Resource names and process names must each be unique.
    pub fn new(
        name: impl Into<String>,
        core: CoreProfile,
        session: SessionProfile,
        resources: Vec<ResourceProfile>,
        processes: Vec<ProcessProfile>,
    ) -> Result<Self> {
        check_unique("resource", resources.iter().map(|r| r.name()))?;
        check_unique("process", processes.iter().map(|p| p.name()))?;
        Ok(Self {
            name: name.into(),
            core,
            session,
            resources,
            processes,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn core(&self) -> &CoreProfile {
        &self.core
    }

    pub fn session(&self) -> &SessionProfile {
        &self.session
    }

    pub fn resources(&self) -> &[ResourceProfile] {
        &self.resources
    }

    pub fn processes(&self) -> &[ProcessProfile] {
        &self.processes
    }

    pub fn load_from(
        name: impl Into<String>,
        properties: &Properties,
        context: &ProfileContext,
    ) -> Result<Self> {
        let name = name.into();
        debug!("Loading gate profile: {}", name);
        let core = CoreProfile::load_from(properties)?;
        let session = SessionProfile::load_from(properties, context)?;
        let resources = ResourceProfile::load_all(properties, context)?;
        let processes = ProcessProfile::load_all(properties, context)?;

        let session_prefix = format!("{}{}", KEY_SESSION, QUALIFIER);
        for key in properties.keys() {
            let known = key == KEY_SESSION
                || key.starts_with(KEY_CORE_PREFIX)
                || key.starts_with(&session_prefix)
                || key.starts_with(KEY_RESOURCE_PREFIX)
                || key.starts_with(KEY_PROCESS_PREFIX);
            if !known {
                warn!("Unknown profile property in {}: {}", name, key);
            }
        }

        Self::new(name, core, session, resources, processes)
    }

    pub fn store_to(&self, properties: &mut Properties) -> Result<()> {
        let mut entries = Vec::new();
        self.core.store_to(&mut entries);
        self.session.store_to(&mut entries);
        for resource in &self.resources {
            resource.store_to(&mut entries);
        }
        for process in &self.processes {
            process.store_to(&mut entries);
        }
        if let Some((conflict, _)) = entries.iter().find(|(k, _)| properties.contains_key(k)) {
            return Err(GateError::config(format!(
                "Profile property \"{}\" is already defined",
                conflict
            )));
        }
        properties.extend(entries);
        Ok(())
    }
}

/// Reads a properties file (`key=value` or `key: value`, `#`/`!` comments).
pub async fn load_properties(path: impl AsRef<Path>) -> Result<Properties> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path).await?;
    debug!("Loaded properties: {}", path.display());
    Ok(parse_properties(&content))
}

pub fn parse_properties(content: &str) -> Properties {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#') && !line.starts_with('!'))
        .map(|line| match line.find(|c: char| c == '=' || c == ':') {
            Some(at) => (
                line[..at].trim().to_string(),
                line[at + 1..].trim().to_string(),
            ),
            None => (line.to_string(), String::new()),
        })
        .collect()
}

fn prefixed<'a>(
    properties: &'a Properties,
    prefix: &'a str,
) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
    properties
        .iter()
        .filter_map(move |(k, v)| k.strip_prefix(prefix).map(|rest| (rest, v.as_str())))
}

type NamedEntry = (String, BTreeMap<String, String>);

fn load_named(properties: &Properties, prefix: &str) -> Result<BTreeMap<String, NamedEntry>> {
    let mut providers: BTreeMap<String, String> = BTreeMap::new();
    let mut configurations: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for (rest, value) in prefixed(properties, prefix) {
        let (name, conf) = match rest.split_once(QUALIFIER) {
            Some((name, conf)) => (name, Some(conf)),
            None => (rest, None),
        };
        if !is_identifier(name) {
            return Err(GateError::config(format!(
                "Invalid name \"{}\" in \"{}{}\"",
                name, prefix, rest
            )));
        }
        match conf {
            Some(conf) => {
                configurations
                    .entry(name.to_string())
                    .or_default()
                    .insert(conf.to_string(), value.to_string());
            }
            None => {
                providers.insert(name.to_string(), value.trim().to_string());
            }
        }
    }
    if let Some(orphan) = configurations.keys().find(|n| !providers.contains_key(*n)) {
        return Err(GateError::config(format!(
            "Provider for \"{}{}\" is not defined",
            prefix, orphan
        )));
    }
    Ok(providers
        .into_iter()
        .map(|(name, provider)| {
            let conf = configurations.remove(&name).unwrap_or_default();
            (name, (provider, conf))
        })
        .collect())
}

fn store_named(
    prefix: &str,
    name: &str,
    provider: &str,
    configuration: &BTreeMap<String, String>,
    entries: &mut Vec<(String, String)>,
) {
    entries.push((format!("{}{}", prefix, name), provider.to_string()));
    for (k, v) in configuration {
        entries.push((format!("{}{}{}{}", prefix, name, QUALIFIER, k), v.clone()));
    }
}

fn expand(
    context: &ProfileContext,
    configuration: &BTreeMap<String, String>,
    key: &str,
) -> Result<Option<String>> {
    configuration
        .get(key)
        .map(|v| context.parameters().replace(v, true))
        .transpose()
}

fn check_unique<'a>(kind: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = std::collections::BTreeSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(GateError::config(format!(
                "Duplicate {} name: {}",
                kind, name
            )));
        }
    }
    Ok(())
}

fn unknown_provider(kind: &str, provider: &str) -> GateError {
    GateError::config(format!("Unknown {} provider: {}", kind, provider))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
