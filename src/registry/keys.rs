//! Decomposition of store keys into the entities they belong to.
//!
//! ```text
//! <domain prefix>/<domain>/type
//! <domain prefix>/<domain>/value
//! <domain prefix>/<domain>/settings/<key>[/...]
//! <service prefix>/<service>/<index>/location
//! <service prefix>/<service>/<index>/domain
//! <service prefix>/<service>/<index>/settings/gogeta
//! <service prefix>/<service>/<index>/status/{alive,current,expected}
//! ```

pub const SERVICE_CONFIG_KEY: &str = "gogeta";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainField {
    /// The domain directory itself.
    Root,
    Type,
    Value,
    /// The `settings` directory as a whole.
    Settings,
    /// One entry of `settings`, named by the first segment below it.
    Setting(String),
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainKey {
    pub name: String,
    pub field: DomainField,
}

impl DomainKey {
    pub fn is_settings(&self) -> bool {
        matches!(self.field, DomainField::Settings | DomainField::Setting(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusField {
    Alive,
    Current,
    Expected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceField {
    /// The service directory itself.
    Root,
    /// An instance directory.
    Instance,
    Location,
    Domain,
    Settings(Option<String>),
    Status(Option<StatusField>),
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceKey {
    pub name: String,
    pub index: Option<String>,
    pub field: ServiceField,
}

// segments of `key` below `prefix`, None when the key lives elsewhere
fn segments<'a>(prefix: &str, key: &'a str) -> Option<Vec<&'a str>> {
    let rest = key.strip_prefix(prefix.trim_end_matches('/'))?;
    let rest = rest.strip_prefix('/')?;
    let segments: Vec<&str> = rest.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    Some(segments)
}

pub fn parse_domain_key(prefix: &str, key: &str) -> Option<DomainKey> {
    let segments = segments(prefix, key)?;
    let field = match &segments[1..] {
        [] => DomainField::Root,
        ["type"] => DomainField::Type,
        ["value"] => DomainField::Value,
        ["settings"] => DomainField::Settings,
        ["settings", setting, ..] => DomainField::Setting(setting.to_string()),
        _ => DomainField::Other,
    };
    Some(DomainKey {
        name: segments[0].to_string(),
        field,
    })
}

pub fn parse_service_key(prefix: &str, key: &str) -> Option<ServiceKey> {
    let segments = segments(prefix, key)?;
    let index = segments.get(1).map(|s| s.to_string());
    let field = match segments.get(2..).unwrap_or(&[]) {
        [] if index.is_none() => ServiceField::Root,
        [] => ServiceField::Instance,
        ["location"] => ServiceField::Location,
        ["domain"] => ServiceField::Domain,
        ["settings"] => ServiceField::Settings(None),
        ["settings", entry, ..] => ServiceField::Settings(Some(entry.to_string())),
        ["status"] => ServiceField::Status(None),
        ["status", "alive"] => ServiceField::Status(Some(StatusField::Alive)),
        ["status", "current"] => ServiceField::Status(Some(StatusField::Current)),
        ["status", "expected"] => ServiceField::Status(Some(StatusField::Expected)),
        _ => ServiceField::Other,
    };
    Some(ServiceKey {
        name: segments[0].to_string(),
        index,
        field,
    })
}

pub fn domain_key(prefix: &str, name: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), name)
}

pub fn service_key(prefix: &str, name: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), name)
}

pub fn instance_key(prefix: &str, name: &str, index: &str) -> String {
    format!("{}/{}/{}", prefix.trim_end_matches('/'), name, index)
}
