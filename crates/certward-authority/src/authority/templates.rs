//! SSH client and server configuration templates
//!
//! Templates are handlebars sources rendered in strict mode against a
//! variable tree: `User.*` holds the request data, `Step.SSH.UserKey` and
//! `Step.SSH.HostKey` the CA public keys in `authorized_keys` format.

use base64::{engine::general_purpose::STANDARD, Engine};
use handlebars::Handlebars;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;

use crate::error::{AuthorityError, Result};

/// How the rendered output is meant to be installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateType {
    /// Lines to add to an existing file
    Snippet,
    /// A whole file
    File,
    /// A directory to create
    Directory,
}

/// A configuration template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TemplateType,
    #[serde(default)]
    pub comment: String,
    pub path: String,
    #[serde(default)]
    pub template: String,
}

/// Templates for users and hosts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshTemplates {
    #[serde(default)]
    pub user: Vec<Template>,
    #[serde(default)]
    pub host: Vec<Template>,
}

/// A rendered template
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TemplateOutput {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: TemplateType,
    pub comment: String,
    pub path: String,
    #[serde(serialize_with = "serialize_base64")]
    pub content: Vec<u8>,
}

fn serialize_base64<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

impl Default for SshTemplates {
    fn default() -> Self {
        let t = |name: &str, kind, comment: &str, path: &str, template: &str| Template {
            name: name.to_string(),
            kind,
            comment: comment.to_string(),
            path: path.to_string(),
            template: template.to_string(),
        };

        Self {
            user: vec![
                t(
                    "include",
                    TemplateType::Snippet,
                    "#",
                    "~/.ssh/config",
                    "Host *\n\tInclude {{User.ConfigDir}}/ssh/config\n",
                ),
                t(
                    "config",
                    TemplateType::File,
                    "#",
                    "ssh/config",
                    "Match exec \"certward ssh check-host %h\"\n\tForwardAgent yes\n\tUserKnownHostsFile {{User.ConfigDir}}/ssh/known_hosts\n",
                ),
                t(
                    "known_hosts",
                    TemplateType::File,
                    "#",
                    "ssh/known_hosts",
                    "@cert-authority * {{Step.SSH.HostKey}}\n",
                ),
            ],
            host: vec![
                t(
                    "sshd_config",
                    TemplateType::Snippet,
                    "#",
                    "/etc/ssh/sshd_config",
                    "TrustedUserCAKeys /etc/ssh/ca.pub\nHostCertificate /etc/ssh/{{User.Certificate}}\nHostKey /etc/ssh/{{User.Key}}\n",
                ),
                t(
                    "ca.pub",
                    TemplateType::File,
                    "#",
                    "/etc/ssh/ca.pub",
                    "{{Step.SSH.UserKey}}\n",
                ),
            ],
        }
    }
}

/// Build the variable tree for rendering
pub fn variables(
    data: &HashMap<String, String>,
    user_key: Option<&str>,
    host_key: Option<&str>,
) -> Value {
    let user: Map<String, Value> = data
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    let mut ssh = Map::new();
    if let Some(key) = user_key {
        ssh.insert("UserKey".to_string(), Value::String(key.to_string()));
    }
    if let Some(key) = host_key {
        ssh.insert("HostKey".to_string(), Value::String(key.to_string()));
    }

    serde_json::json!({
        "User": user,
        "Step": { "SSH": ssh },
    })
}

impl Template {
    /// Render against `vars`
    pub fn render(&self, vars: &Value) -> Result<TemplateOutput> {
        self.render_with(&engine(), vars)
    }

    fn render_with(&self, engine: &Handlebars<'static>, vars: &Value) -> Result<TemplateOutput> {
        let content = engine.render_template(&self.template, vars).map_err(|e| {
            AuthorityError::Internal(format!("error rendering template {}: {}", self.name, e))
        })?;

        Ok(TemplateOutput {
            name: self.name.clone(),
            kind: self.kind,
            comment: self.comment.clone(),
            path: self.path.clone(),
            content: content.into_bytes(),
        })
    }
}

/// Render every template in order
pub fn render_all(templates: &[Template], vars: &Value) -> Result<Vec<TemplateOutput>> {
    let engine = engine();
    templates.iter().map(|t| t.render_with(&engine, vars)).collect()
}

/// Strict so a missing variable fails the render; outputs are config files,
/// not HTML, so nothing is escaped
fn engine() -> Handlebars<'static> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars
}
