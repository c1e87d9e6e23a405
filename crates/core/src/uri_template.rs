//! Resource URI templates.
//!
//! A template such as `notes://{folder}/{id}` is compiled into an anchored
//! regular expression where every `{name}` capture matches exactly one
//! non-empty, `/`-free run of characters. Captured text is returned raw;
//! no percent-decoding is applied.

use crate::error::TemplateError;
use regex::Regex;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct UriTemplate {
    template: String,
    pattern: Regex,
    names: Vec<String>,
}

impl UriTemplate {
    pub fn parse(template: &str) -> Result<Self, TemplateError> {
        let mut pattern = String::from("^");
        let mut names = Vec::new();
        let mut rest = template;
        let mut offset = 0;

        while let Some(open) = rest.find('{') {
            pattern.push_str(&regex::escape(&rest[..open]));

            let after = &rest[open + 1..];
            let close = after
                .find('}')
                .ok_or(TemplateError::Unterminated(offset + open))?;
            let name = &after[..close];
            if !is_identifier(name) {
                return Err(TemplateError::BadName(name.to_string()));
            }

            pattern.push_str(&format!("(?P<{}>[^/]+)", name));
            names.push(name.to_string());

            let consumed = open + 1 + close + 1;
            offset += consumed;
            rest = &rest[consumed..];
        }
        pattern.push_str(&regex::escape(rest));
        pattern.push('$');

        Ok(Self {
            template: template.to_string(),
            pattern: Regex::new(&pattern)?,
            names,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// Capture names in declaration order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Test `uri` against the template, returning the captures on a match.
    pub fn matches(&self, uri: &str) -> Option<HashMap<String, String>> {
        let captures = self.pattern.captures(uri)?;
        Some(
            self.names
                .iter()
                .filter_map(|name| {
                    captures
                        .name(name)
                        .map(|m| (name.clone(), m.as_str().to_string()))
                })
                .collect(),
        )
    }
}

/// One-shot match of `uri` against `template`. An invalid template never matches.
pub fn match_uri(template: &str, uri: &str) -> Option<HashMap<String, String>> {
    UriTemplate::parse(template).ok()?.matches(uri)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
