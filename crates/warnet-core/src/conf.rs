//! INI-style node configuration.
//!
//! Node configs are key/value lines grouped under optional `[section]`
//! headers. Keys may repeat, so entries are kept as ordered pairs rather than
//! a map. The same config can also be carried inside a graph document in a
//! compact comma-separated form (`debug=net,listen,uacomment=w0`), where a bare
//! key means `key=1`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A named group of entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfSection {
    /// Section name without brackets.
    pub name: String,
    /// Entries in file order.
    pub entries: Vec<(String, String)>,
}

/// A parsed node configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConf {
    global: Vec<(String, String)>,
    sections: Vec<ConfSection>,
}

impl NodeConf {
    /// Creates an empty config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses INI text. Blank lines, `#` comments and lines without `=` are skipped.
    pub fn parse(text: &str) -> Self {
        let mut conf = Self::new();
        let mut current: Option<String> = None;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                let name = line[1..line.len() - 1].trim().to_string();
                conf.section_mut(&name);
                current = Some(name);
            } else if let Some((key, value)) = line.split_once('=') {
                conf.push(current.as_deref(), key.trim(), value.trim());
            }
        }
        conf
    }

    /// Parses the compact comma-separated form into `section`.
    pub fn parse_options(options: &str, section: Option<&str>) -> Self {
        let mut conf = Self::new();
        for option in options.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            match option.split_once('=') {
                Some((key, value)) => conf.push(section, key.trim(), value.trim()),
                None => conf.push(section, option, "1"),
            }
        }
        conf
    }

    /// Parses an overlay in either form.
    ///
    /// Text containing newlines or section headers is read as INI; anything
    /// else is the compact form and lands in `default_section`.
    pub fn parse_overlay(text: &str, default_section: Option<&str>) -> Self {
        if text.contains('\n') || text.trim_start().starts_with('[') {
            Self::parse(text)
        } else {
            Self::parse_options(text, default_section)
        }
    }

    fn entries_mut(&mut self, section: Option<&str>) -> &mut Vec<(String, String)> {
        match section {
            None => &mut self.global,
            Some(name) => &mut self.section_mut(name).entries,
        }
    }

    fn section_mut(&mut self, name: &str) -> &mut ConfSection {
        let index = match self.sections.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                self.sections.push(ConfSection {
                    name: name.to_string(),
                    entries: Vec::new(),
                });
                self.sections.len() - 1
            }
        };
        &mut self.sections[index]
    }

    /// Appends an entry, keeping any existing values for the key.
    pub fn push(&mut self, section: Option<&str>, key: &str, value: &str) {
        self.entries_mut(section)
            .push((key.to_string(), value.to_string()));
    }

    /// Replaces every value of `key` in `section` with a single value.
    pub fn set(&mut self, section: Option<&str>, key: &str, value: &str) {
        let entries = self.entries_mut(section);
        entries.retain(|(k, _)| k != key);
        entries.push((key.to_string(), value.to_string()));
    }

    fn entries(&self, section: Option<&str>) -> &[(String, String)] {
        match section {
            None => &self.global,
            Some(name) => self
                .sections
                .iter()
                .find(|s| s.name == name)
                .map(|s| s.entries.as_slice())
                .unwrap_or(&[]),
        }
    }

    /// All values of `key` in `section`, in order.
    pub fn get_all<'a, 'k>(
        &'a self,
        section: Option<&str>,
        key: &'k str,
    ) -> impl Iterator<Item = &'a str> + 'k
    where
        'a: 'k,
    {
        self.entries(section)
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// The last value of `key` in `section`.
    pub fn get<'a>(&'a self, section: Option<&str>, key: &str) -> Option<&'a str> {
        self.entries(section)
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Named sections in first-seen order.
    pub fn sections(&self) -> &[ConfSection] {
        &self.sections
    }

    /// Merges `overlay` on top of `self`, section by section.
    ///
    /// Keys present in an overlay section replace all values of that key in
    /// the same base section. Keys the overlay does not mention are kept.
    pub fn merge(&self, overlay: &NodeConf) -> NodeConf {
        let mut merged = self.clone();
        merge_entries(&mut merged.global, &overlay.global);
        for section in &overlay.sections {
            let target = &mut merged.section_mut(&section.name).entries;
            merge_entries(target, &section.entries);
        }
        merged
    }

    /// Flattens every entry into the compact comma-separated form.
    pub fn to_options(&self) -> String {
        self.global
            .iter()
            .chain(self.sections.iter().flat_map(|s| s.entries.iter()))
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn merge_entries(base: &mut Vec<(String, String)>, overlay: &[(String, String)]) {
    base.retain(|(key, _)| !overlay.iter().any(|(k, _)| k == key));
    base.extend(overlay.iter().cloned());
}

impl fmt::Display for NodeConf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut lines: Vec<String> = self.global.iter().map(|(k, v)| format!("{k}={v}")).collect();
        for section in &self.sections {
            lines.push(format!("\n[{}]", section.name));
            lines.extend(section.entries.iter().map(|(k, v)| format!("{k}={v}")));
        }
        write!(f, "{}", lines.join("\n"))
    }
}
