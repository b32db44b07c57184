use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;

use crate::ir::{Class, Method};

/// Project-wide class index keyed by internal class name.
pub(crate) struct ClassIndex<'a> {
    classes: BTreeMap<&'a str, &'a Class>,
    enum_types: BTreeSet<&'a str>,
}

impl<'a> ClassIndex<'a> {
    /// Index the complete class set delivered by the crawler.
    ///
    /// Fails when the same class name appears more than once, since every
    /// cross-class lookup assumes one definition per name.
    pub(crate) fn build(classes: &'a [Class]) -> Result<Self> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for class in classes {
            *counts.entry(class.name.as_str()).or_default() += 1;
        }
        let duplicates: Vec<String> = counts
            .iter()
            .filter(|(_, count)| **count > 1)
            .map(|(name, count)| format!("{name} (x{count})"))
            .collect();
        if !duplicates.is_empty() {
            anyhow::bail!("duplicate classes found: {}", duplicates.join(", "));
        }

        let index = classes
            .iter()
            .map(|class| (class.name.as_str(), class))
            .collect();
        let enum_types = classes
            .iter()
            .filter(|class| class.access.is_enum)
            .map(|class| class.name.as_str())
            .collect();
        Ok(Self {
            classes: index,
            enum_types,
        })
    }

    pub(crate) fn get(&self, name: &str) -> Option<&'a Class> {
        self.classes.get(name).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.classes.len()
    }

    pub(crate) fn is_enum_type(&self, name: &str) -> bool {
        self.enum_types.contains(name)
    }

    pub(crate) fn enum_type_count(&self) -> usize {
        self.enum_types.len()
    }

    /// Whether a method with the same signature is declared by any indexed
    /// super class or interface of `class`.
    pub(crate) fn overrides_inherited(&self, class: &Class, method: &Method) -> bool {
        let mut pending: Vec<&str> = class
            .super_name
            .iter()
            .map(String::as_str)
            .chain(class.interfaces.iter().map(String::as_str))
            .collect();
        let mut seen = BTreeSet::new();
        while let Some(name) = pending.pop() {
            if !seen.insert(name) {
                continue;
            }
            let Some(parent) = self.get(name) else {
                continue;
            };
            if parent.method(&method.name, &method.descriptor).is_some() {
                return true;
            }
            if let Some(super_name) = &parent.super_name {
                pending.push(super_name);
            }
            pending.extend(parent.interfaces.iter().map(String::as_str));
        }
        false
    }

    /// Whether any super type of `class` is missing from the index.
    pub(crate) fn has_unresolved_super_types(&self, class: &Class) -> bool {
        let mut pending: Vec<&str> = class
            .super_name
            .iter()
            .map(String::as_str)
            .chain(class.interfaces.iter().map(String::as_str))
            .collect();
        let mut seen = BTreeSet::new();
        while let Some(name) = pending.pop() {
            if !seen.insert(name) || name == "java/lang/Object" {
                continue;
            }
            let Some(parent) = self.get(name) else {
                return true;
            };
            if let Some(super_name) = &parent.super_name {
                pending.push(super_name);
            }
            pending.extend(parent.interfaces.iter().map(String::as_str));
        }
        false
    }
}
