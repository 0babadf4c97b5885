// src/command/catalog.rs

//! The set of task kinds the builder can translate.

use std::collections::{BTreeMap, BTreeSet};

use crate::types::RecognitionKind;

/// How a parameter lands on the engine's command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgStyle {
    /// Bare value, in field declaration order.
    Positional,
    /// `--flag value`; list values repeat the flag.
    Option(&'static str),
    /// `--flag`, emitted only for a true value.
    Switch(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub style: ArgStyle,
    /// Comma-separated text is split into one argument per token.
    pub list: bool,
}

const fn positional(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        style: ArgStyle::Positional,
        list: false,
    }
}

const fn option(name: &'static str, flag: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        style: ArgStyle::Option(flag),
        list: false,
    }
}

const fn switch(name: &'static str, flag: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        style: ArgStyle::Switch(flag),
        list: false,
    }
}

/// One of the engine's named built-in commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandSpec {
    pub kind: &'static str,
    pub command: &'static str,
    pub fields: &'static [FieldSpec],
    pub launches_app: bool,
    pub recognition: Option<RecognitionKind>,
}

impl CommandSpec {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Built-in engine commands. This list is closed: anything else must be
/// declared as a [`Capability`].
pub static BUILTIN_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        kind: "startup",
        command: "startup",
        fields: &[positional("client_type"), option("account", "--account")],
        launches_app: true,
        recognition: None,
    },
    CommandSpec {
        kind: "closedown",
        command: "closedown",
        fields: &[positional("client_type")],
        launches_app: false,
        recognition: None,
    },
    CommandSpec {
        kind: "fight",
        command: "fight",
        fields: &[
            positional("stage"),
            option("medicine", "-m"),
            option("expiring_medicine", "--expiring-medicine"),
            option("stone", "-s"),
            option("times", "--times"),
            option("series", "--series"),
            switch("report_to_penguin", "--report-to-penguin"),
        ],
        launches_app: false,
        recognition: None,
    },
    CommandSpec {
        kind: "roguelike",
        command: "roguelike",
        fields: &[
            positional("theme"),
            option("mode", "--mode"),
            option("squad", "--squad"),
            option("core_char", "--core-char"),
            option("start_count", "--start-count"),
        ],
        launches_app: false,
        recognition: None,
    },
    CommandSpec {
        kind: "copilot",
        command: "copilot",
        fields: &[
            FieldSpec {
                name: "uri",
                style: ArgStyle::Positional,
                list: true,
            },
            switch("formation", "--formation"),
            switch("use_sanity_potion", "--use-sanity-potion"),
        ],
        launches_app: false,
        recognition: None,
    },
    CommandSpec {
        kind: "depot",
        command: "depot",
        fields: &[],
        launches_app: false,
        recognition: Some(RecognitionKind::Inventory),
    },
    CommandSpec {
        kind: "operbox",
        command: "operbox",
        fields: &[],
        launches_app: false,
        recognition: Some(RecognitionKind::Roster),
    },
];

pub fn builtin(kind: &str) -> Option<&'static CommandSpec> {
    BUILTIN_COMMANDS.iter().find(|c| c.kind == kind)
}

/// A dynamically configured capability, translated into a structured
/// descriptor instead of command-line flags.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Capability {
    pub kind: String,
    /// Engine-side type tag (e.g. `"Infrast"`).
    pub type_tag: String,
    /// Fields never coerced to numbers (`mode = "0"` stays text).
    pub keep_as_text: BTreeSet<String>,
    /// Fields whose comma-separated text becomes a list.
    pub list_fields: BTreeSet<String>,
    pub launches_app: bool,
    pub recognition: Option<RecognitionKind>,
}

impl Capability {
    pub fn new(kind: impl Into<String>, type_tag: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            type_tag: type_tag.into(),
            ..Self::default()
        }
    }

    pub fn keep_as_text(mut self, field: &str) -> Self {
        self.keep_as_text.insert(field.to_string());
        self
    }

    pub fn list_field(mut self, field: &str) -> Self {
        self.list_fields.insert(field.to_string());
        self
    }
}

/// Resolved catalog entry for a kind.
#[derive(Debug, Clone, Copy)]
pub enum CatalogEntry<'a> {
    Builtin(&'static CommandSpec),
    Capability(&'a Capability),
}

impl CatalogEntry<'_> {
    pub fn launches_app(&self) -> bool {
        match self {
            CatalogEntry::Builtin(c) => c.launches_app,
            CatalogEntry::Capability(c) => c.launches_app,
        }
    }

    pub fn recognition(&self) -> Option<RecognitionKind> {
        match self {
            CatalogEntry::Builtin(c) => c.recognition,
            CatalogEntry::Capability(c) => c.recognition,
        }
    }
}

/// Every kind the builder accepts: built-ins plus configured capabilities.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    capabilities: BTreeMap<String, Capability>,
}

impl Catalog {
    /// Built-in commands only.
    pub fn builtin() -> Self {
        Self::default()
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.insert(capability);
        self
    }

    pub fn insert(&mut self, capability: Capability) {
        self.capabilities.insert(capability.kind.clone(), capability);
    }

    pub fn lookup(&self, kind: &str) -> Option<CatalogEntry<'_>> {
        if let Some(spec) = builtin(kind) {
            return Some(CatalogEntry::Builtin(spec));
        }
        self.capabilities.get(kind).map(CatalogEntry::Capability)
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.lookup(kind).is_some()
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        BUILTIN_COMMANDS
            .iter()
            .map(|c| c.kind)
            .chain(self.capabilities.keys().map(String::as_str))
    }
}
